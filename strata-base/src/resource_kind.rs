use std::fmt;
use std::hash::{Hash, Hasher};

/// Tag identifying the kind of a resource (or of a resource file). Stored on disk as the 32-bit
/// FNV-1a hash of the kind name, so it is stable across builds and platforms.
///
/// The name is kept alongside the hash when available as a debugging aid. Kinds read back from
/// disk only know their hash.
#[derive(Clone, Copy)]
pub struct ResourceKind {
    hash: u32,
    name: Option<&'static str>,
}

impl ResourceKind {
    /// Returned for lookups of resources that do not exist
    pub const NULL: ResourceKind = ResourceKind {
        hash: 0,
        name: Some("NullResource"),
    };

    pub const fn from_static_str(s: &'static str) -> Self {
        let hash = if s.is_empty() {
            0u32
        } else {
            const_fnv1a_hash::fnv1a_hash_str_32(s)
        };

        ResourceKind {
            hash,
            name: Some(s),
        }
    }

    pub fn from_runtime_str(s: &str) -> Self {
        let hash = if s.is_empty() {
            0u32
        } else {
            const_fnv1a_hash::fnv1a_hash_str_32(s)
        };

        // Recover the name if this is one of the kinds we know about
        let name = WELL_KNOWN_KINDS
            .iter()
            .find(|kind| kind.hash == hash)
            .and_then(|kind| kind.name);

        ResourceKind { hash, name }
    }

    pub fn from_hash(hash: u32) -> Self {
        let name = WELL_KNOWN_KINDS
            .iter()
            .find(|kind| kind.hash == hash)
            .and_then(|kind| kind.name);

        ResourceKind { hash, name }
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    pub fn is_null(&self) -> bool {
        self.hash == 0
    }
}

impl fmt::Debug for ResourceKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("ResourceKind")
            .field("hash", &format!("{:0>8x}", self.hash))
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self.name {
            Some(name) => f.write_str(name),
            None => write!(f, "{:0>8x}", self.hash),
        }
    }
}

impl PartialEq for ResourceKind {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.hash.eq(&other.hash)
    }
}

impl Eq for ResourceKind {}

impl Hash for ResourceKind {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        self.hash.hash(state);
    }
}

pub mod kinds {
    use super::ResourceKind;

    pub const SCENE: ResourceKind = ResourceKind::from_static_str("Scene");
    pub const STATIC_MESH: ResourceKind = ResourceKind::from_static_str("StaticMesh");
    pub const SKINNED_MESH: ResourceKind = ResourceKind::from_static_str("SkinnedMesh");
    pub const TEXTURE: ResourceKind = ResourceKind::from_static_str("Texture");
    pub const ANIMATION: ResourceKind = ResourceKind::from_static_str("Animation");
    pub const SKELETON: ResourceKind = ResourceKind::from_static_str("Skeleton");
    pub const MATERIAL: ResourceKind = ResourceKind::from_static_str("Material");
    pub const MESH_DESC: ResourceKind = ResourceKind::from_static_str("MeshDesc");
}

const WELL_KNOWN_KINDS: [ResourceKind; 9] = [
    ResourceKind::NULL,
    kinds::SCENE,
    kinds::STATIC_MESH,
    kinds::SKINNED_MESH,
    kinds::TEXTURE,
    kinds::ANIMATION,
    kinds::SKELETON,
    kinds::MATERIAL,
    kinds::MESH_DESC,
];

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kind_hash_is_fnv1a() {
        // Reference values for 32-bit FNV-1a
        assert_eq!(ResourceKind::from_static_str("a").hash(), 0xe40c292c);
        assert_eq!(ResourceKind::from_static_str("foobar").hash(), 0xbf9cf968);
    }

    #[test]
    fn kinds_are_distinct() {
        for (i, a) in WELL_KNOWN_KINDS.iter().enumerate() {
            for b in &WELL_KNOWN_KINDS[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn kind_name_recovered_from_hash() {
        let kind = ResourceKind::from_hash(kinds::TEXTURE.hash());
        assert_eq!(kind, kinds::TEXTURE);
        assert_eq!(kind.name(), Some("Texture"));
        assert_eq!(ResourceKind::from_runtime_str("Skeleton"), kinds::SKELETON);
        assert!(ResourceKind::from_hash(0).is_null());
        assert_eq!(ResourceKind::from_hash(7).name(), None);
    }
}
