//! On-disk formats of the resources stored in a database. Binary files start with a
//! [`ResourcePreamble`]; descriptors are plain JSON.

pub(crate) mod bytes;
mod preamble;
mod mesh_file;
mod texture_file;
mod skeleton_file;
mod animation_file;
mod descriptors;

pub use preamble::{
    read_preamble, validate_preamble, write_preamble, ResourcePreamble, MAGIC, PREAMBLE_SIZE,
};
pub use mesh_file::*;
pub use texture_file::*;
pub use skeleton_file::*;
pub use animation_file::*;
pub use descriptors::*;

use strata_base::{kinds, ResourceKind, StrataError, StrataResult};

/// Fully validates a resource of the given kind, as stored in the ledger
pub fn validate_resource(
    resource_kind: ResourceKind,
    bytes: &[u8],
) -> StrataResult<()> {
    if resource_kind == kinds::STATIC_MESH || resource_kind == kinds::SKINNED_MESH {
        let file = MeshFile::open(bytes)?;
        if file.resource_kind() != resource_kind {
            return Err(StrataError::InvalidResourceFile(format!(
                "Ledger says {} but the file holds a {}",
                resource_kind,
                mesh_resource_kind(file.header().layout)
            )));
        }
    } else if resource_kind == kinds::TEXTURE {
        TextureFile::open(bytes)?;
    } else if resource_kind == kinds::SKELETON {
        SkeletonFile::open(bytes)?;
    } else if resource_kind == kinds::ANIMATION {
        AnimationFile::open(bytes)?;
    } else if resource_kind == kinds::MATERIAL {
        read_descriptor::<MaterialDescriptor>(bytes)?;
    } else if resource_kind == kinds::MESH_DESC {
        read_descriptor::<MeshDescDescriptor>(bytes)?;
    } else if resource_kind == kinds::SCENE {
        read_descriptor::<SceneDescriptor>(bytes)?.validate()?;
    } else {
        return Err(StrataError::InvalidResourceFile(format!(
            "Unknown resource kind {}",
            resource_kind
        )));
    }

    Ok(())
}
