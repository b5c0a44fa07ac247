use crate::{StrataError, StrataResult};
use std::fmt;
use std::path::{Path, PathBuf};

/// Longest path (in bytes) that fits into a ledger row
pub const MAX_RESOURCE_PATH_LENGTH: usize = 91;
pub const MAX_DIRECTORY_LENGTH: usize = 64;
pub const MAX_EXTENSION_LENGTH: usize = 8;
const DEFAULT_RESOURCE_NAME: &str = "Unnamed";

/// Path of a resource file relative to the database root. Always `/`-separated and at most
/// `MAX_RESOURCE_PATH_LENGTH` bytes long.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourcePath(String);

impl ResourcePath {
    pub fn new(path: impl Into<String>) -> StrataResult<Self> {
        let path = path.into();
        if path.len() > MAX_RESOURCE_PATH_LENGTH {
            return Err(StrataError::InvalidPathHint(format!(
                "Resource path \"{}\" is longer than {} bytes",
                path, MAX_RESOURCE_PATH_LENGTH
            )));
        }

        Ok(ResourcePath(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Joins the relative path onto a root directory
    pub fn to_filesystem_path(
        &self,
        root: &Path,
    ) -> PathBuf {
        let mut path = root.to_path_buf();
        for component in self.0.split('/') {
            path.push(component);
        }
        path
    }
}

impl fmt::Debug for ResourcePath {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Desired location of a new resource. The final path may differ: the name can be truncated and
/// a version suffix is added when the plain path is already taken.
#[derive(Debug, Clone, Default)]
pub struct ResourcePathHint {
    pub directory: String,
    pub name: String,
    pub extension: String,
}

impl ResourcePathHint {
    pub fn new(
        directory: impl Into<String>,
        name: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        ResourcePathHint {
            directory: directory.into(),
            name: name.into(),
            extension: extension.into(),
        }
    }
}

// Longest prefix of s that is at most max_len bytes and ends on a char boundary
fn truncate_to_char_boundary(
    s: &str,
    max_len: usize,
) -> &str {
    if s.len() <= max_len {
        return s;
    }

    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Builds `<directory>/<name>[.<version>].<extension>` from a hint. Version 0 has no suffix,
/// other versions are zero-padded to three digits. The name is truncated so that the whole path
/// fits into a ledger row.
pub fn versioned_resource_path(
    hint: &ResourcePathHint,
    version: u32,
) -> StrataResult<ResourcePath> {
    if hint.directory.len() > MAX_DIRECTORY_LENGTH {
        return Err(StrataError::InvalidPathHint(format!(
            "Directory \"{}\" is longer than {} bytes",
            hint.directory, MAX_DIRECTORY_LENGTH
        )));
    }

    if hint.extension.len() > MAX_EXTENSION_LENGTH {
        return Err(StrataError::InvalidPathHint(format!(
            "Extension \"{}\" is longer than {} bytes",
            hint.extension, MAX_EXTENSION_LENGTH
        )));
    }

    let name = if hint.name.is_empty() {
        DEFAULT_RESOURCE_NAME
    } else {
        hint.name.as_str()
    };

    let version_suffix = if version == 0 {
        String::new()
    } else {
        format!(".{:03}", version)
    };

    let directory_length = if hint.directory.is_empty() {
        0
    } else {
        hint.directory.len() + 1
    };

    // The +1 is the dot before the extension
    let reserved = directory_length + version_suffix.len() + 1 + hint.extension.len();
    let allowed_name_length = MAX_RESOURCE_PATH_LENGTH.saturating_sub(reserved);
    let name = truncate_to_char_boundary(name, allowed_name_length);

    let path = if hint.directory.is_empty() {
        format!("{}{}.{}", name, version_suffix, hint.extension)
    } else {
        format!(
            "{}/{}{}.{}",
            hint.directory, name, version_suffix, hint.extension
        )
    };

    ResourcePath::new(path)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn versioned_paths() {
        let hint = ResourcePathHint::new("textures", "rock", "jtxtr");
        assert_eq!(
            versioned_resource_path(&hint, 0).unwrap().as_str(),
            "textures/rock.jtxtr"
        );
        assert_eq!(
            versioned_resource_path(&hint, 1).unwrap().as_str(),
            "textures/rock.001.jtxtr"
        );
        assert_eq!(
            versioned_resource_path(&hint, 42).unwrap().as_str(),
            "textures/rock.042.jtxtr"
        );
    }

    #[test]
    fn empty_name_is_unnamed() {
        let hint = ResourcePathHint::new("meshes", "", "jmesh");
        assert_eq!(
            versioned_resource_path(&hint, 0).unwrap().as_str(),
            "meshes/Unnamed.jmesh"
        );
    }

    #[test]
    fn long_names_are_truncated() {
        let hint = ResourcePathHint::new("textures", "x".repeat(200), "jtxtr");
        let path = versioned_resource_path(&hint, 0).unwrap();
        assert_eq!(path.len(), MAX_RESOURCE_PATH_LENGTH);
        assert!(path.as_str().ends_with(".jtxtr"));

        let versioned = versioned_resource_path(&hint, 999).unwrap();
        assert_eq!(versioned.len(), MAX_RESOURCE_PATH_LENGTH);
        assert!(versioned.as_str().ends_with(".999.jtxtr"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let hint = ResourcePathHint::new("textures", "é".repeat(100), "jtxtr");
        let path = versioned_resource_path(&hint, 0).unwrap();
        assert!(path.len() <= MAX_RESOURCE_PATH_LENGTH);
        assert!(path.as_str().starts_with("textures/é"));
    }

    #[test]
    fn bad_hints_rejected() {
        let hint = ResourcePathHint::new("d".repeat(65), "rock", "jtxtr");
        assert!(versioned_resource_path(&hint, 0).is_err());
        let hint = ResourcePathHint::new("textures", "rock", "verylongext");
        assert!(versioned_resource_path(&hint, 0).is_err());
    }

    #[test]
    fn filesystem_path() {
        let path = ResourcePath::new("textures/rock.jtxtr").unwrap();
        let root = Path::new("/tmp/db");
        assert_eq!(
            path.to_filesystem_path(root),
            PathBuf::from("/tmp/db/textures/rock.jtxtr")
        );
    }
}
