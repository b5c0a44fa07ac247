pub mod hashing;
mod error;
mod resource_uuid;
mod resource_kind;
mod resource_path;
mod resource_name;
pub mod geometry;
pub mod decode;

pub use error::{StrataError, StrataResult};
pub use uuid;

pub use resource_uuid::{deserialize_uuid, serialize_uuid, ResourceUuid, UUID_STRING_LENGTH};
pub use resource_kind::{kinds, ResourceKind};
pub use resource_path::{
    versioned_resource_path, ResourcePath, ResourcePathHint, MAX_RESOURCE_PATH_LENGTH,
};
pub use resource_name::{ResourceName, RESOURCE_NAME_SIZE};
