//! Loads resources out of a database and onto a render device. Large resources are streamed
//! progressively, least detailed level first, and published to a typed registry after every
//! step. The `legacy` module loads whole model files by path without a database.

mod device;
pub use device::{DeviceBuffer, DeviceFence, DeviceTexture, RenderDevice, TextureDesc};

mod load_state;
pub use load_state::{next_level_range, LoadState, LoaderConfig};

mod registry;
pub use registry::{ResourceHandle, ResourceProgress, ResourceRegistry, ResourceRequest};

mod resources;
pub use resources::*;

mod loader;
pub use loader::ResourceLoader;

pub mod legacy;

#[cfg(test)]
mod test_device;

#[cfg(test)]
mod tests;
