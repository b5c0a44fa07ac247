//! The slice of a graphics device the loaders need. Calls other than `DeviceFence::is_signaled`
//! are only made from the submission context (or the legacy upload thread).

use std::sync::Arc;
use strata_base::StrataResult;
use strata_db::files::Colorspace;

/// Opaque device buffer. The id is chosen by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceBuffer {
    pub id: u64,
    pub size_bytes: usize,
}

/// Opaque device texture with storage for a full MIP chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceTexture {
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    // Dimensions of MIP 0
    pub width: u32,
    pub height: u32,
    pub num_mips: u32,
    pub num_channels: u8,
    pub colorspace: Colorspace,
}

pub trait DeviceFence: Send + Sync {
    /// True once every command submitted before the fence has completed
    fn is_signaled(&self) -> bool;
}

pub trait RenderDevice: Send + Sync {
    fn allocate_buffer(
        &self,
        size_bytes: usize,
    ) -> StrataResult<DeviceBuffer>;

    fn upload_buffer(
        &self,
        buffer: &DeviceBuffer,
        offset_bytes: usize,
        bytes: &[u8],
    ) -> StrataResult<()>;

    fn allocate_texture(
        &self,
        desc: &TextureDesc,
    ) -> StrataResult<DeviceTexture>;

    /// `pixels` are tightly packed with the texture's channel count
    fn upload_texture_mip(
        &self,
        texture: &DeviceTexture,
        mip_index: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> StrataResult<()>;

    /// Fence covering everything submitted so far
    fn submit_fence(&self) -> StrataResult<Arc<dyn DeviceFence>>;
}

/// Allocates a buffer sized for `bytes` and uploads them
pub(crate) fn create_buffer_with_data(
    device: &dyn RenderDevice,
    bytes: &[u8],
) -> StrataResult<DeviceBuffer> {
    let buffer = device.allocate_buffer(bytes.len())?;
    device.upload_buffer(&buffer, 0, bytes)?;
    Ok(buffer)
}
