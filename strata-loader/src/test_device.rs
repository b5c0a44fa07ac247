use crate::device::{DeviceBuffer, DeviceFence, DeviceTexture, RenderDevice, TextureDesc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use strata_base::{StrataError, StrataResult};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DeviceOp {
    AllocateBuffer { id: u64, size_bytes: usize },
    UploadBuffer { id: u64, offset_bytes: usize, len: usize },
    AllocateTexture { id: u64, desc: TextureDesc },
    UploadMip { id: u64, mip_index: u32, width: u32, height: u32, len: usize },
    SubmitFence,
}

// Signals on the second poll so waiting on it is never free
struct MockFence {
    polls: AtomicUsize,
}

impl DeviceFence for MockFence {
    fn is_signaled(&self) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst) >= 1
    }
}

/// Records every call. Uploads fail while `fail_uploads` is set.
#[derive(Default)]
pub(crate) struct MockDevice {
    next_id: AtomicU64,
    ops: Mutex<Vec<DeviceOp>>,
    fail_uploads: AtomicBool,
}

impl MockDevice {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(MockDevice::default())
    }

    pub(crate) fn ops(&self) -> Vec<DeviceOp> {
        self.ops.lock().unwrap().clone()
    }

    pub(crate) fn set_fail_uploads(
        &self,
        fail_uploads: bool,
    ) {
        self.fail_uploads.store(fail_uploads, Ordering::SeqCst);
    }

    pub(crate) fn texture_allocations(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, DeviceOp::AllocateTexture { .. }))
            .count()
    }

    pub(crate) fn buffer_allocations(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, DeviceOp::AllocateBuffer { .. }))
            .count()
    }

    /// MIP indices uploaded to a texture, in upload order
    pub(crate) fn uploaded_mips(
        &self,
        texture: &DeviceTexture,
    ) -> Vec<u32> {
        self.ops()
            .iter()
            .filter_map(|op| match op {
                DeviceOp::UploadMip { id, mip_index, .. } if *id == texture.id => {
                    Some(*mip_index)
                }
                _ => None,
            })
            .collect()
    }

    fn record(
        &self,
        op: DeviceOp,
    ) {
        self.ops.lock().unwrap().push(op);
    }

    fn check_upload(&self) -> StrataResult<()> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            Err(StrataError::StringError("device lost".to_string()))
        } else {
            Ok(())
        }
    }
}

impl RenderDevice for MockDevice {
    fn allocate_buffer(
        &self,
        size_bytes: usize,
    ) -> StrataResult<DeviceBuffer> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.record(DeviceOp::AllocateBuffer { id, size_bytes });
        Ok(DeviceBuffer { id, size_bytes })
    }

    fn upload_buffer(
        &self,
        buffer: &DeviceBuffer,
        offset_bytes: usize,
        bytes: &[u8],
    ) -> StrataResult<()> {
        self.check_upload()?;
        assert!(offset_bytes + bytes.len() <= buffer.size_bytes);
        self.record(DeviceOp::UploadBuffer {
            id: buffer.id,
            offset_bytes,
            len: bytes.len(),
        });
        Ok(())
    }

    fn allocate_texture(
        &self,
        desc: &TextureDesc,
    ) -> StrataResult<DeviceTexture> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.record(DeviceOp::AllocateTexture { id, desc: *desc });
        Ok(DeviceTexture { id })
    }

    fn upload_texture_mip(
        &self,
        texture: &DeviceTexture,
        mip_index: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> StrataResult<()> {
        self.check_upload()?;
        self.record(DeviceOp::UploadMip {
            id: texture.id,
            mip_index,
            width,
            height,
            len: pixels.len(),
        });
        Ok(())
    }

    fn submit_fence(&self) -> StrataResult<Arc<dyn DeviceFence>> {
        self.record(DeviceOp::SubmitFence);
        Ok(Arc::new(MockFence {
            polls: AtomicUsize::new(0),
        }))
    }
}
