use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::File;
use std::sync::Arc;
use strata_base::StrataResult;

/// Read-only view of a byte range of a resource file. Cheap to clone; the mapping stays alive
/// while any clone exists, even if the ledger row is removed in the meantime.
#[derive(Clone, Default)]
pub struct MappedRegion {
    // None for empty regions, which cannot be mapped
    mmap: Option<Arc<Mmap>>,
}

impl MappedRegion {
    pub fn empty() -> Self {
        MappedRegion { mmap: None }
    }

    pub(crate) fn map(
        file: &File,
        offset: u64,
        size: usize,
    ) -> StrataResult<Self> {
        if size == 0 {
            return Ok(MappedRegion::empty());
        }

        // The ledger guarantees the file covers the range. Mapped files are only ever written
        // through a MappedRegionMut created for a fresh resource.
        let mmap = unsafe { MmapOptions::new().offset(offset).len(size).map(file)? };
        Ok(MappedRegion {
            mmap: Some(Arc::new(mmap)),
        })
    }

    pub fn len(&self) -> usize {
        self.mmap.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.mmap {
            Some(mmap) => &mmap[..],
            None => &[],
        }
    }
}

impl AsRef<[u8]> for MappedRegion {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("len", &self.len())
            .finish()
    }
}

/// Writable view of a byte range of a resource file. Returned when a resource is generated so
/// the caller can fill it in place.
#[derive(Default)]
pub struct MappedRegionMut {
    mmap: Option<MmapMut>,
}

impl MappedRegionMut {
    pub(crate) fn map(
        file: &File,
        offset: u64,
        size: usize,
    ) -> StrataResult<Self> {
        if size == 0 {
            return Ok(MappedRegionMut { mmap: None });
        }

        let mmap = unsafe { MmapOptions::new().offset(offset).len(size).map_mut(file)? };
        Ok(MappedRegionMut { mmap: Some(mmap) })
    }

    pub fn len(&self) -> usize {
        self.mmap.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> &[u8] {
        match &self.mmap {
            Some(mmap) => &mmap[..],
            None => &[],
        }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        match &mut self.mmap {
            Some(mmap) => &mut mmap[..],
            None => &mut [],
        }
    }

    pub fn flush(&self) -> StrataResult<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush()?;
        }
        Ok(())
    }

    pub fn into_read_only(self) -> StrataResult<MappedRegion> {
        Ok(match self.mmap {
            Some(mmap) => MappedRegion {
                mmap: Some(Arc::new(mmap.make_read_only()?)),
            },
            None => MappedRegion::empty(),
        })
    }
}

impl AsRef<[u8]> for MappedRegionMut {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

impl AsMut<[u8]> for MappedRegionMut {
    fn as_mut(&mut self) -> &mut [u8] {
        self.bytes_mut()
    }
}

impl std::fmt::Debug for MappedRegionMut {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("MappedRegionMut")
            .field("len", &self.len())
            .finish()
    }
}
