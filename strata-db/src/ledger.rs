// Ledger row layout (128 bytes, little-endian)
//
// [16]  uuid (all zeroes for an empty row)
// [4]   resource kind hash
// [1]   path length
// [91]  path bytes, zero-padded
// [8]   offset of the resource inside the file
// [8]   size of the resource in bytes
//
// The ledger file is a plain array of rows, so its size is always a multiple of ROW_SIZE.
// Rows are written and flushed one at a time.

use crate::files::bytes::*;
use memmap2::{MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use strata_base::{
    ResourceKind, ResourcePath, ResourceUuid, StrataError, StrataResult, MAX_RESOURCE_PATH_LENGTH,
};

pub const ROW_SIZE: usize = 128;

const UUID_OFFSET: usize = 0;
const KIND_OFFSET: usize = 16;
const PATH_LENGTH_OFFSET: usize = 20;
const PATH_OFFSET: usize = 21;
const RESOURCE_OFFSET_OFFSET: usize = 112;
const RESOURCE_SIZE_OFFSET: usize = 120;

/// Growth factor of the ledger file when it runs out of empty rows
const GROWTH_FACTOR: f64 = 1.3;

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerRow {
    pub uuid: ResourceUuid,
    pub resource_kind: ResourceKind,
    pub path: ResourcePath,
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

pub fn encode_row(
    row: &LedgerRow,
    bytes: &mut [u8],
) {
    debug_assert_eq!(bytes.len(), ROW_SIZE);
    debug_assert!(row.path.len() <= MAX_RESOURCE_PATH_LENGTH);
    bytes.fill(0);
    write_uuid(bytes, UUID_OFFSET, &row.uuid);
    write_u32(bytes, KIND_OFFSET, row.resource_kind.hash());
    write_u8(bytes, PATH_LENGTH_OFFSET, row.path.len() as u8);
    bytes[PATH_OFFSET..PATH_OFFSET + row.path.len()].copy_from_slice(row.path.as_str().as_bytes());
    write_u64(bytes, RESOURCE_OFFSET_OFFSET, row.offset_bytes);
    write_u64(bytes, RESOURCE_SIZE_OFFSET, row.size_bytes);
}

/// Returns None for empty rows
pub fn decode_row(bytes: &[u8]) -> StrataResult<Option<LedgerRow>> {
    if bytes.len() != ROW_SIZE {
        return Err(StrataError::InvalidResourceFile(format!(
            "Ledger row is {} bytes, expected {}",
            bytes.len(),
            ROW_SIZE
        )));
    }

    let uuid = read_uuid(bytes, UUID_OFFSET);
    if uuid.is_nil() {
        return Ok(None);
    }

    let path_length = read_u8(bytes, PATH_LENGTH_OFFSET) as usize;
    if path_length > MAX_RESOURCE_PATH_LENGTH {
        return Err(StrataError::InvalidResourceFile(format!(
            "Ledger row for {} has path length {}",
            uuid, path_length
        )));
    }

    let path = std::str::from_utf8(&bytes[PATH_OFFSET..PATH_OFFSET + path_length]).map_err(|_| {
        StrataError::InvalidResourceFile(format!("Ledger row for {} has a non-UTF-8 path", uuid))
    })?;

    Ok(Some(LedgerRow {
        uuid,
        resource_kind: ResourceKind::from_hash(read_u32(bytes, KIND_OFFSET)),
        path: ResourcePath::new(path)?,
        offset_bytes: read_u64(bytes, RESOURCE_OFFSET_OFFSET),
        size_bytes: read_u64(bytes, RESOURCE_SIZE_OFFSET),
    }))
}

/// The memory-mapped ledger table
pub(crate) struct LedgerFile {
    file: File,
    // None while the ledger has no rows
    mmap: Option<MmapMut>,
    num_rows: usize,
}

impl LedgerFile {
    pub(crate) fn open(path: &Path) -> StrataResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let size_bytes = file.metadata()?.len() as usize;
        if size_bytes % ROW_SIZE != 0 {
            return Err(StrataError::InvalidResourceFile(format!(
                "Ledger {:?} is {} bytes, which is not a multiple of the row size {}",
                path, size_bytes, ROW_SIZE
            )));
        }

        let mut ledger = LedgerFile {
            file,
            mmap: None,
            num_rows: size_bytes / ROW_SIZE,
        };
        ledger.remap()?;
        Ok(ledger)
    }

    fn remap(&mut self) -> StrataResult<()> {
        self.mmap = None;
        if self.num_rows > 0 {
            // The ledger is only written through this mapping while holding the database lock
            let mmap = unsafe {
                MmapOptions::new()
                    .len(self.num_rows * ROW_SIZE)
                    .map_mut(&self.file)?
            };
            self.mmap = Some(mmap);
        }
        Ok(())
    }

    pub(crate) fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub(crate) fn row_bytes(
        &self,
        row_index: usize,
    ) -> &[u8] {
        match &self.mmap {
            Some(mmap) => &mmap[row_index * ROW_SIZE..(row_index + 1) * ROW_SIZE],
            None => &[],
        }
    }

    pub(crate) fn read_row(
        &self,
        row_index: usize,
    ) -> StrataResult<Option<LedgerRow>> {
        decode_row(self.row_bytes(row_index))
    }

    /// Writes (or clears, if row is None) a single row and flushes only that row to disk
    pub(crate) fn write_row(
        &mut self,
        row_index: usize,
        row: Option<&LedgerRow>,
    ) -> StrataResult<()> {
        let mmap = self.mmap.as_mut().ok_or_else(|| {
            StrataError::StringError(format!("Ledger row {} is out of range", row_index))
        })?;

        let offset = row_index * ROW_SIZE;
        let bytes = &mut mmap[offset..offset + ROW_SIZE];
        match row {
            Some(row) => encode_row(row, bytes),
            None => bytes.fill(0),
        }

        mmap.flush_range(offset, ROW_SIZE)?;
        Ok(())
    }

    /// Grows the file in place and remaps it. Returns the range of new (empty) row indices.
    pub(crate) fn grow(&mut self) -> StrataResult<std::ops::Range<usize>> {
        profiling::scope!("LedgerFile::grow");
        let old_num_rows = self.num_rows;
        let new_num_rows = 1 + (old_num_rows as f64 * GROWTH_FACTOR) as usize;
        let new_size_bytes = (new_num_rows * ROW_SIZE) as u64;

        // Drop the old mapping before touching the file size
        self.mmap = None;
        self.file.seek(SeekFrom::Start(new_size_bytes - 1))?;
        self.file.write_all(&[0])?;
        self.file.sync_data()?;

        self.num_rows = new_num_rows;
        self.remap()?;

        log::debug!(
            "Grew ledger from {} to {} rows",
            old_num_rows,
            new_num_rows
        );
        Ok(old_num_rows..new_num_rows)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strata_base::kinds;

    fn test_row() -> LedgerRow {
        LedgerRow {
            uuid: ResourceUuid::generate(),
            resource_kind: kinds::TEXTURE,
            path: ResourcePath::new("textures/rock.jtxtr").unwrap(),
            offset_bytes: 0,
            size_bytes: 4096,
        }
    }

    #[test]
    fn row_layout() {
        let row = test_row();
        let mut bytes = [0xffu8; ROW_SIZE];
        encode_row(&row, &mut bytes);

        assert_eq!(&bytes[0..16], &row.uuid.0);
        assert_eq!(read_u32(&bytes, 16), kinds::TEXTURE.hash());
        assert_eq!(bytes[20], 19);
        assert_eq!(&bytes[21..40], b"textures/rock.jtxtr");
        // Unused path bytes are zeroed
        assert!(bytes[40..112].iter().all(|b| *b == 0));
        assert_eq!(read_u64(&bytes, 112), 0);
        assert_eq!(read_u64(&bytes, 120), 4096);

        assert_eq!(decode_row(&bytes).unwrap(), Some(row));
    }

    #[test]
    fn empty_row() {
        let bytes = [0u8; ROW_SIZE];
        assert_eq!(decode_row(&bytes).unwrap(), None);
    }

    #[test]
    fn corrupt_path_length() {
        let mut bytes = [0u8; ROW_SIZE];
        encode_row(&test_row(), &mut bytes);
        bytes[PATH_LENGTH_OFFSET] = 200;
        assert!(decode_row(&bytes).is_err());
    }

    #[test]
    fn ledger_grows_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.jdb");

        let mut ledger = LedgerFile::open(&path).unwrap();
        assert_eq!(ledger.num_rows(), 0);
        assert_eq!(ledger.grow().unwrap(), 0..1);
        assert_eq!(ledger.grow().unwrap(), 1..2);
        assert_eq!(ledger.grow().unwrap(), 2..3);
        // 1 + 3 * 1.3
        assert_eq!(ledger.grow().unwrap(), 3..4);
        assert_eq!(ledger.grow().unwrap(), 4..6);

        let row = test_row();
        ledger.write_row(5, Some(&row)).unwrap();
        drop(ledger);

        assert_eq!(
            std::fs::metadata(&path).unwrap().len() as usize,
            6 * ROW_SIZE
        );
        let ledger = LedgerFile::open(&path).unwrap();
        assert_eq!(ledger.read_row(5).unwrap(), Some(row));
        assert_eq!(ledger.read_row(0).unwrap(), None);
    }
}
