use crate::ledger::{LedgerFile, LedgerRow};
use crate::{MappedRegion, MappedRegionMut};
use crossbeam_channel::{Receiver, Sender};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, TryLockError};
use strata_base::hashing::HashMap;
use strata_base::{
    versioned_resource_path, ResourceKind, ResourcePath, ResourcePathHint, ResourceUuid,
    StrataError, StrataResult,
};

pub const LEDGER_FILE_NAME: &str = "resources.jdb";

/// Number of version suffixes tried before giving up on a path hint
pub const MAX_PATH_VERSIONS: u32 = 1000;

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLocation {
    pub path: ResourcePath,
    pub offset_bytes: u64,
    pub size_bytes: u64,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RemoveResourceOutcome {
    // Record unlinked and file deleted
    Success,
    // Record unlinked, but another record still uses the file
    FileKept,
    // Record unlinked, but the file was already gone
    FileNotFound,
    UUIDNotFound,
}

struct RowEntry {
    row_index: usize,
    row: LedgerRow,
}

// Everything guarded by the database lock
struct DatabaseState {
    ledger: LedgerFile,
    rows: HashMap<ResourceUuid, RowEntry>,
    // Number of rows referencing each path. Normally exactly one.
    path_uses: HashMap<ResourcePath, usize>,
    // Ordered so that the lowest free slot is reused first
    empty_rows: BTreeSet<usize>,
}

impl DatabaseState {
    fn insert_row(
        &mut self,
        row: LedgerRow,
    ) -> StrataResult<()> {
        if self.empty_rows.is_empty() {
            let new_rows = self.ledger.grow()?;
            self.empty_rows.extend(new_rows);
        }

        // Just made sure there is at least one
        let row_index = match self.empty_rows.iter().next() {
            Some(row_index) => *row_index,
            None => return Err("Ledger has no empty rows after growing".into()),
        };

        self.ledger.write_row(row_index, Some(&row))?;
        self.empty_rows.remove(&row_index);
        *self.path_uses.entry(row.path.clone()).or_insert(0) += 1;
        self.rows.insert(row.uuid, RowEntry { row_index, row });
        Ok(())
    }

    fn unlink(
        &mut self,
        uuid: &ResourceUuid,
    ) -> Option<LedgerRow> {
        let entry = self.rows.remove(uuid)?;
        if let Err(e) = self.ledger.write_row(entry.row_index, None) {
            // The in-memory state is authoritative for this session. A stale row on disk shows up
            // again on the next open.
            log::error!(
                "Failed to clear ledger row {} for {}: {}",
                entry.row_index,
                uuid,
                e
            );
        }
        self.empty_rows.insert(entry.row_index);

        if let Some(uses) = self.path_uses.get_mut(&entry.row.path) {
            *uses -= 1;
            if *uses == 0 {
                self.path_uses.remove(&entry.row.path);
            }
        }

        Some(entry.row)
    }
}

/// Persistent mapping from resource UUID to a byte range of a file under the database root.
///
/// The ledger and the in-memory indices are guarded by one reader/writer lock. Lookups take the
/// shared side, generation and removal take the exclusive side. Creation of resource files does
/// not rely on the lock: an exclusive create that fails for any reason (including another
/// process creating the same file) moves on to the next version suffix.
pub struct ResourceDatabase {
    root: PathBuf,
    state: RwLock<DatabaseState>,
    remove_tx: Sender<ResourceUuid>,
    remove_rx: Receiver<ResourceUuid>,
    // Removals pulled off the queue but not yet applied because the lock was contended
    pending_removals: Mutex<Vec<ResourceUuid>>,
}

impl ResourceDatabase {
    pub fn open(root: &Path) -> StrataResult<Self> {
        profiling::scope!("ResourceDatabase::open");
        std::fs::create_dir_all(root)?;
        let root = dunce::canonicalize(root)?;

        let ledger = LedgerFile::open(&root.join(LEDGER_FILE_NAME))?;

        let mut rows = HashMap::default();
        let mut path_uses = HashMap::<ResourcePath, usize>::default();
        let mut empty_rows = BTreeSet::default();

        for row_index in 0..ledger.num_rows() {
            match ledger.read_row(row_index)? {
                Some(row) => {
                    *path_uses.entry(row.path.clone()).or_insert(0) += 1;
                    let uuid = row.uuid;
                    if rows.insert(uuid, RowEntry { row_index, row }).is_some() {
                        return Err(StrataError::InvalidResourceFile(format!(
                            "Ledger contains UUID {} more than once",
                            uuid
                        )));
                    }
                }
                None => {
                    empty_rows.insert(row_index);
                }
            }
        }

        log::info!(
            "Opened resource database at {:?} with {} resources ({} empty rows)",
            root,
            rows.len(),
            empty_rows.len()
        );

        let (remove_tx, remove_rx) = crossbeam_channel::unbounded();

        Ok(ResourceDatabase {
            root,
            state: RwLock::new(DatabaseState {
                ledger,
                rows,
                path_uses,
                empty_rows,
            }),
            remove_tx,
            remove_rx,
            pending_removals: Default::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resource_filepath(
        &self,
        path: &ResourcePath,
    ) -> PathBuf {
        path.to_filesystem_path(&self.root)
    }

    pub fn num_resources(&self) -> usize {
        self.state.read().unwrap().rows.len()
    }

    pub fn locate(
        &self,
        uuid: &ResourceUuid,
    ) -> Option<ResourceLocation> {
        let state = self.state.read().unwrap();
        state.rows.get(uuid).map(|entry| ResourceLocation {
            path: entry.row.path.clone(),
            offset_bytes: entry.row.offset_bytes,
            size_bytes: entry.row.size_bytes,
        })
    }

    /// Returns ResourceKind::NULL if the UUID is not in the database
    pub fn type_of(
        &self,
        uuid: &ResourceUuid,
    ) -> ResourceKind {
        let state = self.state.read().unwrap();
        state
            .rows
            .get(uuid)
            .map(|entry| entry.row.resource_kind)
            .unwrap_or(ResourceKind::NULL)
    }

    fn open_resource_file(
        &self,
        uuid: &ResourceUuid,
        location: &ResourceLocation,
        writable: bool,
    ) -> StrataResult<File> {
        let filepath = self.resource_filepath(&location.path);
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(&filepath)?;

        // Mapping past the end of a file faults on access instead of failing here
        let file_size = file.metadata()?.len();
        if file_size < location.offset_bytes + location.size_bytes {
            return Err(StrataError::InvalidResourceFile(format!(
                "File {:?} of resource {} is {} bytes but the ledger expects at least {}",
                filepath,
                uuid,
                file_size,
                location.offset_bytes + location.size_bytes
            )));
        }

        Ok(file)
    }

    /// Returns an empty region if the UUID is not in the database
    pub fn try_map_resource(
        &self,
        uuid: &ResourceUuid,
    ) -> StrataResult<MappedRegion> {
        profiling::scope!("ResourceDatabase::try_map_resource");
        let state = self.state.read().unwrap();
        let entry = match state.rows.get(uuid) {
            Some(entry) => entry,
            None => return Ok(MappedRegion::empty()),
        };

        let location = ResourceLocation {
            path: entry.row.path.clone(),
            offset_bytes: entry.row.offset_bytes,
            size_bytes: entry.row.size_bytes,
        };

        let file = self.open_resource_file(uuid, &location, false)?;
        MappedRegion::map(&file, location.offset_bytes, location.size_bytes as usize)
    }

    pub fn map_resource(
        &self,
        uuid: &ResourceUuid,
    ) -> StrataResult<MappedRegion> {
        if self.locate(uuid).is_none() {
            return Err(StrataError::NotFound(*uuid));
        }

        let region = self.try_map_resource(uuid)?;
        // The row may have been removed between the two lookups
        if region.is_empty() && self.locate(uuid).is_none() {
            return Err(StrataError::NotFound(*uuid));
        }

        Ok(region)
    }

    /// Writable mapping of an existing resource, for rewriting it in place
    pub fn map_resource_mut(
        &self,
        uuid: &ResourceUuid,
    ) -> StrataResult<MappedRegionMut> {
        let state = self.state.read().unwrap();
        let entry = state.rows.get(uuid).ok_or(StrataError::NotFound(*uuid))?;

        let location = ResourceLocation {
            path: entry.row.path.clone(),
            offset_bytes: entry.row.offset_bytes,
            size_bytes: entry.row.size_bytes,
        };

        let file = self.open_resource_file(uuid, &location, true)?;
        MappedRegionMut::map(&file, location.offset_bytes, location.size_bytes as usize)
    }

    /// Allocates a new UUID, creates a file of exactly `size_bytes` at a unique path derived from
    /// the hint, records it in the ledger and returns a writable mapping of the whole file.
    pub fn generate_resource(
        &self,
        resource_kind: ResourceKind,
        path_hint: &ResourcePathHint,
        size_bytes: usize,
    ) -> StrataResult<(ResourceUuid, MappedRegionMut)> {
        profiling::scope!("ResourceDatabase::generate_resource");
        let mut state = self.state.write().unwrap();

        let uuid = loop {
            let uuid = ResourceUuid::generate();
            if !state.rows.contains_key(&uuid) {
                break uuid;
            }
        };

        for version in 0..MAX_PATH_VERSIONS {
            let path = versioned_resource_path(path_hint, version)?;

            if state.path_uses.contains_key(&path) {
                log::trace!("Path {} is already in the ledger, retrying", path);
                continue;
            }

            let filepath = self.resource_filepath(&path);
            if let Some(parent) = filepath.parent() {
                std::fs::create_dir_all(parent)?;
            }

            // The mapping is made from the same handle that won the exclusive create, so nobody
            // can swap the file out between creating and mapping it.
            let file = match OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&filepath)
            {
                Ok(file) => file,
                Err(e) => {
                    log::trace!("Could not create {:?} ({}), retrying", filepath, e);
                    continue;
                }
            };

            let region = match Self::size_and_map(&file, size_bytes) {
                Ok(region) if region.len() == size_bytes => region,
                Ok(region) => {
                    log::warn!(
                        "Mapped {} bytes of {:?} instead of {}, retrying",
                        region.len(),
                        filepath,
                        size_bytes
                    );
                    Self::discard_file(&filepath);
                    continue;
                }
                Err(e) => {
                    log::warn!("Could not size or map {:?} ({}), retrying", filepath, e);
                    Self::discard_file(&filepath);
                    continue;
                }
            };

            let row = LedgerRow {
                uuid,
                resource_kind,
                path: path.clone(),
                offset_bytes: 0,
                size_bytes: size_bytes as u64,
            };

            if let Err(e) = state.insert_row(row) {
                Self::discard_file(&filepath);
                return Err(e);
            }

            log::debug!(
                "Generated {} resource {} at {} ({} bytes)",
                resource_kind,
                uuid,
                path,
                size_bytes
            );
            return Ok((uuid, region));
        }

        Err(StrataError::TooManyAttempts(format!(
            "No free path for hint {:?} after {} versions",
            path_hint, MAX_PATH_VERSIONS
        )))
    }

    fn size_and_map(
        file: &File,
        size_bytes: usize,
    ) -> StrataResult<MappedRegionMut> {
        file.set_len(size_bytes as u64)?;
        MappedRegionMut::map(file, 0, size_bytes)
    }

    fn discard_file(filepath: &Path) {
        if let Err(e) = std::fs::remove_file(filepath) {
            log::warn!("Failed to delete {:?}: {}", filepath, e);
        }
    }

    /// Removes the ledger row. The file is left alone.
    pub fn try_unlink_record(
        &self,
        uuid: &ResourceUuid,
    ) -> bool {
        let mut state = self.state.write().unwrap();
        let unlinked = state.unlink(uuid).is_some();
        if unlinked {
            log::debug!("Unlinked record {}", uuid);
        }
        unlinked
    }

    /// Removes the ledger row, and the file if no other row refers to it
    pub fn try_remove_resource(
        &self,
        uuid: &ResourceUuid,
    ) -> RemoveResourceOutcome {
        let mut state = self.state.write().unwrap();
        self.remove_resource_locked(&mut state, uuid)
    }

    fn remove_resource_locked(
        &self,
        state: &mut DatabaseState,
        uuid: &ResourceUuid,
    ) -> RemoveResourceOutcome {
        let row = match state.unlink(uuid) {
            Some(row) => row,
            None => return RemoveResourceOutcome::UUIDNotFound,
        };

        if state.path_uses.contains_key(&row.path) {
            log::debug!("Removed {}, file {} is still in use", uuid, row.path);
            return RemoveResourceOutcome::FileKept;
        }

        let filepath = self.resource_filepath(&row.path);
        match std::fs::remove_file(&filepath) {
            Ok(()) => {
                log::debug!("Removed {} and its file {}", uuid, row.path);
                RemoveResourceOutcome::Success
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Removed {}, but its file {} was already gone", uuid, row.path);
                RemoveResourceOutcome::FileNotFound
            }
            Err(e) => {
                log::error!("Removed {}, but failed to delete {:?}: {}", uuid, filepath, e);
                RemoveResourceOutcome::FileKept
            }
        }
    }

    /// Queues the resource for removal on the next `update()`. Safe to call from any thread.
    pub fn remove_resource_later(
        &self,
        uuid: ResourceUuid,
    ) {
        // The receiver lives as long as self
        let _ = self.remove_tx.send(uuid);
    }

    /// Applies queued removals. Never blocks on the database lock: if it is contended, the
    /// removals stay queued for the next call.
    pub fn update(&self) {
        profiling::scope!("ResourceDatabase::update");
        let mut pending_removals = self.pending_removals.lock().unwrap();
        pending_removals.extend(self.remove_rx.try_iter());

        if pending_removals.is_empty() {
            return;
        }

        let mut state = match self.state.try_write() {
            Ok(state) => state,
            Err(TryLockError::WouldBlock) => {
                log::trace!(
                    "Database is busy, deferring {} removals",
                    pending_removals.len()
                );
                return;
            }
            Err(TryLockError::Poisoned(e)) => e.into_inner(),
        };

        for uuid in pending_removals.drain(..) {
            let outcome = self.remove_resource_locked(&mut state, &uuid);
            log::debug!("Deferred removal of {}: {:?}", uuid, outcome);
        }
    }

    /// Number of removals queued but not yet applied
    pub fn num_pending_removals(&self) -> usize {
        self.pending_removals.lock().unwrap().len() + self.remove_rx.len()
    }

    /// Calls `f` for every non-empty row in ledger order while holding the shared lock.
    /// `f` must not call back into the database.
    pub fn for_each_row<F: FnMut(&LedgerRow)>(
        &self,
        mut f: F,
    ) {
        let state = self.state.read().unwrap();
        let mut entries: Vec<&RowEntry> = state.rows.values().collect();
        entries.sort_by_key(|entry| entry.row_index);
        for entry in entries {
            f(&entry.row);
        }
    }

    #[cfg(test)]
    pub(crate) fn try_write_state_for_test(&self) -> Option<impl Drop + '_> {
        self.state.try_write().ok()
    }
}
