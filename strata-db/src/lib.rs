mod database;
pub use database::{
    RemoveResourceOutcome, ResourceDatabase, ResourceLocation, LEDGER_FILE_NAME, MAX_PATH_VERSIONS,
};

mod ledger;
pub use ledger::{decode_row, encode_row, LedgerRow, ROW_SIZE};

mod mapped_region;
pub use mapped_region::{MappedRegion, MappedRegionMut};

pub mod files;

pub use strata_base;
pub use strata_base::{
    kinds, ResourceKind, ResourcePath, ResourcePathHint, ResourceUuid, StrataError, StrataResult,
};
