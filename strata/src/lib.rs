#[cfg(feature = "strata-base")]
pub use strata_base as base;

#[cfg(feature = "strata-db")]
pub use strata_db as db;

#[cfg(feature = "strata-jobs")]
pub use strata_jobs as jobs;

#[cfg(feature = "strata-pipeline")]
pub use strata_pipeline as pipeline;

#[cfg(feature = "strata-loader")]
pub use strata_loader as loader;
