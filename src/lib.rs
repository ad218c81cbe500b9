//! Wellbeing/vitals - WHO-5 survey and wearable vital alignment
//!
//! Extracts WHO-5 wellbeing survey answers and wearable vital readings,
//! normalizes them, aligns every survey day with trailing 28-day rolling
//! statistics of each vital and correlates wellbeing with those statistics
//! per user and device:
//! extraction → normalization → rolling alignment → correlation → summary.
//!
//! ## Modules
//!
//! - **Extraction**: [`extractor`] reads the raw tables from a [`RecordSource`]
//! - **Normalization**: [`normalizer`] cleans surveys, vitals and users
//! - **Alignment**: [`aligner`] and [`rolling`] compute the rolling aggregates
//! - **Analysis**: [`correlator`] and [`summary`]
//! - **Orchestration**: [`pipeline`] runs the stages over [`checkpoint`] files

pub mod aligner;
pub mod checkpoint;
pub mod config;
pub mod correlator;
pub mod error;
pub mod extractor;
pub mod normalizer;
pub mod pipeline;
pub mod rolling;
pub mod stats;
pub mod summary;
pub mod types;

#[cfg(feature = "cli")]
pub mod logging;

pub use aligner::{align_vitals, merge_dataset};
pub use config::PipelineConfig;
pub use correlator::correlate;
pub use error::PipelineError;
pub use extractor::{extract_raw, RawTables, RecordSource};
pub use normalizer::Normalizer;
pub use pipeline::{Pipeline, RunManifest, StageReport};

/// Crate version recorded by the command line tool
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
