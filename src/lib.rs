pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::SlicerConfig;

pub use core::{
    engine::ProcessEngine,
    pipeline::{SlicePipeline, SliceRequest},
    profile_store::ProfileStore,
};
pub use domain::model::{JobId, SlicingResult};
pub use utils::error::{Result, SliceError};
