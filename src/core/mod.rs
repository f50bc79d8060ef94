pub mod definitions;
pub mod engine;
pub mod invocation;
pub mod pipeline;
pub mod postprocess;
pub mod profile_store;
pub mod settings;

pub use crate::domain::model::{
    Invocation, JobId, PostProcessReport, Profile, ProfileMetadata, ProfileSummary, SettingsMap,
    SlicingResult, TransformOutcome, TransformRecord,
};
pub use crate::domain::ports::{EngineRunner, ModelRenderer};
pub use crate::utils::error::Result;
