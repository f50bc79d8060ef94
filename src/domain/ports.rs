use crate::domain::model::{Invocation, JobId, SettingsMap};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Runs the external slicing engine for one invocation and returns the
/// produced artifact path.
#[async_trait]
pub trait EngineRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation, cancel: &CancellationToken) -> Result<PathBuf>;
}

/// Turns a parametric template into a mesh file named after the job.
#[async_trait]
pub trait ModelRenderer: Send + Sync {
    async fn render(&self, job: &JobId, template_id: &str, params: &SettingsMap) -> Result<PathBuf>;
}
