use crate::config::SlicerConfig;
use crate::core::definitions::{DefinitionStack, DefinitionStackResolver};
use crate::core::invocation::InvocationBuilder;
use crate::core::postprocess::{PostProcessContext, PostProcessor};
use crate::core::profile_store::ProfileStore;
use crate::core::settings;
use crate::core::{
    EngineRunner, Invocation, JobId, ModelRenderer, Profile, SettingsMap, SlicingResult,
};
use crate::utils::error::{Result, SliceError};
use crate::utils::monitor::StageMonitor;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// What the caller asks for: a profile (or the configured default) plus
/// setting overrides.
#[derive(Debug, Clone, Default)]
pub struct SliceRequest {
    pub profile: Option<String>,
    pub overrides: SettingsMap,
}

impl SliceRequest {
    pub fn new(profile: impl Into<String>, overrides: SettingsMap) -> Self {
        Self {
            profile: Some(profile.into()),
            overrides,
        }
    }
}

/// Everything resolved before any file is written or process started.
#[derive(Debug, Clone)]
pub struct PreparedSlice {
    pub profile: Profile,
    pub settings: SettingsMap,
    pub stack: DefinitionStack,
}

/// Profile → settings → definition stack → invocation → engine →
/// post-processing, once per request.
pub struct SlicePipeline<E: EngineRunner> {
    config: SlicerConfig,
    profiles: ProfileStore,
    definitions: DefinitionStackResolver,
    invocations: InvocationBuilder,
    postprocessor: PostProcessor,
    engine: E,
    monitor_enabled: bool,
}

impl<E: EngineRunner> SlicePipeline<E> {
    pub fn new(config: SlicerConfig, engine: E) -> Self {
        Self {
            profiles: ProfileStore::new(config.paths.profiles_dir.clone()),
            definitions: DefinitionStackResolver::new(&config),
            invocations: InvocationBuilder::new(&config),
            postprocessor: PostProcessor::new(&config.postprocess),
            config,
            engine,
            monitor_enabled: false,
        }
    }

    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor_enabled = enabled;
        self
    }

    pub fn config(&self) -> &SlicerConfig {
        &self.config
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Loads the profile and resolves settings and definitions. Pure reads:
    /// a failure here leaves nothing behind.
    pub fn prepare(&self, request: &SliceRequest) -> Result<PreparedSlice> {
        let profile_id = request
            .profile
            .as_deref()
            .unwrap_or(&self.config.profiles.default_profile);

        let profile = self.profiles.get(profile_id)?;
        let settings = settings::resolve(&profile.settings, &request.overrides);
        let stack = self.definitions.resolve(&profile)?;

        Ok(PreparedSlice {
            profile,
            settings,
            stack,
        })
    }

    /// The exact engine call for `prepared` and the settings it carries,
    /// without running anything.
    pub fn plan(
        &self,
        job: &JobId,
        prepared: &PreparedSlice,
        mesh: &Path,
    ) -> (Invocation, SettingsMap) {
        let output = job.gcode_path(&self.config.paths.jobs_dir);
        let with_defaults = self.invocations.with_defaults(&prepared.settings);
        let mut engine_settings = with_defaults.clone();

        let ctx = PostProcessContext {
            job,
            settings: &with_defaults,
            machine_definition: prepared.stack.machine(),
        };
        if self.postprocessor.inject_start_setting(&mut engine_settings, &ctx) {
            tracing::debug!(job = %job, "Start sequence passed to the engine as a setting");
        }

        let invocation = self
            .invocations
            .build(&prepared.stack, &engine_settings, mesh, &output);
        (invocation, engine_settings)
    }

    /// Slices a mesh that already exists on disk.
    pub async fn slice_mesh(
        &self,
        mesh: &Path,
        request: &SliceRequest,
        cancel: &CancellationToken,
    ) -> Result<SlicingResult> {
        let job = JobId::new();
        let mut monitor = StageMonitor::new(self.monitor_enabled);

        let prepared = self.prepare(request)?;
        if !mesh.is_file() {
            return Err(SliceError::MeshNotFound {
                path: mesh.to_path_buf(),
            });
        }
        monitor.mark("prepare");

        self.execute(job, prepared, mesh.to_path_buf(), monitor, cancel)
            .await
    }

    /// Renders `template_id` for a fresh job and slices the result.
    pub async fn slice_template<R: ModelRenderer + ?Sized>(
        &self,
        renderer: &R,
        template_id: &str,
        params: &SettingsMap,
        request: &SliceRequest,
        cancel: &CancellationToken,
    ) -> Result<SlicingResult> {
        let job = JobId::new();
        let mut monitor = StageMonitor::new(self.monitor_enabled);

        let prepared = self.prepare(request)?;
        monitor.mark("prepare");

        self.ensure_jobs_dir()?;
        let mesh = renderer.render(&job, template_id, params).await?;
        if !mesh.is_file() {
            return Err(SliceError::RenderFailed {
                message: format!("renderer reported {} but wrote nothing", mesh.display()),
            });
        }
        monitor.mark("render");

        self.execute(job, prepared, mesh, monitor, cancel).await
    }

    fn ensure_jobs_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config.paths.jobs_dir)?;
        Ok(())
    }

    async fn execute(
        &self,
        job: JobId,
        prepared: PreparedSlice,
        mesh: PathBuf,
        mut monitor: StageMonitor,
        cancel: &CancellationToken,
    ) -> Result<SlicingResult> {
        let started_at = Utc::now();
        tracing::info!(
            job = %job,
            profile = %prepared.profile.id,
            "Slicing {} with {} resolved settings",
            mesh.display(),
            prepared.settings.len()
        );

        self.ensure_jobs_dir()?;
        let (invocation, settings) = self.plan(&job, &prepared, &mesh);
        monitor.mark("plan");

        let output = self.engine.run(&invocation, cancel).await?;
        monitor.mark("engine");

        let ctx = PostProcessContext {
            job: &job,
            settings: &settings,
            machine_definition: prepared.stack.machine(),
        };
        let postprocess = self.postprocessor.process_file(&output, &ctx);
        monitor.mark("postprocess");

        let skipped = postprocess.skipped().count();
        if skipped > 0 {
            tracing::warn!(job = %job, skipped, "G-code returned with skipped repairs");
        }
        tracing::info!(job = %job, "✅ G-code ready at {}", output.display());

        Ok(SlicingResult {
            job_id: job,
            mesh_path: mesh,
            output_path: output,
            profile_id: prepared.profile.id,
            settings,
            postprocess,
            stage_timings: monitor.into_timings(),
            started_at,
        })
    }
}
