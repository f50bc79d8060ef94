use crate::utils::monitor::StageTiming;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Setting name to scalar value, iterated in insertion order.
pub type SettingsMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printer_definition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extruder_definition: Option<String>,
    #[serde(flatten)]
    pub extra: SettingsMap,
}

/// A named bundle of default settings plus the printer it targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub description: String,
    pub metadata: ProfileMetadata,
    pub settings: SettingsMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub metadata: ProfileMetadata,
    pub file: String,
}

impl From<&Profile> for ProfileSummary {
    fn from(profile: &Profile) -> Self {
        Self {
            id: profile.id.clone(),
            name: profile.name.clone(),
            description: profile.description.clone(),
            metadata: profile.metadata.clone(),
            file: format!("{}.json", profile.id),
        }
    }
}

/// One request's identifier; names every artifact the request produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn mesh_path(&self, jobs_dir: &Path) -> PathBuf {
        jobs_dir.join(format!("{}.stl", self))
    }

    pub fn gcode_path(&self, jobs_dir: &Path) -> PathBuf {
        jobs_dir.join(format!("{}.gcode", self))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fully built engine call: `argv[0]` is the engine binary.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub argv: Vec<String>,
    /// Added on top of the inherited process environment.
    pub env_overlay: BTreeMap<String, String>,
    pub output_path: PathBuf,
}

impl Invocation {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or_default()
    }

    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or_default()
    }

    /// Every `-j` operand, in emitted order.
    pub fn definition_args(&self) -> Vec<&str> {
        self.argv
            .windows(2)
            .filter(|pair| pair[0] == "-j")
            .map(|pair| pair[1].as_str())
            .collect()
    }

    /// Every `-s` operand, in emitted order.
    pub fn setting_args(&self) -> Vec<&str> {
        self.argv
            .windows(2)
            .filter(|pair| pair[0] == "-s")
            .map(|pair| pair[1].as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransformOutcome {
    Applied { detail: String },
    Unchanged,
    Skipped { reason: String },
}

impl TransformOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransformOutcome::Applied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformRecord {
    pub name: &'static str,
    pub outcome: TransformOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostProcessReport {
    pub transforms: Vec<TransformRecord>,
}

impl PostProcessReport {
    pub fn outcome(&self, name: &str) -> Option<&TransformOutcome> {
        self.transforms
            .iter()
            .find(|record| record.name == name)
            .map(|record| &record.outcome)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &TransformRecord> {
        self.transforms
            .iter()
            .filter(|record| matches!(record.outcome, TransformOutcome::Skipped { .. }))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SlicingResult {
    pub job_id: JobId,
    pub mesh_path: PathBuf,
    pub output_path: PathBuf,
    pub profile_id: String,
    pub settings: SettingsMap,
    pub postprocess: PostProcessReport,
    pub stage_timings: Vec<StageTiming>,
    pub started_at: DateTime<Utc>,
}
