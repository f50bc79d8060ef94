use crate::config::SlicerConfig;
use crate::core::Profile;
use crate::utils::error::{Result, SliceError};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Position of a document inside the stack. The declaration order is the
/// order the engine must receive them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionRole {
    BaseMachine,
    BaseExtruder,
    SpecificExtruder,
    SpecificMachine,
}

impl DefinitionRole {
    pub const ORDER: [DefinitionRole; 4] = [
        DefinitionRole::BaseMachine,
        DefinitionRole::BaseExtruder,
        DefinitionRole::SpecificExtruder,
        DefinitionRole::SpecificMachine,
    ];
}

/// The four machine/extruder documents for one profile, all known to exist.
#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionStack {
    paths: [PathBuf; 4],
}

impl DefinitionStack {
    /// Paths in invocation order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn path(&self, role: DefinitionRole) -> &Path {
        let index = DefinitionRole::ORDER
            .iter()
            .position(|r| *r == role)
            .unwrap_or_default();
        &self.paths[index]
    }

    pub fn machine(&self) -> &Path {
        self.path(DefinitionRole::SpecificMachine)
    }
}

#[derive(Debug, Clone)]
pub struct DefinitionStackResolver {
    definitions_dir: PathBuf,
    extruders_dir: PathBuf,
    base_machine: String,
    base_extruder: String,
    default_machine: String,
    default_extruder: String,
}

impl DefinitionStackResolver {
    pub fn new(config: &SlicerConfig) -> Self {
        Self {
            definitions_dir: config.paths.definitions_dir(),
            extruders_dir: config.paths.extruders_dir(),
            base_machine: config.profiles.base_machine_definition.clone(),
            base_extruder: config.profiles.base_extruder_definition.clone(),
            default_machine: config.profiles.default_printer_definition.clone(),
            default_extruder: config.profiles.default_extruder_definition.clone(),
        }
    }

    pub fn resolve(&self, profile: &Profile) -> Result<DefinitionStack> {
        let machine = profile
            .metadata
            .printer_definition
            .as_deref()
            .unwrap_or(&self.default_machine);
        let extruder = profile
            .metadata
            .extruder_definition
            .as_deref()
            .unwrap_or(&self.default_extruder);

        let paths = [
            self.definitions_dir.join(&self.base_machine),
            self.definitions_dir.join(&self.base_extruder),
            self.extruders_dir.join(extruder),
            self.definitions_dir.join(machine),
        ];

        if let Some(missing) = paths.iter().find(|path| !path.is_file()) {
            return Err(SliceError::DefinitionNotFound {
                path: missing.clone(),
            });
        }

        tracing::debug!(
            "Definition stack for '{}': machine={}, extruder={}",
            profile.id,
            machine,
            extruder
        );
        Ok(DefinitionStack { paths })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OverrideEntry {
    value: Option<Value>,
    default_value: Option<Value>,
}

/// The parts of a machine/extruder definition document this crate reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefinitionDocument {
    #[serde(default)]
    overrides: HashMap<String, Value>,
}

impl DefinitionDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// `value` takes precedence over `default_value`.
    pub fn override_value(&self, name: &str) -> Option<Value> {
        let entry: OverrideEntry = serde_json::from_value(self.overrides.get(name)?.clone()).ok()?;
        entry.value.or(entry.default_value)
    }

    /// Positive, finite numeric override; numeric strings are accepted.
    pub fn override_f64(&self, name: &str) -> Option<f64> {
        let value = match self.override_value(name)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        value.filter(|v: &f64| v.is_finite() && *v > 0.0)
    }
}

/// Reads one override from the document at `path`, or `default` when the
/// document or the setting is missing or unreadable.
pub fn read_override(path: &Path, name: &str, default: Value) -> Value {
    match DefinitionDocument::load(path) {
        Ok(doc) => doc.override_value(name).unwrap_or(default),
        Err(e) => {
            tracing::debug!("Could not read definition {}: {}", path.display(), e);
            default
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BedSize {
    pub width: f64,
    pub depth: f64,
}

/// Bed width/depth from the machine document, each falling back on its own.
pub fn bed_size(machine_definition: &Path, fallback: BedSize) -> BedSize {
    let doc = DefinitionDocument::load(machine_definition).unwrap_or_default();
    BedSize {
        width: doc.override_f64("machine_width").unwrap_or(fallback.width),
        depth: doc.override_f64("machine_depth").unwrap_or(fallback.depth),
    }
}
