use crate::core::postprocess::PLACEHOLDER_VARIANTS;
use crate::utils::error::{Result, SliceError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Every directory, binary and policy knob the pipeline needs. Built once at
/// startup and handed to each component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlicerConfig {
    pub paths: PathsConfig,
    pub engine: EngineConfig,
    pub profiles: ProfilesConfig,
    pub defaults: DefaultsConfig,
    pub postprocess: PostProcessConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub profiles_dir: PathBuf,
    pub resources_root: PathBuf,
    pub jobs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            profiles_dir: PathBuf::from("./settings"),
            resources_root: PathBuf::from("/opt/cura-resources"),
            jobs_dir: PathBuf::from("./jobs"),
        }
    }
}

impl PathsConfig {
    pub fn definitions_dir(&self) -> PathBuf {
        self.resources_root.join("definitions")
    }

    pub fn extruders_dir(&self) -> PathBuf {
        self.resources_root.join("extruders")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub binary: String,
    pub timeout_seconds: u64,
    pub verbose: bool,
    pub search_path_env: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "CuraEngine".to_string(),
            timeout_seconds: 300,
            verbose: true,
            search_path_env: "CURA_ENGINE_SEARCH_PATH".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilesConfig {
    pub default_profile: String,
    pub default_printer_definition: String,
    pub default_extruder_definition: String,
    pub base_machine_definition: String,
    pub base_extruder_definition: String,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            default_profile: "balanced_profile".to_string(),
            default_printer_definition: "creality_ender3v3ke.def.json".to_string(),
            default_extruder_definition: "creality_base_extruder_0.def.json".to_string(),
            base_machine_definition: "fdmprinter.def.json".to_string(),
            base_extruder_definition: "fdmextruder.def.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Safety defaults are unconditional; this only toggles print policy.
    pub apply_policy: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self { apply_policy: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartSequenceMode {
    /// Hand the sequence to the engine as `machine_start_gcode`, then repair
    /// any placeholders it still left behind.
    Setting,
    /// Only repair placeholders in the produced G-code.
    Substitute,
    Off,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub start_sequence: StartSequenceMode,
    pub placeholder_variants: Vec<String>,
    pub remove_skirt: bool,
    pub strip_feature_types: Vec<String>,
    pub margin_x: f64,
    pub margin_y: f64,
    pub default_bed_width: f64,
    pub default_bed_depth: f64,
}

impl Default for PostProcessConfig {
    fn default() -> Self {
        Self {
            start_sequence: StartSequenceMode::Setting,
            placeholder_variants: PLACEHOLDER_VARIANTS
                .iter()
                .map(|variant| variant.name.to_string())
                .collect(),
            remove_skirt: true,
            strip_feature_types: vec!["SKIRT".to_string()],
            margin_x: 2.0,
            margin_y: 20.0,
            default_bed_width: 220.0,
            default_bed_depth: 220.0,
        }
    }
}

impl SlicerConfig {
    /// Loads a configuration file; missing sections keep their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(SliceError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| SliceError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Expands `${VAR}` from the environment; unknown variables are kept as written.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| SliceError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_path("paths.profiles_dir", &self.paths.profiles_dir)?;
        validation::validate_path("paths.resources_root", &self.paths.resources_root)?;
        validation::validate_path("paths.jobs_dir", &self.paths.jobs_dir)?;

        validation::validate_non_empty_string("engine.binary", &self.engine.binary)?;
        validation::validate_non_empty_string(
            "engine.search_path_env",
            &self.engine.search_path_env,
        )?;
        validation::validate_positive_number(
            "engine.timeout_seconds",
            self.engine.timeout_seconds,
            1,
        )?;

        validation::validate_identifier(
            "profiles.default_profile",
            &self.profiles.default_profile,
        )?;

        let pp = &self.postprocess;
        validation::validate_range("postprocess.margin_x", pp.margin_x, 0.0, 1000.0)?;
        validation::validate_range("postprocess.margin_y", pp.margin_y, 0.0, 1000.0)?;
        let (min_bed, max_bed) = (1.0, 10000.0);
        let width = pp.default_bed_width;
        let depth = pp.default_bed_depth;
        validation::validate_range("postprocess.default_bed_width", width, min_bed, max_bed)?;
        validation::validate_range("postprocess.default_bed_depth", depth, min_bed, max_bed)?;

        for name in &pp.placeholder_variants {
            if !PLACEHOLDER_VARIANTS.iter().any(|variant| variant.name == name.as_str()) {
                let known: Vec<&str> = PLACEHOLDER_VARIANTS.iter().map(|v| v.name).collect();
                return Err(SliceError::InvalidConfigValueError {
                    field: "postprocess.placeholder_variants".to_string(),
                    value: name.clone(),
                    reason: format!("Unknown variant. Known variants: {}", known.join(", ")),
                });
            }
        }

        Ok(())
    }
}

impl Validate for SlicerConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config = SlicerConfig::from_toml_str("").unwrap();
        assert_eq!(config, SlicerConfig::default());
        assert_eq!(config.engine.binary, "CuraEngine");
        assert_eq!(config.postprocess.start_sequence, StartSequenceMode::Setting);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml_config() {
        let toml_content = r#"
[paths]
resources_root = "/srv/cura"

[engine]
timeout_seconds = 60

[postprocess]
start_sequence = "substitute"
strip_feature_types = ["SKIRT", "BRIM"]
"#;

        let config = SlicerConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.paths.definitions_dir(), PathBuf::from("/srv/cura/definitions"));
        assert_eq!(config.paths.extruders_dir(), PathBuf::from("/srv/cura/extruders"));
        assert_eq!(config.paths.jobs_dir, PathBuf::from("./jobs"));
        assert_eq!(config.engine.timeout(), Duration::from_secs(60));
        assert_eq!(config.postprocess.start_sequence, StartSequenceMode::Substitute);
        assert_eq!(config.postprocess.strip_feature_types.len(), 2);
        assert_eq!(config.postprocess.margin_y, 20.0);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("SLICE_PIPELINE_TEST_RESOURCES", "/data/cura");

        let toml_content = r#"
[paths]
resources_root = "${SLICE_PIPELINE_TEST_RESOURCES}"
jobs_dir = "${SLICE_PIPELINE_TEST_UNSET_VAR}"
"#;

        let config = SlicerConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.paths.resources_root, PathBuf::from("/data/cura"));
        assert_eq!(
            config.paths.jobs_dir,
            PathBuf::from("${SLICE_PIPELINE_TEST_UNSET_VAR}")
        );

        std::env::remove_var("SLICE_PIPELINE_TEST_RESOURCES");
    }

    #[test]
    fn test_config_validation() {
        let config = SlicerConfig::from_toml_str("[engine]\ntimeout_seconds = 0\n").unwrap();
        assert!(config.validate().is_err());

        let toml = "[postprocess]\nplaceholder_variants = [\"cura-9\"]\n";
        let config = SlicerConfig::from_toml_str(toml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(SliceError::InvalidConfigValueError { .. })
        ));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let result = SlicerConfig::from_toml_str("[postprocess]\nstart_sequence = \"sometimes\"\n");
        assert!(matches!(result, Err(SliceError::ConfigValidationError { .. })));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[profiles]\ndefault_profile = \"fast_profile\"\n")
            .unwrap();

        let config = SlicerConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.profiles.default_profile, "fast_profile");
    }
}
