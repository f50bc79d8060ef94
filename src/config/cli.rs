use crate::config::SlicerConfig;
use crate::core::SettingsMap;
use crate::utils::error::{Result, SliceError};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "slicer.toml";

#[derive(Debug, Clone, Parser)]
#[command(name = "slice-pipeline")]
#[command(about = "Slice meshes through an external engine using named print profiles")]
pub struct CliConfig {
    /// Path to the TOML configuration (defaults to ./slicer.toml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Log per-stage timing and memory usage
    #[arg(long)]
    pub monitor: bool,

    #[arg(long)]
    pub profiles_dir: Option<PathBuf>,

    #[arg(long)]
    pub resources_root: Option<PathBuf>,

    #[arg(long)]
    pub jobs_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Clone, Subcommand)]
pub enum CliCommand {
    /// List available settings profiles
    Profiles,
    /// Show one settings profile
    Profile { id: String },
    /// Slice a mesh file to G-code
    Slice(SliceArgs),
}

#[derive(Debug, Clone, Args)]
pub struct SliceArgs {
    /// Input mesh (STL)
    pub mesh: PathBuf,

    /// Settings profile to use
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Override one setting, e.g. --set infill_density=30
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_override)]
    pub set: Vec<(String, Value)>,

    /// JSON object of setting overrides, applied before --set
    #[arg(long)]
    pub overrides: Option<PathBuf>,

    /// Engine deadline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Engine binary
    #[arg(long)]
    pub engine: Option<String>,
}

/// `key=value`; the value is read as a JSON scalar when it parses as one.
pub fn parse_override(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing setting name in '{}'", raw));
    }

    let value = match serde_json::from_str::<Value>(value) {
        Ok(parsed) if !parsed.is_array() && !parsed.is_object() => parsed,
        _ => Value::String(value.to_string()),
    };
    Ok((key.to_string(), value))
}

impl CliConfig {
    /// Built-in defaults, then the TOML file, then command-line flags.
    pub fn load_config(&self) -> Result<SlicerConfig> {
        let mut config = match &self.config {
            Some(path) => SlicerConfig::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => {
                SlicerConfig::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => SlicerConfig::default(),
        };

        if let Some(dir) = &self.profiles_dir {
            config.paths.profiles_dir = dir.clone();
        }
        if let Some(root) = &self.resources_root {
            config.paths.resources_root = root.clone();
        }
        if let Some(dir) = &self.jobs_dir {
            config.paths.jobs_dir = dir.clone();
        }
        if let CliCommand::Slice(args) = &self.command {
            if let Some(timeout) = args.timeout {
                config.engine.timeout_seconds = timeout;
            }
            if let Some(engine) = &args.engine {
                config.engine.binary = engine.clone();
            }
        }

        Ok(config)
    }
}

impl SliceArgs {
    pub fn overrides(&self) -> Result<SettingsMap> {
        let mut overrides = match &self.overrides {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                match serde_json::from_str::<Value>(&content)? {
                    Value::Object(map) => map,
                    _ => {
                        return Err(SliceError::InvalidConfigValueError {
                            field: "--overrides".to_string(),
                            value: path.display().to_string(),
                            reason: "expected a JSON object of settings".to_string(),
                        })
                    }
                }
            }
            None => SettingsMap::new(),
        };

        for (key, value) in &self.set {
            overrides.insert(key.clone(), value.clone());
        }
        Ok(overrides)
    }
}
