#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
pub use cli::{CliCommand, CliConfig, SliceArgs};
pub use toml_config::{
    DefaultsConfig, EngineConfig, PathsConfig, PostProcessConfig, ProfilesConfig, SlicerConfig,
    StartSequenceMode,
};
