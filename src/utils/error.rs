use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SliceError {
    #[error("Settings profile not found: {id}")]
    ProfileNotFound { id: String },

    #[error("Settings profile '{id}' is invalid: {reason}")]
    ProfileInvalid { id: String, reason: String },

    #[error("Required definition file not found: {}", path.display())]
    DefinitionNotFound { path: PathBuf },

    #[error("Input mesh not found: {}", path.display())]
    MeshNotFound { path: PathBuf },

    #[error(
        "Slicing engine failed (exit code: {}): {stderr}",
        exit_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string())
    )]
    EngineInvocationFailed { exit_code: Option<i32>, stderr: String },

    #[error("Slicing engine timed out after {seconds}s")]
    EngineTimeout { seconds: u64 },

    #[error("Slicing engine run was cancelled")]
    EngineCancelled,

    #[error("G-code file not generated: {}", path.display())]
    OutputMissing { path: PathBuf },

    #[error("Model rendering failed: {message}")]
    RenderFailed { message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Request,
    Resources,
    Engine,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl SliceError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SliceError::ProfileNotFound { .. }
            | SliceError::ProfileInvalid { .. }
            | SliceError::MeshNotFound { .. }
            | SliceError::RenderFailed { .. } => ErrorCategory::Request,
            SliceError::DefinitionNotFound { .. } => ErrorCategory::Resources,
            SliceError::EngineInvocationFailed { .. }
            | SliceError::EngineTimeout { .. }
            | SliceError::EngineCancelled
            | SliceError::OutputMissing { .. } => ErrorCategory::Engine,
            SliceError::ConfigError { .. }
            | SliceError::ConfigValidationError { .. }
            | SliceError::InvalidConfigValueError { .. }
            | SliceError::MissingConfigError { .. } => ErrorCategory::Configuration,
            SliceError::IoError(_) | SliceError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SliceError::EngineCancelled => ErrorSeverity::Low,
            SliceError::EngineTimeout { .. } => ErrorSeverity::Medium,
            SliceError::IoError(_) | SliceError::DefinitionNotFound { .. } => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    /// Process exit status for the CLI. Every error is a failure, so this is
    /// never zero; an interrupted run uses the shell's SIGINT convention.
    pub fn exit_code(&self) -> i32 {
        if matches!(self, SliceError::EngineCancelled) {
            return 130;
        }
        match self.severity() {
            ErrorSeverity::Low | ErrorSeverity::High => 1,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::Critical => 3,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            SliceError::ProfileNotFound { .. } => {
                "List the available profiles and pick one of their identifiers"
            }
            SliceError::ProfileInvalid { .. } => {
                "Fix the profile JSON: settings must map names to scalar values"
            }
            SliceError::DefinitionNotFound { .. } => {
                "Check paths.resources_root and the profile's printer_definition metadata"
            }
            SliceError::MeshNotFound { .. } => "Check the mesh path or render the model first",
            SliceError::EngineInvocationFailed { .. } => {
                "Inspect the engine stderr; an unknown or out-of-range setting is the usual cause"
            }
            SliceError::EngineTimeout { .. } => {
                "Raise engine.timeout_seconds or simplify the model"
            }
            SliceError::EngineCancelled => "Run the slice again when ready",
            SliceError::OutputMissing { .. } => {
                "Verify that the jobs directory is writable by the engine"
            }
            SliceError::RenderFailed { .. } => "Check the template parameters",
            SliceError::IoError(_) => "Check file permissions and available disk space",
            SliceError::SerializationError(_) => "Check the JSON input for syntax errors",
            SliceError::ConfigError { .. }
            | SliceError::ConfigValidationError { .. }
            | SliceError::InvalidConfigValueError { .. }
            | SliceError::MissingConfigError { .. } => "Review slicer.toml and the CLI flags",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            SliceError::ProfileNotFound { id } => format!("Unknown slicing profile '{}'", id),
            SliceError::EngineInvocationFailed { stderr, .. } => {
                let first_line = stderr.lines().rev().find(|l| !l.trim().is_empty());
                match first_line {
                    Some(line) => format!("Slicing failed: {}", line.trim()),
                    None => "Slicing failed without diagnostics".to_string(),
                }
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SliceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_failure_message_uses_last_stderr_line() {
        let err = SliceError::EngineInvocationFailed {
            exit_code: Some(1),
            stderr: "[info] loading\n[error] Unknown setting foo\n\n".to_string(),
        };
        assert_eq!(
            err.user_friendly_message(),
            "Slicing failed: [error] Unknown setting foo"
        );
        assert_eq!(err.category(), ErrorCategory::Engine);
        assert!(err.to_string().contains("exit code: 1"));
    }

    #[test]
    fn test_severity_ordering() {
        let timeout = SliceError::EngineTimeout { seconds: 1 };
        assert!(SliceError::EngineCancelled.severity() < timeout.severity());
        let missing = SliceError::DefinitionNotFound {
            path: PathBuf::from("/opt/defs/x.def.json"),
        };
        assert_eq!(missing.severity(), ErrorSeverity::Critical);
        assert!(missing.to_string().contains("/opt/defs/x.def.json"));
    }

    #[test]
    fn test_every_error_exits_nonzero() {
        assert_eq!(SliceError::EngineCancelled.exit_code(), 130);
        assert_eq!(SliceError::EngineTimeout { seconds: 5 }.exit_code(), 2);
        assert_eq!(
            SliceError::ProfileNotFound {
                id: "draft".to_string()
            }
            .exit_code(),
            1
        );
        let io = SliceError::IoError(std::io::Error::other("disk full"));
        assert_eq!(io.exit_code(), 3);
    }
}
