use crate::utils::error::{Result, SliceError};
use std::path::Path;

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_path(field_name: &str, path: &Path) -> Result<()> {
    let raw = path.to_string_lossy();
    if raw.is_empty() {
        return Err(SliceError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: raw.to_string(),
            reason: "Path cannot be empty".to_string(),
        });
    }

    if raw.contains('\0') {
        return Err(SliceError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: raw.to_string(),
            reason: "Path contains null bytes".to_string(),
        });
    }

    Ok(())
}

pub fn validate_positive_number(field_name: &str, value: u64, min_value: u64) -> Result<()> {
    if value < min_value {
        return Err(SliceError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be at least {}", min_value),
        });
    }
    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(SliceError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Value cannot be empty or whitespace-only".to_string(),
        });
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(SliceError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: format!("Value must be between {} and {}", min, max),
        });
    }
    Ok(())
}

/// Only checked-in names are accepted, e.g. `balanced_profile`.
pub fn validate_identifier(field_name: &str, value: &str) -> Result<()> {
    validate_non_empty_string(field_name, value)?;
    if value.contains('/') || value.contains('\\') || value.contains("..") || value.contains('\0') {
        return Err(SliceError::InvalidConfigValueError {
            field: field_name.to_string(),
            value: value.to_string(),
            reason: "Identifier must not contain path separators".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_path() {
        assert!(validate_path("paths.jobs_dir", Path::new("./jobs")).is_ok());
        assert!(validate_path("paths.jobs_dir", Path::new("")).is_err());
        assert!(validate_path("paths.jobs_dir", Path::new("jo\0bs")).is_err());
    }

    #[test]
    fn test_validate_positive_number() {
        assert!(validate_positive_number("engine.timeout_seconds", 5, 1).is_ok());
        assert!(validate_positive_number("engine.timeout_seconds", 0, 1).is_err());
    }

    #[test]
    fn test_validate_range() {
        assert!(validate_range("postprocess.margin_x", 2.0, 0.0, 50.0).is_ok());
        assert!(validate_range("postprocess.margin_x", -1.0, 0.0, 50.0).is_err());
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("profile", "balanced_profile").is_ok());
        assert!(validate_identifier("profile", "../etc/passwd").is_err());
        assert!(validate_identifier("profile", "a/b").is_err());
        assert!(validate_identifier("profile", "   ").is_err());
    }
}
