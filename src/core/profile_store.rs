use crate::core::{Profile, ProfileMetadata, ProfileSummary, SettingsMap};
use crate::utils::error::{Result, SliceError};
use crate::utils::validation::validate_identifier;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// On-disk shape of a profile document. Every field is optional; the
/// identifier always comes from the file name.
#[derive(Debug, Deserialize)]
struct ProfileDocument {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    metadata: ProfileMetadata,
    #[serde(default)]
    settings: SettingsMap,
}

/// Reads settings profiles from a directory of `<id>.json` documents.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    base_path: PathBuf,
}

impl ProfileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Summaries of every parseable profile, sorted by id. Unreadable or
    /// malformed documents are logged and left out.
    pub fn list(&self) -> Result<Vec<ProfileSummary>> {
        if !self.base_path.is_dir() {
            tracing::debug!("Profile directory {} does not exist", self.base_path.display());
            return Ok(Vec::new());
        }

        let mut profiles = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    tracing::debug!("Skipping unreadable directory entry: {}", e);
                    continue;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };

            match Self::load_document(id, &path) {
                Ok(profile) => profiles.push(ProfileSummary::from(&profile)),
                Err(e) => tracing::debug!("Skipping profile {}: {}", path.display(), e),
            }
        }

        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(profiles)
    }

    pub fn get(&self, id: &str) -> Result<Profile> {
        if validate_identifier("profile", id).is_err() {
            return Err(SliceError::ProfileNotFound { id: id.to_string() });
        }

        let path = self.base_path.join(format!("{}.json", id));
        if !path.is_file() {
            return Err(SliceError::ProfileNotFound { id: id.to_string() });
        }

        let profile = Self::load_document(id, &path)?;
        tracing::debug!(
            "Loaded profile '{}' with {} settings",
            profile.id,
            profile.settings.len()
        );
        Ok(profile)
    }

    fn load_document(id: &str, path: &Path) -> Result<Profile> {
        let invalid = |reason: String| SliceError::ProfileInvalid {
            id: id.to_string(),
            reason,
        };

        let content = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        let document: ProfileDocument =
            serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

        if let Some((key, _)) = document
            .settings
            .iter()
            .find(|(_, value)| value.is_array() || value.is_object())
        {
            return Err(invalid(format!("setting '{}' is not a scalar value", key)));
        }

        Ok(Profile {
            id: id.to_string(),
            name: document.name.unwrap_or_else(|| id.to_string()),
            description: document.description.unwrap_or_default(),
            metadata: document.metadata,
            settings: document.settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, file: &str, content: &str) {
        fs::write(dir.path().join(file), content).unwrap();
    }

    #[test]
    fn test_get_reads_full_document() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "balanced_profile.json",
            r#"{
                "name": "Balanced",
                "description": "Everyday quality",
                "metadata": {"printer_definition": "creality_ender3.def.json", "author": "lab"},
                "settings": {"layer_height": 0.2, "support_enable": false, "infill_density": 20}
            }"#,
        );

        let profile = ProfileStore::new(dir.path()).get("balanced_profile").unwrap();
        assert_eq!(profile.id, "balanced_profile");
        assert_eq!(profile.name, "Balanced");
        assert_eq!(
            profile.metadata.printer_definition.as_deref(),
            Some("creality_ender3.def.json")
        );
        assert_eq!(profile.metadata.extra["author"], "lab");
        let keys: Vec<_> = profile.settings.keys().cloned().collect();
        assert_eq!(keys, vec!["layer_height", "support_enable", "infill_density"]);
    }

    #[test]
    fn test_name_defaults_to_file_stem() {
        let dir = TempDir::new().unwrap();
        write(&dir, "draft.json", r#"{"settings": {}}"#);

        let profile = ProfileStore::new(dir.path()).get("draft").unwrap();
        assert_eq!(profile.name, "draft");
        assert_eq!(profile.description, "");
        assert!(profile.metadata.printer_definition.is_none());
    }

    #[test]
    fn test_missing_and_malformed_profiles() {
        let dir = TempDir::new().unwrap();
        write(&dir, "broken.json", "{ not json");
        write(&dir, "nested.json", r#"{"settings": {"layer_height": [0.2]}}"#);
        let store = ProfileStore::new(dir.path());

        assert!(matches!(store.get("nope"), Err(SliceError::ProfileNotFound { .. })));
        assert!(matches!(store.get("../broken"), Err(SliceError::ProfileNotFound { .. })));
        assert!(matches!(store.get("broken"), Err(SliceError::ProfileInvalid { .. })));
        assert!(matches!(store.get("nested"), Err(SliceError::ProfileInvalid { .. })));
    }

    #[test]
    fn test_list_skips_bad_documents() {
        let dir = TempDir::new().unwrap();
        write(&dir, "zeta.json", r#"{"name": "Zeta"}"#);
        write(&dir, "alpha.json", r#"{"name": "Alpha", "description": "first"}"#);
        write(&dir, "broken.json", "{");
        write(&dir, "notes.txt", "not a profile");

        let profiles = ProfileStore::new(dir.path()).list().unwrap();
        let ids: Vec<_> = profiles.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert_eq!(profiles[0].file, "alpha.json");
        assert_eq!(profiles[0].description, "first");
    }

    #[test]
    fn test_list_of_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProfileStore::new(dir.path().join("absent"));
        assert!(store.list().unwrap().is_empty());
    }
}
