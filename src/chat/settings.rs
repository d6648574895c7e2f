//! Settings persisted between runs: the API key and the last selected model.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::Model;

const SETTINGS_FILE: &str = "config.json";

/// The persisted settings record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSettings {
    /// API key entered at the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// The model selected last.
    #[serde(default)]
    pub model: Model,
}

impl PersistedSettings {
    /// The platform config path, or `config.json` in the working directory when the platform
    /// has none.
    pub fn default_path() -> PathBuf {
        match ProjectDirs::from("com", "omnichat", "omnichat") {
            Some(dirs) => dirs.config_dir().join(SETTINGS_FILE),
            None => PathBuf::from(SETTINGS_FILE),
        }
    }

    /// Load settings from `path`.  A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(Error::io(
                    format!("failed to read settings from {}", path.display()),
                    err,
                ));
            }
        };
        serde_json::from_str(&contents).map_err(|e| {
            Error::serialization(
                format!("invalid settings in {}: {e}", path.display()),
                Some(Box::new(e)),
            )
        })
    }

    /// Load settings, logging and falling back to defaults on failure.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|err| {
            tracing::warn!(error = %err, path = %path.display(), "ignoring unreadable settings");
            Self::default()
        })
    }

    /// Write settings to `path`, creating its directory if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .map_err(|e| Error::io(format!("failed to create {}", dir.display()), e))?;
        }
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| Error::serialization("failed to encode settings", Some(Box::new(e))))?;
        fs::write(path, contents)
            .map_err(|e| Error::io(format!("failed to write {}", path.display()), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KnownModel;

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PersistedSettings::load(&dir.path().join("config.json")).unwrap();
        assert_eq!(settings, PersistedSettings::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let settings = PersistedSettings {
            api_key: Some("sk-test".to_string()),
            model: Model::Known(KnownModel::QwenOmniTurbo),
        };
        settings.save(&path).unwrap();
        assert_eq!(PersistedSettings::load(&path).unwrap(), settings);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["model"], "qwen-omni-turbo");
        assert_eq!(raw["api_key"], "sk-test");
    }

    #[test]
    fn partial_record_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"api_key": "sk-1"}"#).unwrap();
        let settings = PersistedSettings::load(&path).unwrap();
        assert_eq!(settings.api_key.as_deref(), Some("sk-1"));
        assert_eq!(settings.model, Model::default());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "not json").unwrap();
        assert!(PersistedSettings::load(&path).is_err());
        assert_eq!(
            PersistedSettings::load_or_default(&path),
            PersistedSettings::default()
        );
    }
}
