use std::{fs, path::Path};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{error::CoreError, paths::Layout};

/// User preferences persisted under the tool root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentSettings {
    /// Show the "launching a host" notice before discovery starts a new host.
    #[serde(default = "default_true")]
    pub display_launching_run_server_warning: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PersistentSettings {
    fn default() -> Self {
        Self { display_launching_run_server_warning: true }
    }
}

impl PersistentSettings {
    /// Load settings, falling back to defaults when the file does not exist yet.
    pub fn load(layout: &Layout) -> Result<Self> {
        Self::load_from_path(&layout.settings_path())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .map_err(|source| CoreError::ReadFile { path: path.to_path_buf(), source })?;
        let settings = toml_edit::de::from_str(&content)
            .map_err(|source| CoreError::SettingsParse { path: path.to_path_buf(), source })?;
        Ok(settings)
    }

    pub fn store(&self, layout: &Layout) -> Result<()> {
        let path = layout.settings_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| CoreError::CreateDirectory {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let doc = toml_edit::ser::to_string_pretty(self)
            .map_err(|source| CoreError::SettingsSerialise { source })?;
        fs::write(&path, doc).map_err(|source| CoreError::SettingsWrite { path, source })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempdir().unwrap();
        let layout = Layout::new(tmp.path().to_path_buf());
        let settings = PersistentSettings::load(&layout).unwrap();
        assert!(settings.display_launching_run_server_warning);
    }

    #[test]
    fn stored_answer_is_reloaded() {
        let tmp = tempdir().unwrap();
        let layout = Layout::new(tmp.path().join("nested"));
        let settings = PersistentSettings { display_launching_run_server_warning: false };
        settings.store(&layout).unwrap();

        let reloaded = PersistentSettings::load(&layout).unwrap();
        assert_eq!(reloaded, settings);
    }

    #[test]
    fn rejects_malformed_settings() {
        let tmp = tempdir().unwrap();
        let layout = Layout::new(tmp.path().to_path_buf());
        fs::write(layout.settings_path(), "display_launching_run_server_warning = \"maybe\"")
            .unwrap();

        let err = PersistentSettings::load(&layout).unwrap_err();
        assert!(err.to_string().contains("settings"), "unexpected error: {err:?}");
    }
}
