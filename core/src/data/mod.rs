pub mod settings;

use std::path::{Path, PathBuf};

pub use settings::InstallerSettings;

/// Layout of an installer state directory.
///
/// ```text
/// <root>/
///   settings.yaml
///   registry.json      (settings.registry_file)
///   staging/           (settings.staging_dir)
///   timeline/          (settings.timeline_dir)
///   .lock
/// ```
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
    settings: InstallerSettings,
}

impl StateDir {
    /// Load `settings.yaml` under `root`, falling back to defaults when it
    /// does not exist yet.
    pub fn open(root: &Path) -> crate::error::Result<StateDir> {
        let path = root.join("settings.yaml");
        let settings = if path.exists() {
            settings::load(&path)?
        } else {
            InstallerSettings::default()
        };
        Ok(StateDir {
            root: root.to_path_buf(),
            settings,
        })
    }

    pub fn with_settings(root: &Path, settings: InstallerSettings) -> StateDir {
        StateDir {
            root: root.to_path_buf(),
            settings,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &InstallerSettings {
        &self.settings
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join("settings.yaml")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join(&self.settings.registry_file)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(&self.settings.staging_dir)
    }

    pub fn timeline_dir(&self) -> PathBuf {
        self.root.join(&self.settings.timeline_dir)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(".lock")
    }
}
