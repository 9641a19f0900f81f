//! State directory bootstrap.
//!
//! `ensure_state_dir` creates the directory layout and writes default
//! settings with a version number. Existing settings are never overwritten;
//! an older version is upgraded in place, keeping the user's values.

use std::path::Path;

use tracing::info;

use crate::data::settings::{self, InstallerSettings, SETTINGS_VERSION};
use crate::error::{InstallerError, Result};

/// Result of a bootstrap check.
#[derive(Debug, PartialEq)]
pub enum BootstrapStatus {
    /// Settings exist with current version; nothing written.
    Current,
    /// Fresh state directory created.
    Installed,
    /// Existing settings were upgraded from an older version.
    Upgraded { from_version: String },
}

/// Make sure `dir` holds a usable state directory.
///
/// - settings.yaml with current version: returns Current.
/// - settings.yaml with an older (or no) version: restamps it, returns Upgraded.
/// - no settings.yaml: writes defaults, returns Installed.
///
/// Directories named by the settings are created in every case.
pub fn ensure_state_dir(dir: &Path) -> Result<BootstrapStatus> {
    let settings_path = dir.join("settings.yaml");

    let status = if settings_path.exists() {
        match read_settings_version(&settings_path)? {
            Some(v) if v == SETTINGS_VERSION => BootstrapStatus::Current,
            Some(v) => {
                upgrade_settings(&settings_path)?;
                BootstrapStatus::Upgraded { from_version: v }
            }
            None => {
                // Pre-versioned settings.
                upgrade_settings(&settings_path)?;
                BootstrapStatus::Upgraded {
                    from_version: "0.0.0".into(),
                }
            }
        }
    } else {
        std::fs::create_dir_all(dir)?;
        settings::save(&settings_path, &InstallerSettings::default())?;
        BootstrapStatus::Installed
    };

    let current = settings::load(&settings_path)?;
    create_directories(dir, &current)?;
    if status != BootstrapStatus::Current {
        info!(dir = %dir.display(), status = ?status, "state directory bootstrapped");
    }
    Ok(status)
}

fn create_directories(dir: &Path, s: &InstallerSettings) -> Result<()> {
    for sub in [dir.to_path_buf(), dir.join(&s.staging_dir), dir.join(&s.timeline_dir)] {
        std::fs::create_dir_all(&sub).map_err(|e| {
            InstallerError::Settings(format!("failed to create directory {}: {}", sub.display(), e))
        })?;
    }
    Ok(())
}

/// Reload with defaults for missing keys, stamp the current version, rewrite.
fn upgrade_settings(path: &Path) -> Result<()> {
    let mut s = settings::load(path)?;
    s.version = SETTINGS_VERSION.to_string();
    settings::save(path, &s)
}

/// The raw `version` value of a settings file, if it has one.
fn read_settings_version(path: &Path) -> Result<Option<String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        InstallerError::Settings(format!("cannot read {}: {}", path.display(), e))
    })?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&content)
        .map_err(|e| InstallerError::Settings(format!("invalid settings: {}", e)))?;
    Ok(doc
        .get("version")
        .and_then(|v| v.as_str())
        .filter(|v| !v.is_empty())
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_install_creates_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("state");
        assert_eq!(ensure_state_dir(&dir).unwrap(), BootstrapStatus::Installed);
        assert!(dir.join("settings.yaml").is_file());
        assert!(dir.join("staging").is_dir());
        assert!(dir.join("timeline").is_dir());
        assert_eq!(ensure_state_dir(&dir).unwrap(), BootstrapStatus::Current);
    }

    #[test]
    fn existing_values_survive_upgrade() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.yaml");
        std::fs::write(&path, "version: \"0.1.0\"\ndefault_start_level: 7\n").unwrap();

        let status = ensure_state_dir(tmp.path()).unwrap();
        assert_eq!(
            status,
            BootstrapStatus::Upgraded {
                from_version: "0.1.0".into()
            }
        );
        let s = settings::load(&path).unwrap();
        assert_eq!(s.version, SETTINGS_VERSION);
        assert_eq!(s.default_start_level, 7);
    }

    #[test]
    fn unversioned_settings_upgrade_from_zero() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("settings.yaml"), "idle_poll_ms: 100\n").unwrap();
        assert_eq!(
            ensure_state_dir(tmp.path()).unwrap(),
            BootstrapStatus::Upgraded {
                from_version: "0.0.0".into()
            }
        );
    }

    #[test]
    fn custom_staging_dir_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("settings.yaml"),
            format!("version: \"{}\"\nstaging_dir: blobs\n", SETTINGS_VERSION),
        )
        .unwrap();
        assert_eq!(ensure_state_dir(tmp.path()).unwrap(), BootstrapStatus::Current);
        assert!(tmp.path().join("blobs").is_dir());
    }
}
