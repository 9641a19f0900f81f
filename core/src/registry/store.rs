//! Durable registry file.
//!
//! The file is a versioned JSON envelope. Writes go to a sibling temp file
//! that is synced and renamed over the target, so a crash leaves either the
//! old or the new state. Loading never fails hard: anything unreadable,
//! truncated or inconsistent is reported and the caller starts empty.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::entity::EntityResources;
use crate::error::{InstallerError, Result};

/// Current registry file format.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryFile {
    pub format_version: u32,
    #[serde(default)]
    pub next_serial: u64,
    #[serde(default)]
    pub entities: BTreeMap<String, EntityResources>,
}

/// Result of reading the store at startup.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(RegistryFile),
    Missing,
    /// Present but unusable; the reason is for the log.
    Corrupt(String),
}

/// Read and validate the registry file at `path`.
pub fn load(path: &Path) -> LoadOutcome {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LoadOutcome::Missing,
        Err(e) => return LoadOutcome::Corrupt(format!("cannot read: {}", e)),
    };
    let file: RegistryFile = match serde_json::from_slice(&bytes) {
        Ok(f) => f,
        Err(e) => return LoadOutcome::Corrupt(format!("cannot parse: {}", e)),
    };
    match validate(file) {
        Ok(f) => LoadOutcome::Loaded(f),
        Err(reason) => LoadOutcome::Corrupt(reason),
    }
}

fn validate(mut file: RegistryFile) -> std::result::Result<RegistryFile, String> {
    if file.format_version == 0 || file.format_version > FORMAT_VERSION {
        return Err(format!("unsupported format version {}", file.format_version));
    }
    let mut max_serial = 0;
    for (entity, resources) in &file.entities {
        for r in resources.iter() {
            if r.entity_id() != entity {
                return Err(format!(
                    "resource {} filed under '{}' claims '{}'",
                    r.url(),
                    entity,
                    r.entity_id()
                ));
            }
            if r.digest().is_empty() || r.url().is_empty() {
                return Err(format!("resource under '{}' lacks url or digest", entity));
            }
            max_serial = max_serial.max(r.serial());
        }
    }
    file.entities.retain(|_, e| !e.is_empty());
    if file.next_serial <= max_serial {
        file.next_serial = max_serial + 1;
    }
    Ok(file)
}

/// Atomically replace the registry file at `path`.
pub fn save(path: &Path, file: &RegistryFile) -> Result<()> {
    let json = serde_json::to_vec_pretty(file)
        .map_err(|e| InstallerError::Persist(format!("serialize registry: {}", e)))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let tmp = tmp_path(path);
    let written = (|| -> std::io::Result<()> {
        let mut f = File::create(&tmp)?;
        f.write_all(&json)?;
        f.sync_all()
    })();
    if let Err(e) = written {
        let _ = fs::remove_file(&tmp);
        return Err(InstallerError::Persist(format!(
            "failed to write {}: {}",
            tmp.display(),
            e
        )));
    }
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        InstallerError::Persist(format!(
            "failed to rename {} to {}: {}",
            tmp.display(),
            path.display(),
            e
        ))
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "registry".into());
    path.with_file_name(format!(".{}.tmp", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::resource::{RegisteredResource, ResourcePayload};
    use crate::types::version::Version;

    fn file_with(entity: &str, claimed: &str) -> RegistryFile {
        let mut e = EntityResources::new();
        let r = RegisteredResource::new(
            "p",
            "a.jar",
            claimed,
            "d1",
            0,
            Version::new(1, 0, 0),
            ResourcePayload::Module {
                symbolic_name: "a".into(),
                start_level: None,
            },
        );
        e.add_or_update(r, || 7);
        RegistryFile {
            format_version: FORMAT_VERSION,
            next_serial: 0,
            entities: BTreeMap::from([(entity.to_string(), e)]),
        }
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        save(&path, &file_with("module:a", "module:a")).unwrap();
        assert!(!dir.path().join(".registry.json.tmp").exists());

        match load(&path) {
            LoadOutcome::Loaded(f) => {
                assert_eq!(f.entities.len(), 1);
                assert_eq!(f.next_serial, 8);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load(&dir.path().join("nope.json")), LoadOutcome::Missing));
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        save(&path, &file_with("module:a", "module:a")).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(load(&path), LoadOutcome::Corrupt(_)));
    }

    #[test]
    fn inconsistent_entity_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        save(&path, &file_with("module:a", "module:b")).unwrap();
        assert!(matches!(load(&path), LoadOutcome::Corrupt(_)));
    }

    #[test]
    fn future_format_is_corrupt_but_unknown_fields_are_not() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        fs::write(&path, r#"{"format_version": 99, "entities": {}}"#).unwrap();
        assert!(matches!(load(&path), LoadOutcome::Corrupt(_)));

        fs::write(&path, r#"{"format_version": 1, "entities": {}, "written_by": "x"}"#).unwrap();
        assert!(matches!(load(&path), LoadOutcome::Loaded(_)));
    }
}
