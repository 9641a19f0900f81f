//! Local byte store for module content, keyed by digest.
//!
//! Each stream is copied once into a hidden temp file while being hashed,
//! then renamed into place under its digest. A digest file is never
//! rewritten once present, so readers need no locking.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::{debug, warn};

use crate::digest::DigestWriter;
use crate::error::{InstallerError, Result};

const TEMP_PREFIX: &str = ".incoming-";

/// Result of staging one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedContent {
    /// Key the content is stored under.
    pub key: String,
    /// SHA-256 of the bytes actually read.
    pub content_digest: String,
    pub size: u64,
}

#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
    counter: AtomicU64,
    /// Keys staged but not yet registered, with the number of stagings
    /// still in flight; garbage collection spares them.
    pinned: Mutex<HashMap<String, usize>>,
}

impl StagingArea {
    /// Open (creating if needed) a staging directory and clear leftover
    /// temp files from an interrupted run.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(StagingArea {
            dir: dir.to_path_buf(),
            counter: AtomicU64::new(0),
            pinned: Mutex::new(HashMap::new()),
        })
    }

    /// Copy `reader` into the store, consuming it exactly once.
    ///
    /// The content is filed under `key` when given, otherwise under its own
    /// digest. The reader is dropped before this returns on every path.
    pub fn stage<R: Read>(&self, mut reader: R, key: Option<&str>) -> Result<StagedContent> {
        if let Some(k) = key {
            validate_key(k)?;
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .dir
            .join(format!("{}{}-{}", TEMP_PREFIX, std::process::id(), n));

        let copied = (|| -> io::Result<(String, u64)> {
            let file = File::create(&tmp)?;
            let mut writer = DigestWriter::new(file);
            io::copy(&mut reader, &mut writer)?;
            let (file, digest, size) = writer.finish()?;
            file.sync_all()?;
            Ok((digest, size))
        })();
        drop(reader);

        let (content_digest, size) = match copied {
            Ok(v) => v,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e.into());
            }
        };

        let key = key.map(str::to_string).unwrap_or_else(|| content_digest.clone());
        let target = self.path_for(&key);
        self.pin(&key);
        if target.exists() {
            // Same key already staged: content is immutable, keep the old file.
            fs::remove_file(&tmp)?;
        } else if let Err(e) = fs::rename(&tmp, &target) {
            let _ = fs::remove_file(&tmp);
            self.release(&key);
            return Err(e.into());
        }
        debug!(key = %key, size, "staged content");
        Ok(StagedContent {
            key,
            content_digest,
            size,
        })
    }

    /// Stage an in-memory buffer.
    pub fn stage_bytes(&self, bytes: &[u8], key: Option<&str>) -> Result<StagedContent> {
        self.stage(bytes, key)
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        validate_key(key).is_ok() && self.path_for(key).is_file()
    }

    /// Read the staged bytes for `key`.
    pub fn read(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        let mut buf = Vec::new();
        File::open(self.path_for(key))?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn pin(&self, key: &str) {
        if let Ok(mut pinned) = self.pinned.lock() {
            *pinned.entry(key.to_string()).or_insert(0) += 1;
        }
    }

    /// Drop one garbage-collection pin once the key is referenced elsewhere.
    /// The key stays pinned until every staging of it is released.
    pub fn release(&self, key: &str) {
        if let Ok(mut pinned) = self.pinned.lock() {
            if let Some(count) = pinned.get_mut(key) {
                *count -= 1;
                if *count == 0 {
                    pinned.remove(key);
                }
            }
        }
    }

    /// Remove staged files whose key is neither in `live` nor pinned.
    /// Returns the number of files removed.
    pub fn gc(&self, live: &HashSet<String>) -> Result<usize> {
        let pinned: HashSet<String> = self
            .pinned
            .lock()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default();
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || live.contains(&name) || pinned.contains(&name) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!(key = %name, error = %e, "cannot remove staged file"),
            }
        }
        if removed > 0 {
            debug!(removed, "staging gc");
        }
        Ok(removed)
    }
}

/// Keys become file names: no separators, no leading dot, not empty.
pub fn validate_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && !key.starts_with('.')
        && key.len() <= 200
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if ok {
        Ok(())
    } else {
        Err(InstallerError::InvalidDigest(key.to_string()))
    }
}
