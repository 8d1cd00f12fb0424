// De-duplication store
// Durable single-slot record of the last reported listen

use crate::fingerprint::Fingerprint;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const DEFAULT_FILE_NAME: &str = "last_scrobble";

#[derive(Debug, thiserror::Error)]
pub enum DedupError {
    #[error("failed to {action} dedup record at {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Storage for the fingerprint of the last successfully reported listen
pub trait DedupStore {
    /// Read the stored fingerprint, `None` if nothing was reported yet
    fn load(&self) -> Result<Option<Fingerprint>, DedupError>;

    /// Replace the stored fingerprint; must be durable once this returns `Ok`
    fn store(&mut self, fingerprint: &Fingerprint) -> Result<(), DedupError>;
}

/// Flat-file store, overwritten atomically via write-temp-then-rename
#[derive(Debug, Clone)]
pub struct FileDedupStore {
    path: PathBuf,
}

impl FileDedupStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location under the user's data directory
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join(crate::APP_NAME).join(DEFAULT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| DEFAULT_FILE_NAME.into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, action: &'static str, source: io::Error) -> DedupError {
        DedupError::Io {
            action,
            path: self.path.clone(),
            source,
        }
    }
}

impl DedupStore for FileDedupStore {
    fn load(&self) -> Result<Option<Fingerprint>, DedupError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Fingerprint::from_stored(&content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error("read", e)),
        }
    }

    fn store(&mut self, fingerprint: &Fingerprint) -> Result<(), DedupError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error("create directory for", e))?;
            }
        }

        let tmp = self.tmp_path();
        let write = || -> io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(fingerprint.as_str().as_bytes())?;
            file.sync_all()?;
            Ok(())
        };
        write().map_err(|e| self.io_error("write", e))?;

        fs::rename(&tmp, &self.path).map_err(|e| self.io_error("replace", e))?;

        // Make the rename itself durable
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        log::debug!("Stored last scrobble {} at {:?}", fingerprint, self.path);
        Ok(())
    }
}

/// In-memory store
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MemoryDedupStore {
    value: Option<Fingerprint>,
}

#[cfg(test)]
impl DedupStore for MemoryDedupStore {
    fn load(&self) -> Result<Option<Fingerprint>, DedupError> {
        Ok(self.value.clone())
    }

    fn store(&mut self, fingerprint: &Fingerprint) -> Result<(), DedupError> {
        self.value = Some(fingerprint.clone());
        Ok(())
    }
}
