use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::LocalError;
use crate::log_csv::{self, LogEntry};

/// Result of reading the local cache.
#[derive(Debug)]
pub enum LocalRead {
    /// No cache file yet.
    Missing,
    Loaded(Vec<LogEntry>),
    /// File exists but could not be read as a log.
    Corrupt(LocalError),
}

#[derive(Debug, Clone)]
pub struct LocalCache {
    path: PathBuf,
}

impl LocalCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> LocalRead {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return LocalRead::Missing,
            Err(err) => return LocalRead::Corrupt(err.into()),
        };
        match log_csv::decode(&bytes) {
            Ok(entries) => {
                debug!(path = %self.path.display(), rows = entries.len(), "read local cache");
                LocalRead::Loaded(entries)
            }
            Err(err) => LocalRead::Corrupt(err.into()),
        }
    }

    /// Replaces the cache file through a sibling temp file and a rename so a
    /// reader never sees a half-written log.
    pub fn write(&self, entries: &[LogEntry]) -> Result<(), LocalError> {
        let bytes = log_csv::encode(entries)?;
        self.write_bytes(&bytes)
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), LocalError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("csv.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "wrote local cache");
        Ok(())
    }
}
