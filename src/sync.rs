use tracing::{debug, info, warn};

use crate::error::RemoteError;
use crate::local::{LocalCache, LocalRead};
use crate::log_csv::{self, LogEntry};
use crate::models::Measurement;
use crate::remote::ObjectStore;

const CONTENT_TYPE: &str = "text/csv";

/// Which copy became authoritative on load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    /// Sync disabled.
    LocalOnly,
    /// Remote unreachable or unreadable; local served as fallback.
    LocalFallback { repaired: bool },
    /// Remote was empty or missing and was seeded from local.
    SeededRemote { pushed: bool },
    /// Remote content replaced the local cache.
    Remote,
    /// Both copies empty.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOutcome {
    pub source: LoadSource,
    pub local_reset: bool,
    pub warnings: Vec<String>,
}

/// Result of pushing the log to the remote store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSync {
    Disabled,
    Pushed,
    /// Saved locally only.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub remote: RemoteSync,
}

impl SaveOutcome {
    pub fn warning(&self) -> Option<String> {
        match &self.remote {
            RemoteSync::Failed(reason) => Some(format!(
                "Saved locally, but failed to upload the log to remote storage: {reason}"
            )),
            _ => None,
        }
    }
}

enum RemoteRead {
    Unavailable(RemoteError),
    Missing,
    Loaded(Vec<LogEntry>),
}

/// Owns the in-memory measurement log for a session.
///
/// A reachable, non-empty remote always wins on load; the local copy only
/// seeds an empty remote or serves as the offline fallback. Writes replace the
/// whole log, local first, then remote on a best-effort basis.
///
/// There is no cross-session locking. Two processes that load, append and
/// save concurrently race, and the last save silently drops the other's change.
pub struct Reconciler {
    local: LocalCache,
    remote: Option<Box<dyn ObjectStore>>,
    log: Vec<LogEntry>,
}

impl Reconciler {
    pub fn new(local: LocalCache, remote: Option<Box<dyn ObjectStore>>) -> Self {
        Self {
            local,
            remote,
            log: Vec::new(),
        }
    }

    pub fn sync_enabled(&self) -> bool {
        self.remote.is_some()
    }

    /// Fresh copy of the usable readings in the current log.
    pub fn snapshot(&self) -> Vec<Measurement> {
        log_csv::readings(&self.log)
    }

    /// Every row of the current log, unreadable rows included.
    pub fn entries(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Resolves the authoritative log from both tiers.
    pub async fn load(&mut self) -> anyhow::Result<LoadOutcome> {
        let mut outcome = LoadOutcome {
            source: LoadSource::LocalOnly,
            local_reset: false,
            warnings: Vec::new(),
        };

        let local = match self.local.read() {
            LocalRead::Missing => Vec::new(),
            LocalRead::Loaded(log) => log,
            LocalRead::Corrupt(err) => {
                warn!(path = %self.local.path().display(), error = %err, "local log unreadable, resetting");
                outcome
                    .warnings
                    .push("Local log could not be read. Starting with an empty dataset.".to_string());
                outcome.local_reset = self.refresh_local(&[], &mut outcome.warnings);
                Vec::new()
            }
        };

        let Some(remote) = self.remote.as_deref() else {
            debug!(rows = local.len(), "remote sync disabled, using local log");
            self.log = local;
            return Ok(outcome);
        };

        let source = match read_remote(remote).await {
            RemoteRead::Unavailable(err) => {
                warn!(object = %remote.describe(), error = %err, "remote log unavailable, using local log");
                outcome
                    .warnings
                    .push(format!("Unable to load the log from remote storage: {err}"));
                let mut repaired = false;
                if !local.is_empty() {
                    match push(remote, &local).await {
                        Ok(()) => repaired = true,
                        Err(err) => warn!(error = %err, "could not repair remote log from local cache"),
                    }
                }
                self.log = local;
                LoadSource::LocalFallback { repaired }
            }
            RemoteRead::Loaded(remote_log) if !remote_log.is_empty() => {
                info!(rows = remote_log.len(), "remote log is authoritative, refreshing local cache");
                self.refresh_local(&remote_log, &mut outcome.warnings);
                self.log = remote_log;
                LoadSource::Remote
            }
            RemoteRead::Missing | RemoteRead::Loaded(_) if !local.is_empty() => {
                info!(rows = local.len(), "seeding empty remote log from local cache");
                let pushed = match push(remote, &local).await {
                    Ok(()) => true,
                    Err(err) => {
                        outcome.warnings.push(format!(
                            "Failed to seed remote storage from the local log: {err}"
                        ));
                        false
                    }
                };
                self.log = local;
                LoadSource::SeededRemote { pushed }
            }
            RemoteRead::Missing | RemoteRead::Loaded(_) => {
                self.log = Vec::new();
                LoadSource::Empty
            }
        };

        outcome.source = source;
        Ok(outcome)
    }

    /// Writes the whole log locally, then best-effort to the remote. A remote
    /// failure never rolls back the local write.
    pub async fn save(&mut self, log: Vec<LogEntry>) -> anyhow::Result<SaveOutcome> {
        self.local.write(&log)?;
        self.log = log;

        let remote = match self.remote.as_deref() {
            None => RemoteSync::Disabled,
            Some(store) => match push(store, &self.log).await {
                Ok(()) => RemoteSync::Pushed,
                Err(err) => {
                    warn!(object = %store.describe(), error = %err, "saved locally only");
                    RemoteSync::Failed(err.to_string())
                }
            },
        };

        Ok(SaveOutcome { remote })
    }

    /// Appends one measurement by rewriting the full log.
    pub async fn append(&mut self, measurement: Measurement) -> anyhow::Result<SaveOutcome> {
        let mut log = self.log.clone();
        log.push(measurement.into());
        self.save(log).await
    }

    pub async fn clear(&mut self) -> anyhow::Result<SaveOutcome> {
        self.save(Vec::new()).await
    }

    /// Uploads the local cache file as-is, independent of what was loaded.
    pub async fn push_local(&self) -> anyhow::Result<usize> {
        let Some(remote) = self.remote.as_deref() else {
            anyhow::bail!("remote storage is not configured");
        };
        let log = match self.local.read() {
            LocalRead::Missing => anyhow::bail!("no local log found to import yet"),
            LocalRead::Loaded(log) => log,
            LocalRead::Corrupt(err) => anyhow::bail!("could not read the local log for import: {err}"),
        };
        push(remote, &log).await?;
        Ok(log.len())
    }

    /// Rewrites the local cache during load. A failure leaves the session
    /// working from memory and is reported as a warning.
    fn refresh_local(&self, entries: &[LogEntry], warnings: &mut Vec<String>) -> bool {
        match self.local.write(entries) {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %self.local.path().display(), error = %err, "could not rewrite local log");
                warnings.push(format!("Unable to update the local log cache: {err}"));
                false
            }
        }
    }
}

async fn read_remote(remote: &dyn ObjectStore) -> RemoteRead {
    match remote.get().await {
        Ok(None) => RemoteRead::Missing,
        Ok(Some(bytes)) => match log_csv::decode(&bytes) {
            Ok(log) => RemoteRead::Loaded(log),
            Err(err) => RemoteRead::Unavailable(err.into()),
        },
        Err(err) => RemoteRead::Unavailable(err),
    }
}

async fn push(remote: &dyn ObjectStore, log: &[LogEntry]) -> Result<(), RemoteError> {
    let body = log_csv::encode(log)?;
    remote.put(body, CONTENT_TYPE).await
}
