use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const DEFAULT_REGION: &str = "nyc3";
pub const DEFAULT_OBJECT_KEY: &str = "environmental-monitor/measurements.csv";

const LOG_FILE: &str = "measurements.csv";
const SETTINGS_FILE: &str = "spaces_config.json";

/// Remote object store settings. Sync is enabled only when every required
/// field is filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: String,
    pub object_key: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl StorageConfig {
    /// Trims every field and restores defaults for blank region/object key.
    pub fn normalized(self) -> Self {
        let or_default = |value: String, default: &str| {
            let value = value.trim().to_string();
            if value.is_empty() {
                default.to_string()
            } else {
                value
            }
        };
        Self {
            bucket: self.bucket.trim().to_string(),
            region: or_default(self.region, DEFAULT_REGION),
            endpoint: self.endpoint.trim().to_string(),
            object_key: or_default(self.object_key, DEFAULT_OBJECT_KEY),
            access_key_id: self.access_key_id.trim().to_string(),
            secret_access_key: self.secret_access_key.trim().to_string(),
        }
    }

    /// Reads `DO_SPACES_*`. Credentials fall back to the AWS variables only
    /// when the `DO_SPACES_*` one is unset.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).unwrap_or_default();
        let with_fallback = |name: &str, fallback: &str| {
            lookup(name).unwrap_or_else(|| get(fallback))
        };
        Self {
            bucket: get("DO_SPACES_BUCKET"),
            region: get("DO_SPACES_REGION"),
            endpoint: get("DO_SPACES_ENDPOINT"),
            object_key: get("DO_SPACES_OBJECT_KEY"),
            access_key_id: with_fallback("DO_SPACES_ACCESS_KEY_ID", "AWS_ACCESS_KEY_ID"),
            secret_access_key: with_fallback("DO_SPACES_SECRET_ACCESS_KEY", "AWS_SECRET_ACCESS_KEY"),
        }
        .normalized()
    }

    pub fn sync_enabled(&self) -> bool {
        [
            &self.bucket,
            &self.object_key,
            &self.access_key_id,
            &self.secret_access_key,
        ]
        .iter()
        .all(|value| !value.trim().is_empty())
    }

    /// Explicit endpoint (scheme added when missing) or the regional default.
    pub fn endpoint_url(&self) -> String {
        let endpoint = self.endpoint.trim().trim_end_matches('/');
        if endpoint.is_empty() {
            format!("https://{}.digitaloceanspaces.com", self.region)
        } else if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        }
    }

    /// Applies submitted settings. Blank credentials keep the current ones.
    pub fn updated_with(&self, update: StorageConfig) -> StorageConfig {
        let keep = |new: String, current: &str| {
            if new.trim().is_empty() {
                current.to_string()
            } else {
                new
            }
        };
        StorageConfig {
            access_key_id: keep(update.access_key_id, &self.access_key_id),
            secret_access_key: keep(update.secret_access_key, &self.secret_access_key),
            ..update
        }
        .normalized()
    }

    /// Human readable summary with credentials masked.
    pub fn describe(&self) -> String {
        format!(
            "bucket: {}\nregion: {}\nendpoint: {}\nobject key: {}\naccess key id: {}\nsecret access key: {}\nsync: {}",
            display_or_dash(&self.bucket),
            self.region,
            self.endpoint_url(),
            self.object_key,
            mask(&self.access_key_id),
            mask(&self.secret_access_key),
            if self.sync_enabled() { "configured" } else { "not configured" },
        )
    }
}

fn display_or_dash(value: &str) -> &str {
    if value.is_empty() {
        "--"
    } else {
        value
    }
}

fn mask(secret: &str) -> String {
    match secret.chars().count() {
        0 => "--".to_string(),
        n if n <= 4 => "*".repeat(n),
        n => {
            let tail: String = secret.chars().skip(n - 4).collect();
            format!("{}{}", "*".repeat(n - 4), tail)
        }
    }
}

/// Filesystem layout under the data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub data_dir: PathBuf,
}

impl DataPaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }
}

/// Reads the saved settings file. Missing, unreadable or malformed files
/// are treated as "no saved settings".
pub fn load_saved(path: &Path) -> Option<StorageConfig> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return None,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unreadable settings file");
            return None;
        }
    };
    match serde_json::from_str::<StorageConfig>(&raw) {
        Ok(config) => Some(config.normalized()),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring malformed settings file");
            None
        }
    }
}

pub fn save_settings(path: &Path, config: &StorageConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string(&config.clone().normalized())?;
    fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), "saved storage settings");
    Ok(())
}

pub fn clear_saved(path: &Path) -> anyhow::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

/// Effective storage settings: saved settings replace the environment.
pub fn resolve_storage(paths: &DataPaths) -> StorageConfig {
    load_saved(&paths.settings_file()).unwrap_or_else(StorageConfig::from_env)
}

/// Merges submitted settings over the effective ones and saves the result.
/// A CLI run has no session to hold unsaved settings, so they always land in
/// the settings file.
pub fn apply_update(paths: &DataPaths, update: StorageConfig) -> anyhow::Result<StorageConfig> {
    let updated = resolve_storage(paths).updated_with(update);
    save_settings(&paths.settings_file(), &updated)?;
    Ok(updated)
}
