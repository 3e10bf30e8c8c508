use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Server settings. Every field has a default, so a partial file (or none at
/// all) is valid. Relative file names resolve under `data_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub ledger_file: PathBuf,
    pub snapshot_file: PathBuf,
    pub credentials_file: PathBuf,
    pub qr_dir: PathBuf,
    #[serde(with = "rust_decimal::serde::str")]
    pub initial_balance: Decimal,
    pub request_passphrase: String,
    pub lock_timeout_ms: u64,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            ledger_file: PathBuf::from("ledger.jsonl"),
            snapshot_file: PathBuf::from("state.json"),
            credentials_file: PathBuf::from("users.txt"),
            qr_dir: PathBuf::from("qr"),
            initial_balance: Decimal::ONE_HUNDRED,
            request_passphrase: "change-me".to_string(),
            lock_timeout_ms: 2000,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// A missing file means defaults; an unreadable or malformed one is an
    /// error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(s) => Ok(toml::from_str(&s)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Config rooted at `data_dir`, everything else default.
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.resolve(&self.ledger_file)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.resolve(&self.snapshot_file)
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.resolve(&self.credentials_file)
    }

    pub fn qr_path(&self) -> PathBuf {
        self.resolve(&self.qr_dir)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    fn resolve(&self, file: &Path) -> PathBuf {
        if file.is_absolute() {
            file.to_path_buf()
        } else {
            self.data_dir.join(file)
        }
    }
}
