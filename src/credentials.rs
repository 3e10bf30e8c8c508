use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::UserId;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Credential store is malformed: {0}")]
    Csv(#[from] csv::Error),
    #[error("\"{0}\" is not a valid user id")]
    InvalidUserId(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialRecord {
    user_id: UserId,
    password: String,
}

/// Append-only `userID:password` file, one record per line. Many readers,
/// one writer at a time.
pub struct CredentialStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl CredentialStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CredentialError> {
        let path = path.as_ref().to_path_buf();
        OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            lock: RwLock::new(()),
        })
    }

    pub fn lookup(&self, user_id: &str) -> Result<Option<String>, CredentialError> {
        let _guard = self.lock.read();
        for record in self.reader()?.into_deserialize::<CredentialRecord>() {
            let record = record?;
            if record.user_id == user_id {
                return Ok(Some(record.password));
            }
        }
        Ok(None)
    }

    pub fn append(&self, user_id: &str, password: &str) -> Result<(), CredentialError> {
        if !is_valid_user_id(user_id) {
            return Err(CredentialError::InvalidUserId(user_id.to_owned()));
        }
        let _guard = self.lock.write();
        let file = OpenOptions::new().append(true).open(&self.path)?;
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b':')
            .has_headers(false)
            .from_writer(file);
        writer.serialize(CredentialRecord {
            user_id: user_id.to_owned(),
            password: password.to_owned(),
        })?;
        writer.flush()?;
        if let Ok(file) = writer.into_inner() {
            file.sync_data()?;
        }
        Ok(())
    }

    pub fn users(&self) -> Result<Vec<UserId>, CredentialError> {
        let _guard = self.lock.read();
        self.reader()?
            .into_deserialize::<CredentialRecord>()
            .map(|record| -> Result<UserId, CredentialError> { Ok(record?.user_id) })
            .collect()
    }

    fn reader(&self) -> Result<csv::Reader<std::fs::File>, CredentialError> {
        Ok(csv::ReaderBuilder::new()
            .delimiter(b':')
            .has_headers(false)
            .from_path(&self.path)?)
    }
}

/// User ids must be non-empty and free of `:` and whitespace.
pub fn is_valid_user_id(user_id: &str) -> bool {
    !user_id.is_empty() && !user_id.chars().any(|c| c == ':' || c.is_whitespace())
}
