use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    account::UserId,
    catalog::{AccountCatalog, CatalogError},
    group::{Group, GroupId, GroupRegistry},
    request::RequestBook,
};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Snapshot is malformed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Groups and request books at a point in time. Balances are deliberately
/// absent: they are rebuilt from the ledger.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub groups: BTreeMap<GroupId, Group>,
    pub books: BTreeMap<UserId, RequestBook>,
}

impl StateSnapshot {
    /// Fails with `LockTimeout` when an account stays busy for too long.
    pub fn capture(catalog: &AccountCatalog, groups: &GroupRegistry) -> Result<Self, CatalogError> {
        Ok(Self {
            groups: groups.export(),
            books: catalog.request_books()?,
        })
    }

    pub fn restore(mut self, catalog: &AccountCatalog, groups: &GroupRegistry) {
        self.groups.retain(|group_id, group| {
            let keep = !group.members().is_empty();
            if !keep {
                warn!(group = %group_id, "dropping group without members");
            }
            keep
        });
        groups.restore(self.groups);
        let restored = catalog.restore_request_books(self.books);
        debug!(restored, "request books restored");
    }

    /// A missing file is an empty snapshot.
    pub fn load(path: &Path) -> Result<Self, SnapshotError> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes next to `path` and renames over it, so readers only ever see a
    /// complete snapshot.
    pub fn save(&self, path: &Path) -> Result<(), SnapshotError> {
        let tmp = path.with_extension("tmp");
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
