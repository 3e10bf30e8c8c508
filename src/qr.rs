use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::account::UserId;

/// Stores single-use payment tokens. Decoding consumes the artifact, so a
/// token can be resolved at most once.
pub trait QrCodec: Send + Sync {
    fn encode(&self, payload: &str) -> io::Result<Uuid>;

    fn decode(&self, id: &str) -> io::Result<Option<String>>;
}

/// `<requester>_<amount>`
pub fn qr_payload(requester: &str, amount: Decimal) -> String {
    format!("{requester}_{}", amount.normalize())
}

pub fn parse_qr_payload(payload: &str) -> Option<(UserId, Decimal)> {
    let (requester, amount) = payload.rsplit_once('_')?;
    if requester.is_empty() {
        return None;
    }
    let amount = Decimal::from_str(amount).ok()?;
    Some((requester.to_owned(), amount))
}

/// Keeps one `<uuid>.qr` artifact per token under a directory.
pub struct FileQrCodec {
    dir: PathBuf,
}

impl FileQrCodec {
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl QrCodec for FileQrCodec {
    fn encode(&self, payload: &str) -> io::Result<Uuid> {
        let id = Uuid::new_v4();
        fs::write(self.dir.join(format!("{id}.qr")), payload)?;
        Ok(id)
    }

    fn decode(&self, id: &str) -> io::Result<Option<String>> {
        // non-uuid ids never name an artifact
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let path = self.dir.join(format!("{id}.qr"));
        let payload = match fs::read_to_string(&path) {
            Ok(payload) => payload,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err),
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(Some(payload)),
            // lost the race against a concurrent decode
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[derive(Default)]
pub struct InMemoryQrCodec {
    artifacts: Mutex<HashMap<Uuid, String>>,
}

impl QrCodec for InMemoryQrCodec {
    fn encode(&self, payload: &str) -> io::Result<Uuid> {
        let id = Uuid::new_v4();
        self.artifacts.lock().insert(id, payload.to_owned());
        Ok(id)
    }

    fn decode(&self, id: &str) -> io::Result<Option<String>> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        Ok(self.artifacts.lock().remove(&id))
    }
}
