use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{LedgerEntry, LedgerError, TransactionLedger};

/// On-disk form of a [`LedgerEntry`], one JSON object per line. `hash` covers
/// the sequence number, the predecessor's hash and the entry itself, so any
/// edit or removal inside the file breaks the chain.
#[derive(Debug, Serialize, Deserialize)]
struct Record {
    seq: u64,
    payload: String,
    signature: String,
    prev_hash: String,
    hash: String,
}

struct Tail {
    file: File,
    len: u64,
    next_seq: u64,
    last_hash: String,
}

struct Scan {
    records: Vec<Record>,
    valid_len: u64,
}

pub struct FileTransactionLedger {
    path: PathBuf,
    tail: Mutex<Tail>,
}

impl FileTransactionLedger {
    /// Opens (or creates) the ledger at `path`, verifying the hash chain.
    ///
    /// A trailing line without its newline is what a crash in the middle of
    /// an append leaves behind; it is cut off so it never becomes visible.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        let bytes = fs::read(&path)?;
        let scan = scan(&bytes)?;
        if scan.valid_len < bytes.len() as u64 {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = bytes.len() as u64 - scan.valid_len,
                "truncating torn ledger tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }
        let last_hash = scan
            .records
            .last()
            .map(|r| r.hash.clone())
            .unwrap_or_else(genesis_hash);
        tracing::debug!(path = %path.display(), entries = scan.records.len(), "ledger opened");
        Ok(Self {
            path,
            tail: Mutex::new(Tail {
                file,
                len: scan.valid_len,
                next_seq: scan.records.len() as u64,
                last_hash,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TransactionLedger for FileTransactionLedger {
    fn append(&self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        let mut tail = self.tail.lock();
        let record = Record {
            seq: tail.next_seq,
            payload: entry.payload.clone(),
            signature: hex::encode(&entry.signature),
            prev_hash: tail.last_hash.clone(),
            hash: record_hash(tail.next_seq, &tail.last_hash, &entry.payload, &entry.signature),
        };
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let written = tail
            .file
            .write_all(line.as_bytes())
            .and_then(|_| tail.file.sync_data());
        if let Err(err) = written {
            // best effort: drop whatever part of the line reached the file
            let _ = tail.file.set_len(tail.len);
            return Err(err.into());
        }

        tail.len += line.len() as u64;
        tail.next_seq += 1;
        tail.last_hash = record.hash;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        let tail = self.tail.lock();
        let bytes = fs::read(&self.path)?;
        let valid = &bytes[..(tail.len as usize).min(bytes.len())];
        scan(valid)?
            .records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                let signature =
                    hex::decode(&record.signature).map_err(|err| LedgerError::Corrupted {
                        line: index + 1,
                        reason: err.to_string(),
                    })?;
                Ok(LedgerEntry {
                    payload: record.payload,
                    signature,
                })
            })
            .collect()
    }
}

fn genesis_hash() -> String {
    "0".repeat(64)
}

fn record_hash(seq: u64, prev_hash: &str, payload: &str, signature: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seq.to_be_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(payload.as_bytes());
    hasher.update(signature);
    hex::encode(hasher.finalize())
}

fn scan(bytes: &[u8]) -> Result<Scan, LedgerError> {
    let mut records: Vec<Record> = Vec::new();
    let mut valid_len = 0u64;
    let mut prev_hash = genesis_hash();

    for (index, line) in bytes.split_inclusive(|b| *b == b'\n').enumerate() {
        let Some(body) = line.strip_suffix(b"\n") else {
            break;
        };
        let corrupted = |reason: String| LedgerError::Corrupted {
            line: index + 1,
            reason,
        };
        let record: Record = match serde_json::from_slice(body) {
            Ok(record) => record,
            // a final line that does not parse is a torn write too
            Err(_) if valid_len + line.len() as u64 == bytes.len() as u64 => break,
            Err(err) => return Err(corrupted(err.to_string())),
        };
        if record.seq != records.len() as u64 {
            return Err(corrupted(format!(
                "expected sequence {}, found {}",
                records.len(),
                record.seq
            )));
        }
        if record.prev_hash != prev_hash {
            return Err(corrupted("broken hash chain".to_owned()));
        }
        let signature = hex::decode(&record.signature).map_err(|e| corrupted(e.to_string()))?;
        if record_hash(record.seq, &record.prev_hash, &record.payload, &signature) != record.hash {
            return Err(corrupted("hash mismatch".to_owned()));
        }
        prev_hash = record.hash.clone();
        valid_len += line.len() as u64;
        records.push(record);
    }

    Ok(Scan { records, valid_len })
}
