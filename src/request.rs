use std::collections::{BTreeMap, BTreeSet};

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use hmac::Hmac;
use pbkdf2::pbkdf2;
use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use crate::account::UserId;

pub type RequestId = Uuid;

const TOKEN_SALT: &[u8] = b"pay-ledger/request-token/v1";
const KDF_ROUNDS: u32 = 10_000;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("No pending payment request is identified by \"{0}\"")]
    InvalidIdentifier(String),
    #[error("Failed to seal request identifier")]
    Sealing,
}

/// Turns raw request ids into opaque capability tokens and back.
///
/// Whoever holds a token can redeem the request it names. This is
/// authorization by possession only; fund transfers are additionally gated by
/// a signature check. All tokens share one key derived from the server
/// passphrase.
pub struct CapabilityCipher {
    cipher: Aes256Gcm,
}

impl CapabilityCipher {
    pub fn new(passphrase: &str) -> Self {
        let mut key = [0u8; 32];
        pbkdf2::<Hmac<Sha256>>(passphrase.as_bytes(), TOKEN_SALT, KDF_ROUNDS, &mut key);
        Self {
            cipher: Aes256Gcm::new(&key.into()),
        }
    }

    pub fn seal(&self, id: RequestId) -> Result<String, RequestError> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), id.as_bytes().as_slice())
            .map_err(|_| RequestError::Sealing)?;
        let mut blob = nonce_bytes.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(hex::encode(blob))
    }

    pub fn open(&self, token: &str) -> Result<RequestId, RequestError> {
        let invalid = || RequestError::InvalidIdentifier(token.to_owned());
        let blob = hex::decode(token).map_err(|_| invalid())?;
        if blob.len() <= NONCE_LEN {
            return Err(invalid());
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| invalid())?;
        Uuid::from_slice(&plain).map_err(|_| invalid())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualRequest {
    pub id: RequestId,
    pub token: String,
    pub amount: Decimal,
    pub requester: UserId,
    pub payer: UserId,
}

impl IndividualRequest {
    pub fn new(
        cipher: &CapabilityCipher,
        requester: &str,
        payer: &str,
        amount: Decimal,
    ) -> Result<Self, RequestError> {
        let id = Uuid::new_v4();
        Ok(Self {
            id,
            token: cipher.seal(id)?,
            amount,
            requester: requester.to_owned(),
            payer: payer.to_owned(),
        })
    }
}

/// One member's share of a group split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildRequest {
    pub member: UserId,
    pub token: String,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRequest {
    pub group_id: String,
    pub total_amount: Decimal,
    pub children: Vec<ChildRequest>,
    /// Tokens of settled children, in settlement order.
    pub settled: Vec<String>,
}

impl GroupRequest {
    pub fn new(group_id: &str, total_amount: Decimal) -> Self {
        Self {
            group_id: group_id.to_owned(),
            total_amount,
            children: Vec::new(),
            settled: Vec::new(),
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|c| c.member.as_str())
    }

    pub fn child_request_ids(&self) -> impl Iterator<Item = &str> {
        self.children.iter().map(|c| c.token.as_str())
    }

    pub fn is_settled(&self, token: &str) -> bool {
        self.settled.iter().any(|t| t == token)
    }

    /// Returns false when the token is not a child of this split or was
    /// already settled.
    pub fn settle(&mut self, token: &str) -> bool {
        let is_child = self.children.iter().any(|c| c.token == token);
        if !is_child || self.is_settled(token) {
            return false;
        }
        self.settled.push(token.to_owned());
        true
    }

    pub fn summary(&self) -> String {
        let (paid, outstanding): (Vec<&ChildRequest>, Vec<&ChildRequest>) = self
            .children
            .iter()
            .partition(|c| self.is_settled(&c.token));
        format!(
            "group {} total {}; paid: {}; outstanding: {}",
            self.group_id,
            self.total_amount.normalize(),
            render_children(&paid),
            render_children(&outstanding),
        )
    }
}

fn render_children(children: &[&ChildRequest]) -> String {
    if children.is_empty() {
        return "-".to_owned();
    }
    children
        .iter()
        .map(|c| format!("{}({})", c.member, c.amount.normalize()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Per-account pending payment state: requests this account must pay, group
/// splits it owns, and tokens it has already paid.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBook {
    pending: Vec<IndividualRequest>,
    group_requests: BTreeMap<String, Vec<GroupRequest>>,
    paid: BTreeSet<String>,
}

impl RequestBook {
    pub fn add_individual(&mut self, request: IndividualRequest) {
        self.pending.push(request);
    }

    pub fn pending(&self) -> &[IndividualRequest] {
        &self.pending
    }

    pub fn find(&self, id: RequestId) -> Option<&IndividualRequest> {
        self.pending.iter().find(|r| r.id == id)
    }

    pub fn remove(&mut self, id: RequestId) -> Option<IndividualRequest> {
        let pos = self.pending.iter().position(|r| r.id == id)?;
        Some(self.pending.remove(pos))
    }

    /// Earlier splits of the same group stay for history; the newest one
    /// supersedes them for status queries.
    pub fn add_group_request(&mut self, request: GroupRequest) {
        self.group_requests
            .entry(request.group_id.clone())
            .or_default()
            .push(request);
    }

    pub fn group_requests(&self, group_id: &str) -> &[GroupRequest] {
        self.group_requests
            .get(group_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn group_requests_mut(&mut self, group_id: &str) -> &mut [GroupRequest] {
        self.group_requests
            .get_mut(group_id)
            .map(Vec::as_mut_slice)
            .unwrap_or_default()
    }

    pub fn latest_group_request(&self, group_id: &str) -> Option<&GroupRequest> {
        self.group_requests(group_id).last()
    }

    pub fn record_paid(&mut self, token: &str) {
        self.paid.insert(token.to_owned());
    }

    pub fn is_paid(&self, token: &str) -> bool {
        self.paid.contains(token)
    }
}

/// Splits `total` into `parts` shares of whole cents. Leftover cents go one
/// each to the first shares, so the shares always sum to `total`.
pub fn split_amount(total: Decimal, parts: usize) -> Vec<Decimal> {
    if parts == 0 {
        return Vec::new();
    }
    let count = Decimal::from(parts as u64);
    let cent = Decimal::new(1, 2);
    let share = (total / count).round_dp_with_strategy(2, RoundingStrategy::ToZero);
    let extra = ((total - share * count) / cent)
        .trunc()
        .to_usize()
        .unwrap_or(0);
    (0..parts)
        .map(|i| if i < extra { share + cent } else { share })
        .collect()
}
