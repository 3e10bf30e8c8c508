use std::{fmt, io};

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    account::AccountError,
    catalog::CatalogError,
    command::CommandError,
    group::{GroupError, Memberships},
    ledger::LedgerError,
    request::{IndividualRequest, RequestError, RequestId},
    signature::{Certificate, SignedPayload},
};

pub mod bank_dispatcher;

pub use bank_dispatcher::Dispatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserNotFound,
    GroupNotFound,
    GroupExists,
    InvalidGroupOwner,
    UserAlreadyInGroup,
    InsufficientBalance,
    InvalidOperation,
    InvalidIdentifier,
    InvalidQrCode,
    SignatureInvalid,
    /// Retryable: an account stayed locked for longer than the lock timeout.
    LockTimeout,
    Transport,
    /// Durability can no longer be guaranteed; the server must stop.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Peer closed the channel")]
    Closed,
    #[error("Malformed signed message: {0}")]
    Malformed(String),
}

/// Caller side of a signature-requiring command.
pub trait SigningChannel {
    /// Sends an intermediate payload the caller has to sign.
    fn send_payload(&mut self, payload: &str) -> Result<(), ChannelError>;

    /// Waits for the caller's signed payload and certificate.
    fn receive_signed(&mut self) -> Result<(SignedPayload, Certificate), ChannelError>;
}

#[derive(Debug, Error)]
pub enum BankError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Group(#[from] GroupError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("{0}")]
    InvalidOperation(String),
    #[error("No payment is identified by QR code \"{0}\"")]
    InvalidQrCode(String),
    #[error("QR code storage failed: {0}")]
    QrStorage(io::Error),
    #[error("Signature rejected")]
    SignatureInvalid,
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("Failed to persist server state: {0}")]
    Persistence(String),
}

impl BankError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BankError::Command(_) | BankError::InvalidOperation(_) => ErrorKind::InvalidOperation,
            BankError::Catalog(err) => match err {
                CatalogError::UserNotFound(_) => ErrorKind::UserNotFound,
                CatalogError::LockTimeout(_) => ErrorKind::LockTimeout,
                CatalogError::Account(AccountError::InsufficientBalance { .. }) => {
                    ErrorKind::InsufficientBalance
                }
                CatalogError::UserExists(_)
                | CatalogError::SelfTransfer(_)
                | CatalogError::Account(AccountError::NonPositiveAmount(_)) => {
                    ErrorKind::InvalidOperation
                }
            },
            BankError::Group(err) => match err {
                GroupError::GroupNotFound(_) => ErrorKind::GroupNotFound,
                GroupError::GroupExists(_) => ErrorKind::GroupExists,
                GroupError::InvalidGroupOwner { .. } => ErrorKind::InvalidGroupOwner,
                GroupError::UserAlreadyInGroup { .. } => ErrorKind::UserAlreadyInGroup,
            },
            BankError::Request(RequestError::InvalidIdentifier(_)) => ErrorKind::InvalidIdentifier,
            BankError::Request(RequestError::Sealing) => ErrorKind::InvalidOperation,
            BankError::InvalidQrCode(_) | BankError::QrStorage(_) => ErrorKind::InvalidQrCode,
            BankError::SignatureInvalid => ErrorKind::SignatureInvalid,
            BankError::Channel(_) => ErrorKind::Transport,
            BankError::Ledger(_) | BankError::Persistence(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Done,
    Balance(Decimal),
    RequestToken(String),
    Requests(Vec<IndividualRequest>),
    QrCode(Uuid),
    Groups(Memberships),
    Status(String),
    History {
        group_id: String,
        request_ids: Vec<RequestId>,
    },
}

/// Single-line rendering used by the line session.
impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Done => write!(f, "true"),
            Response::Balance(balance) => write!(f, "{}", balance.normalize()),
            Response::RequestToken(token) => write!(f, "{token}"),
            Response::Requests(requests) => {
                let rendered: Vec<String> = requests
                    .iter()
                    .map(|r| format!("{}:{}:{}", r.token, r.requester, r.amount.normalize()))
                    .collect();
                write!(f, "{}", rendered.join(","))
            }
            Response::QrCode(id) => write!(f, "{id}"),
            Response::Groups(memberships) => write!(
                f,
                "owner: {}; member: {}",
                render_list(&memberships.owned),
                render_list(&memberships.member)
            ),
            Response::Status(summary) => write!(f, "{summary}"),
            Response::History {
                group_id,
                request_ids,
            } => {
                let ids: Vec<String> = request_ids.iter().map(Uuid::to_string).collect();
                write!(f, "group {group_id} paid: {}", render_list(&ids))
            }
        }
    }
}

fn render_list(items: &[String]) -> String {
    if items.is_empty() {
        "-".to_owned()
    } else {
        items.join(",")
    }
}
