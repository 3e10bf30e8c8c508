/// Per-user balance and pending payment state.
/// State is modified using events, which are created by handling debit/credit requests.
pub mod account;

/// Owns every account and serializes access to them, one lock per account.
pub mod catalog;

/// Payment requests, group splits and the capability tokens naming them.
pub mod request;

/// Groups of users: creation, membership and ownership checks.
pub mod group;

/// Ed25519 certificates and signed payloads.
pub mod signature;

/// Single-use QR payment tokens.
pub mod qr;

/// `userID:password` credential file.
pub mod credentials;

/// Command line parsing, plus the table of every supported command.
pub mod command;

/// Append-only transaction log, plus "file" and "in memory" implementations.
pub mod ledger;

/// Moves money between two accounts with the ledger append in the same
/// critical section.
pub mod transfer;

/// Routes parsed commands to their handlers and maps failures to error kinds.
pub mod dispatcher;

/// Rebuilds balances by replaying the ledger.
pub mod recovery;

/// Groups and pending requests persisted between restarts.
pub mod snapshot;

pub mod config;

pub mod logging;

/// Ideally, this module should exist on its own crate, as a way to
/// bootstrap core logic. However, integration tests drive it too,
/// so it lives here.
pub mod bin_utils;
