//! Bootstraps [`pay_ledger`](crate) on top of real files, for the binary and
//! for integration tests.

use std::{
    fs,
    io::{BufRead, Write},
};

use anyhow::{Context, Result, anyhow};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    catalog::AccountCatalog,
    command::CommandSpec,
    config::ServerConfig,
    credentials::{CredentialError, CredentialStore},
    dispatcher::{BankError, Dispatcher, ErrorKind, Response, SigningChannel},
    group::GroupRegistry,
    ledger::file_ledger::FileTransactionLedger,
    qr::FileQrCodec,
    recovery::{self, ReplayReport},
    request::CapabilityCipher,
    signature::SignatureVerifier,
    snapshot::StateSnapshot,
};
use session::LineSession;

pub mod session;

const QUIT: &str = "quit";

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Wrong password for \"{0}\"")]
    WrongPassword(String),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
}

pub struct Server {
    config: ServerConfig,
    catalog: AccountCatalog,
    groups: GroupRegistry,
    ledger: FileTransactionLedger,
    qr_codec: FileQrCodec,
    cipher: CapabilityCipher,
    credentials: CredentialStore,
    registration: Mutex<()>,
    snapshot: Mutex<()>,
    recovered: ReplayReport,
}

impl Server {
    /// Opens every store under the configured data directory and rebuilds
    /// balances: accounts from the credential store, groups and requests from
    /// the snapshot, then the whole ledger replayed on top.
    pub fn open(config: ServerConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("Failed to create data dir `{}`", config.data_dir.display())
        })?;

        let credentials = CredentialStore::open(config.credentials_path())
            .context("Failed to open credential store")?;
        let catalog = AccountCatalog::new(config.initial_balance, config.lock_timeout());
        for user_id in credentials.users().context("Failed to read credentials")? {
            if !catalog.contains(&user_id) {
                catalog.open_account(&user_id)?;
            }
        }

        let groups = GroupRegistry::default();
        StateSnapshot::load(&config.snapshot_path())
            .context("Failed to load state snapshot")?
            .restore(&catalog, &groups);

        let ledger = FileTransactionLedger::open(config.ledger_path())
            .context("Failed to open transaction ledger")?;
        let cipher = CapabilityCipher::new(&config.request_passphrase);
        let recovered = recovery::recover(&catalog, &cipher, &ledger)
            .context("Failed to replay transaction ledger")?;

        let qr_codec = FileQrCodec::open(config.qr_path())
            .with_context(|| format!("Failed to open QR dir `{}`", config.qr_path().display()))?;

        info!(
            accounts = catalog.user_ids().len(),
            applied = recovered.applied,
            skipped = recovered.skipped,
            "server ready"
        );
        Ok(Self {
            config,
            catalog,
            groups,
            ledger,
            qr_codec,
            cipher,
            credentials,
            registration: Mutex::new(()),
            snapshot: Mutex::new(()),
            recovered,
        })
    }

    pub fn catalog(&self) -> &AccountCatalog {
        &self.catalog
    }

    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    pub fn recovered(&self) -> ReplayReport {
        self.recovered
    }

    /// Known users must present their password. Unknown users are registered
    /// and get a fresh account.
    pub fn login(&self, user_id: &str, password: &str) -> Result<(), LoginError> {
        let _guard = self.registration.lock();
        match self.credentials.lookup(user_id)? {
            Some(stored) if stored == password => Ok(()),
            Some(_) => {
                warn!(user = user_id, "wrong password");
                Err(LoginError::WrongPassword(user_id.to_owned()))
            }
            None => {
                self.credentials.append(user_id, password)?;
                if let Err(err) = self.catalog.open_account(user_id) {
                    warn!(user = user_id, %err, "account already open");
                }
                info!(user = user_id, "user registered");
                Ok(())
            }
        }
    }

    /// Runs one command line and persists groups and requests if it changed
    /// them.
    pub fn execute(
        &self,
        user_id: &str,
        line: &str,
        channel: &mut dyn SigningChannel,
    ) -> Result<Response, BankError> {
        let dispatcher = Dispatcher {
            catalog: &self.catalog,
            groups: &self.groups,
            ledger: &self.ledger,
            qr_codec: &self.qr_codec,
            cipher: &self.cipher,
            verifier: SignatureVerifier,
        };
        let response = dispatcher.dispatch(user_id, line, channel)?;

        let persists = line
            .split_whitespace()
            .next()
            .and_then(CommandSpec::find)
            .is_some_and(|spec| spec.persists_state);
        if persists {
            self.save_snapshot()?;
        }
        Ok(response)
    }

    /// A busy account skips this save; the next state-changing command
    /// writes a snapshot covering both.
    pub fn save_snapshot(&self) -> Result<(), BankError> {
        let _guard = self.snapshot.lock();
        let snapshot = match StateSnapshot::capture(&self.catalog, &self.groups) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(%err, "snapshot skipped");
                return Ok(());
            }
        };
        snapshot
            .save(&self.config.snapshot_path())
            .map_err(|err| BankError::Persistence(err.to_string()))
    }

    /// Serves one logged-in user until `quit` or end of input. Fatal errors
    /// end the session and are returned.
    pub fn serve<R, W>(&self, user_id: &str, input: R, output: W) -> Result<()>
    where
        R: BufRead,
        W: Write,
    {
        let mut session = LineSession::new(input, output);
        while let Some(line) = session.read_command()? {
            if line == QUIT {
                break;
            }
            let result = self.execute(user_id, &line, &mut session);
            session.respond(&result)?;
            match result {
                Err(err) if err.is_fatal() => {
                    return Err(anyhow!(err).context("Server can no longer guarantee durability"));
                }
                Err(err) if err.kind() == ErrorKind::Transport => {
                    warn!(user = user_id, %err, "session ended");
                    break;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
