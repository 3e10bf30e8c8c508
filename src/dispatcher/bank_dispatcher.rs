use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::{
    catalog::{AccountCatalog, CatalogError},
    command::Command,
    group::GroupRegistry,
    ledger::{
        LedgerEntry, TransactionLedger,
        payload::{TransferKind, TransferPayload},
    },
    qr::{QrCodec, parse_qr_payload, qr_payload},
    request::{
        CapabilityCipher, ChildRequest, GroupRequest, IndividualRequest, RequestError, split_amount,
    },
    signature::{SignatureVerifier, SignedPayload},
    transfer::{Settlement, execute_transfer},
};

use super::{BankError, Response, SigningChannel};

/// Executes one command line on behalf of an authenticated user. Holds no
/// state of its own.
pub struct Dispatcher<'a> {
    pub catalog: &'a AccountCatalog,
    pub groups: &'a GroupRegistry,
    pub ledger: &'a dyn TransactionLedger,
    pub qr_codec: &'a dyn QrCodec,
    pub cipher: &'a CapabilityCipher,
    pub verifier: SignatureVerifier,
}

impl Dispatcher<'_> {
    pub fn dispatch(
        &self,
        user_id: &str,
        line: &str,
        channel: &mut dyn SigningChannel,
    ) -> Result<Response, BankError> {
        let (spec, command) = Command::parse(line)?;
        self.catalog.lookup(user_id)?;
        debug!(user = user_id, command = spec.name, "dispatching");

        match command {
            Command::Balance => Ok(Response::Balance(self.catalog.balance(user_id)?)),
            Command::MakePayment { to, amount } => self.make_payment(user_id, &to, amount, channel),
            Command::RequestPayment { to, amount } => self.request_payment(user_id, &to, amount),
            Command::ViewRequests => {
                let pending = self
                    .catalog
                    .with_account(user_id, |acc| Ok::<_, BankError>(acc.requests.pending().to_vec()))?;
                Ok(Response::Requests(pending))
            }
            Command::PayRequest { token } => self.pay_request(user_id, &token, channel),
            Command::ObtainQrCode { amount } => {
                let id = self
                    .qr_codec
                    .encode(&qr_payload(user_id, amount))
                    .map_err(BankError::QrStorage)?;
                Ok(Response::QrCode(id))
            }
            Command::ConfirmQrCode { qr_id } => self.confirm_qr_code(user_id, &qr_id, channel),
            Command::NewGroup { group_id } => {
                self.groups.create(&group_id, user_id)?;
                Ok(Response::Done)
            }
            Command::AddUser { user, group_id } => {
                self.catalog.lookup(&user)?;
                self.groups.add_member(&group_id, user_id, &user)?;
                Ok(Response::Done)
            }
            Command::Groups => Ok(Response::Groups(self.groups.list_memberships(user_id))),
            Command::DividePayment { group_id, amount } => {
                self.divide_payment(user_id, &group_id, amount)
            }
            Command::StatusPayments { group_id } => self.status_payments(user_id, &group_id),
            Command::History { group_id } => self.history(user_id, &group_id),
        }
    }

    fn make_payment(
        &self,
        user_id: &str,
        to: &str,
        amount: Decimal,
        channel: &mut dyn SigningChannel,
    ) -> Result<Response, BankError> {
        ensure_not_self(user_id, to)?;
        self.catalog.lookup(to)?;
        let payload = TransferPayload::new(TransferKind::MakePayment, user_id, to, amount);
        let signed = self.receive_verified(user_id, &payload, channel)?;
        self.commit(&payload, signed, Settlement::Nothing)?;
        Ok(Response::Done)
    }

    fn request_payment(&self, user_id: &str, to: &str, amount: Decimal) -> Result<Response, BankError> {
        ensure_not_self(user_id, to)?;
        let request = IndividualRequest::new(self.cipher, user_id, to, amount)?;
        let token = request.token.clone();
        self.catalog.with_account(to, |acc| {
            acc.requests.add_individual(request);
            Ok::<_, BankError>(())
        })?;
        info!(requester = user_id, payer = to, %amount, "payment requested");
        Ok(Response::RequestToken(token))
    }

    fn pay_request(
        &self,
        user_id: &str,
        token: &str,
        channel: &mut dyn SigningChannel,
    ) -> Result<Response, BankError> {
        let id = self.cipher.open(token)?;
        let request = self.catalog.with_account(user_id, |acc| {
            acc.requests
                .find(id)
                .cloned()
                .ok_or_else(|| BankError::from(RequestError::InvalidIdentifier(token.to_owned())))
        })?;
        ensure_not_self(user_id, &request.requester)?;

        // hex ignores case; the ledger always carries the issued spelling
        let payload = TransferPayload::new(
            TransferKind::PayRequest {
                token: request.token.clone(),
            },
            user_id,
            &request.requester,
            request.amount,
        );
        let signed = self.receive_verified(user_id, &payload, channel)?;
        self.commit(
            &payload,
            signed,
            Settlement::Request {
                id,
                token: &request.token,
            },
        )?;
        Ok(Response::Done)
    }

    fn confirm_qr_code(
        &self,
        user_id: &str,
        qr_id: &str,
        channel: &mut dyn SigningChannel,
    ) -> Result<Response, BankError> {
        let info = self
            .qr_codec
            .decode(qr_id)
            .map_err(BankError::QrStorage)?
            .ok_or_else(|| BankError::InvalidQrCode(qr_id.to_owned()))?;
        let (requester, amount) =
            parse_qr_payload(&info).ok_or_else(|| BankError::InvalidQrCode(qr_id.to_owned()))?;
        ensure_not_self(user_id, &requester)?;
        self.catalog.lookup(&requester)?;

        // the caller signs the amount the token actually encodes
        channel.send_payload(&info)?;
        let payload = TransferPayload::new(
            TransferKind::ConfirmQrCode {
                qr_id: qr_id.to_owned(),
            },
            user_id,
            &requester,
            amount,
        );
        let signed = self.receive_verified(user_id, &payload, channel)?;
        self.commit(&payload, signed, Settlement::Nothing)?;
        Ok(Response::Done)
    }

    /// Splits `amount` into one child request per member, owner included.
    ///
    /// The owner's child is settled on creation since paying oneself moves no
    /// money, so a group of N members yields N children but only N - 1
    /// pending requests.
    fn divide_payment(&self, user_id: &str, group_id: &str, amount: Decimal) -> Result<Response, BankError> {
        let group = self.groups.get_owned(group_id, user_id)?;
        let members = group.members();
        let shares = split_amount(amount, members.len());
        if shares.iter().any(Decimal::is_zero) {
            return Err(BankError::InvalidOperation(format!(
                "{amount} cannot be split among {} members",
                members.len()
            )));
        }
        for member in members {
            self.catalog.lookup(member)?;
        }

        let mut split = GroupRequest::new(group_id, amount);
        let mut pending = Vec::new();
        for (member, share) in members.iter().zip(shares) {
            let request = IndividualRequest::new(self.cipher, user_id, member, share)?;
            split.children.push(ChildRequest {
                member: member.clone(),
                token: request.token.clone(),
                amount: share,
            });
            if member == user_id {
                // the owner's own share moves no money
                split.settle(&request.token);
            } else {
                pending.push(request);
            }
        }

        for request in pending {
            let payer = request.payer.clone();
            self.catalog.with_account(&payer, |acc| {
                acc.requests.add_individual(request);
                Ok::<_, BankError>(())
            })?;
        }
        self.catalog.with_account(user_id, |acc| {
            acc.requests.add_group_request(split);
            Ok::<_, BankError>(())
        })?;
        info!(owner = user_id, group = group_id, %amount, members = members.len(), "payment divided");
        Ok(Response::Done)
    }

    fn status_payments(&self, user_id: &str, group_id: &str) -> Result<Response, BankError> {
        self.groups.get_owned(group_id, user_id)?;
        self.reconcile(user_id, group_id)?;
        let summary = self.catalog.with_account(user_id, |acc| {
            Ok::<_, BankError>(
                acc.requests
                    .latest_group_request(group_id)
                    .map(GroupRequest::summary),
            )
        })?;
        Ok(Response::Status(summary.unwrap_or_else(|| {
            format!("group {group_id}: no payment requests")
        })))
    }

    fn history(&self, user_id: &str, group_id: &str) -> Result<Response, BankError> {
        self.groups.get_owned(group_id, user_id)?;
        self.reconcile(user_id, group_id)?;
        let settled: Vec<String> = self.catalog.with_account(user_id, |acc| {
            Ok::<_, BankError>(
                acc.requests
                    .group_requests(group_id)
                    .iter()
                    .flat_map(|split| split.settled.iter().cloned())
                    .collect(),
            )
        })?;
        let request_ids = settled
            .iter()
            .map(|token| self.cipher.open(token))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Response::History {
            group_id: group_id.to_owned(),
            request_ids,
        })
    }

    /// Marks the owner's split children settled once the paying member has
    /// recorded them as paid. Locks one account at a time.
    fn reconcile(&self, owner: &str, group_id: &str) -> Result<(), BankError> {
        let splits = self.catalog.with_account(owner, |acc| {
            Ok::<_, BankError>(acc.requests.group_requests(group_id).to_vec())
        })?;

        let mut paid = Vec::new();
        for split in &splits {
            for child in &split.children {
                if split.is_settled(&child.token) {
                    continue;
                }
                let is_paid = self.catalog.with_account(&child.member, |acc| {
                    Ok::<_, BankError>(acc.requests.is_paid(&child.token))
                })?;
                if is_paid {
                    paid.push(child.token.clone());
                }
            }
        }
        if paid.is_empty() {
            return Ok(());
        }

        self.catalog.with_account(owner, |acc| {
            for split in acc.requests.group_requests_mut(group_id) {
                for token in &paid {
                    split.settle(token);
                }
            }
            Ok::<_, BankError>(())
        })
    }

    fn receive_verified(
        &self,
        user_id: &str,
        expected: &TransferPayload,
        channel: &mut dyn SigningChannel,
    ) -> Result<SignedPayload, BankError> {
        let (signed, certificate) = channel.receive_signed()?;
        if !self.verifier.verify(user_id, &signed, &certificate) {
            warn!(user = user_id, "signature verification failed");
            return Err(BankError::SignatureInvalid);
        }
        if signed.payload != expected.to_string() {
            warn!(user = user_id, signed = %signed.payload, expected = %expected, "signed payload does not match command");
            return Err(BankError::SignatureInvalid);
        }
        Ok(signed)
    }

    /// Ledger append happens inside the transfer's critical section, so ledger
    /// order always matches the order balances changed in.
    fn commit(
        &self,
        payload: &TransferPayload,
        signed: SignedPayload,
        settlement: Settlement<'_>,
    ) -> Result<(), BankError> {
        let entry = LedgerEntry {
            payload: signed.payload,
            signature: signed.signature,
        };
        execute_transfer(self.catalog, payload, settlement, || {
            self.ledger.append(&entry).map_err(BankError::from)
        })?;
        info!(payload = %entry.payload, "transfer committed");
        Ok(())
    }
}

fn ensure_not_self(user_id: &str, other: &str) -> Result<(), BankError> {
    if user_id == other {
        return Err(CatalogError::SelfTransfer(user_id.to_owned()).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, str::FromStr, time::Duration};

    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    use super::*;
    use crate::{
        dispatcher::{ChannelError, ErrorKind},
        ledger::in_memory_ledger::InMemoryTransactionLedger,
        qr::InMemoryQrCodec,
        signature::Certificate,
    };

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    /// Signs whatever the test queued up; QR payloads are turned into the
    /// matching confirmQRcode transfer text.
    struct ScriptedChannel {
        user: String,
        key: SigningKey,
        to_sign: VecDeque<String>,
        qr_id: Option<String>,
        received_payloads: Vec<String>,
        forge_amount: bool,
    }

    impl ScriptedChannel {
        fn new(user: &str) -> Self {
            Self {
                user: user.to_owned(),
                key: SigningKey::generate(&mut OsRng),
                to_sign: VecDeque::new(),
                qr_id: None,
                received_payloads: Vec::new(),
                forge_amount: false,
            }
        }

        fn will_sign(&mut self, payload: String) -> &mut Self {
            self.to_sign.push_back(payload);
            self
        }
    }

    impl SigningChannel for ScriptedChannel {
        fn send_payload(&mut self, payload: &str) -> Result<(), ChannelError> {
            self.received_payloads.push(payload.to_owned());
            let (requester, amount) = parse_qr_payload(payload).ok_or(ChannelError::Closed)?;
            let amount = if self.forge_amount { amount / Decimal::TEN } else { amount };
            let qr_id = self.qr_id.clone().ok_or(ChannelError::Closed)?;
            let transfer = TransferPayload::new(
                TransferKind::ConfirmQrCode { qr_id },
                &self.user,
                &requester,
                amount,
            );
            self.to_sign.push_front(transfer.to_string());
            Ok(())
        }

        fn receive_signed(&mut self) -> Result<(SignedPayload, Certificate), ChannelError> {
            let payload = self.to_sign.pop_front().ok_or(ChannelError::Closed)?;
            Ok((
                SignedPayload::sign(payload, &self.key),
                Certificate::new(self.user.clone(), &self.key.verifying_key()),
            ))
        }
    }

    struct Bank {
        catalog: AccountCatalog,
        groups: GroupRegistry,
        ledger: InMemoryTransactionLedger,
        qr_codec: InMemoryQrCodec,
        cipher: CapabilityCipher,
    }

    impl Bank {
        fn new(users: &[&str]) -> Self {
            let catalog = AccountCatalog::new(dec("100"), Duration::from_millis(100));
            for user in users {
                catalog.open_account(user).unwrap();
            }
            Self {
                catalog,
                groups: GroupRegistry::default(),
                ledger: InMemoryTransactionLedger::default(),
                qr_codec: InMemoryQrCodec::default(),
                cipher: CapabilityCipher::new("passphrase"),
            }
        }

        fn dispatcher(&self) -> Dispatcher<'_> {
            Dispatcher {
                catalog: &self.catalog,
                groups: &self.groups,
                ledger: &self.ledger,
                qr_codec: &self.qr_codec,
                cipher: &self.cipher,
                verifier: SignatureVerifier,
            }
        }

        fn run(&self, user: &str, line: &str) -> Result<Response, BankError> {
            let mut channel = ScriptedChannel::new(user);
            self.dispatcher().dispatch(user, line, &mut channel)
        }

        fn run_signed(&self, user: &str, line: &str, payload: String) -> Result<Response, BankError> {
            let mut channel = ScriptedChannel::new(user);
            channel.will_sign(payload);
            self.dispatcher().dispatch(user, line, &mut channel)
        }

        fn balance(&self, user: &str) -> Decimal {
            self.catalog.balance(user).unwrap()
        }

        fn pending_tokens(&self, user: &str) -> Vec<String> {
            match self.run(user, "viewrequests").unwrap() {
                Response::Requests(requests) => requests.into_iter().map(|r| r.token).collect(),
                other => panic!("unexpected response {other:?}"),
            }
        }
    }

    fn make_payment(from: &str, to: &str, amount: &str) -> String {
        TransferPayload::new(TransferKind::MakePayment, from, to, dec(amount)).to_string()
    }

    #[test]
    fn make_payment_moves_money_and_writes_ledger() {
        let bank = Bank::new(&["alice", "bob"]);
        let resp = bank
            .run_signed("alice", "makepayment bob 30.5", make_payment("alice", "bob", "30.5"))
            .unwrap();
        assert_eq!(resp, Response::Done);
        assert_eq!(bank.balance("alice"), dec("69.5"));
        assert_eq!(bank.balance("bob"), dec("130.5"));
        assert_eq!(bank.catalog.total_balance().unwrap(), dec("200"));

        let entries = bank.ledger.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            TransferPayload::from_str(&entries[0].payload).unwrap(),
            TransferPayload::new(TransferKind::MakePayment, "alice", "bob", dec("30.5"))
        );
    }

    #[test]
    fn insufficient_balance_leaves_everything_untouched() {
        let bank = Bank::new(&["alice", "bob"]);
        let err = bank
            .run_signed("alice", "m bob 100.01", make_payment("alice", "bob", "100.01"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
        assert_eq!(bank.balance("alice"), dec("100"));
        assert_eq!(bank.balance("bob"), dec("100"));
        assert!(bank.ledger.is_empty());
    }

    #[test]
    fn payment_requires_matching_signature() {
        let bank = Bank::new(&["alice", "bob"]);

        // signed a smaller amount than the command moves
        let err = bank
            .run_signed("alice", "makepayment bob 50", make_payment("alice", "bob", "5"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureInvalid);

        // signed by somebody else's certificate
        let mut channel = ScriptedChannel::new("bob");
        channel.will_sign(make_payment("alice", "bob", "50"));
        let err = bank
            .dispatcher()
            .dispatch("alice", "makepayment bob 50", &mut channel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureInvalid);

        assert_eq!(bank.balance("alice"), dec("100"));
        assert!(bank.ledger.is_empty());
    }

    #[test]
    fn rejected_before_side_effects() {
        let bank = Bank::new(&["alice", "bob"]);
        assert_eq!(
            bank.run("alice", "makepayment alice 5").unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
        assert_eq!(
            bank.run("alice", "makepayment carol 5").unwrap_err().kind(),
            ErrorKind::UserNotFound
        );
        assert_eq!(
            bank.run("alice", "makepayment bob").unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
        assert_eq!(
            bank.run("alice", "makepayment bob -3").unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
        assert_eq!(
            bank.run("alice", "teleport bob 3").unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
        assert!(bank.ledger.is_empty());
    }

    #[test]
    fn failed_ledger_append_is_fatal_and_moves_nothing() {
        let bank = Bank::new(&["alice", "bob"]);
        bank.ledger.set_unavailable(true);
        let err = bank
            .run_signed("alice", "makepayment bob 10", make_payment("alice", "bob", "10"))
            .unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(bank.balance("alice"), dec("100"));
        assert_eq!(bank.balance("bob"), dec("100"));
    }

    #[test]
    fn request_then_pay_once() {
        let bank = Bank::new(&["alice", "bob"]);
        let Response::RequestToken(token) = bank.run("alice", "requestpayment bob 12").unwrap() else {
            panic!("expected a token");
        };
        assert_eq!(bank.pending_tokens("bob"), vec![token.clone()]);
        assert!(bank.pending_tokens("alice").is_empty());

        let payload = TransferPayload::new(
            TransferKind::PayRequest {
                token: token.clone(),
            },
            "bob",
            "alice",
            dec("12"),
        )
        .to_string();
        let line = format!("payrequest {token}");
        bank.run_signed("bob", &line, payload.clone()).unwrap();
        assert_eq!(bank.balance("alice"), dec("112"));
        assert_eq!(bank.balance("bob"), dec("88"));
        assert!(bank.pending_tokens("bob").is_empty());

        let err = bank.run_signed("bob", &line, payload).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
        assert_eq!(bank.ledger.len(), 1);
        assert_eq!(bank.balance("bob"), dec("88"));
    }

    #[test]
    fn only_the_payer_can_redeem_a_request() {
        let bank = Bank::new(&["alice", "bob", "carol"]);
        let Response::RequestToken(token) = bank.run("alice", "requestpayment bob 12").unwrap() else {
            panic!("expected a token");
        };
        let err = bank.run("carol", &format!("payrequest {token}")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
        let err = bank.run("bob", "payrequest deadbeef").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
        assert_eq!(
            bank.run("alice", "requestpayment alice 3").unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
    }

    #[test]
    fn qr_code_is_confirmed_exactly_once() {
        let bank = Bank::new(&["alice", "bob"]);
        let Response::QrCode(qr_id) = bank.run("alice", "obtainQRcode 7.25").unwrap() else {
            panic!("expected a qr code");
        };

        let mut channel = ScriptedChannel::new("bob");
        channel.qr_id = Some(qr_id.to_string());
        let line = format!("confirmQRcode {qr_id}");
        bank.dispatcher().dispatch("bob", &line, &mut channel).unwrap();
        assert_eq!(channel.received_payloads, ["alice_7.25"]);
        assert_eq!(bank.balance("alice"), dec("107.25"));
        assert_eq!(bank.balance("bob"), dec("92.75"));

        let mut channel = ScriptedChannel::new("bob");
        channel.qr_id = Some(qr_id.to_string());
        let err = bank.dispatcher().dispatch("bob", &line, &mut channel).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidQrCode);
        assert_eq!(bank.ledger.len(), 1);
    }

    #[test]
    fn qr_signature_must_cover_encoded_amount() {
        let bank = Bank::new(&["alice", "bob"]);
        let Response::QrCode(qr_id) = bank.run("alice", "o 50").unwrap() else {
            panic!("expected a qr code");
        };
        let mut channel = ScriptedChannel::new("bob");
        channel.qr_id = Some(qr_id.to_string());
        channel.forge_amount = true;
        let err = bank
            .dispatcher()
            .dispatch("bob", &format!("c {qr_id}"), &mut channel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureInvalid);
        assert_eq!(bank.balance("bob"), dec("100"));
    }

    #[test]
    fn own_qr_code_cannot_be_confirmed() {
        let bank = Bank::new(&["alice"]);
        let Response::QrCode(qr_id) = bank.run("alice", "obtainQRcode 5").unwrap() else {
            panic!("expected a qr code");
        };
        let err = bank.run("alice", &format!("confirmQRcode {qr_id}")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    }

    #[test]
    fn groups_and_memberships() {
        let bank = Bank::new(&["alice", "bob", "carol"]);
        bank.run("alice", "newgroup trip").unwrap();
        assert_eq!(
            bank.run("bob", "newgroup trip").unwrap_err().kind(),
            ErrorKind::GroupExists
        );
        bank.run("alice", "addu bob trip").unwrap();
        assert_eq!(
            bank.run("alice", "addu bob trip").unwrap_err().kind(),
            ErrorKind::UserAlreadyInGroup
        );
        assert_eq!(
            bank.run("bob", "addu carol trip").unwrap_err().kind(),
            ErrorKind::InvalidGroupOwner
        );
        assert_eq!(
            bank.run("alice", "addu dave trip").unwrap_err().kind(),
            ErrorKind::UserNotFound
        );
        assert_eq!(
            bank.run("alice", "addu carol party").unwrap_err().kind(),
            ErrorKind::GroupNotFound
        );
        assert_eq!(
            bank.run("bob", "groups").unwrap().to_string(),
            "owner: -; member: trip"
        );
        assert_eq!(bank.groups.get("trip").unwrap().members(), ["alice", "bob"]);
    }

    #[test]
    fn divide_payment_splits_evenly() {
        let bank = Bank::new(&["alice", "bob", "carol"]);
        bank.run("alice", "newgroup trip").unwrap();
        bank.run("alice", "addu bob trip").unwrap();
        bank.run("alice", "addu carol trip").unwrap();
        bank.run("alice", "dividepayment trip 100").unwrap();

        let split = bank
            .catalog
            .with_account("alice", |acc| {
                Ok::<_, BankError>(acc.requests.latest_group_request("trip").cloned())
            })
            .unwrap()
            .unwrap();
        assert_eq!(split.children.len(), 3);
        let amounts: Vec<Decimal> = split.children.iter().map(|c| c.amount).collect();
        assert_eq!(amounts, [dec("33.34"), dec("33.33"), dec("33.33")]);
        assert_eq!(split.members().collect::<Vec<_>>(), ["alice", "bob", "carol"]);

        for member in ["bob", "carol"] {
            let pending = match bank.run(member, "viewrequests").unwrap() {
                Response::Requests(requests) => requests,
                other => panic!("unexpected response {other:?}"),
            };
            assert_eq!(pending.len(), 1);
            assert_eq!(pending[0].amount, dec("33.33"));
            assert_eq!(pending[0].requester, "alice");
        }
        // money only moves when members pay
        assert_eq!(bank.catalog.total_balance().unwrap(), dec("300"));
        assert!(bank.ledger.is_empty());
    }

    #[test]
    fn non_owner_cannot_divide() {
        let bank = Bank::new(&["alice", "bob"]);
        bank.run("alice", "newgroup trip").unwrap();
        bank.run("alice", "addu bob trip").unwrap();
        let err = bank.run("bob", "dividepayment trip 10").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidGroupOwner);
        assert!(bank.pending_tokens("alice").is_empty());
        assert!(bank.pending_tokens("bob").is_empty());
        assert_eq!(
            bank.run("alice", "dividepayment trip 0.01").unwrap_err().kind(),
            ErrorKind::InvalidOperation
        );
    }

    #[test]
    fn status_and_history_track_member_payments() {
        let bank = Bank::new(&["alice", "bob", "carol"]);
        bank.run("alice", "newgroup trip").unwrap();
        bank.run("alice", "addu bob trip").unwrap();
        bank.run("alice", "addu carol trip").unwrap();
        bank.run("alice", "dividepayment trip 90").unwrap();

        assert_eq!(
            bank.run("alice", "statuspayments trip").unwrap().to_string(),
            "group trip total 90; paid: alice(30); outstanding: bob(30) carol(30)"
        );

        let token = bank.pending_tokens("bob").remove(0);
        let payload = TransferPayload::new(
            TransferKind::PayRequest {
                token: token.clone(),
            },
            "bob",
            "alice",
            dec("30"),
        );
        bank.run_signed("bob", &format!("p {token}"), payload.to_string())
            .unwrap();

        assert_eq!(
            bank.run("alice", "statuspayments trip").unwrap().to_string(),
            "group trip total 90; paid: alice(30) bob(30); outstanding: carol(30)"
        );
        let Response::History { request_ids, .. } = bank.run("alice", "history trip").unwrap() else {
            panic!("expected history");
        };
        assert_eq!(request_ids.len(), 2);
        assert_eq!(request_ids[1], bank.cipher.open(&token).unwrap());

        assert_eq!(
            bank.run("bob", "statuspayments trip").unwrap_err().kind(),
            ErrorKind::InvalidGroupOwner
        );
        assert_eq!(
            bank.run("bob", "history trip").unwrap_err().kind(),
            ErrorKind::InvalidGroupOwner
        );
    }

    #[test]
    fn respelled_token_replays_to_the_live_state() {
        let bank = Bank::new(&["alice", "bob"]);
        bank.run("alice", "newgroup trip").unwrap();
        bank.run("alice", "addu bob trip").unwrap();
        bank.run("alice", "dividepayment trip 20").unwrap();
        let books_before_payment = bank.catalog.request_books().unwrap();

        let token = bank.pending_tokens("bob").remove(0);
        let payload = TransferPayload::new(
            TransferKind::PayRequest {
                token: token.clone(),
            },
            "bob",
            "alice",
            dec("10"),
        );
        bank.run_signed("bob", &format!("payrequest {}", token.to_uppercase()), payload.to_string())
            .unwrap();
        let entries = bank.ledger.read_all().unwrap();
        assert_eq!(entries[0].payload, payload.to_string());

        let live = bank.run("alice", "statuspayments trip").unwrap().to_string();
        assert_eq!(live, "group trip total 20; paid: alice(10) bob(10); outstanding: -");

        // restart from books saved before the payment reached the snapshot
        let restarted = Bank::new(&["alice", "bob"]);
        restarted.groups.restore(bank.groups.export());
        restarted.catalog.restore_request_books(books_before_payment);
        crate::recovery::replay(&restarted.catalog, &restarted.cipher, &entries);

        assert_eq!(
            restarted.run("alice", "statuspayments trip").unwrap().to_string(),
            live
        );
        assert_eq!(restarted.balance("alice"), dec("110"));
        assert_eq!(restarted.balance("bob"), dec("90"));
        assert!(restarted.pending_tokens("bob").is_empty());
    }
}
