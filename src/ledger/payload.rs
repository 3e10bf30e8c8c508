use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use thiserror::Error;

use crate::account::UserId;

const MAKE_PAYMENT: &str = "makepayment";
const PAY_REQUEST: &str = "payrequest";
const CONFIRM_QR_CODE: &str = "confirmQRcode";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Malformed transfer payload \"{0}\"")]
pub struct PayloadError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferKind {
    MakePayment,
    PayRequest { token: String },
    ConfirmQrCode { qr_id: String },
}

/// Canonical text of a committed transfer. Clients sign exactly this text, and
/// it is what the ledger stores and recovery parses back.
///
/// Rendered as `<command> <from> <to> <amount> [<reference>]`, where `from` is
/// the payer and the amount is normalized (`10.50` renders as `10.5`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPayload {
    pub kind: TransferKind,
    pub from: UserId,
    pub to: UserId,
    pub amount: Decimal,
}

impl TransferPayload {
    pub fn new(kind: TransferKind, from: &str, to: &str, amount: Decimal) -> Self {
        Self {
            kind,
            from: from.to_owned(),
            to: to.to_owned(),
            amount,
        }
    }
}

impl fmt::Display for TransferPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let amount = self.amount.normalize();
        match &self.kind {
            TransferKind::MakePayment => {
                write!(f, "{MAKE_PAYMENT} {} {} {amount}", self.from, self.to)
            }
            TransferKind::PayRequest { token } => {
                write!(f, "{PAY_REQUEST} {} {} {amount} {token}", self.from, self.to)
            }
            TransferKind::ConfirmQrCode { qr_id } => {
                write!(f, "{CONFIRM_QR_CODE} {} {} {amount} {qr_id}", self.from, self.to)
            }
        }
    }
}

impl FromStr for TransferPayload {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || PayloadError(s.to_owned());
        let parts: Vec<&str> = s.split_whitespace().collect();
        let (name, from, to, amount, reference) = match parts.as_slice() {
            [name, from, to, amount] => (*name, *from, *to, *amount, None),
            [name, from, to, amount, reference] => (*name, *from, *to, *amount, Some(*reference)),
            _ => return Err(malformed()),
        };
        let amount = Decimal::from_str(amount).map_err(|_| malformed())?;
        let kind = match (name, reference) {
            (MAKE_PAYMENT, None) => TransferKind::MakePayment,
            (PAY_REQUEST, Some(token)) => TransferKind::PayRequest {
                token: token.to_owned(),
            },
            (CONFIRM_QR_CODE, Some(qr_id)) => TransferKind::ConfirmQrCode {
                qr_id: qr_id.to_owned(),
            },
            _ => return Err(malformed()),
        };
        Ok(Self::new(kind, from, to, amount))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_normalized_amounts() {
        let payload = TransferPayload::new(
            TransferKind::MakePayment,
            "alice",
            "bob",
            Decimal::new(1050, 2),
        );
        assert_eq!(payload.to_string(), "makepayment alice bob 10.5");

        let payload = TransferPayload::new(
            TransferKind::ConfirmQrCode {
                qr_id: "9b2e".into(),
            },
            "bob",
            "alice",
            Decimal::new(3, 0),
        );
        assert_eq!(payload.to_string(), "confirmQRcode bob alice 3 9b2e");
    }

    #[test]
    fn parses_what_it_renders() {
        let payload = TransferPayload::new(
            TransferKind::PayRequest {
                token: "00ff".into(),
            },
            "bob",
            "alice",
            Decimal::new(3334, 2),
        );
        assert_eq!(payload.to_string().parse::<TransferPayload>(), Ok(payload));
    }

    #[test]
    fn rejects_malformed_payloads() {
        for raw in [
            "",
            "makepayment alice bob",
            "makepayment alice bob ten",
            "makepayment alice bob 10 extra",
            "payrequest alice bob 10",
            "withdraw alice bob 10",
        ] {
            assert!(raw.parse::<TransferPayload>().is_err(), "{raw}");
        }
    }
}
