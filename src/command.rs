use std::str::FromStr;

use rust_decimal::{Decimal, prelude::Zero};
use thiserror::Error;

use crate::account::UserId;

/// Amounts are whole cents: at most this many fractional digits.
pub const AMOUNT_SCALE: u32 = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command \"{0}\"")]
    UnknownCommand(String),
    #[error("{command} expects {expected} argument(s), got {found}")]
    WrongArity {
        command: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("\"{0}\" is not a valid amount")]
    InvalidAmount(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Balance,
    MakePayment { to: UserId, amount: Decimal },
    RequestPayment { to: UserId, amount: Decimal },
    ViewRequests,
    PayRequest { token: String },
    ObtainQrCode { amount: Decimal },
    ConfirmQrCode { qr_id: String },
    NewGroup { group_id: String },
    AddUser { user: UserId, group_id: String },
    Groups,
    DividePayment { group_id: String, amount: Decimal },
    StatusPayments { group_id: String },
    History { group_id: String },
}

/// One row of the command table.
#[derive(Debug)]
pub struct CommandSpec {
    pub name: &'static str,
    pub alias: &'static str,
    pub arity: usize,
    pub needs_signature: bool,
    pub writes_ledger: bool,
    /// Changes groups or pending requests, which live in the state snapshot.
    pub persists_state: bool,
    build: fn(&[&str]) -> Result<Command, CommandError>,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "balance",
        alias: "b",
        arity: 0,
        needs_signature: false,
        writes_ledger: false,
        persists_state: false,
        build: build_balance,
    },
    CommandSpec {
        name: "makepayment",
        alias: "m",
        arity: 2,
        needs_signature: true,
        writes_ledger: true,
        persists_state: false,
        build: build_make_payment,
    },
    CommandSpec {
        name: "requestpayment",
        alias: "r",
        arity: 2,
        needs_signature: false,
        writes_ledger: false,
        persists_state: true,
        build: build_request_payment,
    },
    CommandSpec {
        name: "viewrequests",
        alias: "v",
        arity: 0,
        needs_signature: false,
        writes_ledger: false,
        persists_state: false,
        build: build_view_requests,
    },
    CommandSpec {
        name: "payrequest",
        alias: "p",
        arity: 1,
        needs_signature: true,
        writes_ledger: true,
        persists_state: true,
        build: build_pay_request,
    },
    CommandSpec {
        name: "obtainQRcode",
        alias: "o",
        arity: 1,
        needs_signature: false,
        writes_ledger: false,
        persists_state: false,
        build: build_obtain_qr_code,
    },
    CommandSpec {
        name: "confirmQRcode",
        alias: "c",
        arity: 1,
        needs_signature: true,
        writes_ledger: true,
        persists_state: false,
        build: build_confirm_qr_code,
    },
    CommandSpec {
        name: "newgroup",
        alias: "n",
        arity: 1,
        needs_signature: false,
        writes_ledger: false,
        persists_state: true,
        build: build_new_group,
    },
    CommandSpec {
        name: "addu",
        alias: "a",
        arity: 2,
        needs_signature: false,
        writes_ledger: false,
        persists_state: true,
        build: build_add_user,
    },
    CommandSpec {
        name: "groups",
        alias: "g",
        arity: 0,
        needs_signature: false,
        writes_ledger: false,
        persists_state: false,
        build: build_groups,
    },
    CommandSpec {
        name: "dividepayment",
        alias: "d",
        arity: 2,
        needs_signature: false,
        writes_ledger: false,
        persists_state: true,
        build: build_divide_payment,
    },
    CommandSpec {
        name: "statuspayments",
        alias: "s",
        arity: 1,
        needs_signature: false,
        writes_ledger: false,
        persists_state: true,
        build: build_status_payments,
    },
    CommandSpec {
        name: "history",
        alias: "h",
        arity: 1,
        needs_signature: false,
        writes_ledger: false,
        persists_state: true,
        build: build_history,
    },
];

impl CommandSpec {
    pub fn find(name: &str) -> Option<&'static CommandSpec> {
        COMMANDS.iter().find(|c| c.name == name || c.alias == name)
    }
}

impl Command {
    /// Parses a raw command line. Arity is checked before any argument is
    /// interpreted.
    pub fn parse(line: &str) -> Result<(&'static CommandSpec, Self), CommandError> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::Empty)?;
        let spec =
            CommandSpec::find(name).ok_or_else(|| CommandError::UnknownCommand(name.to_owned()))?;
        let args: Vec<&str> = words.collect();
        if args.len() != spec.arity {
            return Err(CommandError::WrongArity {
                command: spec.name,
                expected: spec.arity,
                found: args.len(),
            });
        }
        Ok((spec, (spec.build)(&args)?))
    }
}

/// Parses a strictly positive amount with at most [`AMOUNT_SCALE`] decimals.
pub fn parse_amount(raw: &str) -> Result<Decimal, CommandError> {
    let invalid = || CommandError::InvalidAmount(raw.to_owned());
    let amount = Decimal::from_str(raw).map_err(|_| invalid())?.normalize();
    if amount <= Decimal::zero() || amount.scale() > AMOUNT_SCALE {
        return Err(invalid());
    }
    Ok(amount)
}

fn build_balance(_: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::Balance)
}

fn build_make_payment(args: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::MakePayment {
        to: args[0].to_owned(),
        amount: parse_amount(args[1])?,
    })
}

fn build_request_payment(args: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::RequestPayment {
        to: args[0].to_owned(),
        amount: parse_amount(args[1])?,
    })
}

fn build_view_requests(_: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::ViewRequests)
}

fn build_pay_request(args: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::PayRequest {
        token: args[0].to_owned(),
    })
}

fn build_obtain_qr_code(args: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::ObtainQrCode {
        amount: parse_amount(args[0])?,
    })
}

fn build_confirm_qr_code(args: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::ConfirmQrCode {
        qr_id: args[0].to_owned(),
    })
}

fn build_new_group(args: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::NewGroup {
        group_id: args[0].to_owned(),
    })
}

fn build_add_user(args: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::AddUser {
        user: args[0].to_owned(),
        group_id: args[1].to_owned(),
    })
}

fn build_groups(_: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::Groups)
}

fn build_divide_payment(args: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::DividePayment {
        group_id: args[0].to_owned(),
        amount: parse_amount(args[1])?,
    })
}

fn build_status_payments(args: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::StatusPayments {
        group_id: args[0].to_owned(),
    })
}

fn build_history(args: &[&str]) -> Result<Command, CommandError> {
    Ok(Command::History {
        group_id: args[0].to_owned(),
    })
}
