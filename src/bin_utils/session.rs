//! Line protocol spoken with one logged-in client.
//!
//! ```text
//! client: makepayment bob 10
//! server: sign
//! client: signed alice <pubkey-hex> <sig-hex> makepayment alice bob 10
//! server: ok true
//! ```
//!
//! `confirmQRcode` first sends `payload <user>_<amount>` so the client signs
//! the amount the QR code encodes. Failures are answered with
//! `err <kind> <message>`.

use std::io::{BufRead, Write};

use ed25519_dalek::SigningKey;

use crate::{
    dispatcher::{BankError, ChannelError, Response, SigningChannel},
    signature::{Certificate, SignedPayload},
};

const SIGN_PROMPT: &str = "sign";
const PAYLOAD_PREFIX: &str = "payload";
const SIGNED_PREFIX: &str = "signed";

pub struct LineSession<R, W> {
    input: R,
    output: W,
    prompted: bool,
}

impl<R, W> LineSession<R, W>
where
    R: BufRead,
    W: Write,
{
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            prompted: false,
        }
    }

    /// Next non-empty line, or `None` once the client hung up.
    pub fn read_command(&mut self) -> Result<Option<String>, ChannelError> {
        loop {
            let Some(line) = self.read_line()? else {
                return Ok(None);
            };
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }

    pub fn respond(&mut self, result: &Result<Response, BankError>) -> Result<(), ChannelError> {
        self.prompted = false;
        match result {
            Ok(response) => self.write_line(&format!("ok {response}")),
            Err(err) => self.write_line(&format!("err {} {err}", err.kind())),
        }
    }

    fn read_line(&mut self) -> Result<Option<String>, ChannelError> {
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_owned()))
    }

    fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        writeln!(self.output, "{line}")?;
        self.output.flush()?;
        Ok(())
    }
}

impl<R, W> SigningChannel for LineSession<R, W>
where
    R: BufRead,
    W: Write,
{
    fn send_payload(&mut self, payload: &str) -> Result<(), ChannelError> {
        self.prompted = true;
        self.write_line(&format!("{PAYLOAD_PREFIX} {payload}"))
    }

    fn receive_signed(&mut self) -> Result<(SignedPayload, Certificate), ChannelError> {
        if !self.prompted {
            self.write_line(SIGN_PROMPT)?;
        }
        self.prompted = false;
        let line = self.read_line()?.ok_or(ChannelError::Closed)?;
        parse_signed_line(&line)
    }
}

/// Client side of the exchange: the line answering a `sign` or `payload`
/// prompt.
pub fn signed_line(subject: &str, key: &SigningKey, payload: &str) -> String {
    let signed = SignedPayload::sign(payload, key);
    format!(
        "{SIGNED_PREFIX} {subject} {} {} {payload}",
        hex::encode(key.verifying_key().as_bytes()),
        hex::encode(&signed.signature)
    )
}

fn parse_signed_line(line: &str) -> Result<(SignedPayload, Certificate), ChannelError> {
    let malformed = || ChannelError::Malformed(line.to_owned());
    let mut parts = line.splitn(5, ' ');
    if parts.next() != Some(SIGNED_PREFIX) {
        return Err(malformed());
    }
    let (Some(subject), Some(key), Some(signature), Some(payload)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };
    let public_key = hex::decode(key).map_err(|_| malformed())?;
    let signature = hex::decode(signature).map_err(|_| malformed())?;
    Ok((
        SignedPayload {
            payload: payload.to_owned(),
            signature,
        },
        Certificate {
            subject: subject.to_owned(),
            public_key,
        },
    ))
}
