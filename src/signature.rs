use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::account::UserId;

/// Binds a user id to an Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub subject: UserId,
    pub public_key: Vec<u8>,
}

impl Certificate {
    pub fn new(subject: impl Into<UserId>, key: &VerifyingKey) -> Self {
        Self {
            subject: subject.into(),
            public_key: key.to_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    pub payload: String,
    pub signature: Vec<u8>,
}

impl SignedPayload {
    pub fn sign(payload: impl Into<String>, key: &SigningKey) -> Self {
        let payload = payload.into();
        let signature = key.sign(payload.as_bytes()).to_bytes().to_vec();
        Self { payload, signature }
    }
}

/// Accepts a signed payload only when the certificate names `signer` and its
/// key verifies the signature. Never fails: malformed keys or signatures are
/// simply rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignatureVerifier;

impl SignatureVerifier {
    pub fn verify(&self, signer: &str, signed: &SignedPayload, certificate: &Certificate) -> bool {
        if certificate.subject != signer {
            tracing::debug!(signer, subject = %certificate.subject, "certificate subject mismatch");
            return false;
        }
        let Ok(key_bytes) = <[u8; 32]>::try_from(certificate.public_key.as_slice()) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&signed.signature) else {
            return false;
        };
        key.verify(signed.payload.as_bytes(), &signature).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::OsRng;

    use super::*;

    #[test]
    fn accepts_valid_signature() {
        let key = SigningKey::generate(&mut OsRng);
        let cert = Certificate::new("alice", &key.verifying_key());
        let signed = SignedPayload::sign("makepayment alice bob 10", &key);
        assert!(SignatureVerifier.verify("alice", &signed, &cert));
    }

    #[test]
    fn rejects_tampered_payload_and_foreign_keys() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let cert = Certificate::new("alice", &key.verifying_key());

        let mut signed = SignedPayload::sign("makepayment alice bob 10", &key);
        signed.payload = "makepayment alice bob 99".into();
        assert!(!SignatureVerifier.verify("alice", &signed, &cert));

        let forged = SignedPayload::sign("makepayment alice bob 10", &other);
        assert!(!SignatureVerifier.verify("alice", &forged, &cert));

        // certificate issued for somebody else
        let signed = SignedPayload::sign("makepayment alice bob 10", &key);
        let cert_for_bob = Certificate::new("bob", &key.verifying_key());
        assert!(!SignatureVerifier.verify("alice", &signed, &cert_for_bob));
    }

    #[test]
    fn malformed_material_is_rejected() {
        let key = SigningKey::generate(&mut OsRng);
        let signed = SignedPayload::sign("balance", &key);
        let short_key = Certificate {
            subject: "alice".into(),
            public_key: vec![1, 2, 3],
        };
        assert!(!SignatureVerifier.verify("alice", &signed, &short_key));

        let cert = Certificate::new("alice", &key.verifying_key());
        let truncated = SignedPayload {
            payload: signed.payload.clone(),
            signature: signed.signature[..10].to_vec(),
        };
        assert!(!SignatureVerifier.verify("alice", &truncated, &cert));
    }
}
