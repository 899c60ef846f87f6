//! Time-boxed session keys authorising key-server requests on behalf of a
//! wallet.
//!
//! The wallet signs a human-readable personal message once; that signature
//! certifies an ephemeral ed25519 key, which then signs every individual key
//! request until the session expires.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::domain::{Address, ObjectId};
use thiserror::Error;

use crate::clock::Clock;

pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 30;
pub const MAX_SESSION_TTL_MINUTES: i64 = 30;

const ADDRESS_SCHEME_FLAG: u8 = 0x00;

#[derive(Debug, Error)]
pub enum SessionKeyError {
    #[error("session ttl must be between 1 and 30 minutes, got {0}")]
    InvalidTtl(i64),
    #[error("session key has not been signed by the wallet")]
    Unsigned,
    #[error("session key expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
    #[error("personal message signed by {actual}, expected {expected}")]
    AddressMismatch { expected: Address, actual: Address },
    #[error("signature verification failed")]
    BadSignature,
    #[error("malformed session material: {0}")]
    Malformed(String),
}

/// Wallet signature over a personal message, with the signer's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalSignature {
    pub public_key_b64: String,
    pub signature_b64: String,
}

impl PersonalSignature {
    pub fn sign(key: &SigningKey, message: &[u8]) -> Self {
        Self {
            public_key_b64: STANDARD.encode(key.verifying_key().as_bytes()),
            signature_b64: STANDARD.encode(key.sign(message).to_bytes()),
        }
    }

    /// Verifies the signature and returns the address it belongs to.
    pub fn verify(&self, message: &[u8]) -> Result<Address, SessionKeyError> {
        let public_key = decode_verifying_key(&self.public_key_b64)?;
        let signature = decode_signature(&self.signature_b64)?;
        public_key
            .verify(message, &signature)
            .map_err(|_| SessionKeyError::BadSignature)?;
        address_from_public_key(&public_key)
    }
}

/// Wallet address derived from an ed25519 public key: SHA-256 over the scheme
/// flag followed by the key bytes.
pub fn address_from_public_key(key: &VerifyingKey) -> Result<Address, SessionKeyError> {
    let mut hasher = Sha256::new();
    hasher.update([ADDRESS_SCHEME_FLAG]);
    hasher.update(key.as_bytes());
    let hex: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect();
    Address::parse(&format!("0x{hex}")).map_err(|e| SessionKeyError::Malformed(e.to_string()))
}

fn decode_verifying_key(b64: &str) -> Result<VerifyingKey, SessionKeyError> {
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| SessionKeyError::Malformed(format!("public key: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SessionKeyError::Malformed("public key must be 32 bytes".into()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SessionKeyError::Malformed(e.to_string()))
}

fn decode_signature(b64: &str) -> Result<Signature, SessionKeyError> {
    let bytes = STANDARD
        .decode(b64)
        .map_err(|e| SessionKeyError::Malformed(format!("signature: {e}")))?;
    Signature::from_slice(&bytes).map_err(|_| SessionKeyError::BadSignature)
}

pub fn personal_message(
    package_id: &ObjectId,
    ttl_minutes: i64,
    created_at: DateTime<Utc>,
    session_public_key_b64: &str,
) -> String {
    format!(
        "Accessing keys of package {package_id} for {ttl_minutes} mins from {}, session key {session_public_key_b64}",
        created_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

pub struct SessionKey {
    address: Address,
    package_id: ObjectId,
    created_at: DateTime<Utc>,
    ttl_minutes: i64,
    signing_key: SigningKey,
    personal_signature: Option<PersonalSignature>,
    clock: Arc<dyn Clock>,
}

impl SessionKey {
    pub fn new(
        address: Address,
        package_id: ObjectId,
        ttl_minutes: i64,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SessionKeyError> {
        if !(1..=MAX_SESSION_TTL_MINUTES).contains(&ttl_minutes) {
            return Err(SessionKeyError::InvalidTtl(ttl_minutes));
        }
        // Truncated to milliseconds so the certificate round-trips exactly.
        let now = clock.now();
        let created_at = Utc
            .timestamp_millis_opt(now.timestamp_millis())
            .single()
            .unwrap_or(now);
        Ok(Self {
            address,
            package_id,
            created_at,
            ttl_minutes,
            signing_key: SigningKey::generate(&mut OsRng),
            personal_signature: None,
            clock,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn package_id(&self) -> &ObjectId {
        &self.package_id
    }

    pub fn session_public_key_b64(&self) -> String {
        STANDARD.encode(self.signing_key.verifying_key().as_bytes())
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::minutes(self.ttl_minutes)
    }

    pub fn is_expired(&self) -> bool {
        self.clock.now() >= self.expires_at()
    }

    /// The message the wallet must sign to activate this session.
    pub fn personal_message(&self) -> String {
        personal_message(
            &self.package_id,
            self.ttl_minutes,
            self.created_at,
            &self.session_public_key_b64(),
        )
    }

    /// Attaches the wallet's signature after checking it signs this
    /// session's message with this session's address.
    pub fn set_personal_signature(
        &mut self,
        signature: PersonalSignature,
    ) -> Result<(), SessionKeyError> {
        let signer = signature.verify(self.personal_message().as_bytes())?;
        if signer != self.address {
            return Err(SessionKeyError::AddressMismatch {
                expected: self.address.clone(),
                actual: signer,
            });
        }
        self.personal_signature = Some(signature);
        Ok(())
    }

    fn ensure_usable(&self) -> Result<&PersonalSignature, SessionKeyError> {
        if self.is_expired() {
            return Err(SessionKeyError::Expired {
                expired_at: self.expires_at(),
            });
        }
        self.personal_signature
            .as_ref()
            .ok_or(SessionKeyError::Unsigned)
    }

    pub fn certificate(&self) -> Result<Certificate, SessionKeyError> {
        let personal_signature = self.ensure_usable()?;
        Ok(Certificate {
            user: self.address.clone(),
            package_id: self.package_id.clone(),
            session_public_key_b64: self.session_public_key_b64(),
            created_at_ms: self.created_at.timestamp_millis(),
            ttl_minutes: self.ttl_minutes,
            personal_signature: personal_signature.clone(),
        })
    }

    /// Signs a key request with the session's ephemeral key.
    pub fn sign_request(&self, payload: &[u8]) -> Result<String, SessionKeyError> {
        self.ensure_usable()?;
        Ok(STANDARD.encode(self.signing_key.sign(payload).to_bytes()))
    }
}

/// Proof, presented to the key server, that the wallet delegated to the
/// session key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub user: Address,
    pub package_id: ObjectId,
    pub session_public_key_b64: String,
    pub created_at_ms: i64,
    pub ttl_minutes: i64,
    pub personal_signature: PersonalSignature,
}

impl Certificate {
    fn created_at(&self) -> Result<DateTime<Utc>, SessionKeyError> {
        Utc.timestamp_millis_opt(self.created_at_ms)
            .single()
            .ok_or_else(|| SessionKeyError::Malformed("creation time out of range".into()))
    }

    pub fn expires_at(&self) -> Result<DateTime<Utc>, SessionKeyError> {
        Ok(self.created_at()? + Duration::minutes(self.ttl_minutes))
    }

    /// Checks the wallet signature, the signer's address and expiry at `now`.
    pub fn verify(&self, now: DateTime<Utc>) -> Result<(), SessionKeyError> {
        if !(1..=MAX_SESSION_TTL_MINUTES).contains(&self.ttl_minutes) {
            return Err(SessionKeyError::InvalidTtl(self.ttl_minutes));
        }
        let expires_at = self.expires_at()?;
        if now >= expires_at {
            return Err(SessionKeyError::Expired {
                expired_at: expires_at,
            });
        }
        let message = personal_message(
            &self.package_id,
            self.ttl_minutes,
            self.created_at()?,
            &self.session_public_key_b64,
        );
        let signer = self.personal_signature.verify(message.as_bytes())?;
        if signer != self.user {
            return Err(SessionKeyError::AddressMismatch {
                expected: self.user.clone(),
                actual: signer,
            });
        }
        Ok(())
    }

    pub fn verify_request(&self, payload: &[u8], signature_b64: &str) -> Result<(), SessionKeyError> {
        let key = decode_verifying_key(&self.session_public_key_b64)?;
        let signature = decode_signature(signature_b64)?;
        key.verify(payload, &signature)
            .map_err(|_| SessionKeyError::BadSignature)
    }
}

#[cfg(test)]
#[path = "tests/session_key_tests.rs"]
mod tests;
