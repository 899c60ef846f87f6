//! Versioned envelope for content sealed under a key-server identity.
//!
//! Sealing is local: an ephemeral x25519 key agrees a secret with the key
//! server's public key, HKDF binds it to the package and seal id, and
//! ChaCha20-Poly1305 encrypts with the seal id as associated data. Opening
//! needs the derived key, which only the key server can recompute.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng, Payload},
    AeadCore, ChaCha20Poly1305, Key, Nonce,
};
use serde::{Deserialize, Serialize};
use shared::domain::{ObjectId, SealId};
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::{Zeroize, Zeroizing};

pub const ENVELOPE_VERSION: u8 = 1;
pub const DERIVED_KEY_LEN: usize = 32;
const ENVELOPE_INFO_PREFIX: &[u8] = b"idea-market/envelope/v1";
/// Deterministic application salt for envelope key derivation.
const ENVELOPE_APP_SALT: &[u8] = b"idea-market/envelope-app-salt";

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u8),
    #[error("malformed envelope: {0}")]
    Malformed(String),
    #[error("envelope belongs to package {actual}, expected {expected}")]
    PackageMismatch { expected: ObjectId, actual: ObjectId },
    #[error("key derivation failed")]
    KeyDerivation,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed: wrong key or tampered ciphertext")]
    Decrypt,
}

/// Symmetric key released by the key server for one envelope.
#[derive(Clone)]
pub struct DerivedKey(Zeroizing<[u8; DERIVED_KEY_LEN]>);

impl DerivedKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let mut key = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
        if bytes.len() != DERIVED_KEY_LEN {
            return Err(EnvelopeError::Malformed(format!(
                "derived key must be {DERIVED_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("DerivedKey(..)")
    }
}

fn hkdf_info(package_id: &ObjectId, seal_id: &SealId) -> Vec<u8> {
    let mut info = Vec::with_capacity(
        ENVELOPE_INFO_PREFIX.len() + package_id.as_str().len() + seal_id.as_bytes().len(),
    );
    info.extend_from_slice(ENVELOPE_INFO_PREFIX);
    info.extend_from_slice(package_id.as_str().as_bytes());
    info.extend_from_slice(seal_id.as_bytes());
    info
}

/// Derives the envelope key from an x25519 shared secret.
pub fn derive_key(
    shared_secret: &[u8],
    package_id: &ObjectId,
    seal_id: &SealId,
) -> Result<DerivedKey, EnvelopeError> {
    let mut info = hkdf_info(package_id, seal_id);
    let hk = hkdf::Hkdf::<sha2::Sha256>::new(Some(ENVELOPE_APP_SALT), shared_secret);
    let mut okm = Zeroizing::new([0u8; DERIVED_KEY_LEN]);
    let expanded = hk.expand(&info, okm.as_mut_slice());
    info.zeroize();
    expanded.map_err(|_| EnvelopeError::KeyDerivation)?;
    Ok(DerivedKey(okm))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedObject {
    pub version: u8,
    pub package_id: ObjectId,
    pub seal_id_b64: String,
    pub ephemeral_public_key_b64: String,
    pub nonce_b64: String,
    pub ciphertext_b64: String,
}

impl EncryptedObject {
    pub fn seal(
        key_server_public_key: &[u8; 32],
        package_id: &ObjectId,
        seal_id: &SealId,
        plaintext: &[u8],
    ) -> Result<Self, EnvelopeError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&PublicKey::from(*key_server_public_key));
        let key = derive_key(shared.as_bytes(), package_id, seal_id)?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad: seal_id.as_bytes(),
                },
            )
            .map_err(|_| EnvelopeError::Encrypt)?;

        Ok(Self {
            version: ENVELOPE_VERSION,
            package_id: package_id.clone(),
            seal_id_b64: STANDARD.encode(seal_id.as_bytes()),
            ephemeral_public_key_b64: STANDARD.encode(ephemeral_public.as_bytes()),
            nonce_b64: STANDARD.encode(nonce),
            ciphertext_b64: STANDARD.encode(ciphertext),
        })
    }

    pub fn seal_id(&self) -> Result<SealId, EnvelopeError> {
        let bytes = decode_b64("seal id", &self.seal_id_b64)?;
        SealId::new(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn ephemeral_public_key(&self) -> Result<[u8; 32], EnvelopeError> {
        decode_b64("ephemeral public key", &self.ephemeral_public_key_b64)?
            .try_into()
            .map_err(|_| EnvelopeError::Malformed("ephemeral public key must be 32 bytes".into()))
    }

    pub fn open(&self, key: &DerivedKey) -> Result<Vec<u8>, EnvelopeError> {
        if self.version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(self.version));
        }
        let seal_id = self.seal_id()?;
        let nonce = decode_b64("nonce", &self.nonce_b64)?;
        if nonce.len() != 12 {
            return Err(EnvelopeError::Malformed("nonce must be 12 bytes".into()));
        }
        let ciphertext = decode_b64("ciphertext", &self.ciphertext_b64)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
        cipher
            .decrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: &ciphertext,
                    aad: seal_id.as_bytes(),
                },
            )
            .map_err(|_| EnvelopeError::Decrypt)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(|e| EnvelopeError::Malformed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let envelope: Self =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;
        if envelope.version != ENVELOPE_VERSION {
            return Err(EnvelopeError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, EnvelopeError> {
    STANDARD
        .decode(value)
        .map_err(|e| EnvelopeError::Malformed(format!("{field}: {e}")))
}

#[cfg(test)]
#[path = "tests/envelope_tests.rs"]
mod tests;
