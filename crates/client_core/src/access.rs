//! Client side of the access-control flow: sealing content for a key-server
//! identity and opening it with a session key and policy proof.

use shared::domain::{ObjectId, SealId};
use thiserror::Error;
use tracing::info;

use crate::{
    envelope::{EncryptedObject, EnvelopeError},
    key_server::{FetchKeyRequest, KeyServer, KeyServerError},
    session_key::{SessionKey, SessionKeyError},
};

#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Session(#[from] SessionKeyError),
    #[error(transparent)]
    KeyServer(#[from] KeyServerError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error("envelope is sealed under package {actual}, session is for {expected}")]
    PackageMismatch { expected: ObjectId, actual: ObjectId },
    #[error("envelope is sealed for {actual}, approval grants {expected}")]
    SealMismatch { expected: String, actual: String },
}

impl AccessError {
    pub fn is_expired_session(&self) -> bool {
        matches!(
            self,
            Self::Session(SessionKeyError::Expired { .. })
                | Self::KeyServer(KeyServerError::Session(SessionKeyError::Expired { .. }))
        )
    }
}

pub async fn encrypt(
    key_server: &dyn KeyServer,
    package_id: &ObjectId,
    seal_id: &SealId,
    plaintext: &[u8],
) -> Result<EncryptedObject, AccessError> {
    let public_key = key_server.public_key().await?;
    let envelope = EncryptedObject::seal(&public_key, package_id, seal_id, plaintext)?;
    info!(
        seal_id = %seal_id.to_hex(),
        bytes = plaintext.len(),
        "access: content sealed"
    );
    Ok(envelope)
}

/// Fetches the key for `seal_id` with `policy` as proof of access and
/// decrypts. The envelope must be sealed for that same id; a mismatch fails
/// without contacting the key server.
pub async fn decrypt(
    key_server: &dyn KeyServer,
    session: &SessionKey,
    seal_id: &SealId,
    envelope: &EncryptedObject,
    policy: &[u8],
) -> Result<Vec<u8>, AccessError> {
    if &envelope.package_id != session.package_id() {
        return Err(AccessError::PackageMismatch {
            expected: session.package_id().clone(),
            actual: envelope.package_id.clone(),
        });
    }
    let sealed_for = envelope.seal_id()?;
    if &sealed_for != seal_id {
        return Err(AccessError::SealMismatch {
            expected: seal_id.to_hex(),
            actual: sealed_for.to_hex(),
        });
    }
    let request = FetchKeyRequest::new(
        session,
        seal_id,
        &envelope.ephemeral_public_key()?,
        policy,
    )?;
    let key = key_server.fetch_key(&request).await?;
    let plaintext = envelope.open(&key)?;
    info!(
        seal_id = %seal_id.to_hex(),
        bytes = plaintext.len(),
        "access: content decrypted"
    );
    Ok(plaintext)
}
