use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ledger::{decode::decode_purchase_approval, ChainError, ChainReader};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use shared::{domain::SealId, error::ErrorBody};
use thiserror::Error;
use tracing::{info, warn};
use tx_builder::{seal_policy::find_seal_approval, ContractConfig};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::{
    clock::Clock,
    envelope::{derive_key, DerivedKey, EnvelopeError},
    session_key::{Certificate, SessionKey, SessionKeyError},
};

#[derive(Debug, Error)]
pub enum KeyServerError {
    #[error("key server request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("key server unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },
    #[error("key server denied access: {0}")]
    Denied(String),
    #[error(transparent)]
    Session(#[from] SessionKeyError),
    #[error("malformed key server message: {0}")]
    Malformed(String),
    #[error("policy check could not read the ledger: {0}")]
    Chain(#[from] ChainError),
}

impl From<EnvelopeError> for KeyServerError {
    fn from(err: EnvelopeError) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Signed request for the key protecting one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchKeyRequest {
    pub seal_id_b64: String,
    pub envelope_public_key_b64: String,
    /// Transaction-kind bytes of the `seal_approve` policy check.
    pub policy_b64: String,
    pub certificate: Certificate,
    pub request_signature_b64: String,
}

fn request_payload(seal_id: &[u8], envelope_public_key: &[u8], policy: &[u8]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(12 + seal_id.len() + envelope_public_key.len() + policy.len());
    for part in [seal_id, envelope_public_key, policy] {
        payload.extend_from_slice(&(part.len() as u32).to_be_bytes());
        payload.extend_from_slice(part);
    }
    payload
}

impl FetchKeyRequest {
    pub fn new(
        session: &SessionKey,
        seal_id: &SealId,
        envelope_public_key: &[u8; 32],
        policy: &[u8],
    ) -> Result<Self, SessionKeyError> {
        let certificate = session.certificate()?;
        let payload = request_payload(seal_id.as_bytes(), envelope_public_key, policy);
        Ok(Self {
            seal_id_b64: STANDARD.encode(seal_id.as_bytes()),
            envelope_public_key_b64: STANDARD.encode(envelope_public_key),
            policy_b64: STANDARD.encode(policy),
            certificate,
            request_signature_b64: session.sign_request(&payload)?,
        })
    }

    fn decode(&self) -> Result<DecodedRequest, KeyServerError> {
        let decode = |field: &str, value: &str| {
            STANDARD
                .decode(value)
                .map_err(|e| KeyServerError::Malformed(format!("{field}: {e}")))
        };
        let seal_id = SealId::new(decode("seal id", &self.seal_id_b64)?)
            .map_err(|e| KeyServerError::Malformed(e.to_string()))?;
        let envelope_public_key: [u8; 32] = decode(
            "envelope public key",
            &self.envelope_public_key_b64,
        )?
        .try_into()
        .map_err(|_| KeyServerError::Malformed("envelope public key must be 32 bytes".into()))?;
        let policy = decode("policy", &self.policy_b64)?;
        Ok(DecodedRequest {
            seal_id,
            envelope_public_key,
            policy,
        })
    }
}

struct DecodedRequest {
    seal_id: SealId,
    envelope_public_key: [u8; 32],
    policy: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServiceInfo {
    public_key_b64: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FetchKeyResponse {
    key_b64: String,
}

#[async_trait]
pub trait KeyServer: Send + Sync {
    /// Public x25519 key content is sealed to.
    async fn public_key(&self) -> Result<[u8; 32], KeyServerError>;

    async fn fetch_key(&self, request: &FetchKeyRequest) -> Result<DerivedKey, KeyServerError>;
}

pub struct MissingKeyServer;

#[async_trait]
impl KeyServer for MissingKeyServer {
    async fn public_key(&self) -> Result<[u8; 32], KeyServerError> {
        Err(KeyServerError::Unavailable {
            status: 0,
            message: "no key server configured".into(),
        })
    }

    async fn fetch_key(&self, _request: &FetchKeyRequest) -> Result<DerivedKey, KeyServerError> {
        Err(KeyServerError::Unavailable {
            status: 0,
            message: "no key server configured".into(),
        })
    }
}

pub struct HttpKeyServer {
    http: Client,
    url: String,
}

impl HttpKeyServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }
}

async fn error_message(response: reqwest::Response) -> String {
    let status = response.status();
    response
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| status.to_string())
}

#[async_trait]
impl KeyServer for HttpKeyServer {
    async fn public_key(&self) -> Result<[u8; 32], KeyServerError> {
        let response = self.http.get(format!("{}/v1/service", self.url)).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            return Err(KeyServerError::Unavailable {
                status,
                message: error_message(response).await,
            });
        }
        let info: ServiceInfo = response.json().await?;
        STANDARD
            .decode(&info.public_key_b64)
            .map_err(|e| KeyServerError::Malformed(format!("public key: {e}")))?
            .try_into()
            .map_err(|_| KeyServerError::Malformed("public key must be 32 bytes".into()))
    }

    async fn fetch_key(&self, request: &FetchKeyRequest) -> Result<DerivedKey, KeyServerError> {
        let response = self
            .http
            .post(format!("{}/v1/fetch_key", self.url))
            .json(request)
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => {
                let body: FetchKeyResponse = response.json().await?;
                let bytes = STANDARD
                    .decode(&body.key_b64)
                    .map_err(|e| KeyServerError::Malformed(format!("key: {e}")))?;
                Ok(DerivedKey::from_bytes(&bytes)?)
            }
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                Err(KeyServerError::Denied(error_message(response).await))
            }
            status => Err(KeyServerError::Unavailable {
                status: status.as_u16(),
                message: error_message(response).await,
            }),
        }
    }
}

/// In-process key server. Releases a key only for an unexpired, correctly
/// signed session whose policy bytes call `seal_approve` with a purchase
/// approval for the requested seal id.
pub struct LocalKeyServer {
    secret: StaticSecret,
    contracts: ContractConfig,
    chain: Arc<dyn ChainReader>,
    clock: Arc<dyn Clock>,
}

impl LocalKeyServer {
    pub fn new(contracts: ContractConfig, chain: Arc<dyn ChainReader>, clock: Arc<dyn Clock>) -> Self {
        Self {
            secret: StaticSecret::random_from_rng(rand::rngs::OsRng),
            contracts,
            chain,
            clock,
        }
    }

    async fn check_policy(
        &self,
        request: &FetchKeyRequest,
        decoded: &DecodedRequest,
    ) -> Result<(), KeyServerError> {
        let certificate = &request.certificate;
        certificate.verify(self.clock.now())?;
        if certificate.package_id != self.contracts.package_id {
            return Err(KeyServerError::Denied(format!(
                "session is for package {}, not {}",
                certificate.package_id, self.contracts.package_id
            )));
        }
        let payload = request_payload(
            decoded.seal_id.as_bytes(),
            &decoded.envelope_public_key,
            &decoded.policy,
        );
        certificate.verify_request(&payload, &request.request_signature_b64)?;

        let approval = find_seal_approval(&self.contracts, &decoded.policy)
            .map_err(|e| KeyServerError::Malformed(e.to_string()))?
            .ok_or_else(|| {
                KeyServerError::Denied("policy does not call seal_approve".into())
            })?;
        if approval.seal_id != decoded.seal_id {
            return Err(KeyServerError::Denied(
                "policy approves a different seal id".into(),
            ));
        }

        let object = self.chain.get_object(&approval.approval_id).await?;
        let purchase =
            decode_purchase_approval(&object, &self.contracts.purchase_approval_type())
                .map_err(|e| KeyServerError::Denied(format!("not a purchase approval: {e}")))?;
        if purchase.seal_id != decoded.seal_id {
            return Err(KeyServerError::Denied(
                "purchase approval covers a different seal id".into(),
            ));
        }
        if let Some(buyer) = &purchase.buyer {
            if buyer != &certificate.user {
                return Err(KeyServerError::Denied(
                    "purchase approval belongs to another buyer".into(),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl KeyServer for LocalKeyServer {
    async fn public_key(&self) -> Result<[u8; 32], KeyServerError> {
        Ok(PublicKey::from(&self.secret).to_bytes())
    }

    async fn fetch_key(&self, request: &FetchKeyRequest) -> Result<DerivedKey, KeyServerError> {
        let decoded = request.decode()?;
        if let Err(err) = self.check_policy(request, &decoded).await {
            warn!(
                user = %request.certificate.user,
                seal_id = %decoded.seal_id.to_hex(),
                error = %err,
                "key server: request refused"
            );
            return Err(err);
        }
        let shared = self
            .secret
            .diffie_hellman(&PublicKey::from(decoded.envelope_public_key));
        let key = derive_key(shared.as_bytes(), &self.contracts.package_id, &decoded.seal_id)?;
        info!(
            user = %request.certificate.user,
            seal_id = %decoded.seal_id.to_hex(),
            "key server: key released"
        );
        Ok(key)
    }
}

#[cfg(test)]
#[path = "tests/key_server_tests.rs"]
mod tests;
