//! Read-only access to ledger state: objects, owned objects and transaction
//! effects, plus strict decoding into domain entities.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::domain::{Address, IdError, ObjectId, TransactionDigest};
use thiserror::Error;
use tracing::{info, warn};

pub mod decode;
pub use decode::{DecodeError, FieldReader};

/// Interval between effect polls while a transaction is not yet visible.
pub const EFFECTS_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Polls before giving up on a transaction becoming visible.
pub const EFFECTS_MAX_POLLS: u32 = 60;
const OWNED_OBJECTS_PAGE_LIMIT: u32 = 50;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("fullnode request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("fullnode returned error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("object {0} not found")]
    NotFound(ObjectId),
    #[error("transaction {digest} not visible after {polls} polls")]
    EffectsTimeout { digest: String, polls: u32 },
    #[error("transaction {digest} failed: {error}")]
    ExecutionFailed { digest: String, error: String },
    #[error("transaction {digest} created no object of type {object_type}")]
    MissingCreatedObject { digest: String, object_type: String },
    #[error("malformed fullnode response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl From<IdError> for ChainError {
    fn from(err: IdError) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// An object as returned by the fullnode: id, full type tag and raw Move
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObject {
    pub object_id: ObjectId,
    pub object_type: String,
    pub fields: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Success,
    Failure { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ObjectChange {
    #[serde(rename_all = "camelCase")]
    Created {
        object_id: ObjectId,
        object_type: String,
    },
    #[serde(rename_all = "camelCase")]
    Mutated {
        object_id: ObjectId,
        object_type: String,
    },
    #[serde(rename_all = "camelCase")]
    Transferred {
        object_id: ObjectId,
        object_type: String,
    },
    #[serde(rename_all = "camelCase")]
    Deleted { object_id: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionEffects {
    pub digest: TransactionDigest,
    pub status: ExecutionStatus,
    pub object_changes: Vec<ObjectChange>,
}

impl TransactionEffects {
    /// First created object whose type is `object_type`, ignoring type
    /// parameters.
    pub fn find_created(&self, object_type: &str) -> Option<&ObjectId> {
        self.object_changes.iter().find_map(|change| match change {
            ObjectChange::Created {
                object_id,
                object_type: created,
            } if decode::ensure_type(object_type, created).is_ok() => Some(object_id),
            _ => None,
        })
    }

    pub fn require_created(&self, object_type: &str) -> Result<ObjectId, ChainError> {
        self.find_created(object_type)
            .cloned()
            .ok_or_else(|| ChainError::MissingCreatedObject {
                digest: self.digest.to_string(),
                object_type: object_type.to_string(),
            })
    }

    pub fn ensure_success(self) -> Result<Self, ChainError> {
        match &self.status {
            ExecutionStatus::Success => Ok(self),
            ExecutionStatus::Failure { error } => Err(ChainError::ExecutionFailed {
                digest: self.digest.to_string(),
                error: error.clone(),
            }),
        }
    }
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_object(&self, id: &ObjectId) -> Result<RawObject, ChainError>;

    async fn get_owned_objects(
        &self,
        owner: &Address,
        struct_type: &str,
    ) -> Result<Vec<RawObject>, ChainError>;

    /// Waits until the transaction is visible and returns its effects,
    /// whatever its execution status.
    async fn wait_for_transaction(
        &self,
        digest: &TransactionDigest,
    ) -> Result<TransactionEffects, ChainError>;
}

/// Fullnode JSON-RPC client.
pub struct RpcChainReader {
    http: Client,
    url: String,
    poll_interval: Duration,
    max_polls: u32,
    next_request_id: AtomicU64,
}

impl RpcChainReader {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            url: url.into(),
            poll_interval: EFFECTS_POLL_INTERVAL,
            max_polls: EFFECTS_MAX_POLLS,
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        if let Some(error) = response.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response
            .result
            .ok_or_else(|| ChainError::Malformed(format!("{method} returned no result")))
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ObjectResponse {
    data: Option<ObjectData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectData {
    object_id: ObjectId,
    content: Option<MoveContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoveContent {
    data_type: String,
    #[serde(rename = "type")]
    object_type: String,
    fields: Value,
}

impl ObjectData {
    fn into_raw(self) -> Result<RawObject, ChainError> {
        let content = self.content.ok_or_else(|| {
            ChainError::Malformed(format!("object {} has no content", self.object_id))
        })?;
        if content.data_type != "moveObject" {
            return Err(ChainError::Malformed(format!(
                "object {} is a {}, not a Move object",
                self.object_id, content.data_type
            )));
        }
        Ok(RawObject {
            object_id: self.object_id,
            object_type: content.object_type,
            fields: content.fields,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OwnedObjectsPage {
    data: Vec<ObjectResponse>,
    next_cursor: Option<Value>,
    has_next_page: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionBlockResponse {
    digest: TransactionDigest,
    effects: Option<RpcEffects>,
    #[serde(default)]
    object_changes: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcEffects {
    status: RpcExecutionStatus,
}

#[derive(Debug, Deserialize)]
struct RpcExecutionStatus {
    status: String,
    error: Option<String>,
}

impl TransactionBlockResponse {
    fn into_effects(self) -> Result<TransactionEffects, ChainError> {
        let effects = self.effects.ok_or_else(|| {
            ChainError::Malformed(format!("transaction {} has no effects", self.digest))
        })?;
        let status = match effects.status.status.as_str() {
            "success" => ExecutionStatus::Success,
            _ => ExecutionStatus::Failure {
                error: effects
                    .status
                    .error
                    .unwrap_or_else(|| "unknown execution failure".to_string()),
            },
        };
        // Published packages and wrapped objects are not tracked.
        let object_changes = self
            .object_changes
            .into_iter()
            .filter_map(|change| serde_json::from_value::<ObjectChange>(change).ok())
            .collect();
        Ok(TransactionEffects {
            digest: self.digest,
            status,
            object_changes,
        })
    }
}

fn object_options() -> Value {
    json!({ "showType": true, "showContent": true, "showOwner": true })
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn get_object(&self, id: &ObjectId) -> Result<RawObject, ChainError> {
        let result = self
            .call("sui_getObject", json!([id, object_options()]))
            .await?;
        let response: ObjectResponse = serde_json::from_value(result)
            .map_err(|e| ChainError::Malformed(format!("object response: {e}")))?;
        response
            .data
            .ok_or_else(|| ChainError::NotFound(id.clone()))?
            .into_raw()
    }

    async fn get_owned_objects(
        &self,
        owner: &Address,
        struct_type: &str,
    ) -> Result<Vec<RawObject>, ChainError> {
        let mut objects = Vec::new();
        let mut cursor = Value::Null;
        loop {
            let result = self
                .call(
                    "suix_getOwnedObjects",
                    json!([
                        owner,
                        {
                            "filter": { "StructType": struct_type },
                            "options": object_options(),
                        },
                        cursor,
                        OWNED_OBJECTS_PAGE_LIMIT,
                    ]),
                )
                .await?;
            let page: OwnedObjectsPage = serde_json::from_value(result)
                .map_err(|e| ChainError::Malformed(format!("owned objects response: {e}")))?;
            for entry in page.data {
                if let Some(data) = entry.data {
                    objects.push(data.into_raw()?);
                }
            }
            match page.next_cursor {
                Some(next) if page.has_next_page && !next.is_null() => cursor = next,
                _ => break,
            }
        }
        info!(
            owner = %owner,
            struct_type,
            count = objects.len(),
            "chain: loaded owned objects"
        );
        Ok(objects)
    }

    async fn wait_for_transaction(
        &self,
        digest: &TransactionDigest,
    ) -> Result<TransactionEffects, ChainError> {
        let params = json!([
            digest,
            { "showEffects": true, "showObjectChanges": true },
        ]);
        for poll in 1..=self.max_polls {
            match self.call("sui_getTransactionBlock", params.clone()).await {
                Ok(result) => {
                    let response: TransactionBlockResponse = serde_json::from_value(result)
                        .map_err(|e| {
                            ChainError::Malformed(format!("transaction response: {e}"))
                        })?;
                    let effects = response.into_effects()?;
                    info!(digest = %digest, poll, "chain: transaction effects available");
                    return Ok(effects);
                }
                // Not yet indexed; anything else is a real failure.
                Err(ChainError::Rpc { message, .. }) if is_not_yet_visible(&message) => {
                    if poll == self.max_polls {
                        break;
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(err) => return Err(err),
            }
        }
        warn!(digest = %digest, polls = self.max_polls, "chain: transaction never became visible");
        Err(ChainError::EffectsTimeout {
            digest: digest.to_string(),
            polls: self.max_polls,
        })
    }
}

fn is_not_yet_visible(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("could not find") || message.contains("not found")
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

#[cfg(test)]
#[path = "tests/decode_tests.rs"]
mod decode_tests;
