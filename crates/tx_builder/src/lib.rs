//! Unsigned transaction construction for the marketplace and task contracts.
//!
//! Every builder validates its inputs before producing a
//! [`TransactionDescription`]; malformed identifiers never reach a wallet.

use shared::domain::{Address, IdError, ObjectId};
use thiserror::Error;

pub mod idea;
pub mod market;
pub mod seal_policy;
pub mod task;
pub mod transaction;

pub use transaction::{Argument, Command, MoveCall, PureValue, TransactionDescription};

/// Gas budget attached to idea and market transactions.
pub const DEFAULT_GAS_BUDGET: u64 = 1_000_000_000;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid {field}: {source}")]
    InvalidId {
        field: &'static str,
        #[source]
        source: IdError,
    },
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("{0} must be greater than zero")]
    ZeroAmount(&'static str),
    #[error("invalid seal id: must be a non-empty byte array")]
    EmptyKeyId,
    #[error("failed to encode transaction: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Package, module and function names of the deployed contracts, plus the
/// shared objects some entry points take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractConfig {
    pub package_id: ObjectId,
    pub idea_module: String,
    pub market_module: String,
    pub seal_policy_module: String,
    pub delist_function: String,
    pub purchase_function: String,
    pub seal_approve_function: String,
    pub transfer_policy_id: ObjectId,
    /// Task contracts may be deployed in their own package.
    pub task_package_id: ObjectId,
    pub task_module: String,
    pub platform_id: ObjectId,
}

impl ContractConfig {
    /// Type tag of a struct declared in the idea/market/seal package.
    pub fn struct_type(&self, module: &str, name: &str) -> String {
        format!("{}::{module}::{name}", self.package_id)
    }

    pub fn idea_type(&self) -> String {
        self.struct_type(&self.idea_module, "Idea")
    }

    pub fn purchase_approval_type(&self) -> String {
        self.struct_type(&self.seal_policy_module, "PurchaseApproval")
    }

    pub fn task_struct_type(&self, name: &str) -> String {
        format!("{}::{}::{name}", self.task_package_id, self.task_module)
    }
}

pub(crate) fn object_id(field: &'static str, raw: &str) -> Result<ObjectId, BuildError> {
    ObjectId::parse(raw).map_err(|source| BuildError::InvalidId { field, source })
}

pub(crate) fn address(field: &'static str, raw: &str) -> Result<Address, BuildError> {
    Address::parse(raw).map_err(|source| BuildError::InvalidId { field, source })
}

pub(crate) fn non_empty(field: &'static str, value: &str) -> Result<String, BuildError> {
    if value.trim().is_empty() {
        return Err(BuildError::EmptyField(field));
    }
    Ok(value.to_string())
}

pub(crate) fn positive(field: &'static str, value: u64) -> Result<u64, BuildError> {
    if value == 0 {
        return Err(BuildError::ZeroAmount(field));
    }
    Ok(value)
}

#[cfg(test)]
#[path = "tests/builders_tests.rs"]
mod tests;
