use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::domain::{Address, TransactionDigest};
use tx_builder::TransactionDescription;

use crate::session_key::PersonalSignature;

/// Signing seam to the user's wallet. Rejections are returned verbatim and
/// never retried.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// Currently connected account, if any.
    fn address(&self) -> Option<Address>;

    async fn sign_and_execute(&self, tx: &TransactionDescription) -> Result<TransactionDigest>;

    async fn sign_personal_message(&self, message: &[u8]) -> Result<PersonalSignature>;
}

pub struct MissingWallet;

#[async_trait]
impl Wallet for MissingWallet {
    fn address(&self) -> Option<Address> {
        None
    }

    async fn sign_and_execute(&self, _tx: &TransactionDescription) -> Result<TransactionDigest> {
        Err(anyhow!("no wallet connected"))
    }

    async fn sign_personal_message(&self, _message: &[u8]) -> Result<PersonalSignature> {
        Err(anyhow!("no wallet connected"))
    }
}
