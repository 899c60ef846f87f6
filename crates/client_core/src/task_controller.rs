//! Task board flows. Every transition checks legality locally, has the wallet
//! sign and submit, waits for effects and then re-reads the task; nothing is
//! updated optimistically.

use std::{collections::BTreeSet, sync::Arc};

use futures::future::try_join_all;
use ledger::{
    decode::{decode_platform, decode_profile, decode_submission, decode_task},
    ChainError, ChainReader, DecodeError, TransactionEffects,
};
use rand::{rngs::OsRng, RngCore};
use shared::domain::{Address, IdError, ObjectId, Platform, SealId, Task, TaskSubmission, UserProfile};
use thiserror::Error;
use tracing::{info, warn};
use tx_builder::{
    task::{self, NewTask},
    BuildError, ContractConfig, TransactionDescription,
};
use uuid::Uuid;

use crate::{
    access::{self, AccessError},
    blob_store::{BlobStore, BlobStoreError},
    envelope::EnvelopeError,
    key_server::KeyServer,
    lifecycle::{ensure_allowed, ensure_can_assign, legal_actions, LifecycleError, TaskAction},
    wallet::Wallet,
};

pub const TASK_STRUCT: &str = "Task";
pub const PROFILE_STRUCT: &str = "UserProfile";
pub const SUBMISSION_STRUCT: &str = "TaskSubmission";
pub const PLATFORM_STRUCT: &str = "Platform";
/// Length of the random seal id generated for each submission.
pub const SEAL_ID_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum TaskFlowError {
    #[error("no wallet connected")]
    NoWallet,
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("wallet rejected the transaction: {0}")]
    Rejected(String),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Access(#[from] AccessError),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Blob(#[from] BlobStoreError),
    #[error("task {0} has no assigned freelancer")]
    Unassigned(ObjectId),
    #[error("{0} has no profile")]
    MissingProfile(Address),
}

/// Result of a successful `submit_work` flow.
#[derive(Debug, Clone)]
pub struct SubmittedWork {
    pub task: Task,
    pub submission: TaskSubmission,
}

pub struct TaskController {
    contracts: ContractConfig,
    chain: Arc<dyn ChainReader>,
    wallet: Arc<dyn Wallet>,
    key_server: Arc<dyn KeyServer>,
    blobs: Arc<dyn BlobStore>,
}

impl TaskController {
    pub fn new(
        contracts: ContractConfig,
        chain: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
        key_server: Arc<dyn KeyServer>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            contracts,
            chain,
            wallet,
            key_server,
            blobs,
        }
    }

    fn caller(&self) -> Result<Address, TaskFlowError> {
        self.wallet.address().ok_or(TaskFlowError::NoWallet)
    }

    fn struct_type(&self, name: &str) -> String {
        self.contracts.task_struct_type(name)
    }

    /// Actions the connected wallet may take on `task`; empty without a
    /// wallet.
    pub fn legal_actions(&self, task: &Task) -> BTreeSet<TaskAction> {
        self.wallet
            .address()
            .map(|caller| legal_actions(task, &caller))
            .unwrap_or_default()
    }

    pub async fn load_task(&self, task_id: &ObjectId) -> Result<Task, TaskFlowError> {
        let raw = self.chain.get_object(task_id).await?;
        Ok(decode_task(&raw, &self.struct_type(TASK_STRUCT))?)
    }

    pub async fn load_platform(&self) -> Result<Platform, TaskFlowError> {
        let raw = self.chain.get_object(&self.contracts.platform_id).await?;
        Ok(decode_platform(&raw, &self.struct_type(PLATFORM_STRUCT))?)
    }

    /// Every task listed on the platform, fetched concurrently.
    pub async fn load_board(&self) -> Result<Vec<Task>, TaskFlowError> {
        let platform = self.load_platform().await?;
        let tasks = try_join_all(platform.task_ids.iter().map(|id| self.load_task(id))).await?;
        info!(count = tasks.len(), "task: board loaded");
        Ok(tasks)
    }

    pub async fn load_profile(&self, owner: &Address) -> Result<Option<UserProfile>, TaskFlowError> {
        let profile_type = self.struct_type(PROFILE_STRUCT);
        let owned = self.chain.get_owned_objects(owner, &profile_type).await?;
        Ok(owned
            .first()
            .map(|raw| decode_profile(raw, &profile_type))
            .transpose()?)
    }

    async fn read_profile(&self, profile_id: &ObjectId) -> Result<UserProfile, TaskFlowError> {
        let raw = self.chain.get_object(profile_id).await?;
        Ok(decode_profile(&raw, &self.struct_type(PROFILE_STRUCT))?)
    }

    /// Signs and submits `tx` as the connected wallet and waits for
    /// successful effects. Wallet rejections are returned as-is.
    async fn execute(
        &self,
        tx: TransactionDescription,
        label: &str,
    ) -> Result<TransactionEffects, TaskFlowError> {
        let tx = tx.with_sender(self.caller()?);
        let digest = self.wallet.sign_and_execute(&tx).await.map_err(|err| {
            warn!(action = label, error = %err, "task: wallet rejected transaction");
            TaskFlowError::Rejected(format!("{err:#}"))
        })?;
        let effects = self
            .chain
            .wait_for_transaction(&digest)
            .await?
            .ensure_success()
            .inspect_err(|err| warn!(action = label, %digest, error = %err, "task: execution failed"))?;
        info!(action = label, %digest, "task: transaction confirmed");
        Ok(effects)
    }

    async fn prepare(
        &self,
        task_id: &ObjectId,
        action: TaskAction,
    ) -> Result<(Address, Task), TaskFlowError> {
        let caller = self.caller()?;
        let task = self.load_task(task_id).await?;
        ensure_allowed(&task, &caller, action)?;
        Ok((caller, task))
    }

    async fn commit(
        &self,
        before: &Task,
        action: TaskAction,
        tx: TransactionDescription,
    ) -> Result<(Task, TransactionEffects), TaskFlowError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, task_id = %before.id, %action, status = %before.status, "task: submitting transition");
        let effects = self.execute(tx, action.label()).await?;
        let after = self.load_task(&before.id).await?;
        info!(
            %run_id,
            task_id = %after.id,
            from = %before.status,
            to = %after.status,
            "task: transition confirmed"
        );
        Ok((after, effects))
    }

    pub async fn create_profile(&self, name: &str, bio: &str) -> Result<UserProfile, TaskFlowError> {
        let tx = task::create_profile(&self.contracts, name, bio)?;
        let effects = self.execute(tx, "create profile").await?;
        let profile_id = effects.require_created(&self.struct_type(PROFILE_STRUCT))?;
        self.read_profile(&profile_id).await
    }

    pub async fn register_as_client(&self, profile_id: &ObjectId) -> Result<UserProfile, TaskFlowError> {
        let tx = task::register_as_client(&self.contracts, profile_id.as_str())?;
        self.execute(tx, "register as client").await?;
        self.read_profile(profile_id).await
    }

    pub async fn register_as_freelancer(
        &self,
        profile_id: &ObjectId,
    ) -> Result<UserProfile, TaskFlowError> {
        let tx = task::register_as_freelancer(&self.contracts, profile_id.as_str())?;
        self.execute(tx, "register as freelancer").await?;
        self.read_profile(profile_id).await
    }

    pub async fn post_fixed_price_task(&self, new_task: &NewTask) -> Result<Task, TaskFlowError> {
        let tx = task::create_fixed_price_task(&self.contracts, new_task)?;
        self.post(tx).await
    }

    pub async fn post_hourly_task(&self, new_task: &NewTask) -> Result<Task, TaskFlowError> {
        let tx = task::create_hourly_task(&self.contracts, new_task)?;
        self.post(tx).await
    }

    async fn post(&self, tx: TransactionDescription) -> Result<Task, TaskFlowError> {
        let effects = self.execute(tx, "post task").await?;
        let task_id = effects.require_created(&self.struct_type(TASK_STRUCT))?;
        let task = self.load_task(&task_id).await?;
        info!(task_id = %task.id, escrow = task.escrow_balance, "task: posted");
        Ok(task)
    }

    pub async fn apply(
        &self,
        task_id: &ObjectId,
        bid_amount: u64,
        delivery_days: u64,
        cover_letter: &str,
    ) -> Result<Task, TaskFlowError> {
        let (_, task) = self.prepare(task_id, TaskAction::Apply).await?;
        let tx = task::submit_proposal(
            &self.contracts,
            task_id.as_str(),
            bid_amount,
            delivery_days,
            cover_letter,
        )?;
        Ok(self.commit(&task, TaskAction::Apply, tx).await?.0)
    }

    pub async fn assign(
        &self,
        task_id: &ObjectId,
        freelancer: &Address,
        deadline_days: u64,
    ) -> Result<Task, TaskFlowError> {
        let (caller, task) = self.prepare(task_id, TaskAction::Assign).await?;
        ensure_can_assign(&task, &caller, freelancer)?;
        let tx = task::assign_task(
            &self.contracts,
            task_id.as_str(),
            freelancer.as_str(),
            deadline_days,
        )?;
        Ok(self.commit(&task, TaskAction::Assign, tx).await?.0)
    }

    pub async fn start(&self, task_id: &ObjectId) -> Result<Task, TaskFlowError> {
        let (_, task) = self.prepare(task_id, TaskAction::Start).await?;
        let tx = task::start_task(&self.contracts, task_id.as_str())?;
        Ok(self.commit(&task, TaskAction::Start, tx).await?.0)
    }

    /// Encrypts `artifact` under a fresh seal id, stores it for the task's
    /// client and records the submission on chain.
    pub async fn submit_work(
        &self,
        task_id: &ObjectId,
        artifact: &[u8],
    ) -> Result<SubmittedWork, TaskFlowError> {
        let (_, task) = self.prepare(task_id, TaskAction::SubmitWork).await?;

        let mut seal = [0u8; SEAL_ID_LEN];
        OsRng.fill_bytes(&mut seal);
        let seal_id = SealId::new(seal.to_vec())?;
        let envelope = access::encrypt(
            self.key_server.as_ref(),
            &self.contracts.task_package_id,
            &seal_id,
            artifact,
        )
        .await?;
        let quilt_id = self.blobs.store(envelope.to_bytes()?, &task.client).await?;
        info!(task_id = %task.id, %quilt_id, "task: work uploaded");

        let tx = task::submit_work(
            &self.contracts,
            task_id.as_str(),
            quilt_id.as_str(),
            seal_id.as_bytes(),
        )?;
        let (task, effects) = self.commit(&task, TaskAction::SubmitWork, tx).await?;
        let submission_type = self.struct_type(SUBMISSION_STRUCT);
        let submission_id = effects.require_created(&submission_type)?;
        let raw = self.chain.get_object(&submission_id).await?;
        let submission = decode_submission(&raw, &submission_type)?;
        Ok(SubmittedWork { task, submission })
    }

    /// Releases escrow to the assigned freelancer, crediting their profile.
    pub async fn complete(&self, task_id: &ObjectId) -> Result<Task, TaskFlowError> {
        let (_, task) = self.prepare(task_id, TaskAction::Complete).await?;
        let freelancer = task
            .assigned_freelancer
            .clone()
            .ok_or_else(|| TaskFlowError::Unassigned(task.id.clone()))?;
        let profile = self
            .load_profile(&freelancer)
            .await?
            .ok_or(TaskFlowError::MissingProfile(freelancer))?;
        let tx = task::complete_task(&self.contracts, task_id.as_str(), profile.id.as_str())?;
        Ok(self.commit(&task, TaskAction::Complete, tx).await?.0)
    }

    pub async fn dispute(&self, task_id: &ObjectId, reason: &str) -> Result<Task, TaskFlowError> {
        let (_, task) = self.prepare(task_id, TaskAction::Dispute).await?;
        let tx = task::raise_dispute(&self.contracts, task_id.as_str(), reason)?;
        Ok(self.commit(&task, TaskAction::Dispute, tx).await?.0)
    }

    pub async fn cancel(&self, task_id: &ObjectId) -> Result<Task, TaskFlowError> {
        let (_, task) = self.prepare(task_id, TaskAction::Cancel).await?;
        let tx = task::cancel_task(&self.contracts, task_id.as_str())?;
        Ok(self.commit(&task, TaskAction::Cancel, tx).await?.0)
    }
}

#[cfg(test)]
#[path = "tests/task_controller_tests.rs"]
mod tests;
