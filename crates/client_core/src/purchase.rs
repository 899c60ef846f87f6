//! Buying an idea and forking its content into a local project.
//!
//! The run is an explicit sequence of stages. Each stage consumes the output
//! of the one before it, and the project is only created by the last one, so
//! a failure anywhere leaves no project behind. Once the purchase has
//! executed on chain the payment is final; later failures are reported as
//! paid without content and nothing is compensated.

use std::{error::Error as StdError, fmt, sync::Arc};

use anyhow::{anyhow, bail, Context};
use ledger::{decode::decode_purchase_approval, ChainReader};
use shared::{
    domain::{Address, Idea, ObjectId, PurchaseApproval, TransactionDigest},
    project::{Project, ProjectDraft},
};
use tracing::{info, warn};
use tx_builder::{
    market::{self, PurchaseIdea},
    seal_policy, ContractConfig,
};
use uuid::Uuid;

use crate::{
    access,
    backend::ProjectSink,
    blob_store::BlobStore,
    clock::Clock,
    envelope::EncryptedObject,
    key_server::KeyServer,
    session_key::{SessionKey, DEFAULT_SESSION_TTL_MINUTES},
    wallet::Wallet,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PurchaseStep {
    SubmitPurchase,
    AwaitApproval,
    ReadApproval,
    OpenSession,
    ApprovePolicy,
    FetchBlob,
    Decrypt,
    CreateProject,
}

impl PurchaseStep {
    pub const ALL: [PurchaseStep; 8] = [
        PurchaseStep::SubmitPurchase,
        PurchaseStep::AwaitApproval,
        PurchaseStep::ReadApproval,
        PurchaseStep::OpenSession,
        PurchaseStep::ApprovePolicy,
        PurchaseStep::FetchBlob,
        PurchaseStep::Decrypt,
        PurchaseStep::CreateProject,
    ];

    /// 1-based position in the pipeline.
    pub fn number(self) -> u8 {
        match self {
            PurchaseStep::SubmitPurchase => 1,
            PurchaseStep::AwaitApproval => 2,
            PurchaseStep::ReadApproval => 3,
            PurchaseStep::OpenSession => 4,
            PurchaseStep::ApprovePolicy => 5,
            PurchaseStep::FetchBlob => 6,
            PurchaseStep::Decrypt => 7,
            PurchaseStep::CreateProject => 8,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PurchaseStep::SubmitPurchase => "submit purchase",
            PurchaseStep::AwaitApproval => "await purchase approval",
            PurchaseStep::ReadApproval => "read purchase approval",
            PurchaseStep::OpenSession => "open session key",
            PurchaseStep::ApprovePolicy => "approve access policy",
            PurchaseStep::FetchBlob => "fetch encrypted content",
            PurchaseStep::Decrypt => "decrypt content",
            PurchaseStep::CreateProject => "create project",
        }
    }
}

impl fmt::Display for PurchaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step {} ({})", self.number(), self.label())
    }
}

/// A purchase run that stopped before creating the project.
#[derive(Debug)]
pub struct PipelineError {
    pub step: PurchaseStep,
    /// The purchase executed, so the buyer has paid but holds no content.
    pub paid_without_content: bool,
    pub digest: Option<TransactionDigest>,
    pub cause: anyhow::Error,
}

impl PipelineError {
    pub fn message(&self) -> String {
        format!("{:#}", self.cause)
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.paid_without_content {
            write!(
                f,
                "purchase paid but content unavailable: {} failed: {:#}",
                self.step, self.cause
            )
        } else {
            write!(f, "purchase failed at {}: {:#}", self.step, self.cause)
        }
    }
}

impl StdError for PipelineError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.cause)
    }
}

/// What the buyer is paying for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseOrder {
    pub idea_id: ObjectId,
    pub kiosk_id: ObjectId,
    pub price: u64,
}

impl PurchaseOrder {
    /// Orders `idea` at its listed price; `None` when it is not in a kiosk.
    pub fn from_idea(idea: &Idea) -> Option<Self> {
        Some(Self {
            idea_id: idea.id.clone(),
            kiosk_id: idea.kiosk_id.clone()?,
            price: idea.price,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    pub project: Project,
    pub approval: PurchaseApproval,
    pub purchase_digest: TransactionDigest,
}

enum Stage {
    Start,
    Submitted {
        digest: TransactionDigest,
    },
    Confirmed {
        approval_id: ObjectId,
    },
    Located {
        approval: PurchaseApproval,
    },
    SessionOpen {
        approval: PurchaseApproval,
        session: SessionKey,
    },
    PolicyApproved {
        approval: PurchaseApproval,
        session: SessionKey,
        policy: Vec<u8>,
    },
    Fetched {
        approval: PurchaseApproval,
        session: SessionKey,
        policy: Vec<u8>,
        envelope: EncryptedObject,
    },
    Decrypted {
        approval: PurchaseApproval,
        plaintext: Vec<u8>,
    },
    Done {
        approval: PurchaseApproval,
        project: Project,
    },
}

impl Stage {
    /// The step that moves the run out of this stage.
    fn next_step(&self) -> Option<PurchaseStep> {
        match self {
            Stage::Start => Some(PurchaseStep::SubmitPurchase),
            Stage::Submitted { .. } => Some(PurchaseStep::AwaitApproval),
            Stage::Confirmed { .. } => Some(PurchaseStep::ReadApproval),
            Stage::Located { .. } => Some(PurchaseStep::OpenSession),
            Stage::SessionOpen { .. } => Some(PurchaseStep::ApprovePolicy),
            Stage::PolicyApproved { .. } => Some(PurchaseStep::FetchBlob),
            Stage::Fetched { .. } => Some(PurchaseStep::Decrypt),
            Stage::Decrypted { .. } => Some(PurchaseStep::CreateProject),
            Stage::Done { .. } => None,
        }
    }
}

struct Run<'a> {
    id: Uuid,
    buyer: Address,
    order: &'a PurchaseOrder,
    digest: Option<TransactionDigest>,
    paid: bool,
}

impl Run<'_> {
    fn failure(&self, step: PurchaseStep, cause: anyhow::Error) -> PipelineError {
        PipelineError {
            step,
            paid_without_content: self.paid,
            digest: self.digest.clone(),
            cause,
        }
    }
}

pub struct PurchaseController {
    contracts: ContractConfig,
    chain: Arc<dyn ChainReader>,
    wallet: Arc<dyn Wallet>,
    key_server: Arc<dyn KeyServer>,
    blobs: Arc<dyn BlobStore>,
    projects: Arc<dyn ProjectSink>,
    clock: Arc<dyn Clock>,
    session_ttl_minutes: i64,
}

impl PurchaseController {
    pub fn new(
        contracts: ContractConfig,
        chain: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
        key_server: Arc<dyn KeyServer>,
        blobs: Arc<dyn BlobStore>,
        projects: Arc<dyn ProjectSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            contracts,
            chain,
            wallet,
            key_server,
            blobs,
            projects,
            clock,
            session_ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
        }
    }

    pub fn with_session_ttl(mut self, minutes: i64) -> Self {
        self.session_ttl_minutes = minutes;
        self
    }

    /// Runs the whole pipeline for `order`. The returned error names the
    /// step that failed and whether payment had already gone through.
    pub async fn purchase(&self, order: &PurchaseOrder) -> Result<PurchaseOutcome, PipelineError> {
        let Some(buyer) = self.wallet.address() else {
            return Err(PipelineError {
                step: PurchaseStep::SubmitPurchase,
                paid_without_content: false,
                digest: None,
                cause: anyhow!("no wallet connected"),
            });
        };
        if let Err(cause) = self.projects.ensure_ready().await {
            warn!(idea_id = %order.idea_id, error = %cause, "purchase: project store not ready");
            return Err(PipelineError {
                step: PurchaseStep::SubmitPurchase,
                paid_without_content: false,
                digest: None,
                cause: cause.context("projects cannot be saved, nothing was paid"),
            });
        }
        let mut run = Run {
            id: Uuid::new_v4(),
            buyer,
            order,
            digest: None,
            paid: false,
        };
        info!(
            run_id = %run.id,
            idea_id = %order.idea_id,
            kiosk_id = %order.kiosk_id,
            price = order.price,
            "purchase: started"
        );

        let mut stage = Stage::Start;
        while let Some(step) = stage.next_step() {
            stage = match self.advance(&mut run, stage).await {
                Ok(next) => next,
                Err(cause) => {
                    let err = run.failure(step, cause);
                    warn!(
                        run_id = %run.id,
                        step = step.number(),
                        paid_without_content = err.paid_without_content,
                        error = %err,
                        "purchase: aborted"
                    );
                    return Err(err);
                }
            };
            info!(run_id = %run.id, step = step.number(), "purchase: {} done", step.label());
        }

        match (stage, run.digest.clone()) {
            (Stage::Done { approval, project }, Some(purchase_digest)) => {
                info!(run_id = %run.id, project_id = %project.id, "purchase: project created");
                Ok(PurchaseOutcome {
                    project,
                    approval,
                    purchase_digest,
                })
            }
            _ => Err(run.failure(
                PurchaseStep::CreateProject,
                anyhow!("pipeline stopped before creating the project"),
            )),
        }
    }

    async fn advance(&self, run: &mut Run<'_>, stage: Stage) -> anyhow::Result<Stage> {
        let next = match stage {
            Stage::Start => {
                let tx = market::purchase(
                    &self.contracts,
                    &PurchaseIdea {
                        price: run.order.price,
                        idea_id: run.order.idea_id.to_string(),
                        kiosk_id: run.order.kiosk_id.to_string(),
                    },
                )?
                .with_sender(run.buyer.clone());
                let digest = self.wallet.sign_and_execute(&tx).await?;
                run.digest = Some(digest.clone());
                Stage::Submitted { digest }
            }
            Stage::Submitted { digest } => {
                let effects = self
                    .chain
                    .wait_for_transaction(&digest)
                    .await?
                    .ensure_success()?;
                run.paid = true;
                let approval_id = effects.require_created(&self.contracts.purchase_approval_type())?;
                Stage::Confirmed { approval_id }
            }
            Stage::Confirmed { approval_id } => {
                let raw = self.chain.get_object(&approval_id).await?;
                let approval =
                    decode_purchase_approval(&raw, &self.contracts.purchase_approval_type())?;
                if let Some(buyer) = &approval.buyer {
                    if buyer != &run.buyer {
                        bail!("purchase approval {approval_id} belongs to {buyer}");
                    }
                }
                Stage::Located { approval }
            }
            Stage::Located { approval } => {
                let session = self.open_session(&run.buyer).await?;
                Stage::SessionOpen { approval, session }
            }
            Stage::SessionOpen { approval, session } => {
                let tx = seal_policy::seal_approve(
                    &self.contracts,
                    run.buyer.as_str(),
                    approval.seal_id.as_bytes(),
                    approval.id.as_str(),
                )?;
                let digest = self.wallet.sign_and_execute(&tx).await?;
                self.chain
                    .wait_for_transaction(&digest)
                    .await?
                    .ensure_success()?;
                let policy = tx.to_kind_bytes()?;
                Stage::PolicyApproved {
                    approval,
                    session,
                    policy,
                }
            }
            Stage::PolicyApproved {
                approval,
                session,
                policy,
            } => {
                let bytes = self.blobs.read(&approval.quilt_id).await?;
                let envelope = EncryptedObject::from_bytes(&bytes)
                    .with_context(|| format!("quilt {} is not an encrypted object", approval.quilt_id))?;
                Stage::Fetched {
                    approval,
                    session,
                    policy,
                    envelope,
                }
            }
            Stage::Fetched {
                approval,
                session,
                policy,
                envelope,
            } => {
                let plaintext = access::decrypt(
                    self.key_server.as_ref(),
                    &session,
                    &approval.seal_id,
                    &envelope,
                    &policy,
                )
                .await?;
                Stage::Decrypted {
                    approval,
                    plaintext,
                }
            }
            Stage::Decrypted {
                approval,
                plaintext,
            } => {
                let draft = ProjectDraft::from_document(&plaintext)?;
                let project = self.projects.create_project(&draft).await?;
                Stage::Done { approval, project }
            }
            done @ Stage::Done { .. } => done,
        };
        Ok(next)
    }

    /// Fresh session key for one run, activated by the wallet's signature.
    async fn open_session(&self, buyer: &Address) -> anyhow::Result<SessionKey> {
        let mut session = SessionKey::new(
            buyer.clone(),
            self.contracts.package_id.clone(),
            self.session_ttl_minutes,
            self.clock.clone(),
        )?;
        let signature = self
            .wallet
            .sign_personal_message(session.personal_message().as_bytes())
            .await?;
        session.set_personal_signature(signature)?;
        Ok(session)
    }
}

#[cfg(test)]
#[path = "tests/purchase_tests.rs"]
mod tests;
