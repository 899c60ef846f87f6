//! Publishing a project as a purchasable idea: mint the idea, have the
//! backend seal and store the project, attach the content, list it in a
//! kiosk and register the listing.

use std::{error::Error as StdError, fmt, sync::Arc};

use anyhow::anyhow;
use ledger::{decode::decode_idea, ChainReader, TransactionEffects};
use shared::{
    domain::{Address, Idea, MarketEntry, ObjectId, QuiltId},
    project::Project,
};
use tracing::{info, warn};
use tx_builder::{
    idea::{self, CreateIdea},
    market::{self, KioskPlacement},
    ContractConfig, TransactionDescription,
};

use crate::{backend::MarketRegistry, wallet::Wallet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishStep {
    CreateIdea,
    AwaitIdea,
    UploadProject,
    AttachContent,
    ListInKiosk,
    RegisterListing,
    ReadListedIdea,
}

impl PublishStep {
    pub fn label(self) -> &'static str {
        match self {
            PublishStep::CreateIdea => "create idea",
            PublishStep::AwaitIdea => "await idea",
            PublishStep::UploadProject => "upload project",
            PublishStep::AttachContent => "attach content",
            PublishStep::ListInKiosk => "list in kiosk",
            PublishStep::RegisterListing => "register listing",
            PublishStep::ReadListedIdea => "read listed idea",
        }
    }
}

impl fmt::Display for PublishStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug)]
pub struct PublishError {
    pub step: PublishStep,
    /// Set once the idea exists on chain.
    pub idea_id: Option<ObjectId>,
    pub cause: anyhow::Error,
}

impl PublishError {
    pub fn message(&self) -> String {
        format!("{:#}", self.cause)
    }
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "publishing failed at {}: {:#}", self.step, self.cause)
    }
}

impl StdError for PublishError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&*self.cause)
    }
}

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub idea: CreateIdea,
    pub project: Project,
    pub kiosk_id: ObjectId,
    pub kiosk_owner_cap_id: ObjectId,
}

#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub idea: Idea,
    pub quilt_id: QuiltId,
    pub listing: MarketEntry,
}

pub struct PublishController {
    contracts: ContractConfig,
    chain: Arc<dyn ChainReader>,
    wallet: Arc<dyn Wallet>,
    registry: Arc<dyn MarketRegistry>,
}

fn failed(
    step: PublishStep,
    idea_id: Option<&ObjectId>,
) -> impl FnOnce(anyhow::Error) -> PublishError {
    let idea_id = idea_id.cloned();
    move |cause| {
        let message = format!("{cause:#}");
        warn!(step = %step, idea_id = ?idea_id, error = %message, "publish: aborted");
        PublishError {
            step,
            idea_id,
            cause,
        }
    }
}

impl PublishController {
    pub fn new(
        contracts: ContractConfig,
        chain: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
        registry: Arc<dyn MarketRegistry>,
    ) -> Self {
        Self {
            contracts,
            chain,
            wallet,
            registry,
        }
    }

    async fn submit(
        &self,
        owner: &Address,
        tx: TransactionDescription,
    ) -> anyhow::Result<TransactionEffects> {
        let digest = self.wallet.sign_and_execute(&tx.with_sender(owner.clone())).await?;
        let effects = self.chain.wait_for_transaction(&digest).await?.ensure_success()?;
        info!(%digest, "publish: transaction confirmed");
        Ok(effects)
    }

    pub async fn publish(&self, request: &PublishRequest) -> Result<PublishOutcome, PublishError> {
        let owner = self
            .wallet
            .address()
            .ok_or_else(|| anyhow!("no wallet connected"))
            .map_err(failed(PublishStep::CreateIdea, None))?;

        let effects = async {
            let tx = idea::create_idea(&self.contracts, &request.idea)?;
            self.submit(&owner, tx).await
        }
        .await
        .map_err(failed(PublishStep::CreateIdea, None))?;

        let idea_id = effects
            .require_created(&self.contracts.idea_type())
            .map_err(anyhow::Error::from)
            .map_err(failed(PublishStep::AwaitIdea, None))?;
        info!(%idea_id, "publish: idea created");

        let quilt_id = self
            .registry
            .upload_project(&request.project, &idea_id, &owner)
            .await
            .map_err(failed(PublishStep::UploadProject, Some(&idea_id)))?;
        info!(%idea_id, %quilt_id, "publish: project stored");

        async {
            let tx = idea::set_quilt_id(&self.contracts, idea_id.as_str(), quilt_id.as_str())?;
            self.submit(&owner, tx).await
        }
        .await
        .map_err(failed(PublishStep::AttachContent, Some(&idea_id)))?;

        async {
            let tx = market::place_and_list(
                &self.contracts,
                &KioskPlacement {
                    idea_id: idea_id.to_string(),
                    kiosk_id: request.kiosk_id.to_string(),
                    kiosk_owner_cap_id: request.kiosk_owner_cap_id.to_string(),
                },
            )?;
            self.submit(&owner, tx).await
        }
        .await
        .map_err(failed(PublishStep::ListInKiosk, Some(&idea_id)))?;

        let listing = self
            .registry
            .register_listing(&owner, &request.kiosk_id, &idea_id)
            .await
            .map_err(failed(PublishStep::RegisterListing, Some(&idea_id)))?;

        let idea = async {
            let raw = self.chain.get_object(&idea_id).await?;
            Ok::<_, anyhow::Error>(decode_idea(&raw, &self.contracts.idea_type())?)
        }
        .await
        .map_err(failed(PublishStep::ReadListedIdea, Some(&idea_id)))?;
        info!(%idea_id, kiosk_id = %request.kiosk_id, "publish: idea listed");
        Ok(PublishOutcome {
            idea,
            quilt_id,
            listing,
        })
    }
}

#[cfg(test)]
#[path = "tests/publish_tests.rs"]
mod tests;
