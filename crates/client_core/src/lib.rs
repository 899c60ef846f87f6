use std::sync::Arc;

use ledger::{ChainReader, RpcChainReader};
use shared::protocol::{AuthResponse, LoginRequest, RegisterRequest};
use tracing::info;
use tx_builder::ContractConfig;

pub mod access;
pub mod app_state;
pub mod backend;
pub mod blob_store;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod errors;
pub mod key_server;
pub mod lifecycle;
pub mod publish;
pub mod purchase;
pub mod session_key;
pub mod task_controller;
pub mod wallet;

pub use app_state::{Action, AppState, AppStore};
pub use errors::{ErrorCategory, ErrorContext, UserFacingError};
pub use lifecycle::TaskAction;
pub use publish::{PublishController, PublishError, PublishRequest, PublishStep};
pub use purchase::{PipelineError, PurchaseController, PurchaseOrder, PurchaseStep};
pub use task_controller::{TaskController, TaskFlowError};

use crate::{
    backend::{BackendClient, BackendError, MarketRegistry, ProjectSink},
    blob_store::{BlobStore, WalrusBlobStore},
    clock::{Clock, SystemClock},
    config::{Settings, SettingsError},
    key_server::{HttpKeyServer, KeyServer, MissingKeyServer},
    wallet::Wallet,
};

/// Every external service the controllers talk to, wired once.
#[derive(Clone)]
pub struct MarketClient {
    contracts: ContractConfig,
    chain: Arc<dyn ChainReader>,
    wallet: Arc<dyn Wallet>,
    key_server: Arc<dyn KeyServer>,
    blobs: Arc<dyn BlobStore>,
    projects: Arc<dyn ProjectSink>,
    registry: Arc<dyn MarketRegistry>,
    backend: Option<Arc<BackendClient>>,
    clock: Arc<dyn Clock>,
    session_ttl_minutes: i64,
}

impl MarketClient {
    /// Builds HTTP clients for every service named in `settings`. Without a
    /// key server URL, decryption fails as unavailable. Purchases need a
    /// backend session from [`MarketClient::login`] before they will pay.
    pub fn from_settings(settings: &Settings, wallet: Arc<dyn Wallet>) -> Result<Self, SettingsError> {
        settings.validate()?;
        let contracts = settings.contracts()?;
        let key_server: Arc<dyn KeyServer> = match &settings.key_server_url {
            Some(url) => Arc::new(HttpKeyServer::new(url.clone())),
            None => Arc::new(MissingKeyServer),
        };
        let backend = Arc::new(BackendClient::new(settings.backend_url.clone()));
        info!(
            fullnode = %settings.fullnode_url,
            backend = %settings.backend_url,
            key_server = settings.key_server_url.is_some(),
            "client: services configured"
        );
        Ok(Self::new_with_dependencies(
            contracts,
            Arc::new(RpcChainReader::new(settings.fullnode_url.clone())),
            wallet,
            key_server,
            Arc::new(
                WalrusBlobStore::new(
                    settings.blob_publisher_url.clone(),
                    settings.blob_aggregator_url.clone(),
                )
                .with_epochs(settings.blob_epochs),
            ),
            backend.clone(),
            backend.clone(),
            Arc::new(SystemClock),
        )
        .with_backend(backend)
        .with_session_ttl(settings.session_ttl_minutes))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_with_dependencies(
        contracts: ContractConfig,
        chain: Arc<dyn ChainReader>,
        wallet: Arc<dyn Wallet>,
        key_server: Arc<dyn KeyServer>,
        blobs: Arc<dyn BlobStore>,
        projects: Arc<dyn ProjectSink>,
        registry: Arc<dyn MarketRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            contracts,
            chain,
            wallet,
            key_server,
            blobs,
            projects,
            registry,
            backend: None,
            clock,
            session_ttl_minutes: session_key::DEFAULT_SESSION_TTL_MINUTES,
        }
    }

    /// Stores projects and registers listings through `backend`.
    pub fn with_backend(mut self, backend: Arc<BackendClient>) -> Self {
        let projects: Arc<dyn ProjectSink> = backend.clone();
        let registry: Arc<dyn MarketRegistry> = backend.clone();
        self.projects = projects;
        self.registry = registry;
        self.backend = Some(backend);
        self
    }

    pub fn backend(&self) -> Option<&Arc<BackendClient>> {
        self.backend.as_ref()
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, BackendError> {
        self.backend
            .as_ref()
            .ok_or(BackendError::Unauthenticated)?
            .login(request)
            .await
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, BackendError> {
        self.backend
            .as_ref()
            .ok_or(BackendError::Unauthenticated)?
            .register(request)
            .await
    }

    pub async fn logout(&self) {
        if let Some(backend) = &self.backend {
            backend.logout().await;
        }
    }

    pub fn with_session_ttl(mut self, minutes: i64) -> Self {
        self.session_ttl_minutes = minutes;
        self
    }

    pub fn contracts(&self) -> &ContractConfig {
        &self.contracts
    }

    pub fn chain(&self) -> Arc<dyn ChainReader> {
        self.chain.clone()
    }

    pub fn tasks(&self) -> TaskController {
        TaskController::new(
            self.contracts.clone(),
            self.chain.clone(),
            self.wallet.clone(),
            self.key_server.clone(),
            self.blobs.clone(),
        )
    }

    pub fn purchases(&self) -> PurchaseController {
        PurchaseController::new(
            self.contracts.clone(),
            self.chain.clone(),
            self.wallet.clone(),
            self.key_server.clone(),
            self.blobs.clone(),
            self.projects.clone(),
            self.clock.clone(),
        )
        .with_session_ttl(self.session_ttl_minutes)
    }

    pub fn publisher(&self) -> PublishController {
        PublishController::new(
            self.contracts.clone(),
            self.chain.clone(),
            self.wallet.clone(),
            self.registry.clone(),
        )
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
