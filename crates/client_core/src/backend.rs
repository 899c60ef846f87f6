//! Client for the application backend: authentication, project storage and
//! the kiosk market registry.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Address, MarketEntry, ObjectId, QuiltId},
    error::{ApiError, ErrorBody, ErrorCode},
    project::{Project, ProjectDraft},
    protocol::{
        AuthResponse, FileUploadResponse, KioskIdeaRequest, KioskRemoveRequest, LoginRequest,
        MarketOwnerResponse, MarketResponse, ProjectResponse, ProjectUpdate, ProjectsResponse,
        RegisterRequest, UploadProjectRequest, UploadProjectResponse,
    },
};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("backend error: {0}")]
    Api(#[from] ApiError),
    #[error("not logged in")]
    Unauthenticated,
    #[error("backend response missing {0}")]
    MissingField(&'static str),
}

impl BackendError {
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Api(err) => Some(err.code),
            Self::Unauthenticated => Some(ErrorCode::Unauthorized),
            _ => None,
        }
    }
}

/// Where decrypted purchases end up.
#[async_trait]
pub trait ProjectSink: Send + Sync {
    /// Fails when `create_project` could not succeed, before anything is paid for.
    async fn ensure_ready(&self) -> Result<()> {
        Ok(())
    }

    async fn create_project(&self, draft: &ProjectDraft) -> Result<Project>;
}

/// Backend side of publishing an idea.
#[async_trait]
pub trait MarketRegistry: Send + Sync {
    /// Has the backend encrypt and store the project; returns its quilt id.
    async fn upload_project(
        &self,
        project: &Project,
        idea_id: &ObjectId,
        owner: &Address,
    ) -> Result<QuiltId>;

    async fn register_listing(
        &self,
        owner: &Address,
        kiosk_id: &ObjectId,
        idea_id: &ObjectId,
    ) -> Result<MarketEntry>;
}

/// Shared between the purchase and publish flows; logging in through any
/// handle authenticates all of them.
pub struct BackendClient {
    http: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        *self.token.get_mut() = Some(token.into());
        self
    }

    pub async fn token(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.token.read().await.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, BackendError> {
        let token = self.token.read().await;
        let token = token.as_ref().ok_or(BackendError::Unauthenticated)?;
        Ok(request.bearer_auth(token))
    }

    async fn check(response: Response, fallback: &str) -> Result<Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.json::<ErrorBody>().await.unwrap_or_default();
        Err(ApiError::from_response(status.as_u16(), body, fallback).into())
    }

    async fn send_json<T: DeserializeOwned>(
        request: RequestBuilder,
        fallback: &str,
    ) -> Result<T, BackendError> {
        let response = Self::check(request.send().await?, fallback).await?;
        Ok(response.json().await?)
    }

    pub async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, BackendError> {
        let auth: AuthResponse = Self::send_json(
            self.http.post(self.url("/auth/login")).json(request),
            "Login failed",
        )
        .await?;
        info!(user_id = %auth.user.id, method = %request.method, "backend: logged in");
        *self.token.write().await = Some(auth.token.clone());
        Ok(auth)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, BackendError> {
        let auth: AuthResponse = Self::send_json(
            self.http.post(self.url("/auth/register")).json(request),
            "Registration failed",
        )
        .await?;
        info!(user_id = %auth.user.id, "backend: registered");
        *self.token.write().await = Some(auth.token.clone());
        Ok(auth)
    }

    pub async fn logout(&self) {
        *self.token.write().await = None;
        info!("backend: logged out");
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, BackendError> {
        let response: ProjectsResponse = Self::send_json(
            self.authorized(self.http.get(self.url("/projects"))).await?,
            "Failed to load projects",
        )
        .await?;
        Ok(response.projects)
    }

    pub async fn create_project_draft(&self, draft: &ProjectDraft) -> Result<Project, BackendError> {
        let response: ProjectResponse = Self::send_json(
            self.authorized(self.http.post(self.url("/projects"))).await?
                .json(draft),
            "Failed to create project",
        )
        .await?;
        let project = response.project.ok_or(BackendError::MissingField("project"))?;
        info!(project_id = %project.id, "backend: project created");
        Ok(project)
    }

    pub async fn update_project(
        &self,
        id: &str,
        update: &ProjectUpdate,
    ) -> Result<Project, BackendError> {
        let response: ProjectResponse = Self::send_json(
            self.authorized(self.http.patch(self.url(&format!("/projects/{id}")))).await?
                .json(update),
            "Failed to update project",
        )
        .await?;
        response.project.ok_or(BackendError::MissingField("project"))
    }

    pub async fn delete_project(&self, id: &str) -> Result<(), BackendError> {
        let request = self
            .authorized(self.http.delete(self.url(&format!("/projects/{id}"))))
            .await?;
        Self::check(request.send().await?, "Failed to delete project").await?;
        Ok(())
    }

    pub async fn upload_file(&self, filename: &str, bytes: Vec<u8>) -> Result<String, BackendError> {
        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string()),
        );
        let response: FileUploadResponse = Self::send_json(
            self.authorized(self.http.post(self.url("/projects/upload-file"))).await?
                .multipart(form),
            "Failed to upload file",
        )
        .await?;
        Ok(response.file_id)
    }

    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, BackendError> {
        let request = self
            .authorized(self.http.get(self.url(&format!("/projects/download/{file_id}"))))
            .await?;
        let response = Self::check(request.send().await?, "Failed to download file").await?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn market(&self) -> Result<Vec<MarketEntry>, BackendError> {
        let response: MarketResponse =
            Self::send_json(self.http.get(self.url("/market")), "Failed to load market").await?;
        Ok(response.market)
    }

    pub async fn add_kiosk_idea(&self, request: &KioskIdeaRequest) -> Result<MarketEntry, BackendError> {
        let response: MarketOwnerResponse = Self::send_json(
            self.http.post(self.url("/market")).json(request),
            "Failed to add idea",
        )
        .await?;
        Ok(response.market)
    }

    pub async fn remove_kiosk_idea(
        &self,
        request: &KioskIdeaRequest,
    ) -> Result<MarketEntry, BackendError> {
        let response: MarketOwnerResponse = Self::send_json(
            self.http.delete(self.url("/market/idea")).json(request),
            "Failed to remove idea",
        )
        .await?;
        Ok(response.market)
    }

    pub async fn remove_kiosk(&self, request: &KioskRemoveRequest) -> Result<MarketEntry, BackendError> {
        let response: MarketOwnerResponse = Self::send_json(
            self.http.delete(self.url("/market/kiosk")).json(request),
            "Failed to remove kiosk",
        )
        .await?;
        Ok(response.market)
    }

    pub async fn upload_project_for_idea(
        &self,
        request: &UploadProjectRequest,
    ) -> Result<QuiltId, BackendError> {
        let response: UploadProjectResponse = Self::send_json(
            self.http
                .post(self.url("/market/upload-project"))
                .json(request),
            "Failed to upload project",
        )
        .await?;
        QuiltId::new(response.result).map_err(|_| BackendError::MissingField("result"))
    }
}

#[async_trait]
impl ProjectSink for BackendClient {
    async fn ensure_ready(&self) -> Result<()> {
        if self.is_authenticated().await {
            Ok(())
        } else {
            Err(BackendError::Unauthenticated.into())
        }
    }

    async fn create_project(&self, draft: &ProjectDraft) -> Result<Project> {
        Ok(self.create_project_draft(draft).await?)
    }
}

#[async_trait]
impl MarketRegistry for BackendClient {
    async fn upload_project(
        &self,
        project: &Project,
        idea_id: &ObjectId,
        owner: &Address,
    ) -> Result<QuiltId> {
        Ok(self
            .upload_project_for_idea(&UploadProjectRequest {
                project: project.clone(),
                idea_id: idea_id.clone(),
                address: owner.clone(),
            })
            .await?)
    }

    async fn register_listing(
        &self,
        owner: &Address,
        kiosk_id: &ObjectId,
        idea_id: &ObjectId,
    ) -> Result<MarketEntry> {
        Ok(self
            .add_kiosk_idea(&KioskIdeaRequest {
                owner: owner.clone(),
                kid: kiosk_id.clone(),
                oid: idea_id.clone(),
            })
            .await?)
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
