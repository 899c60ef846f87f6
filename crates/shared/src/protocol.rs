//! Request and response bodies of the application backend.

use serde::{Deserialize, Serialize};

use crate::{
    domain::{Address, MarketEntry, ObjectId},
    project::{Project, ProjectDraft},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: AuthUser,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResponse {
    #[serde(default)]
    pub success: bool,
    pub project: Option<Project>,
}

pub type CreateProjectRequest = ProjectDraft;

/// Partial update; absent fields are left untouched by the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idea_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prototype_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quilt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seal_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileUploadResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(alias = "fileId")]
    pub file_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketResponse {
    #[serde(default)]
    pub market: Vec<MarketEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketOwnerResponse {
    pub market: MarketEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskIdeaRequest {
    pub owner: Address,
    pub kid: ObjectId,
    pub oid: ObjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskRemoveRequest {
    pub owner: Address,
    pub kid: ObjectId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadProjectRequest {
    pub project: Project,
    pub idea_id: ObjectId,
    pub address: Address,
}

/// `result` carries the quilt patch id of the encrypted project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadProjectResponse {
    pub result: String,
}
