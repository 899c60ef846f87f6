//! Client-local project documents.
//!
//! A project is the unit a seller publishes as an idea and a buyer imports
//! after a successful purchase. The same JSON shape travels through the
//! backend API and, encrypted, through the blob store.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidedQuestion {
    pub question: String,
    pub answer: String,
}

/// Raw file bytes. Accepts a plain string, a base64 string tagged as such,
/// or the `{ "type": "Buffer", "data": [..] }` shape produced when a byte
/// buffer is serialized to JSON.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileContent(pub Vec<u8>);

#[derive(Deserialize)]
#[serde(untagged)]
enum FileContentRepr {
    Buffer {
        #[serde(rename = "type")]
        kind: String,
        data: Vec<u8>,
    },
    Base64 {
        base64: String,
    },
    Text(String),
}

impl Serialize for FileContent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("type", "Buffer")?;
        map.serialize_entry("data", &self.0)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for FileContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match FileContentRepr::deserialize(deserializer)? {
            FileContentRepr::Buffer { kind, data } if kind == "Buffer" => Ok(Self(data)),
            FileContentRepr::Buffer { kind, .. } => Err(de::Error::custom(format!(
                "unsupported file content type '{kind}'"
            ))),
            FileContentRepr::Base64 { base64 } => STANDARD
                .decode(base64)
                .map(Self)
                .map_err(de::Error::custom),
            FileContentRepr::Text(text) => Ok(Self(text.into_bytes())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub filename: String,
    pub content: FileContent,
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub idea_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guided_questions: Option<Vec<GuidedQuestion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prototype_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_files: Option<Vec<ProjectFile>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quilt_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Project content without a backend-assigned identity. Used when creating a
/// project and when parsing a decrypted project document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDraft {
    pub name: String,
    #[serde(default)]
    pub idea_description: String,
    #[serde(default)]
    pub guided_questions: Vec<GuidedQuestion>,
    #[serde(default)]
    pub prototype_code: String,
    #[serde(default)]
    pub project_files: Vec<ProjectFile>,
}

#[derive(Debug, Error)]
pub enum ProjectDocumentError {
    #[error("project document is not valid UTF-8 JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("project document has an empty name")]
    MissingName,
}

impl ProjectDraft {
    /// Parses a decrypted project document. Unknown fields, including the
    /// seller's project id and timestamps, are ignored.
    pub fn from_document(bytes: &[u8]) -> Result<Self, ProjectDocumentError> {
        let draft: Self = serde_json::from_slice(bytes)?;
        if draft.name.trim().is_empty() {
            return Err(ProjectDocumentError::MissingName);
        }
        Ok(draft)
    }

    pub fn to_document(&self) -> Result<Vec<u8>, ProjectDocumentError> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl From<&Project> for ProjectDraft {
    fn from(project: &Project) -> Self {
        Self {
            name: project.name.clone(),
            idea_description: project.idea_description.clone(),
            guided_questions: project.guided_questions.clone().unwrap_or_default(),
            prototype_code: project.prototype_code.clone().unwrap_or_default(),
            project_files: project.project_files.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
#[path = "tests/project_tests.rs"]
mod tests;
