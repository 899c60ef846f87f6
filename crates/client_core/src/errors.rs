//! Errors as the user sees them: a category for display plus the flow that
//! produced it.

use std::fmt;

use shared::error::ErrorCode;

use crate::{
    backend::BackendError,
    purchase::PipelineError,
    publish::PublishError,
    task_controller::TaskFlowError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Auth,
    /// The wallet declined to sign.
    Rejected,
    Unavailable,
    Crypto,
    Validation,
    /// Payment went through but the content could not be delivered.
    PaidWithoutContent,
    Unknown,
}

impl ErrorCategory {
    pub fn label(self) -> &'static str {
        match self {
            ErrorCategory::Auth => "Authentication",
            ErrorCategory::Rejected => "Rejected",
            ErrorCategory::Unavailable => "Service unavailable",
            ErrorCategory::Crypto => "Crypto",
            ErrorCategory::Validation => "Validation",
            ErrorCategory::PaidWithoutContent => "Paid, content unavailable",
            ErrorCategory::Unknown => "Unexpected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorContext {
    Login,
    Task,
    Purchase,
    Publish,
    Projects,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFacingError {
    category: ErrorCategory,
    context: ErrorContext,
    message: String,
}

impl UserFacingError {
    pub fn new(category: ErrorCategory, context: ErrorContext, message: impl Into<String>) -> Self {
        Self {
            category,
            context,
            message: message.into(),
        }
    }

    /// Classifies an error by its text. Used for errors that only arrive as
    /// messages, such as wallet and backend failures.
    pub fn from_message(context: ErrorContext, message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        let category = if lower.contains("user rejected")
            || lower.contains("rejected the")
            || lower.contains("wallet rejected")
        {
            ErrorCategory::Rejected
        } else if lower.contains("401")
            || lower.contains("unauthorized")
            || lower.contains("not logged in")
            || lower.contains("invalid token")
            || lower.contains("invalid credential")
            || lower.contains("session key expired")
        {
            ErrorCategory::Auth
        } else if lower.contains("decrypt")
            || lower.contains("encrypt")
            || lower.contains("signature")
            || lower.contains("key server denied")
        {
            ErrorCategory::Crypto
        } else if lower.contains("timeout")
            || lower.contains("not visible after")
            || lower.contains("connection")
            || lower.contains("unavailable")
            || lower.contains("request failed")
        {
            ErrorCategory::Unavailable
        } else if lower.contains("invalid")
            || lower.contains("missing")
            || lower.contains("malformed")
            || lower.contains("must ")
            || lower.contains("cannot ")
            || lower.contains("only the")
        {
            ErrorCategory::Validation
        } else {
            ErrorCategory::Unknown
        };
        Self::new(category, context, message)
    }

    pub fn requires_reauth(&self) -> bool {
        self.category == ErrorCategory::Auth
    }

    pub fn category(&self) -> ErrorCategory {
        self.category
    }

    pub fn context(&self) -> ErrorContext {
        self.context
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for UserFacingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.category.label(), self.message)
    }
}

impl From<&TaskFlowError> for UserFacingError {
    fn from(err: &TaskFlowError) -> Self {
        let category = match err {
            TaskFlowError::Lifecycle(_)
            | TaskFlowError::Build(_)
            | TaskFlowError::Id(_)
            | TaskFlowError::Unassigned(_)
            | TaskFlowError::MissingProfile(_) => ErrorCategory::Validation,
            TaskFlowError::NoWallet => ErrorCategory::Auth,
            TaskFlowError::Rejected(_) => ErrorCategory::Rejected,
            TaskFlowError::Access(access) if access.is_expired_session() => ErrorCategory::Auth,
            TaskFlowError::Access(_) | TaskFlowError::Envelope(_) => ErrorCategory::Crypto,
            TaskFlowError::Blob(_) => ErrorCategory::Unavailable,
            TaskFlowError::Chain(_) | TaskFlowError::Decode(_) => {
                return Self::from_message(ErrorContext::Task, err.to_string());
            }
        };
        Self::new(category, ErrorContext::Task, err.to_string())
    }
}

impl From<&PipelineError> for UserFacingError {
    fn from(err: &PipelineError) -> Self {
        if err.paid_without_content {
            return Self::new(
                ErrorCategory::PaidWithoutContent,
                ErrorContext::Purchase,
                err.to_string(),
            );
        }
        let mut classified = Self::from_message(ErrorContext::Purchase, err.message());
        classified.message = err.to_string();
        classified
    }
}

impl From<&PublishError> for UserFacingError {
    fn from(err: &PublishError) -> Self {
        let mut classified = Self::from_message(ErrorContext::Publish, err.message());
        classified.message = err.to_string();
        classified
    }
}

impl UserFacingError {
    /// Backend failures carry a status code; only uncoded ones fall back to
    /// the message.
    pub fn from_backend(context: ErrorContext, err: &BackendError) -> Self {
        let category = match err.code() {
            Some(ErrorCode::Unauthorized | ErrorCode::Forbidden) => ErrorCategory::Auth,
            Some(ErrorCode::Validation | ErrorCode::NotFound) => ErrorCategory::Validation,
            Some(ErrorCode::Unavailable | ErrorCode::RateLimited) => ErrorCategory::Unavailable,
            Some(ErrorCode::Internal) => ErrorCategory::Unknown,
            None => return Self::from_message(context, err.to_string()),
        };
        Self::new(category, context, err.to_string())
    }
}

#[cfg(test)]
#[path = "tests/errors_tests.rs"]
mod tests;
