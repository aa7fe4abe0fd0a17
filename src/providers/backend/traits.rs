//! Backend trait and error types.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Capsule, CapsuleId, Email, EmailId, FlagPatch, Session};
use crate::error::{CoreError, RecordKind};

/// Errors from the JSON backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("{kind} not found: {id}")]
    NotFound { kind: RecordKind, id: String },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Invalid response format: {0}")]
    InvalidResponse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Backend not available: {0}")]
    Unavailable(String),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound { kind, id } => CoreError::NotFound { kind, id },
            other => CoreError::Network(other.to_string()),
        }
    }
}

/// Remote system of record for emails and capsules.
///
/// Every call carries the caller's [`Session`]; implementations must not
/// keep credentials of their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CapsuleBackend: Send + Sync {
    /// `GET /emails`, in backend order.
    async fn list_emails(&self, session: &Session) -> BackendResult<Vec<Email>>;

    /// `GET /emails/{id}`.
    async fn get_email(&self, session: &Session, id: &EmailId) -> BackendResult<Email>;

    /// `PUT /emails/{id}` with a partial flag update.
    async fn update_email(
        &self,
        session: &Session,
        id: &EmailId,
        patch: &FlagPatch,
    ) -> BackendResult<Email>;

    /// `POST /emails/process`; returns the number of emails processed.
    async fn process_emails(&self, session: &Session, max_emails: usize) -> BackendResult<usize>;

    /// `GET /capsules`, in backend order.
    async fn list_capsules(&self, session: &Session) -> BackendResult<Vec<Capsule>>;

    /// `GET /capsules/{id}`.
    async fn get_capsule(&self, session: &Session, id: &CapsuleId) -> BackendResult<Capsule>;

    /// `POST /capsules`.
    async fn create_capsule(&self, session: &Session, capsule: &Capsule)
        -> BackendResult<Capsule>;

    /// `PUT /capsules/{id}`.
    async fn update_capsule(&self, session: &Session, capsule: &Capsule)
        -> BackendResult<Capsule>;

    /// `DELETE /capsules/{id}`.
    async fn delete_capsule(&self, session: &Session, id: &CapsuleId) -> BackendResult<()>;
}
