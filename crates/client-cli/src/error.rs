//! Error types for the remote store, session and project layers.

use thiserror::Error;
use uuid::Uuid;

/// Failure talking to the hosted backend.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The backend answered with an error status
    #[error("{message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Invalid access token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),

    /// OAuth redirect URL without the session fragment
    #[error("Redirect URL does not carry a session: {0}")]
    InvalidRedirect(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl RemoteError {
    /// Message suitable for showing next to a form
    pub fn user_message(&self) -> String {
        match self {
            RemoteError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Session manager error type.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Rejected credentials or any other auth service failure
    #[error("{0}")]
    Auth(String),

    /// The account exists but its profile row could not be written
    #[error("Account created but the profile could not be saved: {message}")]
    ProfileCreation { user_id: Uuid, message: String },

    #[error("Not logged in")]
    NotAuthenticated,

    /// Form validation failed before anything was sent
    #[error("{0}")]
    InvalidInput(String),

    #[error("Profile update failed: {0}")]
    ProfileUpdate(RemoteError),
}

impl From<RemoteError> for AuthError {
    fn from(err: RemoteError) -> Self {
        AuthError::Auth(err.user_message())
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Project repository error type.
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Not logged in")]
    NotAuthenticated,

    /// Create, update or delete was rejected; the local list is untouched
    #[error("Failed to save project changes: {0}")]
    RemoteWrite(#[source] RemoteError),

    /// No project with this id is owned by the current user
    #[error("Project {0} not found")]
    NotFound(Uuid),
}

pub type ProjectResult<T> = Result<T, ProjectError>;
