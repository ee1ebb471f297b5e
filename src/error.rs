use thiserror::Error;

/// Failure kinds surfaced by the remote client and the reconciliation service.
///
/// Only [`SyncError::AccessTokenExpired`] is ever recovered from (by a single
/// refresh); everything else reaches the caller unchanged.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The token endpoint rejected a refresh. The stored credential has been
    /// cleared by the time this reaches a caller of the service.
    #[error("credential refresh rejected: {0}")]
    Authorization(String),

    #[error("access token expired: {0}")]
    AccessTokenExpired(String),

    /// A 401 that is not a token expiry (revoked grant, missing scope, ...).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("remote api error: {status} => {body}")]
    Api { status: u16, body: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    /// No credential is stored for the user; a fresh login is required.
    #[error("no credential stored for user {0}")]
    MissingCredential(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(String),
}

impl SyncError {
    /// True when the user has to go through the login flow again.
    pub fn forces_login(&self) -> bool {
        matches!(
            self,
            SyncError::Authorization(_) | SyncError::MissingCredential(_)
        )
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Store(e.to_string())
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::Store(format!("store task failed: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
