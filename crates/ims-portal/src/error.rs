//! Error types for the portal client.

/// All errors that can occur while talking to the portal.
#[derive(thiserror::Error, Debug)]
pub enum PortalError {
    /// The session store could not be opened, read, or written.
    #[error("Session store unavailable: {0}")]
    StorageUnavailable(String),

    /// A request failed at the network level (connect, timeout, body read).
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The portal answered the login form with its failure marker.
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// The portal reported that the session is no longer valid.
    #[error("Session expired; run authentication again")]
    SessionExpired,

    /// A portal feature is absent from the discovered link table.
    #[error("Link not found for {feature} (key '{key}'); authentication or link discovery is incomplete")]
    LinkNotFound { feature: String, key: String },

    /// A page lacked an element required for navigation or session control.
    #[error("Missing field '{field}' on {page}")]
    MissingField { page: String, field: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The CAPTCHA solver could not produce a solution.
    #[error("CAPTCHA error: {0}")]
    Captcha(String),

    /// A parsed record did not contain an expected field.
    #[error("Record error: {0}")]
    Record(String),
}

impl PortalError {
    pub(crate) fn missing(page: &str, field: &str) -> Self {
        PortalError::MissingField {
            page: page.to_string(),
            field: field.to_string(),
        }
    }

    /// Whether re-running authentication may resolve this error.
    pub fn needs_login(&self) -> bool {
        matches!(
            self,
            PortalError::SessionExpired | PortalError::LinkNotFound { .. }
        )
    }
}

impl From<rusqlite::Error> for PortalError {
    fn from(e: rusqlite::Error) -> Self {
        PortalError::StorageUnavailable(e.to_string())
    }
}

/// Convenience result type.
pub type PortalResult<T> = Result<T, PortalError>;
