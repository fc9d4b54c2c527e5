//! Portal endpoints, academic constants, credentials, and store path resolution.

use std::path::PathBuf;

use url::Url;

use crate::error::{PortalError, PortalResult};

/// Production portal entry point.
pub const DEFAULT_BASE_URL: &str = "https://www.imsnsit.org/imsnsit/";

const DEFAULT_LOGIN_PAGE: &str = "student_login110.php";
const DEFAULT_LOGIN_ENDPOINT: &str = "student_login.php";
const DEFAULT_ACADEMIC_YEAR: &str = "2023-24";
const DEFAULT_SEMESTER: &str = "1";
const DEFAULT_INSTITUTION: &str = "NETAJI SUBHAS UNIVERSITY OF TECHNOLOGY";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Fixed locations and form constants of one portal deployment.
///
/// Only the base URL and the two login paths are configured; every other
/// page is reached through the discovered link table.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub base_url: Url,
    /// Login page carrying the CAPTCHA, relative to `base_url`.
    pub login_page: String,
    /// Endpoint the credentials are posted to, relative to `base_url`.
    pub login_endpoint: String,
    /// Academic year sent with the login and attendance forms (`fy`, `year`).
    pub academic_year: String,
    /// Semester code sent with the attendance form (`sem`).
    pub semester: String,
    /// Institution name sent with the login form (`comp`).
    pub institution: String,
    pub timeout_ms: u64,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            login_page: DEFAULT_LOGIN_PAGE.to_string(),
            login_endpoint: DEFAULT_LOGIN_ENDPOINT.to_string(),
            academic_year: DEFAULT_ACADEMIC_YEAR.to_string(),
            semester: DEFAULT_SEMESTER.to_string(),
            institution: DEFAULT_INSTITUTION.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl PortalConfig {
    /// Default configuration pointed at a different deployment.
    ///
    /// A trailing slash is added when missing so relative paths resolve
    /// beneath the base rather than beside it.
    pub fn with_base_url(base: &str) -> PortalResult<Self> {
        let normalized = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{base}/")
        };
        Ok(Self {
            base_url: Url::parse(&normalized)?,
            ..Self::default()
        })
    }

    /// Absolute URL of the CAPTCHA login page.
    pub fn login_page_url(&self) -> PortalResult<Url> {
        Ok(self.base_url.join(&self.login_page)?)
    }

    /// Absolute URL of the credential submission endpoint.
    pub fn login_url(&self) -> PortalResult<Url> {
        Ok(self.base_url.join(&self.login_endpoint)?)
    }

    /// `scheme://host[:port]` of the portal, as sent in the `Origin` header.
    pub fn origin(&self) -> String {
        self.base_url.origin().ascii_serialization()
    }
}

/// Student login credentials.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Load credentials from the environment.
    ///
    /// Reads `IMS_USERNAME` / `IMS_PASSWORD`, falling back to the legacy
    /// `imsUsername` / `imsPassword` names.
    pub fn from_env() -> PortalResult<Self> {
        let username = env_any(&["IMS_USERNAME", "imsUsername"]).ok_or_else(|| {
            PortalError::Config("IMS_USERNAME is not set".to_string())
        })?;
        let password = env_any(&["IMS_PASSWORD", "imsPassword"]).ok_or_else(|| {
            PortalError::Config("IMS_PASSWORD is not set".to_string())
        })?;
        Ok(Self { username, password })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn env_any(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
}

/// Resolve the session store path.
///
/// Priority: explicit path, then `IMS_SESSION_DB`, then
/// `~/.ims-portal/session.db`.
pub fn resolve_store_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var("IMS_SESSION_DB") {
        if !env_path.is_empty() {
            return PathBuf::from(env_path);
        }
    }

    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ims-portal")
        .join("session.db")
}
