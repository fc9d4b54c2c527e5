//! CAPTCHA-gated login.
//!
//! ```text
//! Unauthenticated ──► CaptchaPending ──► Submitted ──┬─► Authenticated
//!                                                    └─► Failed
//! ```
//!
//! A failed login is terminal for the attempt: nothing is persisted and the
//! caller gets [`PortalError::AuthenticationFailed`]. A successful one
//! persists the session and the two entry URLs with an empty link table,
//! then runs link discovery and persists its result. If discovery fails the
//! login stands but no links survive from the previous session.

use std::fmt;

use crate::captcha::{CaptchaChallenge, CaptchaSolver, TOKEN_FIELD};
use crate::config::{Credentials, PortalConfig};
use crate::error::{PortalError, PortalResult};
use crate::http::{HttpResponse, PortalHttp};
use crate::links::{self, LinkTable};
use crate::session::{SessionState, SessionUpdate};
use crate::store::SessionStore;

/// Text the portal shows on the login response when credentials or CAPTCHA
/// are rejected. Matched verbatim; brittle to portal wording changes.
pub const LOGIN_FAILURE_MARKER: &str = "Please try again";

/// Anchor text of the profile page link on the post-login frame.
pub const PROFILE_LINK_TEXT: &str = "Profile";
/// Anchor text of the activity menu link on the post-login frame.
pub const ACTIVITIES_LINK_TEXT: &str = "My Activities";

/// Where a login attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    CaptchaPending,
    Submitted,
    Authenticated,
    Failed,
}

impl fmt::Display for AuthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthState::Unauthenticated => "unauthenticated",
            AuthState::CaptchaPending => "captcha-pending",
            AuthState::Submitted => "submitted",
            AuthState::Authenticated => "authenticated",
            AuthState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What the login response says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Entry URLs scraped from the post-login frame; empty when the anchor
    /// was absent.
    Authenticated {
        profile_url: String,
        activities_url: String,
    },
    Failed { reason: String },
}

/// Classify a login response.
pub fn evaluate_login_response(response: &HttpResponse) -> LoginOutcome {
    if response.contains(LOGIN_FAILURE_MARKER) {
        return LoginOutcome::Failed {
            reason: format!(
                "portal rejected the credentials or CAPTCHA (\"{LOGIN_FAILURE_MARKER}\")"
            ),
        };
    }

    let mut found = links::find_anchors(
        &response.body,
        &response.final_url,
        &[PROFILE_LINK_TEXT, ACTIVITIES_LINK_TEXT],
    )
    .into_iter();
    LoginOutcome::Authenticated {
        profile_url: found.next().flatten().unwrap_or_default(),
        activities_url: found.next().flatten().unwrap_or_default(),
    }
}

/// One run of the login sequence.
pub struct AuthenticationFlow<'a> {
    config: &'a PortalConfig,
    credentials: &'a Credentials,
    solver: &'a dyn CaptchaSolver,
    state: AuthState,
}

impl<'a> AuthenticationFlow<'a> {
    pub fn new(
        config: &'a PortalConfig,
        credentials: &'a Credentials,
        solver: &'a dyn CaptchaSolver,
    ) -> Self {
        Self {
            config,
            credentials,
            solver,
            state: AuthState::Unauthenticated,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    fn transition(&mut self, next: AuthState) {
        tracing::debug!("login: {} -> {next}", self.state);
        self.state = next;
    }

    /// Drive the full sequence, updating `session` and `store` on success.
    pub async fn run(
        &mut self,
        http: &mut PortalHttp,
        session: &mut SessionState,
        store: &SessionStore,
    ) -> PortalResult<()> {
        let base_url = self.config.base_url.to_string();
        let login_url = self.config.login_url()?.to_string();
        let login_page_url = self.config.login_page_url()?.to_string();
        let origin = self.config.origin();

        tracing::info!("Starting portal login as {}", self.credentials.username);
        http.get(&base_url).await?;
        http.set_headers(&[
            ("referer", login_url.as_str()),
            ("content-type", "application/x-www-form-urlencoded"),
            ("origin", origin.as_str()),
            ("upgrade-insecure-requests", "1"),
            ("sec-fetch-dest", "frame"),
        ]);

        self.transition(AuthState::CaptchaPending);
        http.set_headers(&[("referer", base_url.as_str()), ("sec-fetch-user", "?1")]);
        let login_page = http.get(&login_page_url).await?;
        let mut challenge =
            CaptchaChallenge::from_login_page(&login_page.body, &self.config.base_url)?;
        tracing::info!("CAPTCHA challenge: {}", challenge.image_url);
        challenge.image = http.get_bytes(&challenge.image_url).await?;
        let answer = self.solver.solve(&challenge)?;

        self.transition(AuthState::Submitted);
        let fields = [
            ("f", String::new()),
            ("uid", self.credentials.username.clone()),
            ("pwd", self.credentials.password.clone()),
            (TOKEN_FIELD, challenge.token),
            ("fy", self.config.academic_year.clone()),
            ("comp", self.config.institution.clone()),
            ("cap", answer.trim().to_string()),
            ("logintype", "student".to_string()),
        ];
        let response = http.post_form(&login_url, &fields).await?;

        let (profile_url, activities_url) = match evaluate_login_response(&response) {
            LoginOutcome::Failed { reason } => {
                self.transition(AuthState::Failed);
                tracing::warn!("Login failed: {reason}");
                return Err(PortalError::AuthenticationFailed { reason });
            }
            LoginOutcome::Authenticated {
                profile_url,
                activities_url,
            } => (profile_url, activities_url),
        };
        self.transition(AuthState::Authenticated);

        if profile_url.is_empty() {
            tracing::warn!("Login response has no '{PROFILE_LINK_TEXT}' link");
        }
        if activities_url.is_empty() {
            tracing::warn!("Login response has no '{ACTIVITIES_LINK_TEXT}' link");
        }

        // Links from the previous session are not valid under this one.
        let update = SessionUpdate {
            http: Some(http.snapshot()),
            profile_url: Some(profile_url),
            activities_url: Some(activities_url),
            link_table: Some(LinkTable::new()),
        };
        store.save(&update)?;
        session.apply(&update);

        let link_table = if session.activities_url.is_empty() {
            tracing::warn!("Skipping link discovery: no activities URL");
            LinkTable::new()
        } else {
            links::discover(http, &session.activities_url).await?
        };
        let update = SessionUpdate {
            http: Some(http.snapshot()),
            link_table: Some(link_table),
            ..Default::default()
        };
        store.save(&update)?;
        session.apply(&update);

        tracing::info!(
            "Logged in; {} portal links available",
            session.link_table.len()
        );
        Ok(())
    }
}
