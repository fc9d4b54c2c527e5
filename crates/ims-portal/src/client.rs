//! Portal client: owns the HTTP session and persisted state, and exposes the
//! data operations.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::auth::AuthenticationFlow;
use crate::captcha::CaptchaSolver;
use crate::config::{Credentials, PortalConfig};
use crate::error::{PortalError, PortalResult};
use crate::forms::FormPage;
use crate::http::{HttpResponse, PortalHttp};
use crate::links::{LinkTable, PortalFeature};
use crate::records::{HtmlTableParser, Record, RecordParser, StudentProfile, StudentSnapshot};
use crate::session::{SessionState, SessionUpdate};
use crate::store::SessionStore;
use crate::validator::{is_expired_page, SessionValidator};

/// How `authenticate` reached an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The persisted session was still live; no login requests were made.
    Resumed,
    /// The full CAPTCHA login ran.
    LoggedIn,
}

/// Identity parameters for the attendance report.
///
/// When all three are blank the client uses the values pre-filled in the
/// report form's hidden inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttendanceQuery {
    pub roll_no: String,
    pub dept: String,
    pub degree: String,
}

impl AttendanceQuery {
    pub fn new(
        roll_no: impl Into<String>,
        dept: impl Into<String>,
        degree: impl Into<String>,
    ) -> Self {
        Self {
            roll_no: roll_no.into(),
            dept: dept.into(),
            degree: degree.into(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.roll_no.trim().is_empty() && self.dept.trim().is_empty() && self.degree.trim().is_empty()
    }
}

/// Summary of the persisted session for display.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub store_path: PathBuf,
    pub authenticated: bool,
    pub profile_url: String,
    pub activities_url: String,
    pub link_count: usize,
    pub missing_features: Vec<String>,
    pub cookie_names: Vec<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Composition root for one portal session.
pub struct PortalClient {
    config: PortalConfig,
    credentials: Option<Credentials>,
    store: SessionStore,
    state: SessionState,
    http: PortalHttp,
    validator: SessionValidator,
    solver: Box<dyn CaptchaSolver>,
    parser: Box<dyn RecordParser>,
    authenticated: bool,
}

impl PortalClient {
    /// Load persisted state (or start fresh) and rebuild the HTTP session.
    pub fn open(
        config: PortalConfig,
        store: SessionStore,
        solver: Box<dyn CaptchaSolver>,
    ) -> PortalResult<Self> {
        let state = store.load();
        let http = PortalHttp::from_snapshot(&state.http, config.timeout_ms)?;
        if state.is_blank() {
            tracing::info!("No previous session at {}", store.path().display());
        } else {
            tracing::info!(
                "Loaded session from {} ({} links)",
                store.path().display(),
                state.link_table.len()
            );
        }

        Ok(Self {
            config,
            credentials: None,
            store,
            state,
            http,
            validator: SessionValidator,
            solver,
            parser: Box::new(HtmlTableParser),
            authenticated: false,
        })
    }

    /// Credentials used when a full login is needed.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Replace the default table parser.
    pub fn with_parser(mut self, parser: Box<dyn RecordParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn config(&self) -> &PortalConfig {
        &self.config
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn links(&self) -> &LinkTable {
        &self.state.link_table
    }

    /// Whether this process has authenticated (resumed or logged in).
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Ensure a live session.
    ///
    /// Without `force`, a persisted session that still passes the validator
    /// is reused and no login requests are made. With `force`, or when the
    /// probe fails, the full CAPTCHA login runs.
    pub async fn authenticate(&mut self, force: bool) -> PortalResult<AuthOutcome> {
        if !force
            && self
                .validator
                .is_authenticated(&self.http, &self.state.profile_url)
                .await
        {
            tracing::info!("Reusing stored portal session");
            self.authenticated = true;
            return Ok(AuthOutcome::Resumed);
        }

        self.authenticated = false;
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            PortalError::Config("credentials are required to log in".to_string())
        })?;

        let mut flow = AuthenticationFlow::new(&self.config, credentials, self.solver.as_ref());
        flow.run(&mut self.http, &mut self.state, &self.store).await?;

        self.authenticated = true;
        Ok(AuthOutcome::LoggedIn)
    }

    /// Parsed profile page.
    pub async fn profile(&self) -> PortalResult<Record> {
        if self.state.profile_url.is_empty() {
            return Err(PortalError::LinkNotFound {
                feature: "profile".to_string(),
                key: "profile_url".to_string(),
            });
        }
        let page = self.fetch(&self.state.profile_url).await?;
        self.parser.parse_profile(&page.body)
    }

    /// Profile narrowed to the fields the client relies on.
    pub async fn student_profile(&self) -> PortalResult<StudentProfile> {
        StudentProfile::from_record(&self.profile().await?)
    }

    /// Attendance report rows for `query`.
    pub async fn attendance(&self, query: &AttendanceQuery) -> PortalResult<Vec<Record>> {
        let url = self
            .state
            .link_table
            .require(PortalFeature::AttendanceReport)?
            .to_string();
        let page = self.fetch(&url).await?;

        let (enc_year, enc_sem, query) = {
            let form = FormPage::parse("attendance page", &page.body);
            let enc_year = form.require_input_by_id("enc_year")?;
            let enc_sem = form.require_input_by_id("enc_sem")?;
            let query = if query.is_blank() {
                tracing::debug!("Using pre-filled attendance identity");
                AttendanceQuery {
                    roll_no: form.require_input_by_name("recentitycode")?,
                    dept: form.require_input_by_name("dept")?,
                    degree: form.require_input_by_name("degree")?,
                }
            } else {
                query.clone()
            };
            (enc_year, enc_sem, query)
        };

        let fields = [
            ("year", self.config.academic_year.clone()),
            ("enc_year", enc_year),
            ("sem", self.config.semester.clone()),
            ("enc_sem", enc_sem),
            ("submit", "Submit".to_string()),
            ("recentitycode", query.roll_no),
            ("dept", query.dept),
            ("degree", query.degree),
            ("ename", String::new()),
            ("ecode", String::new()),
        ];
        let response = self.http.post_form(&url, &fields).await?;
        self.ensure_live(&response)?;
        self.parser.parse_attendance(&response.body)
    }

    /// Courses registered for the current semester.
    pub async fn enrolled_courses(&self) -> PortalResult<Vec<Record>> {
        let url = self
            .state
            .link_table
            .require(PortalFeature::RegisteredCourses)?
            .to_string();
        let page = self.fetch(&url).await?;
        self.parser.parse_courses(&page.body)
    }

    /// Authenticate, then fetch profile, attendance for the profile's own
    /// identity, and enrolled courses.
    pub async fn snapshot(&mut self) -> PortalResult<StudentSnapshot> {
        self.authenticate(false).await?;
        let profile = self.student_profile().await?;
        let attendance = self
            .attendance(&AttendanceQuery::new(
                profile.student_id.clone(),
                profile.branch.clone(),
                profile.degree.clone(),
            ))
            .await?;
        let courses = self.enrolled_courses().await?;
        Ok(StudentSnapshot {
            profile,
            attendance,
            courses,
        })
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            store_path: self.store.path().to_path_buf(),
            authenticated: self.authenticated,
            profile_url: self.state.profile_url.clone(),
            activities_url: self.state.activities_url.clone(),
            link_count: self.state.link_table.len(),
            missing_features: self
                .state
                .link_table
                .missing_features()
                .into_iter()
                .map(|f| f.key().to_string())
                .collect(),
            cookie_names: self.http.cookie_names(),
            updated_at: self.store.updated_at(),
        }
    }

    /// Forget the persisted session and start over with a fresh HTTP session.
    pub fn logout(&mut self) -> PortalResult<()> {
        self.store.clear()?;
        self.state = SessionState::default();
        self.http = PortalHttp::new(self.config.timeout_ms)?;
        self.authenticated = false;
        Ok(())
    }

    /// Persist the current cookies and headers.
    pub fn save_session(&self) -> PortalResult<()> {
        self.store.save(&SessionUpdate {
            http: Some(self.http.snapshot()),
            ..Default::default()
        })
    }

    async fn fetch(&self, url: &str) -> PortalResult<HttpResponse> {
        let page = self.http.get(url).await?;
        self.ensure_live(&page)?;
        Ok(page)
    }

    fn ensure_live(&self, response: &HttpResponse) -> PortalResult<()> {
        if is_expired_page(response) {
            tracing::warn!("Portal session expired while fetching {}", response.url);
            return Err(PortalError::SessionExpired);
        }
        Ok(())
    }
}
