//! IMS portal client — CAPTCHA-gated login, session persistence across runs,
//! dynamic link discovery, and structured record retrieval for a university
//! portal that has no API.

pub mod auth;
pub mod captcha;
pub mod client;
pub mod config;
pub mod error;
pub mod forms;
pub mod http;
pub mod links;
pub mod records;
pub mod session;
pub mod store;
pub mod validator;

pub use auth::{AuthState, AuthenticationFlow, LoginOutcome};
pub use captcha::{CaptchaChallenge, CaptchaSolver, FixedSolver, NoSolver};
pub use client::{AttendanceQuery, AuthOutcome, PortalClient, SessionStatus};
pub use config::{resolve_store_path, Credentials, PortalConfig};
pub use error::{PortalError, PortalResult};
pub use links::{normalize_key, LinkTable, PortalFeature};
pub use records::{HtmlTableParser, Record, RecordParser, StudentProfile, StudentSnapshot};
pub use session::{HttpSessionSnapshot, SessionState, SessionUpdate};
pub use store::SessionStore;
pub use validator::SessionValidator;
