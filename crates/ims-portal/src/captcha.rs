//! CAPTCHA challenges and the human-input boundary.
//!
//! Solving is the one place the login flow waits on a person. It sits behind
//! [`CaptchaSolver`] so the CLI can prompt on a terminal while tests (or a
//! different front end) supply answers directly.

use url::Url;

use crate::error::{PortalError, PortalResult};
use crate::forms::FormPage;

/// Element id of the CAPTCHA image on the login page.
const CAPTCHA_IMAGE_ID: &str = "captchaimg";
/// Element id of the hidden server token paired with the image.
pub const TOKEN_FIELD: &str = "HRAND_NUM";

/// One login attempt's CAPTCHA. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaChallenge {
    /// Absolute URL of the CAPTCHA image.
    pub image_url: String,
    /// Hidden numeric token submitted alongside the solution.
    pub token: String,
    /// Image bytes, fetched with the login session's cookies. The portal
    /// issues a new challenge for any other session, so this is what a
    /// solver should read.
    pub image: Vec<u8>,
}

impl CaptchaChallenge {
    /// Scrape the challenge from the login page markup.
    pub fn from_login_page(html: &str, base_url: &Url) -> PortalResult<Self> {
        let page = FormPage::parse("login page", html);
        let src = page.require_attr(&format!("#{CAPTCHA_IMAGE_ID}"), "src", CAPTCHA_IMAGE_ID)?;
        let token = page.require_attr(&format!("#{TOKEN_FIELD}"), "value", TOKEN_FIELD)?;
        let image_url = base_url.join(&src)?.to_string();
        Ok(Self {
            image_url,
            token,
            image: Vec::new(),
        })
    }
}

/// Produces the text shown in a CAPTCHA image.
///
/// Implementations may block for as long as they need; the login flow has no
/// timeout around this call.
pub trait CaptchaSolver {
    fn solve(&self, challenge: &CaptchaChallenge) -> PortalResult<String>;
}

/// Answers every challenge with the same text.
#[derive(Debug, Clone)]
pub struct FixedSolver(pub String);

impl FixedSolver {
    pub fn new(answer: impl Into<String>) -> Self {
        Self(answer.into())
    }
}

impl CaptchaSolver for FixedSolver {
    fn solve(&self, _challenge: &CaptchaChallenge) -> PortalResult<String> {
        Ok(self.0.clone())
    }
}

/// Refuses every challenge. For non-interactive runs that must not log in.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSolver;

impl CaptchaSolver for NoSolver {
    fn solve(&self, challenge: &CaptchaChallenge) -> PortalResult<String> {
        Err(PortalError::Captcha(format!(
            "no solver available for {}",
            challenge.image_url
        )))
    }
}

impl<F> CaptchaSolver for F
where
    F: Fn(&CaptchaChallenge) -> PortalResult<String>,
{
    fn solve(&self, challenge: &CaptchaChallenge) -> PortalResult<String> {
        self(challenge)
    }
}
