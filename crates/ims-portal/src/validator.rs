//! Cheap session liveness probe.
//!
//! The portal has no session endpoint, so liveness is judged by fetching a
//! page that requires login and looking for the text it shows once the server
//! has dropped the session. This is a string match on portal-authored HTML:
//! if the portal rewords the message, expired sessions will look live and the
//! first data call will fail instead.

use crate::http::{HttpResponse, PortalHttp};

/// Text the portal renders in place of a page once the session is gone.
pub const EXPIRY_MARKER: &str = "Session expired";

/// Whether a response is the portal's expired-session page.
pub fn is_expired_page(response: &HttpResponse) -> bool {
    response.contains(EXPIRY_MARKER)
}

/// Liveness check against a known authenticated page.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionValidator;

impl SessionValidator {
    /// One GET to `probe_url`.
    ///
    /// False when the probe URL is empty (no request is made), when the
    /// request fails, or when the body carries [`EXPIRY_MARKER`]. Never
    /// returns an error.
    pub async fn is_authenticated(&self, http: &PortalHttp, probe_url: &str) -> bool {
        if probe_url.trim().is_empty() {
            tracing::debug!("No profile URL recorded; session is not authenticated");
            return false;
        }

        match http.get(probe_url).await {
            Ok(response) if is_expired_page(&response) => {
                tracing::info!("Portal reports the stored session as expired");
                false
            }
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Session probe failed: {e}");
                false
            }
        }
    }
}
