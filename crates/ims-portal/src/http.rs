//! The portal HTTP session: one reqwest client, a persistent cookie jar, and
//! a mutable set of outgoing headers.
//!
//! Not a general HTTP client. Requests are issued one at a time, never
//! retried, and the whole session can be snapshotted for the store and
//! rebuilt on the next run.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use cookie::Cookie;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::PortalResult;
use crate::session::HttpSessionSnapshot;

/// Browser navigation headers the portal's front door expects.
pub const BASE_HEADERS: &[(&str, &str)] = &[
    (
        "user-agent",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/120.0.6099.119 Safari/537.36",
    ),
    (
        "accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    ),
    ("accept-language", "en-US,en;q=0.5"),
    ("connection", "keep-alive"),
    ("upgrade-insecure-requests", "1"),
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "same-origin"),
];

/// Response from a portal request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Original requested URL.
    pub url: String,
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl HttpResponse {
    /// Whether the body contains a piece of portal-authored text.
    pub fn contains(&self, marker: &str) -> bool {
        self.body.contains(marker)
    }
}

/// Cookie jar for a single portal host.
///
/// `Set-Cookie` values are parsed with the `cookie` crate. The portal lives on
/// one host, so cookies are kept by name only; an empty value, a
/// non-positive `Max-Age` or an `Expires` date in the past deletes the cookie.
#[derive(Debug, Default)]
pub struct PortalCookieJar {
    cookies: RwLock<BTreeMap<String, String>>,
}

impl PortalCookieJar {
    pub fn from_map(cookies: BTreeMap<String, String>) -> Self {
        Self {
            cookies: RwLock::new(cookies),
        }
    }

    /// Copy of the current cookies.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.cookies
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Apply one `Set-Cookie` header value.
    pub fn apply_set_cookie(&self, raw: &str) {
        let Some(change) = parse_set_cookie(raw) else {
            return;
        };
        let mut cookies = self.cookies.write().unwrap_or_else(|e| e.into_inner());
        match change {
            CookieChange::Set(name, value) => {
                cookies.insert(name, value);
            }
            CookieChange::Remove(name) => {
                cookies.remove(&name);
            }
        }
    }

    /// `Cookie` request header value, if any cookies are held.
    pub fn header_value(&self) -> Option<String> {
        let cookies = self.cookies.read().unwrap_or_else(|e| e.into_inner());
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

impl reqwest::cookie::CookieStore for PortalCookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, _url: &Url) {
        for header in cookie_headers {
            if let Ok(raw) = header.to_str() {
                self.apply_set_cookie(raw);
            }
        }
    }

    fn cookies(&self, _url: &Url) -> Option<HeaderValue> {
        self.header_value()
            .and_then(|value| HeaderValue::from_str(&value).ok())
    }
}

#[derive(Debug, PartialEq, Eq)]
enum CookieChange {
    Set(String, String),
    Remove(String),
}

fn parse_set_cookie(raw: &str) -> Option<CookieChange> {
    let cookie = Cookie::parse(raw).ok()?;
    let name = cookie.name().to_string();

    let now = time::OffsetDateTime::now_utc();
    let expired = cookie.value().is_empty()
        || cookie.max_age().is_some_and(|age| age <= time::Duration::ZERO)
        || cookie.expires_datetime().is_some_and(|when| when <= now);

    if expired {
        Some(CookieChange::Remove(name))
    } else {
        Some(CookieChange::Set(name, cookie.value().to_string()))
    }
}

/// The single HTTP session owned by a portal client.
pub struct PortalHttp {
    client: reqwest::Client,
    jar: Arc<PortalCookieJar>,
    headers: HeaderMap,
}

impl PortalHttp {
    /// Fresh session carrying only the base browser headers.
    pub fn new(timeout_ms: u64) -> PortalResult<Self> {
        Self::from_snapshot(&HttpSessionSnapshot::default(), timeout_ms)
    }

    /// Rebuild a session from a persisted snapshot.
    ///
    /// A snapshot without headers (first run, or written by an older version)
    /// starts from [`BASE_HEADERS`].
    pub fn from_snapshot(snapshot: &HttpSessionSnapshot, timeout_ms: u64) -> PortalResult<Self> {
        let jar = Arc::new(PortalCookieJar::from_map(snapshot.cookies.clone()));
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(Duration::from_millis(timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        let mut http = Self {
            client,
            jar,
            headers: HeaderMap::new(),
        };
        if snapshot.headers.is_empty() {
            http.set_headers(BASE_HEADERS);
        } else {
            let pairs: Vec<(&str, &str)> = snapshot
                .headers
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            http.set_headers(&pairs);
        }
        Ok(http)
    }

    /// Serializable copy of cookies and headers.
    pub fn snapshot(&self) -> HttpSessionSnapshot {
        let headers = self
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        HttpSessionSnapshot {
            cookies: self.jar.to_map(),
            headers,
        }
    }

    /// Insert or replace outgoing headers. Invalid pairs are skipped.
    pub fn set_headers(&mut self, pairs: &[(&str, &str)]) {
        for (name, value) in pairs {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    self.headers.insert(name, value);
                }
                _ => tracing::warn!("Skipping invalid header '{name}'"),
            }
        }
    }

    /// Current value of an outgoing header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Names of the cookies currently held.
    pub fn cookie_names(&self) -> Vec<String> {
        self.jar.to_map().into_keys().collect()
    }

    /// GET a page with the session's headers and cookies.
    pub async fn get(&self, url: &str) -> PortalResult<HttpResponse> {
        tracing::debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await?;
        Self::read(url, response).await
    }

    /// GET a binary resource (the CAPTCHA image) with the session's headers
    /// and cookies.
    pub async fn get_bytes(&self, url: &str) -> PortalResult<Vec<u8>> {
        tracing::debug!("GET {url} (binary)");
        let response = self
            .client
            .get(url)
            .headers(self.headers.clone())
            .send()
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// POST url-encoded form fields with the session's headers and cookies.
    pub async fn post_form(
        &self,
        url: &str,
        fields: &[(&str, String)],
    ) -> PortalResult<HttpResponse> {
        tracing::debug!("POST {url} ({} fields)", fields.len());
        let response = self
            .client
            .post(url)
            .headers(self.headers.clone())
            .form(fields)
            .send()
            .await?;
        Self::read(url, response).await
    }

    async fn read(url: &str, response: reqwest::Response) -> PortalResult<HttpResponse> {
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;
        tracing::debug!("{status} from {final_url} ({} bytes)", body.len());
        Ok(HttpResponse {
            url: url.to_string(),
            final_url,
            status,
            body,
        })
    }
}
