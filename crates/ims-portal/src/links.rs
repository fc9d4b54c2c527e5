//! Dynamic link discovery over the portal's activity menu.
//!
//! The portal does not expose stable routes: every feature page lives at a
//! URL that is only reachable through the "My Activities" menu of a logged-in
//! session. Discovery scrapes that menu once per login and keys each anchor by
//! a camelCase identifier derived from its visible text, so later operations
//! can look pages up by name.

use std::collections::BTreeMap;
use std::fmt;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{PortalError, PortalResult};
use crate::http::PortalHttp;

/// Placeholder `href` used by menu headings; never a real page.
const PLACEHOLDER_HREF: &str = "#";

/// Portal features the client knows how to reach through the link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortalFeature {
    /// "Attendance Report" menu entry.
    AttendanceReport,
    /// "Current Semester Registered Courses." menu entry.
    RegisteredCourses,
}

impl PortalFeature {
    pub const ALL: [PortalFeature; 2] = [
        PortalFeature::AttendanceReport,
        PortalFeature::RegisteredCourses,
    ];

    /// Link-table key produced by [`normalize_key`] for this feature's menu text.
    pub fn key(self) -> &'static str {
        match self {
            PortalFeature::AttendanceReport => "attendanceReport",
            PortalFeature::RegisteredCourses => "currentSemesterRegisteredCourses",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PortalFeature::AttendanceReport => "attendance report",
            PortalFeature::RegisteredCourses => "registered courses",
        }
    }
}

impl fmt::Display for PortalFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Normalized menu key to absolute page URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkTable(BTreeMap<String, String>);

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an entry. Later writes win.
    pub fn insert(&mut self, key: impl Into<String>, url: impl Into<String>) {
        self.0.insert(key.into(), url.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// URL of a known feature, or `LinkNotFound` naming the missing key.
    pub fn require(&self, feature: PortalFeature) -> PortalResult<&str> {
        self.get(feature.key()).ok_or_else(|| PortalError::LinkNotFound {
            feature: feature.label().to_string(),
            key: feature.key().to_string(),
        })
    }

    /// Known features absent from this table.
    pub fn missing_features(&self) -> Vec<PortalFeature> {
        PortalFeature::ALL
            .into_iter()
            .filter(|f| self.get(f.key()).is_none())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for LinkTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Derive a camelCase key from anchor text.
///
/// Runs of characters outside `[0-9A-Za-z]` separate words, as does a
/// lowercase letter followed by an uppercase one. Each word is title-cased
/// (a letter is uppercased when it does not follow another letter, lowercased
/// otherwise), the words are joined, and the first character is lowercased.
/// Splitting on existing camel humps makes the function idempotent.
///
/// ```
/// use ims_portal::links::normalize_key;
/// assert_eq!(
///     normalize_key("Current Semester Registered Courses."),
///     "currentSemesterRegisteredCourses"
/// );
/// assert_eq!(normalize_key("tudent Transcript (CBCS)(NSIT)"), "tudentTranscriptCbcsNsit");
/// ```
pub fn normalize_key(text: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for ch in text.chars() {
        if !ch.is_ascii_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev = None;
            continue;
        }
        if prev.is_some_and(|p| p.is_ascii_lowercase()) && ch.is_ascii_uppercase() {
            words.push(std::mem::take(&mut current));
        }
        current.push(ch);
        prev = Some(ch);
    }
    if !current.is_empty() {
        words.push(current);
    }

    let mut key: String = words.iter().map(|w| title_case(w)).collect();
    if let Some(first) = key.get_mut(0..1) {
        first.make_ascii_lowercase();
    }
    key
}

fn title_case(word: &str) -> String {
    let mut after_letter = false;
    word.chars()
        .map(|ch| {
            let mapped = if !ch.is_ascii_alphabetic() {
                ch
            } else if after_letter {
                ch.to_ascii_lowercase()
            } else {
                ch.to_ascii_uppercase()
            };
            after_letter = ch.is_ascii_alphabetic();
            mapped
        })
        .collect()
}

/// Resolve an `href` against the page it appeared on.
///
/// Absolute hrefs come back unchanged; unresolvable ones are kept verbatim.
pub(crate) fn resolve_href(page_url: Option<&Url>, href: &str) -> String {
    match page_url.map(|base| base.join(href)) {
        Some(Ok(url)) => url.to_string(),
        _ => href.to_string(),
    }
}

/// Build a link table from every anchor on a page.
///
/// Anchors whose `href` is exactly `"#"` are skipped. Colliding keys
/// (including the empty key from text with no alphanumerics) resolve to the
/// anchor that appears last.
pub fn extract_links(html: &str, page_url: &str) -> LinkTable {
    let document = Html::parse_document(html);
    let anchor_sel = Selector::parse("a[href]").expect("anchor selector is valid");
    let base = Url::parse(page_url).ok();

    let mut table = LinkTable::new();
    for anchor in document.select(&anchor_sel) {
        let href = anchor.value().attr("href").unwrap_or_default();
        if href == PLACEHOLDER_HREF {
            continue;
        }
        let text: String = anchor.text().collect();
        let key = normalize_key(&text);
        table.insert(key, resolve_href(base.as_ref(), href));
    }
    table
}

/// Hrefs of the anchors whose trimmed text equals each of `labels`.
///
/// Returns one slot per label; later anchors with the same text win.
pub(crate) fn find_anchors(html: &str, page_url: &str, labels: &[&str]) -> Vec<Option<String>> {
    let document = Html::parse_document(html);
    let anchor_sel = Selector::parse("a[href]").expect("anchor selector is valid");
    let base = Url::parse(page_url).ok();

    let mut found = vec![None; labels.len()];
    for anchor in document.select(&anchor_sel) {
        let text: String = anchor.text().collect();
        if let Some(slot) = labels.iter().position(|label| text.trim() == *label) {
            let href = anchor.value().attr("href").unwrap_or_default();
            found[slot] = Some(resolve_href(base.as_ref(), href));
        }
    }
    found
}

/// Fetch the activity menu and build its link table.
pub async fn discover(http: &PortalHttp, activities_url: &str) -> PortalResult<LinkTable> {
    let response = http.get(activities_url).await?;
    let table = extract_links(&response.body, &response.final_url);

    let missing = table.missing_features();
    if !missing.is_empty() {
        tracing::warn!(
            "Activity menu lacks expected entries: {}",
            missing
                .iter()
                .map(|f| f.key())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
    tracing::info!("Discovered {} portal links", table.len());
    Ok(table)
}
