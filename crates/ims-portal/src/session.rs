//! Persisted session state and partial updates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::links::LinkTable;

/// Serializable form of the HTTP session: cookie jar plus outgoing headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSessionSnapshot {
    /// Cookie name to value, as last set by the portal.
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    /// Header name (lowercase) to value, applied to every outgoing request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Everything carried from one run to the next.
///
/// The URLs and the link table are only meaningful while the session they
/// were captured under is still live; the validator decides that lazily.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub http: HttpSessionSnapshot,
    pub profile_url: String,
    pub activities_url: String,
    pub link_table: LinkTable,
}

impl SessionState {
    /// True when no login has ever completed under this state.
    pub fn is_blank(&self) -> bool {
        self.profile_url.is_empty() && self.activities_url.is_empty() && self.link_table.is_empty()
    }

    /// Apply a partial update in memory, mirroring what the store persists.
    pub fn apply(&mut self, update: &SessionUpdate) {
        if let Some(http) = &update.http {
            self.http = http.clone();
        }
        if let Some(url) = &update.profile_url {
            self.profile_url = url.clone();
        }
        if let Some(url) = &update.activities_url {
            self.activities_url = url.clone();
        }
        if let Some(table) = &update.link_table {
            self.link_table = table.clone();
        }
    }
}

/// A partial write: `None` fields keep their persisted value.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub http: Option<HttpSessionSnapshot>,
    pub profile_url: Option<String>,
    pub activities_url: Option<String>,
    pub link_table: Option<LinkTable>,
}

impl SessionUpdate {
    /// Update carrying every field of `state`.
    pub fn full(state: &SessionState) -> Self {
        Self {
            http: Some(state.http.clone()),
            profile_url: Some(state.profile_url.clone()),
            activities_url: Some(state.activities_url.clone()),
            link_table: Some(state.link_table.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.http.is_none()
            && self.profile_url.is_none()
            && self.activities_url.is_none()
            && self.link_table.is_none()
    }
}
