//! Hidden-field and attribute lookups on portal pages.
//!
//! The core only reads markup to find what navigation and session control
//! need: CAPTCHA images, server-issued tokens, and pre-filled form inputs.
//! `scraper` documents are `!Send`, so a [`FormPage`] must be dropped before
//! the next `.await`.

use scraper::{Html, Selector};

use crate::error::{PortalError, PortalResult};

/// A parsed page plus a name for error messages.
pub struct FormPage {
    name: &'static str,
    document: Html,
}

impl FormPage {
    pub fn parse(name: &'static str, html: &str) -> Self {
        Self {
            name,
            document: Html::parse_document(html),
        }
    }

    /// Attribute of the first element matching `selector`.
    pub fn attr(&self, selector: &str, attr: &str) -> Option<String> {
        let sel = Selector::parse(selector).ok()?;
        self.document
            .select(&sel)
            .next()
            .and_then(|el| el.value().attr(attr))
            .map(str::to_string)
    }

    /// `value` of the first `<input>` with the given `id`.
    pub fn input_by_id(&self, id: &str) -> Option<String> {
        self.attr(&format!("input[id=\"{id}\"]"), "value")
    }

    /// `value` of the first `<input>` with the given `name`.
    pub fn input_by_name(&self, name: &str) -> Option<String> {
        self.attr(&format!("input[name=\"{name}\"]"), "value")
    }

    /// Like [`FormPage::attr`] but missing elements are an error.
    pub fn require_attr(&self, selector: &str, attr: &str, field: &str) -> PortalResult<String> {
        self.attr(selector, attr)
            .ok_or_else(|| PortalError::missing(self.name, field))
    }

    pub fn require_input_by_id(&self, id: &str) -> PortalResult<String> {
        self.input_by_id(id)
            .ok_or_else(|| PortalError::missing(self.name, id))
    }

    pub fn require_input_by_name(&self, name: &str) -> PortalResult<String> {
        self.input_by_name(name)
            .ok_or_else(|| PortalError::missing(self.name, name))
    }
}
