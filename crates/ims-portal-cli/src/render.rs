//! Plain-text output for records, links and session status.

use ims_portal::{LinkTable, Record, SessionStatus};

/// `label: value` lines with labels padded to a common width.
pub fn render_record(record: &Record) -> String {
    let width = record.keys().map(|k| k.chars().count()).max().unwrap_or(0);
    let mut out = String::new();
    for (label, value) in record {
        out.push_str(&format!("{label:<width$}  {value}\n"));
    }
    out
}

/// Column-aligned grid. Columns are the union of all record keys in the
/// order they are first seen, which is the portal's header order.
pub fn render_table(records: &[Record]) -> String {
    if records.is_empty() {
        return "(no rows)\n".to_string();
    }

    let mut columns: Vec<&str> = Vec::new();
    for record in records {
        for key in record.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let widths: Vec<usize> = columns
        .iter()
        .map(|col| {
            records
                .iter()
                .filter_map(|r| r.get(*col))
                .map(|v| v.chars().count())
                .chain(std::iter::once(col.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = String::new();
    out.push_str(&line(columns.clone()));
    out.push('\n');
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&line(rule.iter().map(String::as_str).collect()));
    out.push('\n');
    for record in records {
        let cells = columns
            .iter()
            .map(|col| record.get(*col).map(String::as_str).unwrap_or(""))
            .collect();
        out.push_str(&line(cells));
        out.push('\n');
    }
    out
}

pub fn render_links(links: &LinkTable) -> String {
    if links.is_empty() {
        return "(no links discovered; run `ims login`)\n".to_string();
    }
    let width = links.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
    links
        .iter()
        .map(|(key, url)| format!("{key:<width$}  {url}\n"))
        .collect()
}

pub fn render_status(status: &SessionStatus) -> String {
    let or_none = |s: &str| {
        if s.is_empty() {
            "(none)".to_string()
        } else {
            s.to_string()
        }
    };
    let mut out = String::new();
    out.push_str(&format!("Session store:  {}\n", status.store_path.display()));
    out.push_str(&format!("Authenticated:  {}\n", status.authenticated));
    out.push_str(&format!("Profile URL:    {}\n", or_none(&status.profile_url)));
    out.push_str(&format!("Activities URL: {}\n", or_none(&status.activities_url)));
    out.push_str(&format!("Links:          {}\n", status.link_count));
    if !status.missing_features.is_empty() {
        out.push_str(&format!(
            "Missing links:  {}\n",
            status.missing_features.join(", ")
        ));
    }
    out.push_str(&format!(
        "Cookies:        {}\n",
        or_none(&status.cookie_names.join(", "))
    ));
    out.push_str(&format!(
        "Last saved:     {}\n",
        status
            .updated_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    ));
    out
}
