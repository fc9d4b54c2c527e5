//! HTML bodies to structured records.
//!
//! The client never interprets page content itself; it hands raw bodies to a
//! [`RecordParser`]. [`HtmlTableParser`] covers the portal's table-based
//! layouts and can be swapped out when a page changes shape.

use indexmap::IndexMap;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;

use crate::error::{PortalError, PortalResult};

/// One row of portal data, keyed by the portal's own field labels in page
/// order.
pub type Record = IndexMap<String, String>;

/// Converts page bodies into records.
pub trait RecordParser {
    /// Profile page: one record of label → value.
    fn parse_profile(&self, html: &str) -> PortalResult<Record>;
    /// Attendance report response: one record per row.
    fn parse_attendance(&self, html: &str) -> PortalResult<Vec<Record>>;
    /// Registered courses page: one record per course.
    fn parse_courses(&self, html: &str) -> PortalResult<Vec<Record>>;
}

/// Table-driven parser for the portal's pages.
///
/// Profile pages are label/value rows; report pages are a grid whose first
/// row names the columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlTableParser;

impl RecordParser for HtmlTableParser {
    fn parse_profile(&self, html: &str) -> PortalResult<Record> {
        let document = Html::parse_document(html);
        let row_sel = Selector::parse("tr").expect("row selector is valid");

        let mut record = Record::new();
        for row in document.select(&row_sel) {
            let cells = row_cells(row);
            if cells.len() < 2 || cells.len() % 2 != 0 {
                continue;
            }
            for pair in cells.chunks(2) {
                let label = pair[0].trim_end_matches(':').trim();
                if !label.is_empty() && !pair[1].is_empty() {
                    record.insert(label.to_string(), pair[1].clone());
                }
            }
        }

        if record.is_empty() {
            return Err(PortalError::Record(
                "profile page has no label/value rows".to_string(),
            ));
        }
        Ok(record)
    }

    fn parse_attendance(&self, html: &str) -> PortalResult<Vec<Record>> {
        Ok(parse_grid(html))
    }

    fn parse_courses(&self, html: &str) -> PortalResult<Vec<Record>> {
        Ok(parse_grid(html))
    }
}

/// Records from the table with the most rows, headed by its first row.
fn parse_grid(html: &str) -> Vec<Record> {
    let document = Html::parse_document(html);
    let table_sel = Selector::parse("table").expect("table selector is valid");
    let row_sel = Selector::parse("tr").expect("row selector is valid");

    let Some(rows) = document
        .select(&table_sel)
        .map(|table| own_rows(table, &row_sel))
        .filter(|rows| rows.len() >= 2)
        .max_by_key(|rows| rows.len())
    else {
        return Vec::new();
    };

    let header: Vec<String> = row_cells(rows[0])
        .into_iter()
        .enumerate()
        .map(|(i, label)| {
            if label.is_empty() {
                format!("Column {}", i + 1)
            } else {
                label
            }
        })
        .collect();

    rows[1..]
        .iter()
        .map(|row| row_cells(*row))
        .filter(|cells| cells.iter().any(|c| !c.is_empty()))
        .map(|cells| {
            header
                .iter()
                .cloned()
                .zip(cells)
                .collect::<Record>()
        })
        .collect()
}

/// Rows of `table` that are not inside a nested table.
fn own_rows<'a>(table: ElementRef<'a>, row_sel: &Selector) -> Vec<ElementRef<'a>> {
    table
        .select(row_sel)
        .filter(|row| {
            row.ancestors()
                .filter_map(ElementRef::wrap)
                .find(|el| el.value().name() == "table")
                .map(|el| el.id())
                == Some(table.id())
        })
        .collect()
}

/// Whitespace-collapsed text of a row's direct `td`/`th` cells.
fn row_cells(row: ElementRef<'_>) -> Vec<String> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
        .map(|cell| {
            cell.text()
                .flat_map(str::split_whitespace)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Typed view of the profile fields the client relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentProfile {
    pub student_id: String,
    pub name: String,
    pub dob: String,
    pub gender: String,
    pub category: String,
    pub branch: String,
    pub degree: String,
    pub section: String,
}

impl StudentProfile {
    pub const FIELDS: [&'static str; 8] = [
        "Student ID",
        "Student Name",
        "DOB",
        "Gender",
        "Category",
        "Branch Name",
        "Degree",
        "Section",
    ];

    /// Pull the known fields out of a parsed profile record.
    pub fn from_record(record: &Record) -> PortalResult<Self> {
        let missing: Vec<&str> = Self::FIELDS
            .iter()
            .copied()
            .filter(|f| !record.contains_key(*f))
            .collect();
        if !missing.is_empty() {
            return Err(PortalError::Record(format!(
                "profile is missing {}",
                missing.join(", ")
            )));
        }

        let field = |name: &str| record.get(name).cloned().unwrap_or_default();
        Ok(Self {
            student_id: field("Student ID"),
            name: field("Student Name"),
            dob: field("DOB"),
            gender: field("Gender"),
            category: field("Category"),
            branch: field("Branch Name"),
            degree: field("Degree"),
            section: field("Section"),
        })
    }
}

/// Everything fetched for one student in a single run.
#[derive(Debug, Clone, Serialize)]
pub struct StudentSnapshot {
    pub profile: StudentProfile,
    pub attendance: Vec<Record>,
    pub courses: Vec<Record>,
}
