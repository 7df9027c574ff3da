//! ASP.NET WebForms catalog parsing.
//!
//! The shipped [`CatalogParser`] implementation. WebForms sites emulate
//! application state by echoing hidden inputs (`__VIEWSTATE` and friends)
//! with every response; results live in a server-rendered grid whose
//! pagination and row-selection controls fire `__doPostBack` instead of
//! linking anywhere. All element IDs and field names vary per site, so the
//! parser is driven entirely by a [`SiteProfile`].

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, ProtocolResult};
use crate::postback::FormProfile;
use crate::traits::parser::{CatalogParser, ResultsPage};
use crate::types::{Identifier, Record};

/// A label-prefixed history grid on a detail page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTable {
    /// Element ID of the grid
    pub id: String,

    /// Prefix applied to each column header when flattened into the record
    pub prefix: String,
}

/// Everything site-specific: endpoints, form field names, and the element
/// IDs the parser scans for.
///
/// Profiles serialize to JSON so a deployment can describe a new catalog
/// without code changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    /// Search page URL (landing page and search/pagination postbacks)
    pub search_url: String,

    /// Detail page URL (row-selection postbacks)
    pub details_url: String,

    /// Hidden fields that must be present in every response.
    ///
    /// A response missing one of these cannot produce a valid next request;
    /// all other hidden fields are carried opaquely.
    pub critical_fields: Vec<String>,

    /// Field the discovery search term is written into
    pub term_field: String,

    /// Field the record-identifier lookup is written into
    pub record_field: String,

    /// Search submit button name
    pub submit_field: String,

    /// Search submit button value
    pub submit_value: String,

    /// Element ID of the results grid
    pub results_table_id: String,

    /// Substring identifying the next-page control's name
    pub next_control_marker: String,

    /// Substring identifying a result row's detail-selection link ID
    pub record_link_marker: String,

    /// Column name the identifier is written to in harvested records
    pub id_column: String,

    /// Detail-page tables parsed as label/value rows
    pub detail_tables: Vec<String>,

    /// Detail-page text sections (heading text, colon-terminated in markup)
    pub text_sections: Vec<String>,

    /// Detail-page history grids flattened with a column prefix
    pub history_tables: Vec<HistoryTable>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            search_url: String::new(),
            details_url: String::new(),
            critical_fields: vec![
                "__VIEWSTATE".to_string(),
                "__VIEWSTATEGENERATOR".to_string(),
                "__EVENTVALIDATION".to_string(),
            ],
            term_field: "ctl00$MainContent$txtName".to_string(),
            record_field: "ctl00$MainContent$txtId".to_string(),
            submit_field: "ctl00$MainContent$btnSearch".to_string(),
            submit_value: "Search".to_string(),
            results_table_id: "MainContent_gvResults".to_string(),
            next_control_marker: "btnNext".to_string(),
            record_link_marker: "lnkSelect".to_string(),
            id_column: "Identifier".to_string(),
            detail_tables: vec![
                "MainContent_DetailsView1".to_string(),
                "MainContent_DetailsView2".to_string(),
            ],
            text_sections: Vec::new(),
            history_tables: Vec::new(),
        }
    }
}

impl SiteProfile {
    /// Profile for a catalog rooted at the given search page.
    pub fn new(search_url: impl Into<String>, details_url: impl Into<String>) -> Self {
        Self {
            search_url: search_url.into(),
            details_url: details_url.into(),
            ..Default::default()
        }
    }

    /// Form profile for discovery term searches.
    pub fn term_form(&self) -> FormProfile {
        FormProfile::default()
            .with_search_field(self.term_field.clone())
            .with_submit(self.submit_field.clone(), self.submit_value.clone())
    }

    /// Form profile for per-identifier detail lookups.
    pub fn record_form(&self) -> FormProfile {
        FormProfile::default()
            .with_search_field(self.record_field.clone())
            .with_submit(self.submit_field.clone(), self.submit_value.clone())
    }
}

/// Regex-driven parser for WebForms markup.
pub struct WebFormsParser {
    profile: SiteProfile,
    input_tag: Regex,
    anchor_tag: Regex,
    row: Regex,
    cell: Regex,
    span: Regex,
    tag: Regex,
    whitespace: Regex,
}

impl WebFormsParser {
    /// Create a parser for a site profile.
    pub fn new(profile: SiteProfile) -> Self {
        Self {
            profile,
            input_tag: Regex::new(r"(?i)<input\b[^>]*>").unwrap(),
            anchor_tag: Regex::new(r"(?is)<a\b[^>]*>").unwrap(),
            row: Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap(),
            cell: Regex::new(r"(?is)<t[dh][^>]*>(.*?)</t[dh]>").unwrap(),
            span: Regex::new(r"(?is)<span[^>]*>(.*?)</span>").unwrap(),
            tag: Regex::new(r"(?s)<[^>]+>").unwrap(),
            whitespace: Regex::new(r"\s+").unwrap(),
        }
    }

    /// The profile this parser was built from.
    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Pull one attribute value out of a tag.
    ///
    /// Matched per quote style: `__doPostBack` hrefs carry single quotes
    /// inside double-quoted attributes.
    fn attr(tag: &str, name: &str) -> Option<String> {
        let pattern = format!(
            r#"(?i)\b{}\s*=\s*(?:"([^"]*)"|'([^']*)')"#,
            regex::escape(name)
        );
        let re = Regex::new(&pattern).ok()?;
        let cap = re.captures(tag)?;
        cap.get(1)
            .or_else(|| cap.get(2))
            .map(|m| m.as_str().to_string())
    }

    /// Whether a tag carries an attribute, valued or bare.
    fn has_attr(tag: &str, name: &str) -> bool {
        let pattern = format!(r"(?i)\b{}\b", regex::escape(name));
        Regex::new(&pattern).map(|re| re.is_match(tag)).unwrap_or(false)
    }

    /// Inner HTML of the table with the given element ID.
    fn table_body<'a>(&self, body: &'a str, id: &str) -> Option<&'a str> {
        let pattern = format!(
            r#"(?is)<table[^>]*\bid\s*=\s*["']{}["'][^>]*>(.*?)</table>"#,
            regex::escape(id)
        );
        let re = Regex::new(&pattern).ok()?;
        re.captures(body).map(|cap| cap.get(1).unwrap().as_str())
    }

    /// Strip markup and collapse whitespace to plain cell text.
    fn text(&self, html: &str) -> String {
        let stripped = self.tag.replace_all(html, " ");
        let decoded = stripped
            .replace("&nbsp;", " ")
            .replace("&amp;", "&")
            .replace("&lt;", "<")
            .replace("&gt;", ">")
            .replace("&quot;", "\"")
            .replace("&#39;", "'");
        self.whitespace.replace_all(&decoded, " ").trim().to_string()
    }

    /// Event target of the enabled next-page control, if present.
    fn next_page_target(&self, body: &str) -> Option<String> {
        for tag in self.input_tag.find_iter(body) {
            let tag = tag.as_str();
            let Some(name) = Self::attr(tag, "name") else {
                continue;
            };
            if !name.contains(&self.profile.next_control_marker) {
                continue;
            }
            // A disabled control signals the final page.
            if Self::has_attr(tag, "disabled") {
                return None;
            }
            return Some(name);
        }
        None
    }

    /// Event target of the first record-selection link, if present.
    fn record_link_target(&self, body: &str) -> Option<String> {
        let grid = self.table_body(body, &self.profile.results_table_id)?;
        for tag in self.anchor_tag.find_iter(grid) {
            let tag = tag.as_str();
            let Some(id) = Self::attr(tag, "id") else {
                continue;
            };
            if !id.contains(&self.profile.record_link_marker) {
                continue;
            }
            let href = Self::attr(tag, "href")?;
            // href is javascript:__doPostBack('target',''); the target sits
            // between the first pair of single quotes.
            let mut parts = href.split('\'');
            parts.next()?;
            return parts.next().map(|t| t.to_string());
        }
        None
    }

    /// Label/value rows of one detail table into the record.
    fn parse_detail_table(&self, body: &str, id: &str, record: &mut Record) {
        let Some(table) = self.table_body(body, id) else {
            return;
        };
        for row in self.row.captures_iter(table) {
            let cells: Vec<String> = self
                .cell
                .captures_iter(&row[1])
                .map(|c| self.text(&c[1]))
                .collect();
            if cells.len() == 2 && !cells[0].is_empty() {
                let key = cells[0].trim_end_matches(':').trim().to_string();
                if !key.is_empty() {
                    record.set(key, cells[1].clone());
                }
            }
        }
    }

    /// A heading-plus-spans text section into the record.
    ///
    /// Sites render list-like data ("Aliases:", etc.) as a heading followed
    /// by sibling spans; a "No known ..." placeholder span means the section
    /// is empty. The field is always set so record schemas stay uniform.
    fn parse_text_section(&self, body: &str, section: &str, record: &mut Record) {
        let key = section.replace(", ", "_");
        let marker = format!("{section}:");
        let Some(start) = body.find(&marker) else {
            record.set(key, "");
            return;
        };
        let rest = &body[start + marker.len()..];
        let end = rest.find("<div").unwrap_or(rest.len());

        let items: Vec<String> = self
            .span
            .captures_iter(&rest[..end])
            .map(|c| self.text(&c[1]))
            .filter(|t| !t.is_empty())
            .collect();

        let value = match items.first() {
            Some(first) if !first.starts_with("No known") => items.join(" || "),
            _ => String::new(),
        };
        record.set(key, value);
    }

    /// First data row of a history grid, header-prefixed, into the record.
    fn parse_history_table(&self, body: &str, table: &HistoryTable, record: &mut Record) {
        let Some(grid) = self.table_body(body, &table.id) else {
            return;
        };
        let mut rows = self.row.captures_iter(grid);
        let (Some(header_row), Some(value_row)) = (rows.next(), rows.next()) else {
            return;
        };

        let headers: Vec<String> = self
            .cell
            .captures_iter(&header_row[1])
            .map(|c| self.text(&c[1]))
            .collect();
        let values: Vec<String> = self
            .cell
            .captures_iter(&value_row[1])
            .map(|c| self.text(&c[1]))
            .collect();

        for (header, value) in headers.iter().zip(values.iter()) {
            if !header.is_empty() {
                record.set(format!("{} {}", table.prefix, header), value.clone());
            }
        }
    }
}

impl CatalogParser for WebFormsParser {
    fn parse_state(&self, body: &str) -> ProtocolResult<IndexMap<String, String>> {
        let mut fields = IndexMap::new();
        for tag in self.input_tag.find_iter(body) {
            let tag = tag.as_str();
            if Self::attr(tag, "type").as_deref() != Some("hidden") {
                continue;
            }
            let Some(name) = Self::attr(tag, "name") else {
                continue;
            };
            let value = Self::attr(tag, "value").unwrap_or_default();
            fields.insert(name, value);
        }

        for critical in &self.profile.critical_fields {
            if !fields.contains_key(critical) {
                return Err(ProtocolError::MalformedResponse {
                    reason: format!("hidden field {critical} not found"),
                });
            }
        }

        Ok(fields)
    }

    fn parse_results(&self, body: &str) -> ProtocolResult<ResultsPage> {
        let mut page = ResultsPage {
            next_page: self.next_page_target(body),
            select_record: self.record_link_target(body),
            ..Default::default()
        };

        // No grid at all is a valid empty result, not a protocol error.
        let Some(grid) = self.table_body(body, &self.profile.results_table_id) else {
            return Ok(page);
        };

        for row in self.row.captures_iter(grid) {
            let Some(first_cell) = self.cell.captures_iter(&row[1]).next() else {
                continue;
            };
            let text = self.text(&first_cell[1]);
            if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
                page.identifiers.push(Identifier::new(text));
            }
        }

        Ok(page)
    }

    fn parse_record(&self, body: &str, id: &Identifier) -> ProtocolResult<Record> {
        let mut record = Record::new(id.clone());
        record.set(self.profile.id_column.clone(), id.as_str());

        for table_id in &self.profile.detail_tables {
            self.parse_detail_table(body, table_id, &mut record);
        }
        for section in &self.profile.text_sections {
            self.parse_text_section(body, section, &mut record);
        }
        for table in &self.profile.history_tables {
            self.parse_history_table(body, table, &mut record);
        }

        Ok(record)
    }

    fn empty_record(&self, id: &Identifier) -> Record {
        let mut record = Record::new(id.clone());
        record.set(self.profile.id_column.clone(), id.as_str());
        record
    }
}
