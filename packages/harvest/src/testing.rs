//! Testing utilities: a scripted, stateful mock catalog.
//!
//! [`MockCatalog`] implements [`Transport`] and emulates a WebForms-style
//! server: every response issues a fresh `__VIEWSTATE` that encodes where
//! the conversation stands, and postbacks are interpreted the way the real
//! server would interpret them. Tests drive the full client stack
//! (builder, parser, traversal, harvester) without a network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::FetchResult;
use crate::traits::transport::{Response, Transport};
use crate::types::Identifier;
use crate::webforms::SiteProfile;

/// Record of one request the mock served.
#[derive(Debug, Clone)]
pub enum MockCall {
    /// Landing page GET
    Landing,
    /// Term search postback
    Search { term: String },
    /// Next-page postback
    NextPage { term: String, page: u32 },
    /// Identifier lookup postback
    RecordLookup { id: Identifier },
    /// Detail selection postback
    Detail { id: Identifier },
}

#[derive(Default)]
struct MockState {
    /// Latest token issued per conversation key; posting an older one is a
    /// server-side error, exactly like the real thing
    latest_tokens: HashMap<String, String>,

    /// Remaining search failures per term
    search_failures: HashMap<String, u32>,

    /// Pages that permanently fail, keyed by (term, 1-based page)
    failed_pages: HashMap<(String, u32), ()>,

    /// Remaining detail failures per identifier
    detail_failures: HashMap<Identifier, u32>,

    /// Record lookups served per identifier
    lookups: HashMap<Identifier, u32>,

    calls: Vec<MockCall>,
    token_counter: u64,
}

/// A scripted postback catalog.
#[derive(Default)]
pub struct MockCatalog {
    /// Result pages per term, outermost index = page
    terms: HashMap<String, Vec<Vec<String>>>,

    /// Terms whose grids never report a final page; past the scripted pages
    /// the server keeps re-serving the last one
    stalling: std::collections::HashSet<String>,

    /// Detail fields per identifier
    records: HashMap<Identifier, Vec<(String, String)>>,

    state: Arc<Mutex<MockState>>,
}

impl MockCatalog {
    /// Search endpoint served by every mock.
    pub const SEARCH_URL: &'static str = "http://catalog.test/search.aspx";

    /// Details endpoint served by every mock.
    pub const DETAILS_URL: &'static str = "http://catalog.test/details.aspx";

    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// A site profile pointed at this mock.
    pub fn profile(&self) -> SiteProfile {
        SiteProfile::new(Self::SEARCH_URL, Self::DETAILS_URL)
    }

    /// Script a term's result pages.
    ///
    /// An empty page list renders a results page with no grid at all.
    pub fn with_term(mut self, term: &str, pages: Vec<Vec<&str>>) -> Self {
        let pages = pages
            .into_iter()
            .map(|page| page.into_iter().map(String::from).collect())
            .collect();
        self.terms.insert(term.to_string(), pages);
        self
    }

    /// Script a detail field for an identifier.
    ///
    /// Identifiers discovered via [`with_term`](Self::with_term) that were
    /// never given fields still resolve, with a default Name field.
    pub fn with_record_field(mut self, id: &str, name: &str, value: &str) -> Self {
        self.records
            .entry(Identifier::new(id))
            .or_default()
            .push((name.to_string(), value.to_string()));
        self
    }

    /// Make a term's grid stall: the next-page control stays enabled and
    /// pages past the script repeat the last one.
    pub fn with_stalling_term(mut self, term: &str, pages: Vec<Vec<&str>>) -> Self {
        self.stalling.insert(term.to_string());
        self.with_term(term, pages)
    }

    /// Fail the next `times` search postbacks for a term.
    pub fn fail_search_times(self, term: &str, times: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .search_failures
            .insert(term.to_string(), times);
        self
    }

    /// Fail every search postback for a term.
    pub fn fail_term(self, term: &str) -> Self {
        self.fail_search_times(term, u32::MAX)
    }

    /// Permanently fail one of a term's pages (1-based).
    pub fn fail_page(self, term: &str, page: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .failed_pages
            .insert((term.to_string(), page), ());
        self
    }

    /// Fail the next detail postback for an identifier, then succeed.
    pub fn fail_detail_once(self, id: &str) -> Self {
        self.fail_detail_times(id, 1)
    }

    /// Fail the next `times` detail postbacks for an identifier.
    pub fn fail_detail_times(self, id: &str, times: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .detail_failures
            .insert(Identifier::new(id), times);
        self
    }

    /// Fail every detail postback for an identifier.
    pub fn fail_detail(self, id: &str) -> Self {
        self.fail_detail_times(id, u32::MAX)
    }

    /// Every request served so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Total requests served.
    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    /// Identifier lookups served for one identifier.
    pub fn lookup_count(&self, id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .lookups
            .get(&Identifier::new(id))
            .copied()
            .unwrap_or(0)
    }

    /// Identifier lookups served across all identifiers.
    pub fn total_lookups(&self) -> u32 {
        self.state.lock().unwrap().lookups.values().sum()
    }

    fn issue_token(state: &mut MockState, key: &str) -> String {
        state.token_counter += 1;
        let token = format!("vs:{key}:{}", state.token_counter);
        state.latest_tokens.insert(key.to_string(), token.clone());
        token
    }

    fn render_page(token: &str, grid: Option<String>) -> String {
        format!(
            r#"<html><body><form method="post" action="./search.aspx">
<input type="hidden" name="__EVENTTARGET" id="__EVENTTARGET" value="" />
<input type="hidden" name="__VIEWSTATE" id="__VIEWSTATE" value="{token}" />
<input type="hidden" name="__VIEWSTATEGENERATOR" value="CA0B0334" />
<input type="hidden" name="__EVENTVALIDATION" value="/wEWAg==" />
{}
</form></body></html>"#,
            grid.unwrap_or_default()
        )
    }

    fn render_grid(ids: &[String], has_next: bool) -> String {
        let mut grid = String::from(r#"<table id="MainContent_gvResults"><tr><th>ID</th><th>Name</th></tr>"#);
        for (index, id) in ids.iter().enumerate() {
            grid.push_str(&format!(
                r#"<tr><td>{id}</td><td><a id="MainContent_gvResults_lnkSelect_{index}" href="javascript:__doPostBack('select${id}','')">NAME {id}</a></td></tr>"#
            ));
        }
        grid.push_str("</table>");

        let disabled = if has_next { "" } else { r#" disabled="disabled""# };
        grid.push_str(&format!(
            r#"<input type="submit" name="ctl00$MainContent$gvResults$btnNext" value="Next"{disabled} />"#
        ));
        grid
    }

    fn render_detail(&self, token: &str, id: &Identifier) -> String {
        let default_fields = vec![("Name".to_string(), format!("NAME {id}"))];
        let fields = self.records.get(id).unwrap_or(&default_fields);

        let mut table = String::from(r#"<table id="MainContent_DetailsView1">"#);
        for (name, value) in fields {
            table.push_str(&format!("<tr><td>{name}:</td><td>{value}</td></tr>"));
        }
        table.push_str("</table>");
        Self::render_page(token, Some(table))
    }

    fn serve_term_page(&self, state: &mut MockState, term: &str, page: u32) -> Response {
        if state.failed_pages.contains_key(&(term.to_string(), page)) {
            return Response::new(500, Self::SEARCH_URL, "<html>server error</html>");
        }

        let pages = self.terms.get(term);
        let stalls = self.stalling.contains(term);
        let token = Self::issue_token(state, &format!("term:{term}:{page}"));

        let grid = pages.and_then(|pages| {
            let mut index = (page - 1) as usize;
            if stalls && !pages.is_empty() {
                index = index.min(pages.len() - 1);
            }
            pages.get(index).map(|ids| {
                let has_next = stalls || index + 1 < pages.len();
                Self::render_grid(ids, has_next)
            })
        });

        Response::new(200, Self::SEARCH_URL, Self::render_page(&token, grid))
    }

    fn field<'a>(fields: &'a [(String, String)], name: &str) -> Option<&'a str> {
        fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

#[async_trait]
impl Transport for MockCatalog {
    async fn get(&self, url: &str) -> FetchResult<Response> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::Landing);
        let token = Self::issue_token(&mut state, "landing");
        let _ = url;
        Ok(Response::new(
            200,
            Self::SEARCH_URL,
            Self::render_page(&token, None),
        ))
    }

    async fn post_form(&self, url: &str, fields: &[(String, String)]) -> FetchResult<Response> {
        let profile = self.profile();
        let mut state = self.state.lock().unwrap();

        let viewstate = Self::field(fields, "__VIEWSTATE").unwrap_or_default().to_string();
        let event_target = Self::field(fields, "__EVENTTARGET");

        // Detail endpoint: row-selection postbacks only.
        if url == Self::DETAILS_URL {
            let Some(target) = event_target.and_then(|t| t.strip_prefix("select$")) else {
                return Ok(Response::new(500, url, "<html>bad postback</html>"));
            };
            let id = Identifier::new(target);
            state.calls.push(MockCall::Detail { id: id.clone() });

            let expected = state.latest_tokens.get(&format!("record:{id}"));
            if expected != Some(&viewstate) {
                return Ok(Response::new(500, url, "<html>state mismatch</html>"));
            }

            if let Some(remaining) = state.detail_failures.get_mut(&id) {
                if *remaining > 0 {
                    *remaining = remaining.saturating_sub(1);
                    return Ok(Response::new(500, url, "<html>server error</html>"));
                }
            }

            let token = Self::issue_token(&mut state, &format!("detail:{id}"));
            return Ok(Response::new(200, url, self.render_detail(&token, &id)));
        }

        // Term search.
        if let Some(term) = Self::field(fields, &profile.term_field) {
            let term = term.to_string();
            state.calls.push(MockCall::Search { term: term.clone() });

            if !viewstate.starts_with("vs:") {
                return Ok(Response::new(500, url, "<html>state mismatch</html>"));
            }
            if let Some(remaining) = state.search_failures.get_mut(&term) {
                if *remaining > 0 {
                    *remaining = remaining.saturating_sub(1);
                    return Ok(Response::new(500, url, "<html>server error</html>"));
                }
            }
            return Ok(self.serve_term_page(&mut state, &term, 1));
        }

        // Identifier lookup.
        if let Some(id) = Self::field(fields, &profile.record_field) {
            let id = Identifier::new(id);
            state.calls.push(MockCall::RecordLookup { id: id.clone() });
            *state.lookups.entry(id.clone()).or_insert(0) += 1;

            if !viewstate.starts_with("vs:") {
                return Ok(Response::new(500, url, "<html>state mismatch</html>"));
            }

            let token = Self::issue_token(&mut state, &format!("record:{id}"));
            let grid = self
                .records
                .contains_key(&id)
                .then(|| Self::render_grid(&[id.as_str().to_string()], false));
            return Ok(Response::new(200, url, Self::render_page(&token, grid)));
        }

        // Next-page postback: the conversation position lives in the token.
        if event_target.is_some() {
            let mut parts = viewstate.split(':');
            let (Some("vs"), Some("term"), Some(term), Some(page)) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Ok(Response::new(500, url, "<html>state mismatch</html>"));
            };
            let term = term.to_string();
            let page: u32 = page.parse().unwrap_or(0);

            let expected = state.latest_tokens.get(&format!("term:{term}:{page}"));
            if expected != Some(&viewstate) {
                return Ok(Response::new(500, url, "<html>state mismatch</html>"));
            }

            state.calls.push(MockCall::NextPage {
                term: term.clone(),
                page: page + 1,
            });
            return Ok(self.serve_term_page(&mut state, &term, page + 1));
        }

        Ok(Response::new(500, url, "<html>bad postback</html>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::parser::CatalogParser;
    use crate::webforms::WebFormsParser;

    #[tokio::test]
    async fn test_landing_page_parses() {
        let catalog = MockCatalog::new();
        let parser = WebFormsParser::new(catalog.profile());

        let response = catalog.get(MockCatalog::SEARCH_URL).await.unwrap();
        let fields = parser.parse_state(&response.body).unwrap();
        assert!(fields.contains_key("__VIEWSTATE"));
        assert!(fields.contains_key("__EVENTVALIDATION"));
    }

    #[tokio::test]
    async fn test_stale_token_is_rejected_server_side() {
        let catalog = MockCatalog::new().with_term("a", vec![vec!["1"], vec!["2"]]);
        let parser = WebFormsParser::new(catalog.profile());

        // Search once to learn the page-1 token.
        let landing = catalog.get(MockCatalog::SEARCH_URL).await.unwrap();
        let landing_fields = parser.parse_state(&landing.body).unwrap();
        let mut search_fields: Vec<(String, String)> = landing_fields.into_iter().collect();
        search_fields.push((
            "ctl00$MainContent$txtName".to_string(),
            "a".to_string(),
        ));
        let page1 = catalog
            .post_form(MockCatalog::SEARCH_URL, &search_fields)
            .await
            .unwrap();
        assert!(page1.is_success());

        // Posting the landing token (now stale) as a pagination postback
        // must be refused.
        let mut stale: Vec<(String, String)> = search_fields
            .iter()
            .filter(|(k, _)| k != "ctl00$MainContent$txtName")
            .cloned()
            .collect();
        for (k, v) in &mut stale {
            if k == "__EVENTTARGET" {
                *v = "ctl00$MainContent$gvResults$btnNext".to_string();
            }
        }
        let response = catalog
            .post_form(MockCatalog::SEARCH_URL, &stale)
            .await
            .unwrap();
        assert_eq!(response.status, 500);
    }
}
