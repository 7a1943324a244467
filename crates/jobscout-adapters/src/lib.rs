//! Job-board source adapters.
//!
//! Two adapter shapes cover the boards this pipeline scrapes: CSS-selector
//! driven HTML boards and JSON search APIs. Each adapter is a configuration
//! of one of those shapes; parsing tolerates missing fields and skips cards
//! without a title or link rather than failing the page.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobscout_core::JobListing;
use jobscout_storage::PageFetcher;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobscout-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingTarget {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] jobscout_storage::FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait JobBoardAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;

    async fn fetch_listing(
        &self,
        http: &PageFetcher,
        ctx: &ScrapeContext,
        targets: &[ListingTarget],
    ) -> Result<Vec<FetchedPage>, AdapterError>;

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<JobListing>, AdapterError>;
}

/// CSS selectors locating listing fields within one job card. An empty
/// selector means the board does not expose that field.
#[derive(Debug, Clone, Copy)]
pub struct BoardSelectors {
    pub card: &'static str,
    pub title: &'static str,
    pub link: &'static str,
    pub company: &'static str,
    pub location: &'static str,
    pub description: &'static str,
    pub salary: &'static str,
    pub date_posted: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct HtmlBoardAdapter {
    source_id: &'static str,
    base_url: &'static str,
    selectors: BoardSelectors,
}

/// JSON paths locating listing fields in a jobs-API response.
#[derive(Debug, Clone, Copy)]
pub struct JsonFieldPaths {
    pub results: &'static [&'static str],
    pub title: &'static [&'static str],
    pub company: &'static [&'static str],
    pub location: &'static [&'static str],
    pub description: &'static [&'static str],
    pub url: &'static [&'static str],
    pub date_posted: &'static [&'static str],
    pub salary_text: &'static [&'static str],
}

#[derive(Debug, Clone, Copy)]
pub struct JsonApiAdapter {
    source_id: &'static str,
    paths: JsonFieldPaths,
}

fn parse_css(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Message(e.to_string()))
}

fn text_or_none(value: String) -> Option<String> {
    let trimmed = value.trim().to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn first_text(scope: &ElementRef, selector: &str) -> Result<Option<String>, AdapterError> {
    if selector.is_empty() {
        return Ok(None);
    }
    let sel = parse_css(selector)?;
    Ok(scope
        .select(&sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>())))
}

fn first_attr(
    scope: &ElementRef,
    selector: &str,
    attr: &str,
) -> Result<Option<String>, AdapterError> {
    if selector.is_empty() {
        return Ok(None);
    }
    let sel = parse_css(selector)?;
    Ok(scope
        .select(&sel)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(|s| text_or_none(s.to_string())))
}

fn absolutize_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    let base = base_url.trim_end_matches('/');
    if href.starts_with('/') {
        format!("{base}{href}")
    } else {
        format!("{base}/{href}")
    }
}

/// Pull dollar amounts out of free salary text. Handles thousands separators
/// and the "k" shorthand ("$80K - $100K", "$95,000").
fn extract_salary_numbers(text: &str) -> Vec<f64> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch.is_ascii_digit() {
            current.push(ch);
            continue;
        }
        if ch == ','
            && !current.is_empty()
            && chars.peek().is_some_and(|c| c.is_ascii_digit())
        {
            continue;
        }
        if !current.is_empty() {
            if let Ok(mut value) = current.parse::<f64>() {
                if ch == 'k' || ch == 'K' {
                    value *= 1000.0;
                }
                out.push(value);
            }
            current.clear();
        }
    }
    if !current.is_empty() {
        if let Ok(value) = current.parse::<f64>() {
            out.push(value);
        }
    }
    out
}

pub fn parse_salary_range(text: &str) -> (Option<f64>, Option<f64>) {
    let numbers = extract_salary_numbers(text);
    let min = numbers.first().copied();
    let max = numbers.get(1).copied().or(min);
    (min, max)
}

fn json_path<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn json_str(value: &JsonValue, path: &[&str]) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    json_path(value, path)?.as_str().map(ToString::to_string)
}

impl HtmlBoardAdapter {
    fn parse_document(&self, page: &FetchedPage) -> Result<Vec<JobListing>, AdapterError> {
        let html = String::from_utf8_lossy(&page.body);
        let document = Html::parse_document(&html);
        let card_sel = parse_css(self.selectors.card)?;

        let mut listings = Vec::new();
        let mut seen_urls = HashSet::new();
        for card in document.select(&card_sel) {
            let Some(title) = first_text(&card, self.selectors.title)? else {
                continue;
            };
            if title.len() < 2 {
                continue;
            }
            let Some(href) = first_attr(&card, self.selectors.link, "href")? else {
                continue;
            };
            let url = absolutize_url(self.base_url, &href);
            if !seen_urls.insert(url.clone()) {
                continue;
            }

            let company = first_text(&card, self.selectors.company)?.unwrap_or_default();
            let location = first_text(&card, self.selectors.location)?.unwrap_or_default();
            let description = first_text(&card, self.selectors.description)?.unwrap_or_default();

            let mut listing =
                JobListing::new(title, company, location, description, url, self.source_id);
            listing.date_scraped = page.fetched_at;
            if let Some(salary_text) = first_text(&card, self.selectors.salary)? {
                let (min, max) = parse_salary_range(&salary_text);
                listing.salary_min = min;
                listing.salary_max = max;
            }
            listing.date_posted = first_text(&card, self.selectors.date_posted)?;
            listings.push(listing);
        }
        Ok(listings)
    }
}

#[async_trait]
impl JobBoardAdapter for HtmlBoardAdapter {
    fn source_id(&self) -> &'static str {
        self.source_id
    }

    async fn fetch_listing(
        &self,
        http: &PageFetcher,
        ctx: &ScrapeContext,
        targets: &[ListingTarget],
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        let mut pages = Vec::new();
        for target in targets {
            let resp = http.fetch_bytes(ctx.run_id, self.source_id, &target.url).await?;
            pages.push(FetchedPage {
                url: resp.final_url,
                content_type: "text/html".to_string(),
                body: resp.body,
                fetched_at: ctx.fetched_at,
            });
        }
        Ok(pages)
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<JobListing>, AdapterError> {
        self.parse_document(page)
    }
}

impl JsonApiAdapter {
    fn parse_payload(&self, page: &FetchedPage) -> Result<Vec<JobListing>, AdapterError> {
        let value: JsonValue = serde_json::from_slice(&page.body)
            .map_err(|e| AdapterError::Message(format!("invalid JSON payload: {e}")))?;
        let Some(results) = json_path(&value, self.paths.results).and_then(|v| v.as_array())
        else {
            return Ok(Vec::new());
        };

        let mut listings = Vec::new();
        for item in results {
            let Some(title) = json_str(item, self.paths.title) else {
                continue;
            };
            let Some(url) = json_str(item, self.paths.url) else {
                continue;
            };
            let company = json_str(item, self.paths.company).unwrap_or_default();
            let location = json_str(item, self.paths.location).unwrap_or_default();
            let description = json_str(item, self.paths.description).unwrap_or_default();

            let mut listing =
                JobListing::new(title, company, location, description, url, self.source_id);
            listing.date_scraped = page.fetched_at;
            listing.date_posted = json_str(item, self.paths.date_posted);
            if let Some(salary_text) = json_str(item, self.paths.salary_text) {
                let (min, max) = parse_salary_range(&salary_text);
                listing.salary_min = min;
                listing.salary_max = max;
            }
            listings.push(listing);
        }
        Ok(listings)
    }
}

#[async_trait]
impl JobBoardAdapter for JsonApiAdapter {
    fn source_id(&self) -> &'static str {
        self.source_id
    }

    async fn fetch_listing(
        &self,
        http: &PageFetcher,
        ctx: &ScrapeContext,
        targets: &[ListingTarget],
    ) -> Result<Vec<FetchedPage>, AdapterError> {
        let mut pages = Vec::new();
        for target in targets {
            let resp = http.fetch_bytes(ctx.run_id, self.source_id, &target.url).await?;
            pages.push(FetchedPage {
                url: resp.final_url,
                content_type: "application/json".to_string(),
                body: resp.body,
                fetched_at: ctx.fetched_at,
            });
        }
        Ok(pages)
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<JobListing>, AdapterError> {
        self.parse_payload(page)
    }
}

/// SerpAPI google_jobs response shape, shared by the LinkedIn and Indeed
/// API-backed sources.
const SERPAPI_PATHS: JsonFieldPaths = JsonFieldPaths {
    results: &["jobs_results"],
    title: &["title"],
    company: &["company_name"],
    location: &["location"],
    description: &["description"],
    url: &["share_link"],
    date_posted: &["detected_extensions", "posted_at"],
    salary_text: &["detected_extensions", "salary"],
};

pub fn yc_adapter() -> HtmlBoardAdapter {
    HtmlBoardAdapter {
        source_id: "yc",
        base_url: "https://www.workatastartup.com",
        selectors: BoardSelectors {
            card: "div.job-listing",
            title: "a.job-title",
            link: "a.job-title",
            company: "a.company-name",
            location: "span.location",
            description: "div.job-summary",
            salary: "span.salary",
            date_posted: "span.posted-date",
        },
    }
}

pub fn builtin_adapter() -> HtmlBoardAdapter {
    HtmlBoardAdapter {
        source_id: "builtin",
        base_url: "https://builtin.com",
        selectors: BoardSelectors {
            card: "div[data-id=\"job-card\"]",
            title: "h2 a",
            link: "h2 a",
            company: "div.company-title",
            location: "div.job-location",
            description: "div.job-description",
            salary: "div.salary-range",
            date_posted: "div.posted",
        },
    }
}

pub fn startups_gallery_adapter() -> HtmlBoardAdapter {
    HtmlBoardAdapter {
        source_id: "startups-gallery",
        base_url: "https://startups.gallery",
        selectors: BoardSelectors {
            card: "li.job",
            title: "span.title",
            link: "a",
            company: "span.company",
            location: "span.location",
            description: "p.blurb",
            salary: "",
            date_posted: "",
        },
    }
}

pub fn linkedin_api_adapter() -> JsonApiAdapter {
    JsonApiAdapter {
        source_id: "linkedin-api",
        paths: SERPAPI_PATHS,
    }
}

pub fn indeed_api_adapter() -> JsonApiAdapter {
    JsonApiAdapter {
        source_id: "indeed-api",
        paths: SERPAPI_PATHS,
    }
}

pub fn adapter_for_source(source_id: &str) -> Option<Box<dyn JobBoardAdapter>> {
    match source_id {
        "yc" => Some(Box::new(yc_adapter())),
        "builtin" => Some(Box::new(builtin_adapter())),
        "startups-gallery" => Some(Box::new(startups_gallery_adapter())),
        "linkedin-api" => Some(Box::new(linkedin_api_adapter())),
        "indeed-api" => Some(Box::new(indeed_api_adapter())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(content_type: &str, body: &str) -> FetchedPage {
        FetchedPage {
            url: "https://example.com/jobs".to_string(),
            content_type: content_type.to_string(),
            body: body.as_bytes().to_vec(),
            fetched_at: Utc::now(),
        }
    }

    const YC_FIXTURE: &str = r#"
        <html><body>
          <div class="job-listing">
            <a class="job-title" href="/companies/acme/jobs/ops-associate">Ops Associate</a>
            <a class="company-name" href="/companies/acme">Acme Inc.</a>
            <span class="location">Santa Monica, CA</span>
            <div class="job-summary">Run operations for a seed-stage startup.</div>
            <span class="salary">$80K - $100K</span>
            <span class="posted-date">3 days ago</span>
          </div>
          <div class="job-listing">
            <a class="job-title" href="/companies/umbrella/jobs/chief-of-staff">Chief of Staff</a>
            <a class="company-name" href="/companies/umbrella">Umbrella</a>
            <span class="location">Remote</span>
          </div>
          <div class="job-listing">
            <a class="job-title" href="/companies/acme/jobs/ops-associate">Ops Associate</a>
          </div>
        </body></html>
    "#;

    #[test]
    fn html_board_parses_cards_and_skips_repeated_links() {
        let adapter = yc_adapter();
        let listings = adapter.parse_listing(&page("text/html", YC_FIXTURE)).unwrap();
        assert_eq!(listings.len(), 2);

        let first = &listings[0];
        assert_eq!(first.title, "Ops Associate");
        assert_eq!(first.company, "Acme Inc.");
        assert_eq!(first.location, "Santa Monica, CA");
        assert_eq!(
            first.url,
            "https://www.workatastartup.com/companies/acme/jobs/ops-associate"
        );
        assert_eq!(first.salary_min, Some(80_000.0));
        assert_eq!(first.salary_max, Some(100_000.0));
        assert_eq!(first.date_posted.as_deref(), Some("3 days ago"));
        assert_eq!(first.source, "yc");

        let second = &listings[1];
        assert_eq!(second.company, "Umbrella");
        assert!(second.salary_min.is_none());
    }

    #[test]
    fn html_board_skips_cards_without_titles() {
        let adapter = yc_adapter();
        let html = r#"<div class="job-listing"><span class="location">LA</span></div>"#;
        let listings = adapter.parse_listing(&page("text/html", html)).unwrap();
        assert!(listings.is_empty());
    }

    const SERPAPI_FIXTURE: &str = r#"{
        "jobs_results": [
            {
                "title": "Business Operations Associate",
                "company_name": "Vector",
                "location": "New York, NY",
                "description": "Own GTM operations end to end.",
                "share_link": "https://www.google.com/search?jobs=abc123",
                "detected_extensions": {"posted_at": "2 days ago", "salary": "$90,000 a year"}
            },
            {"company_name": "No Title Co"}
        ]
    }"#;

    #[test]
    fn json_api_parses_serpapi_results() {
        let adapter = linkedin_api_adapter();
        let listings = adapter
            .parse_listing(&page("application/json", SERPAPI_FIXTURE))
            .unwrap();
        assert_eq!(listings.len(), 1);

        let listing = &listings[0];
        assert_eq!(listing.title, "Business Operations Associate");
        assert_eq!(listing.company, "Vector");
        assert_eq!(listing.date_posted.as_deref(), Some("2 days ago"));
        assert_eq!(listing.salary_min, Some(90_000.0));
        assert_eq!(listing.source, "linkedin-api");
    }

    #[test]
    fn json_api_tolerates_missing_results_array() {
        let adapter = indeed_api_adapter();
        let listings = adapter
            .parse_listing(&page("application/json", r#"{"error": "rate limited"}"#))
            .unwrap();
        assert!(listings.is_empty());
    }

    #[test]
    fn salary_parsing_handles_shorthand_and_separators() {
        assert_eq!(parse_salary_range("$80K - $100K"), (Some(80_000.0), Some(100_000.0)));
        assert_eq!(parse_salary_range("$95,000"), (Some(95_000.0), Some(95_000.0)));
        assert_eq!(parse_salary_range("competitive"), (None, None));
    }

    #[test]
    fn urls_are_absolutized_against_the_board() {
        assert_eq!(
            absolutize_url("https://builtin.com", "/job/123"),
            "https://builtin.com/job/123"
        );
        assert_eq!(
            absolutize_url("https://builtin.com/", "job/123"),
            "https://builtin.com/job/123"
        );
        assert_eq!(
            absolutize_url("https://builtin.com", "https://other.com/x"),
            "https://other.com/x"
        );
    }

    #[test]
    fn registry_knows_every_configured_source() {
        for source in ["yc", "builtin", "startups-gallery", "linkedin-api", "indeed-api"] {
            assert!(adapter_for_source(source).is_some(), "missing adapter for {source}");
        }
        assert!(adapter_for_source("wellfound").is_none());
    }
}
