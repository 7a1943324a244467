//! Core domain model for jobscout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobscout-core";

/// Raw job listing scraped from a source.
///
/// `fuzzy_key`, `is_repost`, and `original_listing_id` start empty and are
/// each written exactly once by the dedup pipeline before persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub url: String,
    pub source: String,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub experience_required: Option<String>,
    pub date_posted: Option<String>,
    pub company_industry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_html: Option<String>,
    pub date_scraped: DateTime<Utc>,
    pub fuzzy_key: Option<String>,
    pub is_repost: bool,
    pub original_listing_id: Option<Uuid>,
}

impl JobListing {
    pub fn new(
        title: impl Into<String>,
        company: impl Into<String>,
        location: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            company: company.into(),
            location: location.into(),
            description: description.into(),
            url: url.into(),
            source: source.into(),
            salary_min: None,
            salary_max: None,
            experience_required: None,
            date_posted: None,
            company_industry: None,
            raw_html: None,
            date_scraped: Utc::now(),
            fuzzy_key: None,
            is_repost: false,
            original_listing_id: None,
        }
    }
}

/// Venture-capital backing signal for a company. `backed_by_notable_vc` stays
/// `None` when enrichment could not decide either way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VcInfo {
    pub backed_by_notable_vc: Option<bool>,
    pub investors: Vec<String>,
    pub funding_stage: Option<String>,
    pub source: Option<String>,
}

/// Age indicator derived from a listing's posting date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Green,
    Yellow,
    Red,
    Black,
    Unknown,
}

impl Freshness {
    pub fn emoji(self) -> &'static str {
        match self {
            Freshness::Green => "\u{1F7E2}",
            Freshness::Yellow => "\u{1F7E1}",
            Freshness::Red => "\u{1F534}",
            Freshness::Black => "\u{26AB}",
            Freshness::Unknown => "\u{2753}",
        }
    }
}

/// A listing after relevance scoring, ready for the digest and spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredJob {
    pub listing: JobListing,
    pub score: f64,
    pub reasoning: String,
    pub matching_skills: Vec<String>,
    pub missing_requirements: Vec<String>,
    pub recommendation: String,
    pub vc_info: VcInfo,
    pub freshness: Freshness,
    pub is_repost: bool,
    pub date_scored: DateTime<Utc>,
}

impl ScoredJob {
    /// Unscored wrapper around a listing; the score hook fills in the rest.
    pub fn unscored(listing: JobListing) -> Self {
        let is_repost = listing.is_repost;
        Self {
            listing,
            score: 0.0,
            reasoning: String::new(),
            matching_skills: Vec::new(),
            missing_requirements: Vec::new(),
            recommendation: String::new(),
            vc_info: VcInfo::default(),
            freshness: Freshness::Unknown,
            is_repost,
            date_scored: Utc::now(),
        }
    }
}

/// Summary row recorded once per pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub run_date: DateTime<Utc>,
    pub source: String,
    pub listings_scraped: usize,
    pub listings_new: usize,
    pub listings_passed_filter: usize,
    pub listings_scored: usize,
    pub errors: Vec<String>,
    pub duration_seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_listing_starts_without_dedup_state() {
        let listing = JobListing::new(
            "Ops Associate",
            "Acme",
            "Los Angeles",
            "",
            "https://example.com/jobs/1",
            "yc",
        );
        assert!(listing.fuzzy_key.is_none());
        assert!(!listing.is_repost);
        assert!(listing.original_listing_id.is_none());
    }

    #[test]
    fn freshness_serializes_snake_case() {
        let json = serde_json::to_string(&Freshness::Green).unwrap();
        assert_eq!(json, "\"green\"");
    }
}
