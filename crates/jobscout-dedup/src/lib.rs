//! Fuzzy deduplication across sources and repost detection.
//!
//! Every listing gets a derived `company|title|location` fuzzy key built from
//! three normalizers. Batch dedup collapses near-identical keys within one
//! scrape run, the seen-before filter drops listings already persisted, and
//! the repost detector flags company+title pairs reappearing inside a rolling
//! window without removing them.

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use jobscout_core::JobListing;
use strsim::normalized_levenshtein;
use tracing::{debug, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobscout-dedup";

/// Similarity percentage at or above which two fuzzy keys are the same posting.
pub const FUZZY_THRESHOLD: f64 = 85.0;
/// Company-segment threshold for repost detection. Stricter than the key
/// threshold: a repost must clearly be the same employer.
pub const REPOST_COMPANY_THRESHOLD: f64 = 90.0;
/// Title-segment threshold for repost detection.
pub const REPOST_TITLE_THRESHOLD: f64 = 85.0;
/// Trailing window, in days of scrape time, for repost detection.
pub const REPOST_WINDOW_DAYS: i64 = 30;

/// Segment separator inside a fuzzy key. Stripped by every normalizer, so it
/// can never occur inside a segment.
pub const KEY_DELIMITER: char = '|';

/// Legal-entity and generic-business suffixes dropped from company names.
/// Matched as whole tokens after punctuation stripping.
const COMPANY_SUFFIXES: &[&str] = &[
    "inc",
    "llc",
    "corp",
    "corporation",
    "ltd",
    "limited",
    "co",
    "company",
    "technologies",
    "technology",
    "tech",
    "labs",
    "lab",
    "group",
    "holdings",
    "solutions",
    "services",
];

const LA_KEYWORDS: &[&str] = &[
    "los angeles",
    "la",
    "beverly hills",
    "santa monica",
    "culver city",
    "playa vista",
    "venice",
    "el segundo",
];
const SF_KEYWORDS: &[&str] = &[
    "san francisco",
    "sf",
    "bay area",
    "palo alto",
    "mountain view",
    "menlo park",
    "sunnyvale",
    "oakland",
    "san jose",
];
const NYC_KEYWORDS: &[&str] = &["new york", "nyc", "manhattan", "brooklyn"];

/// Drops everything except alphanumerics, underscores, and whitespace.
fn strip_punctuation(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect()
}

/// Normalize a company name for comparison: lowercase, strip punctuation,
/// drop legal-entity suffix tokens, collapse whitespace.
pub fn normalize_company(name: &str) -> String {
    let stripped = strip_punctuation(&name.to_lowercase());
    stripped
        .split_whitespace()
        .filter(|token| !COMPANY_SUFFIXES.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalize a job title for comparison. The ampersand becomes "and" before
/// punctuation stripping, so "Ops & Strategy" and "Ops and Strategy" agree.
pub fn normalize_title(title: &str) -> String {
    let lowered = title.to_lowercase().replace('&', "and");
    let stripped = strip_punctuation(&lowered);
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalize a location to a city-level tag. Metro aliases are matched by
/// substring containment in LA -> SF -> NY priority order; anything else
/// passes through lowercased and trimmed.
pub fn normalize_location(location: &str) -> String {
    let lowered = location.to_lowercase().trim().to_string();
    for (keywords, tag) in [
        (LA_KEYWORDS, "los_angeles"),
        (SF_KEYWORDS, "san_francisco"),
        (NYC_KEYWORDS, "new_york"),
    ] {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return tag.to_string();
        }
    }
    lowered
}

/// Build the composite identity key for a listing. Pure; does not mutate.
pub fn generate_fuzzy_key(listing: &JobListing) -> String {
    let company = normalize_company(&listing.company);
    let title = normalize_title(&listing.title);
    let location = normalize_location(&listing.location);
    format!("{company}{KEY_DELIMITER}{title}{KEY_DELIMITER}{location}")
}

/// Edit-distance similarity in `[0, 100]`. Symmetric, `similarity(a, a) == 100`,
/// and two empty strings count as identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(a, b) * 100.0
}

/// Integer heuristic for how much usable data a listing carries (max 10).
/// Used as the tie-break when merging duplicates.
pub fn completeness_score(listing: &JobListing) -> u32 {
    let mut score = 0;
    if listing.description.len() > 100 {
        score += 3;
    }
    if listing.salary_min.is_some() {
        score += 2;
    }
    if listing.salary_max.is_some() {
        score += 2;
    }
    if listing.experience_required.as_deref().is_some_and(|s| !s.is_empty()) {
        score += 1;
    }
    if listing.date_posted.as_deref().is_some_and(|s| !s.is_empty()) {
        score += 1;
    }
    if listing.company_industry.as_deref().is_some_and(|s| !s.is_empty()) {
        score += 1;
    }
    score
}

/// A fuzzy key from the trailing repost window.
#[derive(Debug, Clone, PartialEq)]
pub struct RecentKey {
    pub fuzzy_key: String,
    pub listing_id: Uuid,
    pub scraped_at: DateTime<Utc>,
}

/// Read-only view of previously persisted listings, supplied by the store.
///
/// `recent_fuzzy_keys` must return entries ordered most-recent-first by
/// scrape time: repost detection records the first match, so the newest
/// matching entry wins when several qualify.
pub trait ListingHistory {
    fn historical_fuzzy_keys(&self) -> Result<HashMap<String, Uuid>>;
    fn url_exists(&self, url: &str) -> Result<bool>;
    fn recent_fuzzy_keys(&self, window_days: i64) -> Result<Vec<RecentKey>>;
}

/// Collapse duplicates within one scrape run, keeping at most one listing per
/// similarity cluster. Assigns fuzzy keys in place before comparing.
///
/// A cluster's comparison key is fixed when its first member arrives; a more
/// complete listing replaces the representative without rewriting the key, so
/// cluster membership stays stable for later inputs.
pub fn deduplicate_batch(mut listings: Vec<JobListing>) -> Vec<JobListing> {
    if listings.is_empty() {
        return listings;
    }

    for listing in &mut listings {
        listing.fuzzy_key = Some(generate_fuzzy_key(listing));
    }

    let input_count = listings.len();
    let mut unique: Vec<JobListing> = Vec::new();
    let mut seen_keys: Vec<String> = Vec::new();

    'next_listing: for listing in listings {
        let key = listing.fuzzy_key.clone().unwrap_or_default();
        for (idx, seen_key) in seen_keys.iter().enumerate() {
            if similarity(&key, seen_key) >= FUZZY_THRESHOLD {
                if completeness_score(&listing) > completeness_score(&unique[idx]) {
                    unique[idx] = listing;
                }
                continue 'next_listing;
            }
        }
        seen_keys.push(key);
        unique.push(listing);
    }

    let removed = input_count - unique.len();
    if removed > 0 {
        info!(
            input = input_count,
            output = unique.len(),
            removed,
            "batch deduplication collapsed duplicates"
        );
    }
    unique
}

/// Drop listings already persisted from prior runs: exact URL match first,
/// then a fuzzy-key scan over the all-time history.
pub fn filter_already_seen(
    listings: Vec<JobListing>,
    history: &dyn ListingHistory,
) -> Result<Vec<JobListing>> {
    let input_count = listings.len();
    let existing_keys = history.historical_fuzzy_keys()?;

    let mut fresh = Vec::new();
    'candidates: for listing in listings {
        if history.url_exists(&listing.url)? {
            continue;
        }
        let key = listing.fuzzy_key.as_deref().unwrap_or_default();
        for existing_key in existing_keys.keys() {
            if similarity(key, existing_key) >= FUZZY_THRESHOLD {
                continue 'candidates;
            }
        }
        fresh.push(listing);
    }

    info!(
        input = input_count,
        output = fresh.len(),
        already_seen = input_count - fresh.len(),
        "already-seen filter"
    );
    Ok(fresh)
}

/// Flag listings whose company+title reappears within the repost window.
///
/// Location is ignored: a remote repost may carry a different city. Matched
/// listings stay in the output; the flag is a signal, not a removal cause.
pub fn detect_reposts(
    mut listings: Vec<JobListing>,
    history: &dyn ListingHistory,
) -> Result<Vec<JobListing>> {
    let recent = history.recent_fuzzy_keys(REPOST_WINDOW_DAYS)?;
    let mut reposts_found = 0usize;

    for listing in &mut listings {
        let key = match &listing.fuzzy_key {
            Some(key) => key.clone(),
            None => generate_fuzzy_key(listing),
        };
        let segments: Vec<&str> = key.split(KEY_DELIMITER).collect();
        if segments.len() < 2 {
            continue;
        }
        for entry in &recent {
            let recent_segments: Vec<&str> = entry.fuzzy_key.split(KEY_DELIMITER).collect();
            if recent_segments.len() < 2 {
                continue;
            }
            let company_sim = similarity(segments[0], recent_segments[0]);
            let title_sim = similarity(segments[1], recent_segments[1]);
            if company_sim >= REPOST_COMPANY_THRESHOLD && title_sim >= REPOST_TITLE_THRESHOLD {
                listing.is_repost = true;
                listing.original_listing_id = Some(entry.listing_id);
                reposts_found += 1;
                debug!(
                    company = %listing.company,
                    title = %listing.title,
                    original = %entry.listing_id,
                    "repost detected"
                );
                break;
            }
        }
    }

    if reposts_found > 0 {
        info!(reposts_found, "reposts flagged and kept as a positive signal");
    }
    Ok(listings)
}
