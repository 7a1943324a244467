//! Pipeline orchestration: config, filters, freshness, staged runs, reports.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use arrow_array::{BooleanArray, Float64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field as ArrowField, Schema};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use jobscout_adapters::{adapter_for_source, JobBoardAdapter, ListingTarget, ScrapeContext};
use jobscout_core::{Freshness, JobListing, RunLog, ScoredJob};
use jobscout_dedup::{deduplicate_batch, detect_reposts, filter_already_seen};
use jobscout_storage::{ArtifactStore, FetcherConfig, ListingStore, PageFetcher};
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobscout-pipeline";

// ---------------------------------------------------------------------------
// Configuration

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workspace_root: PathBuf,
    pub store_path: PathBuf,
    pub artifacts_dir: PathBuf,
    pub preferences_path: PathBuf,
    pub scheduler_enabled: bool,
    pub cron_morning: String,
    pub cron_evening: String,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub serpapi_key: Option<String>,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            store_path: std::env::var("JOBSCOUT_STORE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data/listings.json")),
            artifacts_dir: std::env::var("JOBSCOUT_ARTIFACTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./artifacts")),
            preferences_path: std::env::var("JOBSCOUT_PREFERENCES")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./preferences.yaml")),
            scheduler_enabled: std::env::var("JOBSCOUT_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            cron_morning: std::env::var("JOBSCOUT_CRON_MORNING")
                .unwrap_or_else(|_| "0 8 * * *".to_string()),
            cron_evening: std::env::var("JOBSCOUT_CRON_EVENING")
                .unwrap_or_else(|_| "0 17 * * *".to_string()),
            user_agent: std::env::var("JOBSCOUT_USER_AGENT")
                .unwrap_or_else(|_| "jobscout/0.1".to_string()),
            http_timeout_secs: std::env::var("JOBSCOUT_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            serpapi_key: std::env::var("SERPAPI_KEY").ok().filter(|v| !v.is_empty()),
        }
    }

    /// Non-fatal configuration problems, logged at startup.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.serpapi_key.is_none() {
            warnings.push(
                "SERPAPI_KEY is not set; the linkedin-api and indeed-api sources will fail"
                    .to_string(),
            );
        }
        if !self.preferences_path.exists() {
            warnings.push(format!(
                "preferences file not found at {}",
                self.preferences_path.display()
            ));
        }
        warnings
    }
}

// ---------------------------------------------------------------------------
// Preferences (preferences.yaml)

#[derive(Debug, Clone, Deserialize)]
pub struct Preferences {
    pub candidate: CandidateInfo,
    pub target_roles: Vec<String>,
    pub locations: BTreeMap<String, LocationPrefs>,
    pub filters: FilterPrefs,
    pub positive_signals: SignalPrefs,
    #[serde(default)]
    pub notable_vcs: VcTiers,
    pub scoring: ScoringPrefs,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandidateInfo {
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationPrefs {
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilterPrefs {
    pub experience_max_years: u32,
    pub salary_min: f64,
    pub excluded_industries: Vec<String>,
    #[serde(default = "default_true")]
    pub remote_allowed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalPrefs {
    pub tools: Vec<String>,
    pub themes: Vec<String>,
    pub responsibilities: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VcTiers {
    #[serde(default)]
    pub tier_1: Vec<String>,
    #[serde(default)]
    pub tier_2: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringPrefs {
    #[serde(default)]
    pub vc_bonus: f64,
    #[serde(default)]
    pub freshness_thresholds: FreshnessThresholds,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FreshnessThresholds {
    pub green_days: i64,
    pub yellow_days: i64,
    pub red_days: i64,
}

impl Default for FreshnessThresholds {
    fn default() -> Self {
        Self {
            green_days: 7,
            yellow_days: 14,
            red_days: 21,
        }
    }
}

fn default_true() -> bool {
    true
}

impl Preferences {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Flat list of every configured location alias, lowercased.
    pub fn location_aliases(&self) -> Vec<String> {
        self.locations
            .values()
            .flat_map(|loc| loc.aliases.iter().map(|a| a.to_lowercase()))
            .collect()
    }

    pub fn notable_vcs(&self) -> Vec<String> {
        self.notable_vcs
            .tier_1
            .iter()
            .chain(self.notable_vcs.tier_2.iter())
            .map(|v| v.to_lowercase())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Source registry (sources.yaml)

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub listing_urls: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

// ---------------------------------------------------------------------------
// Hard filters

/// Rejection counts per filter, for the run summary log line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FilterStats {
    pub location: usize,
    pub experience: usize,
    pub salary: usize,
    pub industry: usize,
}

/// Pass/fail filters applied before any scoring. A listing that fails any
/// filter is excluded entirely.
pub fn apply_hard_filters(prefs: &Preferences, listings: Vec<JobListing>) -> Vec<JobListing> {
    let initial = listings.len();
    let aliases = prefs.location_aliases();
    let excluded_industries: Vec<String> = prefs
        .filters
        .excluded_industries
        .iter()
        .map(|k| k.to_lowercase())
        .collect();

    let mut stats = FilterStats::default();
    let mut passed = Vec::new();
    for listing in listings {
        if !check_location(&listing, &aliases, prefs.filters.remote_allowed) {
            stats.location += 1;
            continue;
        }
        if !check_experience(&listing, prefs.filters.experience_max_years) {
            stats.experience += 1;
            continue;
        }
        if !check_salary(&listing, prefs.filters.salary_min) {
            stats.salary += 1;
            continue;
        }
        if !check_industry_exclusion(&listing, &excluded_industries) {
            stats.industry += 1;
            continue;
        }
        passed.push(listing);
    }

    info!(
        initial,
        passed = passed.len(),
        location = stats.location,
        experience = stats.experience,
        salary = stats.salary,
        industry = stats.industry,
        "hard filters applied"
    );
    passed
}

fn check_location(listing: &JobListing, aliases: &[String], remote_allowed: bool) -> bool {
    let location = listing.location.to_lowercase();
    let description = listing.description.to_lowercase();
    let title = listing.title.to_lowercase();
    if remote_allowed
        && (location.contains("remote")
            || description.contains("remote")
            || title.contains("remote"))
    {
        return true;
    }
    let text = format!("{location} {description}");
    aliases.iter().any(|alias| text.contains(alias.as_str()))
}

fn check_experience(listing: &JobListing, max_years: u32) -> bool {
    let exp_text = listing.experience_required.as_deref().unwrap_or_default();
    let full_text = format!("{exp_text} {}", listing.description);
    match required_experience_years(&full_text) {
        Some(years) => years <= max_years,
        // No stated requirement is not held against the listing.
        None => true,
    }
}

/// Minimum years of experience demanded by free text like "5+ years of
/// experience" or "requires 3 yrs". Returns `None` when no requirement is
/// stated.
pub fn required_experience_years(text: &str) -> Option<u32> {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '+')
        .filter(|t| !t.is_empty())
        .collect();

    let mut min_years: Option<u32> = None;
    for (i, token) in tokens.iter().enumerate() {
        let digits = token.trim_end_matches('+');
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let Ok(years) = digits.parse::<u32>() else {
            continue;
        };
        // Large numbers are salary figures or dates, not year requirements.
        if years > 20 {
            continue;
        }
        let mentions_years = tokens[i + 1..]
            .iter()
            .take(2)
            .any(|t| t.starts_with("year") || t.starts_with("yr"));
        if mentions_years {
            min_years = Some(min_years.map_or(years, |m| m.min(years)));
        }
    }
    min_years
}

fn check_salary(listing: &JobListing, salary_min: f64) -> bool {
    // The max is the reference: a $60K-$80K range could pay $80K.
    if let Some(max) = listing.salary_max {
        return max >= salary_min;
    }
    if let Some(min) = listing.salary_min {
        return min >= salary_min;
    }
    true
}

// Tiered keyword sets: broader fields get stricter keywords so generic words
// like "patient" in a description do not reject the listing.
const INDUSTRY_TITLE_KEYWORDS: &[&str] = &[
    "healthcare",
    "healthtech",
    "biotech",
    "biotechnology",
    "pharmaceutical",
    "pharma",
    "clinical",
    "hospital",
    "nursing",
];

const INDUSTRY_COMPANY_KEYWORDS: &[&str] = &[
    "hospital",
    "pharmaceutical",
    "pharma",
    "biotech",
    "biotechnology",
    "clinic ",
    "clinical ",
];

const INDUSTRY_DESCRIPTION_PHRASES: &[&str] = &[
    "healthcare industry",
    "healthtech",
    "health tech",
    "biotech company",
    "biotechnology",
    "pharmaceutical",
    "hospital system",
    "clinical trials",
    "clinical research",
    "hipaa",
    "patient care",
    "patient outcomes",
];

fn check_industry_exclusion(listing: &JobListing, excluded_industries: &[String]) -> bool {
    let industry = listing
        .company_industry
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let title = listing.title.to_lowercase();
    let company = listing.company.to_lowercase();
    let description = listing.description.to_lowercase();

    if excluded_industries.iter().any(|k| industry.contains(k.as_str())) {
        return false;
    }
    if INDUSTRY_TITLE_KEYWORDS.iter().any(|k| title.contains(k)) {
        return false;
    }
    if INDUSTRY_COMPANY_KEYWORDS.iter().any(|k| company.contains(k)) {
        return false;
    }
    if INDUSTRY_DESCRIPTION_PHRASES
        .iter()
        .any(|p| description.contains(p))
    {
        return false;
    }
    true
}

// ---------------------------------------------------------------------------
// Keyword pre-filter

const TITLE_KEYWORDS: &[&str] = &[
    "operations",
    "ops",
    "strategy",
    "chief of staff",
    "business associate",
    "gtm",
    "growth",
    "revenue",
    "biz ops",
    "revops",
    "finance & operations",
    "finance and operations",
    "startup operations",
    "associate",
    "analyst",
    "coordinator",
];

/// Categories a listing must match at least one of: title keywords, tools,
/// themes plus responsibilities. Keeps obviously irrelevant listings away
/// from the expensive scoring hook.
pub fn apply_keyword_pre_filter(prefs: &Preferences, listings: Vec<JobListing>) -> Vec<JobListing> {
    const MIN_CATEGORIES: usize = 1;

    let initial = listings.len();
    let tools: Vec<String> = prefs
        .positive_signals
        .tools
        .iter()
        .map(|t| t.to_lowercase())
        .collect();
    let themes: Vec<String> = prefs
        .positive_signals
        .themes
        .iter()
        .chain(prefs.positive_signals.responsibilities.iter())
        .map(|t| t.to_lowercase())
        .collect();

    let passed: Vec<JobListing> = listings
        .into_iter()
        .filter(|listing| count_category_matches(listing, &tools, &themes) >= MIN_CATEGORIES)
        .collect();

    info!(
        initial,
        passed = passed.len(),
        rejected = initial - passed.len(),
        "keyword pre-filter applied"
    );
    passed
}

fn count_category_matches(listing: &JobListing, tools: &[String], themes: &[String]) -> usize {
    let title = listing.title.to_lowercase();
    let full_text = format!("{title} {}", listing.description.to_lowercase());

    let mut categories = 0;
    if TITLE_KEYWORDS.iter().any(|k| title.contains(k)) {
        categories += 1;
    }
    if tools.iter().any(|k| full_text.contains(k.as_str())) {
        categories += 1;
    }
    if themes.iter().any(|k| full_text.contains(k.as_str())) {
        categories += 1;
    }
    categories
}

// ---------------------------------------------------------------------------
// Freshness

/// Band a listing by days since posting. Unparseable and future dates map to
/// `Unknown` rather than failing the run.
pub fn freshness_for(
    date_posted: Option<&str>,
    thresholds: &FreshnessThresholds,
    now: DateTime<Utc>,
) -> Freshness {
    let Some(raw) = date_posted else {
        return Freshness::Unknown;
    };
    let Some(posted) = parse_posted_date(raw, now) else {
        return Freshness::Unknown;
    };
    let days_old = (now - posted).num_days();
    if days_old < 0 {
        Freshness::Unknown
    } else if days_old <= thresholds.green_days {
        Freshness::Green
    } else if days_old <= thresholds.yellow_days {
        Freshness::Yellow
    } else if days_old <= thresholds.red_days {
        Freshness::Red
    } else {
        Freshness::Black
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%B %d, %Y", "%b %d, %Y"];

pub fn parse_posted_date(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&dt));
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| Utc.from_utc_datetime(&dt));
        }
    }
    parse_relative_date(trimmed, now)
}

/// Board-style relative dates: "3 days ago", "1 week ago", "yesterday",
/// "just posted".
fn parse_relative_date(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lowered = raw.to_lowercase();
    if lowered.contains("today") || lowered.contains("just posted") {
        return Some(now);
    }
    if lowered.contains("yesterday") {
        return Some(now - ChronoDuration::days(1));
    }
    if !lowered.contains("ago") {
        return None;
    }

    let tokens: Vec<&str> = lowered
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    for (i, token) in tokens.iter().enumerate() {
        let Ok(count) = token.parse::<i64>() else {
            continue;
        };
        let Some(unit) = tokens.get(i + 1) else {
            continue;
        };
        if unit.starts_with("hour") {
            return Some(now - ChronoDuration::hours(count));
        }
        if unit.starts_with("day") {
            return Some(now - ChronoDuration::days(count));
        }
        if unit.starts_with("week") {
            return Some(now - ChronoDuration::weeks(count));
        }
        if unit.starts_with("month") {
            return Some(now - ChronoDuration::days(count * 30));
        }
    }
    None
}

pub fn assign_freshness(scored: &mut [ScoredJob], thresholds: &FreshnessThresholds) {
    let now = Utc::now();
    let mut distribution: BTreeMap<&'static str, usize> = BTreeMap::new();
    for job in scored.iter_mut() {
        job.freshness = freshness_for(job.listing.date_posted.as_deref(), thresholds, now);
        *distribution.entry(job.freshness.emoji()).or_default() += 1;
    }
    info!(?distribution, "freshness assigned");
}

// ---------------------------------------------------------------------------
// Scoring and enrichment hooks

/// Fills `vc_info` for scored jobs. The production implementation calls out
/// to funding databases; the default leaves everything undecided.
pub trait EnrichmentHook: Send + Sync {
    fn apply(&self, jobs: Vec<ScoredJob>) -> Result<Vec<ScoredJob>>;
}

/// Fills `score`, `reasoning`, and the skill lists. The production
/// implementation is an LLM call; the default passes jobs through unscored.
/// `is_repost` is visible to implementations as a mild positive signal.
pub trait ScoreHook: Send + Sync {
    fn apply(&self, jobs: Vec<ScoredJob>) -> Result<Vec<ScoredJob>>;
}

#[derive(Default)]
pub struct NoopEnrichmentHook;

impl EnrichmentHook for NoopEnrichmentHook {
    fn apply(&self, jobs: Vec<ScoredJob>) -> Result<Vec<ScoredJob>> {
        Ok(jobs)
    }
}

#[derive(Default)]
pub struct NoopScoreHook;

impl ScoreHook for NoopScoreHook {
    fn apply(&self, jobs: Vec<ScoredJob>) -> Result<Vec<ScoredJob>> {
        Ok(jobs)
    }
}

// ---------------------------------------------------------------------------
// Pipeline

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub enabled_sources: usize,
    pub listings_scraped: usize,
    pub listings_unique: usize,
    pub listings_new: usize,
    pub listings_stored: usize,
    pub listings_passed_filter: usize,
    pub listings_scored: usize,
    pub reposts_detected: usize,
    pub errors: Vec<String>,
    pub reports_dir: String,
    pub parquet_manifest: String,
}

pub struct Pipeline {
    config: PipelineConfig,
    preferences: Preferences,
    artifacts: ArtifactStore,
    http: PageFetcher,
    enrichment: Box<dyn EnrichmentHook>,
    score: Box<dyn ScoreHook>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let preferences = Preferences::load(&config.preferences_path)?;
        let artifacts = ArtifactStore::new(config.artifacts_dir.clone());
        let http = PageFetcher::new(FetcherConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        Ok(Self {
            config,
            preferences,
            artifacts,
            http,
            enrichment: Box::<NoopEnrichmentHook>::default(),
            score: Box::<NoopScoreHook>::default(),
        })
    }

    pub fn with_hooks(
        mut self,
        enrichment: Box<dyn EnrichmentHook>,
        score: Box<dyn ScoreHook>,
    ) -> Self {
        self.enrichment = enrichment;
        self.score = score;
        self
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    /// One full staged run: scrape, dedup, repost detection, store, filters,
    /// hooks, freshness, reports. Per-source failures are collected rather
    /// than aborting the run.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        for warning in self.config.validate() {
            warn!(%warning, "config");
        }

        let mut store = ListingStore::open(&self.config.store_path).await?;
        let registry = self.load_source_registry().await?;
        let enabled_sources: Vec<_> = registry.sources.into_iter().filter(|s| s.enabled).collect();

        let mut errors = Vec::new();
        let ctx = ScrapeContext {
            run_id,
            fetched_at: started_at,
        };

        let mut all_listings = Vec::new();
        for source in &enabled_sources {
            match self.scrape_source(source, &ctx).await {
                Ok(listings) => {
                    info!(source_id = %source.source_id, count = listings.len(), "source scraped");
                    all_listings.extend(listings);
                }
                Err(err) => {
                    warn!(source_id = %source.source_id, error = %err, "source failed");
                    errors.push(format!("{}: {err}", source.source_id));
                }
            }
        }
        let scraped = all_listings.len();
        if scraped == 0 {
            warn!("no listings scraped from any source");
        }

        let unique = deduplicate_batch(all_listings);
        info!(before = scraped, after = unique.len(), "batch deduplicated");

        let unique_count = unique.len();
        let new_listings = filter_already_seen(unique, &store)?;
        info!(
            before = unique_count,
            after = new_listings.len(),
            "already-seen filter applied"
        );

        let new_listings = detect_reposts(new_listings, &store)?;
        let reposts_detected = new_listings.iter().filter(|l| l.is_repost).count();
        if reposts_detected > 0 {
            info!(reposts_detected, "reposts detected");
        }

        let listings_stored = store.insert_batch(&new_listings).await?;
        info!(listings_stored, "new listings stored");

        let listings_new = new_listings.len();
        let filtered = apply_hard_filters(&self.preferences, new_listings);
        let pre_filtered = apply_keyword_pre_filter(&self.preferences, filtered);
        let listings_passed_filter = pre_filtered.len();

        let scored = pre_filtered
            .into_iter()
            .map(ScoredJob::unscored)
            .collect::<Vec<_>>();
        let scored = self.enrichment.apply(scored)?;
        let mut scored = self.score.apply(scored)?;
        assign_freshness(&mut scored, &self.preferences.scoring.freshness_thresholds);
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));

        let finished_at = Utc::now();
        let run_log = RunLog {
            run_date: started_at,
            source: "all".to_string(),
            listings_scraped: scraped,
            listings_new,
            listings_passed_filter,
            listings_scored: scored.len(),
            errors: errors.clone(),
            duration_seconds: (finished_at - started_at).num_milliseconds() as f64 / 1000.0,
        };

        let reports_dir = self
            .config
            .workspace_root
            .join("reports")
            .join(run_id.to_string());
        write_reports(&reports_dir, run_id, &run_log, &scored).await?;
        let manifest_path = export_parquet_snapshot(&reports_dir, &scored).await?;

        info!(
            %run_id,
            scraped,
            new = listings_new,
            passed = listings_passed_filter,
            scored = scored.len(),
            "run complete"
        );

        Ok(RunSummary {
            run_id,
            started_at,
            finished_at,
            enabled_sources: enabled_sources.len(),
            listings_scraped: scraped,
            listings_unique: unique_count,
            listings_new,
            listings_stored,
            listings_passed_filter,
            listings_scored: scored.len(),
            reposts_detected,
            errors,
            reports_dir: reports_dir.display().to_string(),
            parquet_manifest: manifest_path.display().to_string(),
        })
    }

    async fn scrape_source(
        &self,
        source: &SourceConfig,
        ctx: &ScrapeContext,
    ) -> Result<Vec<JobListing>> {
        let adapter = adapter_for_source(&source.source_id)
            .with_context(|| format!("no adapter registered for {}", source.source_id))?;
        let targets: Vec<ListingTarget> = source
            .listing_urls
            .iter()
            .map(|url| ListingTarget { url: url.clone() })
            .collect();

        let pages = adapter.fetch_listing(&self.http, ctx, &targets).await?;
        let mut listings = Vec::new();
        for page in &pages {
            self.artifacts
                .store_page(ctx.fetched_at, adapter.source_id(), &page.content_type, &page.body)
                .await?;
            listings.extend(adapter.parse_listing(page)?);
        }
        Ok(listings)
    }

    async fn load_source_registry(&self) -> Result<SourceRegistry> {
        let path = self.config.workspace_root.join("sources.yaml");
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub async fn maybe_build_scheduler(&self) -> Result<Option<JobScheduler>> {
        if !self.config.scheduler_enabled {
            return Ok(None);
        }

        let sched = JobScheduler::new().await.context("creating scheduler")?;
        for cron in [&self.config.cron_morning, &self.config.cron_evening] {
            let job = Job::new_async(cron, |_uuid, _l| {
                Box::pin(async move {
                    if let Err(err) = run_pipeline_once_from_env().await {
                        warn!(error = %err, "scheduled run failed");
                    }
                })
            })
            .with_context(|| format!("creating scheduler job for cron {cron}"))?;
            sched.add(job).await.context("adding scheduler job")?;
        }
        Ok(Some(sched))
    }
}

pub async fn run_pipeline_once_from_env() -> Result<RunSummary> {
    let config = PipelineConfig::from_env();
    let pipeline = Pipeline::new(config)?;
    pipeline.run_once().await
}

// ---------------------------------------------------------------------------
// Reports

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifest {
    pub schema_version: u32,
    pub files: Vec<ParquetManifestFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub async fn write_reports(
    reports_dir: &Path,
    run_id: Uuid,
    run_log: &RunLog,
    scored: &[ScoredJob],
) -> Result<()> {
    fs::create_dir_all(reports_dir)
        .await
        .with_context(|| format!("creating {}", reports_dir.display()))?;

    let mut source_counts: BTreeMap<String, usize> = BTreeMap::new();
    for job in scored {
        *source_counts.entry(job.listing.source.clone()).or_default() += 1;
    }

    let mut brief = format!(
        "# Jobscout Daily Brief\n\n- Run ID: `{run_id}`\n- Run date: {}\n- Scraped: {}\n- New: {}\n- Passed filters: {}\n- Scored: {}\n\n## Source Counts\n{}\n\n## Top Listings\n",
        run_log.run_date,
        run_log.listings_scraped,
        run_log.listings_new,
        run_log.listings_passed_filter,
        run_log.listings_scored,
        source_counts
            .iter()
            .map(|(k, v)| format!("- {k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n")
    );
    for job in scored.iter().take(20) {
        let repost = if job.is_repost { " (repost)" } else { "" };
        brief.push_str(&format!(
            "- {} {:.1} {} @ {} [{}]{repost}\n",
            job.freshness.emoji(),
            job.score,
            job.listing.title,
            job.listing.company,
            job.listing.source,
        ));
    }
    fs::write(reports_dir.join("daily_brief.md"), brief)
        .await
        .context("writing daily_brief.md")?;

    let delta = serde_json::to_vec_pretty(&serde_json::json!({
        "run_log": run_log,
        "scored_jobs": scored,
    }))
    .context("serializing listings delta")?;
    fs::write(reports_dir.join("listings_delta.json"), delta)
        .await
        .context("writing listings_delta.json")?;
    Ok(())
}

pub async fn export_parquet_snapshot(reports_dir: &Path, scored: &[ScoredJob]) -> Result<PathBuf> {
    let snapshot_dir = reports_dir.join("snapshots");
    fs::create_dir_all(&snapshot_dir)
        .await
        .with_context(|| format!("creating {}", snapshot_dir.display()))?;

    let parquet_path = snapshot_dir.join("scored_jobs.parquet");
    write_scored_jobs_parquet(&parquet_path, scored)?;

    let manifest = ParquetManifest {
        schema_version: 1,
        files: vec![manifest_entry("scored_jobs", reports_dir, &parquet_path)?],
    };
    let manifest_path = snapshot_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing parquet manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

fn write_scored_jobs_parquet(path: &Path, scored: &[ScoredJob]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        ArrowField::new("title", DataType::Utf8, false),
        ArrowField::new("company", DataType::Utf8, false),
        ArrowField::new("location", DataType::Utf8, false),
        ArrowField::new("url", DataType::Utf8, false),
        ArrowField::new("source", DataType::Utf8, false),
        ArrowField::new("fuzzy_key", DataType::Utf8, true),
        ArrowField::new("score", DataType::Float64, false),
        ArrowField::new("recommendation", DataType::Utf8, false),
        ArrowField::new("freshness", DataType::Utf8, false),
        ArrowField::new("is_repost", DataType::Boolean, false),
        ArrowField::new("salary_min", DataType::Float64, true),
        ArrowField::new("salary_max", DataType::Float64, true),
        ArrowField::new("date_posted", DataType::Utf8, true),
        ArrowField::new("date_scraped", DataType::Utf8, false),
    ]));

    let titles = StringArray::from(
        scored
            .iter()
            .map(|s| Some(s.listing.title.as_str()))
            .collect::<Vec<_>>(),
    );
    let companies = StringArray::from(
        scored
            .iter()
            .map(|s| Some(s.listing.company.as_str()))
            .collect::<Vec<_>>(),
    );
    let locations = StringArray::from(
        scored
            .iter()
            .map(|s| Some(s.listing.location.as_str()))
            .collect::<Vec<_>>(),
    );
    let urls = StringArray::from(
        scored
            .iter()
            .map(|s| Some(s.listing.url.as_str()))
            .collect::<Vec<_>>(),
    );
    let sources = StringArray::from(
        scored
            .iter()
            .map(|s| Some(s.listing.source.as_str()))
            .collect::<Vec<_>>(),
    );
    let fuzzy_keys = StringArray::from(
        scored
            .iter()
            .map(|s| s.listing.fuzzy_key.as_deref())
            .collect::<Vec<_>>(),
    );
    let scores = Float64Array::from(scored.iter().map(|s| s.score).collect::<Vec<_>>());
    let recommendations = StringArray::from(
        scored
            .iter()
            .map(|s| Some(s.recommendation.as_str()))
            .collect::<Vec<_>>(),
    );
    let freshness = StringArray::from(
        scored
            .iter()
            .map(|s| {
                serde_json::to_value(s.freshness)
                    .ok()
                    .and_then(|v| v.as_str().map(ToString::to_string))
            })
            .collect::<Vec<_>>(),
    );
    let reposts = BooleanArray::from(scored.iter().map(|s| s.is_repost).collect::<Vec<_>>());
    let salary_mins =
        Float64Array::from(scored.iter().map(|s| s.listing.salary_min).collect::<Vec<_>>());
    let salary_maxes =
        Float64Array::from(scored.iter().map(|s| s.listing.salary_max).collect::<Vec<_>>());
    let dates_posted = StringArray::from(
        scored
            .iter()
            .map(|s| s.listing.date_posted.as_deref())
            .collect::<Vec<_>>(),
    );
    let dates_scraped = StringArray::from(
        scored
            .iter()
            .map(|s| Some(s.listing.date_scraped.to_rfc3339()))
            .collect::<Vec<_>>(),
    );

    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(titles),
            Arc::new(companies),
            Arc::new(locations),
            Arc::new(urls),
            Arc::new(sources),
            Arc::new(fuzzy_keys),
            Arc::new(scores),
            Arc::new(recommendations),
            Arc::new(freshness),
            Arc::new(reposts),
            Arc::new(salary_mins),
            Arc::new(salary_maxes),
            Arc::new(dates_posted),
            Arc::new(dates_scraped),
        ],
    )
    .context("building scored_jobs record batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
        .with_context(|| format!("opening parquet writer {}", path.display()))?;
    writer
        .write(&batch)
        .with_context(|| format!("writing record batch {}", path.display()))?;
    writer
        .close()
        .with_context(|| format!("closing parquet writer {}", path.display()))?;
    Ok(())
}

fn manifest_entry(name: &str, reports_dir: &Path, path: &Path) -> Result<ParquetManifestFile> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let sha256 = ArtifactStore::sha256_hex(&bytes);
    let rel = path
        .strip_prefix(reports_dir)
        .unwrap_or(path)
        .display()
        .to_string();
    Ok(ParquetManifestFile {
        name: name.to_string(),
        path: rel,
        sha256,
        bytes: bytes.len() as u64,
    })
}

/// Markdown digest over the most recent report directories.
pub fn report_daily_markdown(runs: usize, workspace_root: Option<PathBuf>) -> Result<String> {
    let root = workspace_root.unwrap_or_else(|| PathBuf::from("."));
    let reports_root = root.join("reports");
    let mut dirs = std::fs::read_dir(&reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();
    let dirs = dirs.into_iter().take(runs.max(1)).collect::<Vec<_>>();

    let mut lines = vec!["# Jobscout Report".to_string(), String::new()];
    for dir in dirs {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let delta_path = dir.path().join("listings_delta.json");
        let brief_path = dir.path().join("daily_brief.md");
        let manifest_path = dir.path().join("snapshots").join("manifest.json");

        let delta_value: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&delta_path)
                .with_context(|| format!("reading {}", delta_path.display()))?,
        )
        .with_context(|| format!("parsing {}", delta_path.display()))?;
        let scored_count = delta_value
            .get("scored_jobs")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        let new_count = delta_value
            .get("run_log")
            .and_then(|v| v.get("listings_new"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- new listings: {new_count}"));
        lines.push(format!("- scored jobs: {scored_count}"));
        lines.push(format!("- delta: `{}`", delta_path.display()));
        if manifest_path.exists() {
            lines.push(format!("- parquet manifest: `{}`", manifest_path.display()));
        }
        if brief_path.exists() {
            lines.push(format!("- daily brief: `{}`", brief_path.display()));
        }
        lines.push(String::new());
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PREFS_YAML: &str = r#"
candidate:
  name: Test Candidate
  email: test@example.com
target_roles:
  - Operations Associate
  - Chief of Staff
locations:
  los_angeles:
    aliases: ["Los Angeles", "Santa Monica", "Culver City"]
  remote:
    aliases: ["Remote"]
filters:
  experience_max_years: 3
  salary_min: 70000
  excluded_industries: ["healthcare", "biotech"]
  remote_allowed: true
positive_signals:
  tools: ["Excel", "SQL", "Notion"]
  themes: ["zero to one", "fast-paced"]
  responsibilities: ["own the roadmap"]
notable_vcs:
  tier_1: ["Sequoia"]
  tier_2: ["Initialized"]
scoring:
  vc_bonus: 5
  freshness_thresholds:
    green_days: 7
    yellow_days: 14
    red_days: 21
"#;

    fn prefs() -> Preferences {
        serde_yaml::from_str(PREFS_YAML).expect("preferences yaml")
    }

    fn mk_listing(title: &str, location: &str, description: &str) -> JobListing {
        JobListing::new(
            title,
            "Acme",
            location,
            description,
            format!("https://example.com/{}", title.replace(' ', "-")),
            "test",
        )
    }

    #[test]
    fn preferences_parse_and_flatten_aliases() {
        let prefs = prefs();
        let aliases = prefs.location_aliases();
        assert!(aliases.contains(&"santa monica".to_string()));
        assert!(aliases.contains(&"remote".to_string()));
        assert_eq!(prefs.notable_vcs(), vec!["sequoia", "initialized"]);
        assert_eq!(prefs.scoring.freshness_thresholds.green_days, 7);
    }

    #[test]
    fn source_registry_parses_with_defaults() {
        let yaml = r#"
sources:
  - source_id: yc
    display_name: Work at a Startup
    enabled: true
    listing_urls: ["https://www.workatastartup.com/jobs"]
  - source_id: wellfound
    display_name: Wellfound
    enabled: false
    notes: returns 403 without auth
"#;
        let registry: SourceRegistry = serde_yaml::from_str(yaml).expect("registry yaml");
        assert_eq!(registry.sources.len(), 2);
        assert!(registry.sources[1].listing_urls.is_empty());
        assert!(!registry.sources[1].enabled);
    }

    #[test]
    fn experience_years_extraction() {
        assert_eq!(
            required_experience_years("5+ years of experience required"),
            Some(5)
        );
        assert_eq!(required_experience_years("1-2 years experience"), Some(1));
        assert_eq!(required_experience_years("minimum 4 yrs in ops"), Some(4));
        assert_eq!(required_experience_years("salary of $90,000"), None);
        assert_eq!(required_experience_years("we ship every day"), None);
    }

    #[test]
    fn location_filter_accepts_remote_and_aliases() {
        let prefs = prefs();
        let aliases = prefs.location_aliases();
        assert!(check_location(
            &mk_listing("Ops", "Remote", ""),
            &aliases,
            true
        ));
        assert!(check_location(
            &mk_listing("Ops", "Culver City, CA", ""),
            &aliases,
            true
        ));
        assert!(!check_location(
            &mk_listing("Ops", "Austin, TX", "on-site only"),
            &aliases,
            true
        ));
        // Remote shortcut off: remote-only listing must match an alias.
        assert!(!check_location(
            &mk_listing("Ops", "Anywhere (remote)", ""),
            &["austin".to_string()],
            false
        ));
    }

    #[test]
    fn salary_filter_uses_max_as_reference() {
        let mut listing = mk_listing("Ops", "Remote", "");
        listing.salary_min = Some(60_000.0);
        listing.salary_max = Some(80_000.0);
        assert!(check_salary(&listing, 70_000.0));

        listing.salary_max = Some(65_000.0);
        assert!(!check_salary(&listing, 70_000.0));

        listing.salary_min = None;
        listing.salary_max = None;
        assert!(check_salary(&listing, 70_000.0));
    }

    #[test]
    fn industry_exclusion_is_tiered() {
        let excluded = vec!["healthcare".to_string()];

        // Generic words in a description do not reject.
        let generic = mk_listing("Ops Associate", "Remote", "patient, detail-oriented operators");
        assert!(check_industry_exclusion(&generic, &excluded));

        // Multi-word description phrases do.
        let phrase = mk_listing("Ops Associate", "Remote", "supporting clinical trials at scale");
        assert!(!check_industry_exclusion(&phrase, &excluded));

        let mut tagged = mk_listing("Ops Associate", "Remote", "");
        tagged.company_industry = Some("Healthcare".to_string());
        assert!(!check_industry_exclusion(&tagged, &excluded));

        let titled = mk_listing("Biotech Operations Lead", "Remote", "");
        assert!(!check_industry_exclusion(&titled, &excluded));
    }

    #[test]
    fn pre_filter_needs_one_category() {
        let prefs = prefs();
        let title_hit = mk_listing("Operations Associate", "Remote", "generic text");
        let tool_hit = mk_listing("Generalist", "Remote", "daily work in SQL and Excel");
        let miss = mk_listing("Senior Welder", "Remote", "fabrication shop");

        let passed = apply_keyword_pre_filter(&prefs, vec![title_hit, tool_hit, miss]);
        assert_eq!(passed.len(), 2);
        assert!(passed.iter().all(|l| l.title != "Senior Welder"));
    }

    #[test]
    fn freshness_bands_absolute_and_relative_dates() {
        let thresholds = FreshnessThresholds::default();
        let now = Utc
            .with_ymd_and_hms(2026, 8, 25, 12, 0, 0)
            .single()
            .expect("timestamp");

        assert_eq!(
            freshness_for(Some("2026-08-20"), &thresholds, now),
            Freshness::Green
        );
        assert_eq!(
            freshness_for(Some("3 days ago"), &thresholds, now),
            Freshness::Green
        );
        assert_eq!(
            freshness_for(Some("10 days ago"), &thresholds, now),
            Freshness::Yellow
        );
        assert_eq!(
            freshness_for(Some("3 weeks ago"), &thresholds, now),
            Freshness::Red
        );
        assert_eq!(
            freshness_for(Some("2 months ago"), &thresholds, now),
            Freshness::Black
        );
        assert_eq!(
            freshness_for(Some("just posted"), &thresholds, now),
            Freshness::Green
        );
        assert_eq!(
            freshness_for(Some("yesterday"), &thresholds, now),
            Freshness::Green
        );
        // Future and unparseable dates stay unknown.
        assert_eq!(
            freshness_for(Some("2027-01-01"), &thresholds, now),
            Freshness::Unknown
        );
        assert_eq!(
            freshness_for(Some("whenever"), &thresholds, now),
            Freshness::Unknown
        );
        assert_eq!(freshness_for(None, &thresholds, now), Freshness::Unknown);
    }

    #[tokio::test]
    async fn reports_and_snapshot_land_in_run_directory() {
        let dir = tempdir().expect("tempdir");
        let run_id = Uuid::new_v4();
        let reports_dir = dir.path().join("reports").join(run_id.to_string());

        let mut job = ScoredJob::unscored(mk_listing(
            "Operations Associate",
            "Los Angeles",
            "run the back office",
        ));
        job.score = 72.0;
        job.recommendation = "apply".to_string();
        let scored = vec![job];

        let run_log = RunLog {
            run_date: Utc::now(),
            source: "all".to_string(),
            listings_scraped: 3,
            listings_new: 2,
            listings_passed_filter: 1,
            listings_scored: 1,
            errors: Vec::new(),
            duration_seconds: 1.5,
        };

        write_reports(&reports_dir, run_id, &run_log, &scored)
            .await
            .expect("write reports");
        let manifest_path = export_parquet_snapshot(&reports_dir, &scored)
            .await
            .expect("export snapshot");

        let brief = std::fs::read_to_string(reports_dir.join("daily_brief.md")).expect("brief");
        assert!(brief.contains("Operations Associate"));
        assert!(brief.contains("test: 1"));

        let manifest: ParquetManifest =
            serde_json::from_str(&std::fs::read_to_string(&manifest_path).expect("manifest"))
                .expect("manifest json");
        assert_eq!(manifest.files.len(), 1);
        let parquet_path = reports_dir.join("snapshots").join("scored_jobs.parquet");
        let bytes = std::fs::read(&parquet_path).expect("parquet bytes");
        assert_eq!(manifest.files[0].sha256, ArtifactStore::sha256_hex(&bytes));
        assert_eq!(manifest.files[0].bytes, bytes.len() as u64);

        let digest = report_daily_markdown(1, Some(dir.path().to_path_buf())).expect("digest");
        assert!(digest.contains(&run_id.to_string()));
        assert!(digest.contains("scored jobs: 1"));
    }
}
