//! Listing persistence, raw-page artifact storage, and HTTP fetch utilities.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use jobscout_core::JobListing;
use jobscout_dedup::{ListingHistory, RecentKey};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use tracing::info_span;
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobscout-storage";

/// A listing as persisted: the scraped record plus its assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredListing {
    pub id: Uuid,
    pub stored_at: DateTime<Utc>,
    pub listing: JobListing,
}

/// JSON-file listing store. The file is the source of truth; the spreadsheet
/// and digest are downstream views. All reads the dedup stages need are
/// served from the in-memory copy loaded at `open`.
#[derive(Debug)]
pub struct ListingStore {
    path: PathBuf,
    records: Vec<StoredListing>,
}

impl ListingStore {
    /// Open a store file, creating an empty store if the file does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let records = if fs::try_exists(&path)
            .await
            .with_context(|| format!("checking store file {}", path.display()))?
        {
            let text = fs::read_to_string(&path)
                .await
                .with_context(|| format!("reading store file {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("parsing store file {}", path.display()))?
        } else {
            Vec::new()
        };
        Ok(Self { path, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[StoredListing] {
        &self.records
    }

    pub fn listing_id_by_url(&self, url: &str) -> Option<Uuid> {
        self.records
            .iter()
            .find(|r| r.listing.url == url)
            .map(|r| r.id)
    }

    /// Insert listings, skipping any whose URL is already stored. Returns the
    /// number actually inserted. The file is rewritten once per batch.
    pub async fn insert_batch(&mut self, listings: &[JobListing]) -> anyhow::Result<usize> {
        let mut inserted = 0usize;
        for listing in listings {
            if !listing.url.is_empty() && self.listing_id_by_url(&listing.url).is_some() {
                continue;
            }
            self.records.push(StoredListing {
                id: Uuid::new_v4(),
                stored_at: Utc::now(),
                listing: listing.clone(),
            });
            inserted += 1;
        }
        if inserted > 0 {
            self.persist().await?;
        }
        Ok(inserted)
    }

    /// Rewrite the store file via a temp file and atomic rename.
    async fn persist(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating store directory {}", parent.display()))?;
        }
        let bytes = serde_json::to_vec_pretty(&self.records).context("serializing store")?;
        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path)
            .await
            .with_context(|| format!("creating temp store file {}", temp_path.display()))?;
        file.write_all(&bytes)
            .await
            .with_context(|| format!("writing temp store file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp store file {}", temp_path.display()))?;
        drop(file);
        fs::rename(&temp_path, &self.path).await.with_context(|| {
            format!(
                "renaming temp store {} -> {}",
                temp_path.display(),
                self.path.display()
            )
        })
    }
}

impl ListingHistory for ListingStore {
    fn historical_fuzzy_keys(&self) -> anyhow::Result<HashMap<String, Uuid>> {
        Ok(self
            .records
            .iter()
            .filter_map(|r| {
                r.listing
                    .fuzzy_key
                    .as_deref()
                    .filter(|k| !k.is_empty())
                    .map(|k| (k.to_string(), r.id))
            })
            .collect())
    }

    fn url_exists(&self, url: &str) -> anyhow::Result<bool> {
        Ok(!url.is_empty() && self.listing_id_by_url(url).is_some())
    }

    /// Window entries come back most-recent-first by scrape time, which fixes
    /// which original a repost points at when several entries match.
    fn recent_fuzzy_keys(&self, window_days: i64) -> anyhow::Result<Vec<RecentKey>> {
        let cutoff = Utc::now() - ChronoDuration::days(window_days);
        let mut entries: Vec<RecentKey> = self
            .records
            .iter()
            .filter(|r| r.listing.date_scraped >= cutoff)
            .filter_map(|r| {
                r.listing.fuzzy_key.as_deref().filter(|k| !k.is_empty()).map(|k| RecentKey {
                    fuzzy_key: k.to_string(),
                    listing_id: r.id,
                    scraped_at: r.listing.date_scraped,
                })
            })
            .collect();
        entries.sort_by(|a, b| b.scraped_at.cmp(&a.scraped_at));
        Ok(entries)
    }
}

#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Immutable, hash-addressed storage for raw scraped pages.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    fn extension_for(content_type: &str) -> &'static str {
        match content_type {
            "text/html" => "html",
            "application/json" => "json",
            _ => "bin",
        }
    }

    fn artifact_relative_path(
        fetched_at: DateTime<Utc>,
        source_id: &str,
        content_hash: &str,
        extension: &str,
    ) -> PathBuf {
        let stamp = fetched_at.format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(stamp)
            .join(source_id)
            .join(format!("{content_hash}.{extension}"))
    }

    /// Store a fetched page under a content-hash path. Re-storing identical
    /// bytes is a no-op reported via `deduplicated`.
    pub async fn store_page(
        &self,
        fetched_at: DateTime<Utc>,
        source_id: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> anyhow::Result<StoredArtifact> {
        let content_hash = Self::sha256_hex(bytes);
        let extension = Self::extension_for(content_type);
        let relative_path =
            Self::artifact_relative_path(fetched_at, source_id, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);

        if let Some(parent) = absolute_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating artifact directory {}", parent.display()))?;
        }

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking artifact path {}", absolute_path.display()))?
        {
            return Ok(StoredArtifact {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: true,
            });
        }

        let temp_path = absolute_path
            .parent()
            .expect("artifact path always has parent")
            .join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp artifact {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp artifact {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp artifact {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &absolute_path).await {
            Ok(()) => Ok(StoredArtifact {
                content_hash,
                relative_path,
                absolute_path,
                byte_size: bytes.len(),
                deduplicated: false,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(StoredArtifact {
                    content_hash,
                    relative_path,
                    absolute_path,
                    byte_size: bytes.len(),
                    deduplicated: true,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "renaming temp artifact {} -> {}",
                        temp_path.display(),
                        absolute_path.display()
                    )
                })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    /// Minimum spacing between requests to the same source. Job boards ban
    /// fast scrapers; zero disables pacing (useful in tests).
    pub per_source_delay: Duration,
    pub backoff: BackoffPolicy,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 8,
            per_source_concurrency: 2,
            per_source_delay: Duration::from_secs(1),
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Spaces successive requests to one source at least `min_interval` apart.
#[derive(Debug)]
struct SourcePacer {
    min_interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl SourcePacer {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    async fn wait_turn(&self, source_id: &str) {
        if self.min_interval.is_zero() {
            return;
        }
        let wait = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots.entry(source_id.to_string()).or_insert(now);
            let wait = slot.saturating_duration_since(now);
            *slot = now + wait + self.min_interval;
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Retrying HTTP client with global and per-source concurrency caps plus
/// per-source pacing.
#[derive(Debug)]
pub struct PageFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    pacer: SourcePacer,
    backoff: BackoffPolicy,
}

impl PageFetcher {
    pub fn new(config: FetcherConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            pacer: SourcePacer::new(config.per_source_delay),
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    pub async fn fetch_bytes(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self.global_limit.acquire().await.expect("semaphore not closed");
        let per_source = self.per_source_semaphore(source_id).await;
        let _source = per_source.acquire().await.expect("semaphore not closed");
        self.pacer.wait_turn(source_id).await;

        let span = info_span!("page_fetch", %run_id, source_id, url);
        let _guard = span.enter();

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobscout_dedup::generate_fuzzy_key;
    use tempfile::tempdir;

    fn mk_listing(company: &str, title: &str, url: &str) -> JobListing {
        let mut listing = JobListing::new(title, company, "Los Angeles", "", url, "test");
        listing.fuzzy_key = Some(generate_fuzzy_key(&listing));
        listing
    }

    #[tokio::test]
    async fn store_roundtrips_through_the_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("listings.json");

        let mut store = ListingStore::open(&path).await.expect("open empty");
        assert!(store.is_empty());
        let inserted = store
            .insert_batch(&[
                mk_listing("Acme", "Ops Associate", "https://a.example/1"),
                mk_listing("Umbrella", "Chief of Staff", "https://b.example/2"),
            ])
            .await
            .expect("insert");
        assert_eq!(inserted, 2);

        let reopened = ListingStore::open(&path).await.expect("reopen");
        assert_eq!(reopened.len(), 2);
        assert!(reopened.listing_id_by_url("https://a.example/1").is_some());
    }

    #[tokio::test]
    async fn insert_skips_already_stored_urls() {
        let dir = tempdir().expect("tempdir");
        let mut store = ListingStore::open(dir.path().join("listings.json"))
            .await
            .expect("open");

        let listing = mk_listing("Acme", "Ops Associate", "https://a.example/1");
        assert_eq!(store.insert_batch(&[listing.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert_batch(&[listing]).await.unwrap(), 0);
        assert_eq!(store.len(), 1);
        assert!(store.url_exists("https://a.example/1").unwrap());
    }

    #[tokio::test]
    async fn recent_keys_are_windowed_and_newest_first() {
        let dir = tempdir().expect("tempdir");
        let mut store = ListingStore::open(dir.path().join("listings.json"))
            .await
            .expect("open");

        let mut old = mk_listing("Acme", "Ops Associate", "https://a.example/old");
        old.date_scraped = Utc::now() - ChronoDuration::days(45);
        let mut mid = mk_listing("Umbrella", "Chief of Staff", "https://a.example/mid");
        mid.date_scraped = Utc::now() - ChronoDuration::days(20);
        let recent = mk_listing("Vector", "Growth Analyst", "https://a.example/new");
        store.insert_batch(&[old, mid, recent]).await.unwrap();

        let keys = store.recent_fuzzy_keys(30).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys[0].scraped_at > keys[1].scraped_at);
        assert!(keys[0].fuzzy_key.starts_with("vector"));
    }

    #[tokio::test]
    async fn historical_keys_map_to_assigned_ids() {
        let dir = tempdir().expect("tempdir");
        let mut store = ListingStore::open(dir.path().join("listings.json"))
            .await
            .expect("open");
        store
            .insert_batch(&[mk_listing("Acme", "Ops Associate", "https://a.example/1")])
            .await
            .unwrap();

        let keys = store.historical_fuzzy_keys().unwrap();
        assert_eq!(keys.len(), 1);
        let id = keys.values().next().copied().unwrap();
        assert_eq!(store.listing_id_by_url("https://a.example/1"), Some(id));
    }

    #[test]
    fn page_hashing_is_stable() {
        let hash = ArtifactStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn identical_pages_deduplicate_by_hash_path() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(dir.path());
        let fetched_at = DateTime::parse_from_rfc3339("2026-08-25T07:00:00Z")
            .expect("ts")
            .with_timezone(&Utc);

        let first = store
            .store_page(fetched_at, "yc", "text/html", b"<html>same</html>")
            .await
            .expect("first store");
        let second = store
            .store_page(fetched_at, "yc", "text/html", b"<html>same</html>")
            .await
            .expect("second store");

        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(first.relative_path, second.relative_path);
        assert!(first.absolute_path.exists());
        assert!(first.relative_path.to_string_lossy().ends_with(".html"));
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn pacer_spaces_same_source_requests() {
        let pacer = SourcePacer::new(Duration::from_millis(30));
        let start = Instant::now();
        pacer.wait_turn("yc").await;
        pacer.wait_turn("yc").await;
        assert!(start.elapsed() >= Duration::from_millis(30));
        // A different source is not delayed by yc's slot.
        let other_start = Instant::now();
        pacer.wait_turn("builtin").await;
        assert!(other_start.elapsed() < Duration::from_millis(30));
    }
}
