use crate::vault::gap_fill::{DEFAULT_CHUNK_YEARS, GapFillOptions, default_start_date};
use crate::vault::layout::validate_category;
use crate::vault::part_writer::DEFAULT_PART_THRESHOLD;
use crate::vault::pipeline::PipelineOptions;
use crate::vault::retry::RetryPolicy;
use crate::vault::s3::parse_bucket_url;
use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    pub part_threshold_bytes: u64,
    pub time_zone: String,
    /// Categories consulted for the sync high-water mark.
    pub categories: Vec<String>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            part_threshold_bytes: DEFAULT_PART_THRESHOLD,
            time_zone: "Asia/Kolkata".to_string(),
            categories: vec![
                "metadata".to_string(),
                "english".to_string(),
                "regional".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillConfig {
    pub start_date: NaiveDate,
    pub chunk_years: u32,
    /// Wall-clock budget per gap-fill run; 0 disables the budget.
    pub timeout_secs: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            start_date: default_start_date(),
            chunk_years: DEFAULT_CHUNK_YEARS,
            timeout_secs: 19_800,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub concurrency: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self { concurrency: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

/// Where archives live. Without a bucket the local `bucket_dir` mirror is
/// used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// `s3://bucket[/prefix]`.
    pub bucket: Option<String>,
    /// Custom S3 endpoint (MinIO, R2, localstack).
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    /// Defaults to true whenever `endpoint_url` is set.
    pub force_path_style: Option<bool>,
}

impl StorageConfig {
    pub fn path_style(&self) -> bool {
        self.force_path_style.unwrap_or(self.endpoint_url.is_some())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VaultConfig {
    pub archive: ArchiveConfig,
    pub backfill: BackfillConfig,
    pub workers: WorkersConfig,
    pub retry: RetryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialVaultConfig {
    archive: Option<ArchiveConfig>,
    backfill: Option<BackfillConfig>,
    workers: Option<WorkersConfig>,
    retry: Option<RetryConfig>,
    storage: Option<StorageConfig>,
}

impl VaultConfig {
    pub fn time_zone(&self) -> Result<Tz> {
        self.archive
            .time_zone
            .parse::<Tz>()
            .map_err(|err| anyhow!("invalid time zone `{}`: {err}", self.archive.time_zone))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            concurrency: self.workers.concurrency,
            retry: self.retry_policy(),
        }
    }

    pub fn gap_fill_options(&self) -> GapFillOptions {
        GapFillOptions {
            start_date: self.backfill.start_date,
            chunk_years: self.backfill.chunk_years,
            timeout: (self.backfill.timeout_secs > 0)
                .then(|| Duration::from_secs(self.backfill.timeout_secs)),
            max_chunks: None,
            until: None,
            pipeline: self.pipeline_options(),
        }
    }
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_optional(var: &str, fallback: Option<String>) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => fallback,
    }
}

fn env_or_bool(var: &str, fallback: Option<bool>) -> Option<bool> {
    match env::var(var) {
        Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Some(true),
            "0" | "false" | "no" => Some(false),
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_csv(var: &str, fallback: &[String]) -> Vec<String> {
    match env::var(var) {
        Ok(v) => {
            let out = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
                .collect::<Vec<_>>();
            if out.is_empty() {
                fallback.to_vec()
            } else {
                out
            }
        }
        Err(_) => fallback.to_vec(),
    }
}

fn env_or_date(var: &str, fallback: NaiveDate) -> NaiveDate {
    match env::var(var) {
        Ok(v) => NaiveDate::parse_from_str(v.trim(), "%Y-%m-%d").unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn validate(cfg: &VaultConfig) -> Result<()> {
    if cfg.archive.part_threshold_bytes == 0 {
        return Err(anyhow!("invalid part threshold: must be >= 1 byte"));
    }
    cfg.time_zone()?;
    if cfg.archive.categories.is_empty() {
        return Err(anyhow!("invalid categories: at least one is required"));
    }
    if let Some(bad) = cfg.archive.categories.iter().find(|c| !validate_category(c)) {
        return Err(anyhow!(
            "invalid category `{bad}`: use lowercase letters, digits, `_` or `-`"
        ));
    }
    if cfg.backfill.chunk_years == 0 {
        return Err(anyhow!("invalid backfill chunk years: must be >= 1"));
    }
    if cfg.workers.concurrency == 0 {
        return Err(anyhow!("invalid worker concurrency: must be >= 1"));
    }
    if cfg.retry.max_attempts == 0 {
        return Err(anyhow!("invalid retry max attempts: must be >= 1"));
    }
    if cfg.retry.base_delay_ms > cfg.retry.max_delay_ms {
        return Err(anyhow!(
            "invalid retry delays: require base_delay_ms <= max_delay_ms"
        ));
    }
    if let Some(bucket) = &cfg.storage.bucket {
        parse_bucket_url(bucket).map_err(|err| anyhow!("invalid storage bucket: {err}"))?;
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("JVAULT_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }

    let base = dirs::config_dir()?;
    Some(base.join("jvault").join("config.toml"))
}

fn merge_toml(base: &mut VaultConfig, raw: &str) -> Result<()> {
    let parsed: PartialVaultConfig = toml::from_str(raw)?;
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    if let Some(backfill) = parsed.backfill {
        base.backfill = backfill;
    }
    if let Some(workers) = parsed.workers {
        base.workers = workers;
    }
    if let Some(retry) = parsed.retry {
        base.retry = retry;
    }
    if let Some(storage) = parsed.storage {
        base.storage = storage;
    }
    Ok(())
}

fn merge_file_config(base: &mut VaultConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    merge_toml(base, &raw)
        .map_err(|err| anyhow!("failed to parse jvault config {}: {err}", path.display()))
}

pub fn load_config() -> Result<VaultConfig> {
    let mut cfg = VaultConfig::default();
    merge_file_config(&mut cfg)?;

    cfg.archive.part_threshold_bytes = env_or_u64(
        "JVAULT_PART_THRESHOLD_BYTES",
        cfg.archive.part_threshold_bytes,
    );
    cfg.archive.time_zone = env_or_string("JVAULT_TIME_ZONE", &cfg.archive.time_zone);
    cfg.archive.categories = env_or_csv("JVAULT_CATEGORIES", &cfg.archive.categories);
    cfg.backfill.start_date = env_or_date("JVAULT_BACKFILL_START_DATE", cfg.backfill.start_date);
    cfg.backfill.chunk_years = env_or_u64(
        "JVAULT_BACKFILL_CHUNK_YEARS",
        u64::from(cfg.backfill.chunk_years),
    )
    .try_into()
    .unwrap_or(cfg.backfill.chunk_years);
    cfg.backfill.timeout_secs =
        env_or_u64("JVAULT_BACKFILL_TIMEOUT_SECS", cfg.backfill.timeout_secs);
    cfg.workers.concurrency = env_or_u64("JVAULT_CONCURRENCY", cfg.workers.concurrency as u64)
        .try_into()
        .unwrap_or(cfg.workers.concurrency);
    cfg.retry.max_attempts = env_or_u64(
        "JVAULT_RETRY_MAX_ATTEMPTS",
        u64::from(cfg.retry.max_attempts),
    )
    .try_into()
    .unwrap_or(cfg.retry.max_attempts);
    cfg.retry.base_delay_ms = env_or_u64("JVAULT_RETRY_BASE_DELAY_MS", cfg.retry.base_delay_ms);
    cfg.retry.max_delay_ms = env_or_u64("JVAULT_RETRY_MAX_DELAY_MS", cfg.retry.max_delay_ms);
    cfg.storage.bucket = env_or_optional("JVAULT_BUCKET", cfg.storage.bucket.take());
    cfg.storage.endpoint_url =
        env_or_optional("JVAULT_S3_ENDPOINT_URL", cfg.storage.endpoint_url.take());
    cfg.storage.region = env_or_optional("JVAULT_S3_REGION", cfg.storage.region.take());
    cfg.storage.force_path_style =
        env_or_bool("JVAULT_S3_FORCE_PATH_STYLE", cfg.storage.force_path_style);

    validate(&cfg)?;
    Ok(cfg)
}
