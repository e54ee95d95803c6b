use anyhow::Result;
use std::env;

use crate::commands::{CommandReport, load_vault_config};
use crate::vault::config::resolve_config_path;
use crate::vault::paths::resolve_paths;

include!(concat!(env!("OUT_DIR"), "/jvault_env_allowlist.rs"));

pub fn run() -> Result<CommandReport> {
    let mut report = CommandReport::new("config");
    report.detail(format!("build={}", env!("BUILD_UUID")));

    match resolve_config_path() {
        Some(path) if path.exists() => report.detail(format!("config_file={}", path.display())),
        Some(path) => report.detail(format!("config_file={} (absent, defaults)", path.display())),
        None => report.detail("config_file=none"),
    }

    let cfg = load_vault_config()?;
    report.detail(format!(
        "archive.part_threshold_bytes={}",
        cfg.archive.part_threshold_bytes
    ));
    report.detail(format!("archive.time_zone={}", cfg.archive.time_zone));
    report.detail(format!("archive.categories={}", cfg.archive.categories.join(",")));
    report.detail(format!("backfill.start_date={}", cfg.backfill.start_date));
    report.detail(format!("backfill.chunk_years={}", cfg.backfill.chunk_years));
    report.detail(format!("backfill.timeout_secs={}", cfg.backfill.timeout_secs));
    report.detail(format!("workers.concurrency={}", cfg.workers.concurrency));
    report.detail(format!(
        "retry.max_attempts={} base_delay_ms={} max_delay_ms={}",
        cfg.retry.max_attempts, cfg.retry.base_delay_ms, cfg.retry.max_delay_ms
    ));
    report.detail(format!(
        "storage.bucket={}",
        cfg.storage.bucket.as_deref().unwrap_or("none (directory mirror)")
    ));
    if let Some(url) = &cfg.storage.endpoint_url {
        report.detail(format!("storage.endpoint_url={url}"));
    }
    if let Some(region) = &cfg.storage.region {
        report.detail(format!("storage.region={region}"));
    }
    report.detail(format!("storage.force_path_style={}", cfg.storage.path_style()));

    let paths = resolve_paths()?;
    report.detail(format!("paths.bucket_dir={}", paths.bucket_dir.display()));
    report.detail(format!("paths.inbox_dir={}", paths.inbox_dir.display()));
    report.detail(format!("paths.state_dir={}", paths.state_dir.display()));
    report.detail(format!("paths.staging_dir={}", paths.staging_dir.display()));

    for key in GENERATED_JVAULT_ENV_ALLOWLIST {
        let state = if env::var_os(key).is_some() { "set" } else { "unset" };
        report.detail(format!("env.{key}={state}"));
    }
    Ok(report)
}
