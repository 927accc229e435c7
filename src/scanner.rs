//! The dependency scanner.
//!
//! A scan runs three operations against an npm project:
//!
//! | Operation | Source | Cache key |
//! |-----------|--------|-----------|
//! | audit | `npm audit --json` | `npm-audit` |
//! | manifest | `package.json` | - |
//! | outdated | `npm outdated --json` | `npm-outdated` |
//!
//! Each operation is retried with exponential backoff and settles into an
//! [`Outcome`]. A failed operation never stops the others; its classified
//! error is recorded on the [`ScanResult`] and the scan is reported as
//! partial. If the audit fails and fallback methods are enabled, the manifest
//! is checked against a built-in table of known-vulnerable versions instead.
//!
//! Finished scans are cached under `full-scan`.
//!
//! # Example
//!
//! ```no_run
//! use depscan::{DependencyScanner, ScannerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let scanner = DependencyScanner::new(ScannerConfig::default());
//!     let result = scanner.run_scan(false).await;
//!     println!("{:?}: {} vulnerabilities", result.scan_status, result.summary.total);
//! }
//! ```

use crate::alert::{self, AlertSink, TracingAlerter, WebhookAlerter};
use crate::cache::{CacheLookup, ScanCache};
use crate::config::{ConfigUpdate, ScannerConfig};
use crate::error::{classify_error, classify_message, OperationError, ScanError, ScanErrorType};
use crate::fallback;
use crate::model::{
    new_scan_id, CacheStatus, DependencyInfo, ScanResult, ScanStatus, SeveritySummary,
    Vulnerability,
};
use crate::npm::{self, OutdatedPackage};
use crate::outcome::Outcome;
use crate::report;
use crate::retry::RetryPolicy;
use crate::runner::{CommandOutput, CommandRunner, SystemRunner};
use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

pub const FULL_SCAN_KEY: &str = "full-scan";
pub const AUDIT_KEY: &str = "npm-audit";
pub const OUTDATED_KEY: &str = "npm-outdated";
const MANIFEST_OP: &str = "manifest";

static SHARED: OnceLock<DependencyScanner> = OnceLock::new();

/// Everything gathered before the summary is computed.
struct Collected {
    vulnerabilities: Vec<Vulnerability>,
    dependencies: Vec<DependencyInfo>,
    errors: Vec<ScanError>,
    status: ScanStatus,
}

/// Holds an operation's outcome once it settles, so it outlives the
/// overall timeout.
#[derive(Default)]
struct Slot<T>(Mutex<Option<Outcome<T>>>);

impl<T: Clone> Slot<T> {
    fn keep(&self, outcome: Outcome<T>) -> Outcome<T> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome.clone());
        outcome
    }

    fn take(&self) -> Option<Outcome<T>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[derive(Default)]
struct Settled {
    audit: Slot<Vec<Vulnerability>>,
    manifest: Slot<Vec<DependencyInfo>>,
    outdated: Slot<BTreeMap<String, OutdatedPackage>>,
}

impl Collected {
    fn failed(errors: Vec<ScanError>) -> Self {
        Self {
            vulnerabilities: Vec::new(),
            dependencies: Vec::new(),
            errors,
            status: ScanStatus::Failed,
        }
    }
}

pub struct DependencyScanner {
    config: RwLock<ScannerConfig>,
    cache: ScanCache,
    runner: Arc<dyn CommandRunner>,
    alerts: Option<Arc<dyn AlertSink>>,
}

impl DependencyScanner {
    /// Creates a scanner that runs the real `npm` executable.
    pub fn new(config: ScannerConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    pub fn with_runner(config: ScannerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            cache: ScanCache::new(config.cache_dir.clone()),
            config: RwLock::new(config),
            runner,
            alerts: None,
        }
    }

    /// Sends alerts to `sink` instead of the log or the configured webhook.
    pub fn with_alerts(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(sink);
        self
    }

    /// A process-wide scanner built from the config file on first use.
    ///
    /// Prefer owning a scanner via [`DependencyScanner::new`]; this exists for
    /// callers that have nowhere to keep one.
    pub fn shared() -> &'static DependencyScanner {
        SHARED.get_or_init(|| {
            let config = ScannerConfig::load().unwrap_or_else(|e| {
                warn!(error = %e, "falling back to default scanner configuration");
                ScannerConfig::default()
            });
            DependencyScanner::new(config)
        })
    }

    /// Returns a copy of the current configuration.
    pub fn config(&self) -> ScannerConfig {
        self.config
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Merges `update` over the current configuration and returns the new snapshot.
    pub fn update_config(&self, update: ConfigUpdate) -> ScannerConfig {
        let (changed, snapshot) = {
            let mut current = self
                .config
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut next = current.clone();
            let changed = update.apply_to(&mut next);
            *current = next.clone();
            (changed, next)
        };

        if changed.contains(&"cache_dir") {
            self.cache.set_dir(snapshot.cache_dir.clone());
        }

        if changed.is_empty() {
            debug!("configuration update changed nothing");
        } else {
            info!(fields = ?changed, "scanner configuration updated");
        }
        snapshot
    }

    /// Drops every cached result, in memory and on disk.
    pub fn clear_scan_cache(&self) -> anyhow::Result<usize> {
        let removed = self.cache.clear()?;
        info!(files = removed, dir = %self.cache.dir().display(), "scan cache cleared");
        Ok(removed)
    }

    /// Runs a scan, or returns a cached one.
    ///
    /// `force_refresh` skips the `full-scan` cache entry. Operation failures
    /// and timeouts are recorded on the result rather than returned.
    pub async fn run_scan(&self, force_refresh: bool) -> ScanResult {
        let started = Instant::now();
        let cfg = self.config();
        let mut cache_status = CacheStatus::Miss;

        if cfg.enable_cache && !force_refresh {
            match self.cache.get::<ScanResult>(FULL_SCAN_KEY, cfg.cache_ttl()) {
                CacheLookup::Hit(cached) => {
                    let result = cached.as_cache_hit();
                    info!(scan_id = %result.scan_id, cached_from = %cached.scan_id, "returning cached scan");
                    return result;
                }
                CacheLookup::Expired => cache_status = CacheStatus::Expired,
                CacheLookup::Miss => {}
            }
        }

        let scan_id = new_scan_id();
        info!(
            scan_id = %scan_id,
            force_refresh,
            parallel = cfg.enable_parallel_processing,
            "starting dependency scan"
        );

        let use_sub_cache = cfg.enable_cache && (!force_refresh || cfg.reuse_sub_results_on_refresh);

        let settled = Settled::default();
        let scan = self.collect(&cfg, use_sub_cache, &settled);
        let collected = match tokio::time::timeout(cfg.scan_timeout(), scan).await {
                Ok(Ok(collected)) => collected,
                Ok(Err(err)) => {
                    error!(scan_id = %scan_id, error = %err, "scan orchestration failed");
                    Collected::failed(vec![err])
                }
                Err(_) => {
                    warn!(scan_id = %scan_id, timeout_ms = cfg.scan_timeout_ms, "scan timed out");
                    self.after_timeout(&cfg, &settled).await
                }
            };

        let summary = SeveritySummary::from_vulnerabilities(&collected.vulnerabilities);
        let result = ScanResult {
            timestamp: Utc::now(),
            scan_id,
            duration: started.elapsed().as_millis() as u64,
            overall_risk: report::overall_risk(&summary),
            recommendations: report::recommendations(&summary, &collected.dependencies),
            summary,
            vulnerabilities: collected.vulnerabilities,
            dependencies: collected.dependencies,
            scan_status: collected.status,
            errors: collected.errors,
            cache_status,
        };

        if cfg.enable_cache && result.scan_status != ScanStatus::Failed {
            self.store(FULL_SCAN_KEY, &result);
        }

        alert::dispatch(self.alert_sink(&cfg), alert::alerts_for(&result));

        info!(
            scan_id = %result.scan_id,
            status = ?result.scan_status,
            vulnerabilities = result.summary.total,
            outdated = result.outdated_count(),
            errors = result.errors.len(),
            duration_ms = result.duration,
            "dependency scan finished"
        );
        result
    }

    fn alert_sink(&self, cfg: &ScannerConfig) -> Arc<dyn AlertSink> {
        if let Some(sink) = &self.alerts {
            return sink.clone();
        }
        match &cfg.alert_webhook_url {
            Some(url) => Arc::new(WebhookAlerter::new(url.clone())),
            None => Arc::new(TracingAlerter),
        }
    }

    fn store<T: serde::Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.cache.set(key, value) {
            let kind = classify_message(&e.to_string(), "cache-write");
            warn!(key, error_type = %kind, error = %e, "failed to write cache entry");
        }
    }

    fn log_timing(cfg: &ScannerConfig, operation: &str, started: Instant) {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        if cfg.verbose_logging {
            info!(op = operation, elapsed_ms, "operation settled");
        } else {
            debug!(op = operation, elapsed_ms, "operation settled");
        }
    }

    /// Runs the three operations and combines their outcomes.
    ///
    /// Only a failure of the scheduling itself is returned as an error.
    async fn collect(
        &self,
        cfg: &ScannerConfig,
        use_sub_cache: bool,
        settled: &Settled,
    ) -> Result<Collected, ScanError> {
        let policy = RetryPolicy::from_config(cfg);
        let audit = async { settled.audit.keep(self.audit(cfg, &policy, use_sub_cache).await) };
        let manifest = async { settled.manifest.keep(self.manifest(cfg, &policy).await) };
        let outdated =
            async { settled.outdated.keep(self.outdated(cfg, &policy, use_sub_cache).await) };

        let (audit, manifest, outdated) = if cfg.enable_parallel_processing {
            let permits = Semaphore::new(cfg.max_concurrent_operations.max(1));
            // join! waits for all three regardless of individual failures.
            let (audit, manifest, outdated) = futures::join!(
                limited(&permits, audit),
                limited(&permits, manifest),
                limited(&permits, outdated),
            );
            (audit?, manifest?, outdated?)
        } else {
            (audit.await, manifest.await, outdated.await)
        };

        Ok(combine(cfg, audit, manifest, outdated))
    }

    async fn audit(
        &self,
        cfg: &ScannerConfig,
        policy: &RetryPolicy,
        use_cache: bool,
    ) -> Outcome<Vec<Vulnerability>> {
        if use_cache {
            if let CacheLookup::Hit(vulns) = self.cache.get(AUDIT_KEY, cfg.cache_ttl()) {
                debug!(op = AUDIT_KEY, "using cached audit");
                return Outcome::Complete(vulns);
            }
        }

        let runner = self.runner.as_ref();
        let started = Instant::now();
        let result = policy
            .run(AUDIT_KEY, move |_| async move {
                let output = runner
                    .run(
                        &cfg.npm_command,
                        &["audit", "--json"],
                        &cfg.project_root,
                        cfg.audit_timeout(),
                    )
                    .await?;
                parse_output(&output, "npm audit --json", npm::parse_audit)
            })
            .await;
        Self::log_timing(cfg, AUDIT_KEY, started);

        match result {
            Ok(report) if report.skipped == 0 => {
                if cfg.enable_cache {
                    self.store(AUDIT_KEY, &report.vulnerabilities);
                }
                Outcome::Complete(report.vulnerabilities)
            }
            Ok(report) => {
                warn!(op = AUDIT_KEY, skipped = report.skipped, "skipped malformed advisories");
                let err = ScanError::new(
                    ScanErrorType::ParseError,
                    format!("skipped {} malformed advisory entries", report.skipped),
                )
                .with_context(json!({ "operation": AUDIT_KEY, "skipped": report.skipped }));
                Outcome::Partial {
                    value: report.vulnerabilities,
                    errors: vec![err],
                }
            }
            Err(err) => Outcome::Failed(err),
        }
    }

    async fn manifest(&self, cfg: &ScannerConfig, policy: &RetryPolicy) -> Outcome<Vec<DependencyInfo>> {
        let path = cfg.manifest_path();
        let path = path.as_path();
        let started = Instant::now();
        let result = policy.run(MANIFEST_OP, move |_| read_manifest(path)).await;
        Self::log_timing(cfg, MANIFEST_OP, started);
        result.into()
    }

    async fn outdated(
        &self,
        cfg: &ScannerConfig,
        policy: &RetryPolicy,
        use_cache: bool,
    ) -> Outcome<BTreeMap<String, OutdatedPackage>> {
        if use_cache {
            if let CacheLookup::Hit(report) = self.cache.get(OUTDATED_KEY, cfg.cache_ttl()) {
                debug!(op = OUTDATED_KEY, "using cached outdated report");
                return Outcome::Complete(report);
            }
        }

        let runner = self.runner.as_ref();
        let started = Instant::now();
        let result = policy
            .run(OUTDATED_KEY, move |_| async move {
                let output = runner
                    .run(
                        &cfg.npm_command,
                        &["outdated", "--json"],
                        &cfg.project_root,
                        cfg.outdated_timeout(),
                    )
                    .await?;
                parse_output(&output, "npm outdated --json", npm::parse_outdated)
            })
            .await;
        Self::log_timing(cfg, OUTDATED_KEY, started);

        if cfg.enable_cache {
            if let Ok(report) = &result {
                self.store(OUTDATED_KEY, report);
            }
        }
        result.into()
    }

    /// Builds a result from the operations that settled before the overall
    /// timeout fired.
    ///
    /// Without a usable fallback the scan is failed, but settled data is
    /// still reported. With fallback enabled, a missing manifest is re-read
    /// and an unsettled or failed audit is replaced by the fallback table.
    async fn after_timeout(&self, cfg: &ScannerConfig, settled: &Settled) -> Collected {
        let mut timeout_err = ScanError::new(
            ScanErrorType::NetworkTimeout,
            format!("scan exceeded overall timeout of {}ms", cfg.scan_timeout_ms),
        )
        .with_context(json!({ "operation": FULL_SCAN_KEY }));
        let mut errors = Vec::new();

        let (dependencies, manifest_errors) = settled
            .manifest
            .take()
            .map(Outcome::into_parts)
            .unwrap_or_default();
        errors.extend(manifest_errors);
        let dependencies = match dependencies {
            None if cfg.enable_fallback_methods => {
                match read_manifest(&cfg.manifest_path()).await {
                    Ok(dependencies) => Some(dependencies),
                    Err(e) => {
                        errors.push(classify_error(&e, MANIFEST_OP));
                        None
                    }
                }
            }
            dependencies => dependencies,
        };
        let manifest_ok = dependencies.is_some();
        let mut dependencies = dependencies.unwrap_or_default();

        let (report, outdated_errors) = settled
            .outdated
            .take()
            .map(Outcome::into_parts)
            .unwrap_or_default();
        errors.extend(outdated_errors);
        if let Some(report) = report {
            npm::merge_outdated(&mut dependencies, &report);
        }

        let use_fallback = cfg.enable_fallback_methods && manifest_ok;
        let vulnerabilities = match settled.audit.take() {
            Some(Outcome::Failed(err)) if use_fallback => {
                errors.push(err.with_fallback());
                timeout_err = timeout_err.with_fallback();
                fallback::check(&dependencies)
            }
            None if use_fallback => {
                timeout_err = timeout_err.with_fallback();
                fallback::check(&dependencies)
            }
            audit => {
                let (vulns, audit_errors) = audit.map(Outcome::into_parts).unwrap_or_default();
                errors.extend(audit_errors);
                vulns.unwrap_or_default()
            }
        };

        let status = if use_fallback {
            warn!(
                matches = vulnerabilities.len(),
                fallback = timeout_err.fallback_used,
                "salvaged partial scan after timeout"
            );
            ScanStatus::Partial
        } else {
            timeout_err.recoverable = false;
            ScanStatus::Failed
        };
        errors.insert(0, timeout_err);

        Collected {
            vulnerabilities,
            dependencies,
            errors,
            status,
        }
    }
}

/// Holds a permit from `permits` while `fut` runs.
async fn limited<T>(permits: &Semaphore, fut: impl Future<Output = T>) -> Result<T, ScanError> {
    let _permit = permits
        .acquire()
        .await
        .map_err(|e| ScanError::fatal(format!("operation scheduler closed: {}", e)))?;
    Ok(fut.await)
}

async fn read_manifest(path: &Path) -> Result<Vec<DependencyInfo>, OperationError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| OperationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    npm::parse_manifest(&content)
}

/// Parses stdout even when the command exited non-zero; npm does that while
/// still printing a valid report.
fn parse_output<T>(
    output: &CommandOutput,
    command: &str,
    parse: impl Fn(&str) -> Result<T, OperationError>,
) -> Result<T, OperationError> {
    let command_failed = || OperationError::CommandFailed {
        command: command.to_string(),
        code: output.status,
        stderr: output.stderr.trim().to_string(),
    };

    if !output.success() && output.stdout.trim().is_empty() {
        return Err(command_failed());
    }

    match parse(&output.stdout) {
        Ok(value) => Ok(value),
        Err(e) if output.success() => Err(e),
        Err(e) => {
            debug!(command, error = %e, "unparseable output from failed command");
            Err(command_failed())
        }
    }
}

/// Merges operation outcomes into scan data, applying the fallback table
/// when the audit failed.
fn combine(
    cfg: &ScannerConfig,
    audit: Outcome<Vec<Vulnerability>>,
    manifest: Outcome<Vec<DependencyInfo>>,
    outdated: Outcome<BTreeMap<String, OutdatedPackage>>,
) -> Collected {
    let mut errors = Vec::new();
    let mut produced = 0;

    let (dependencies, manifest_errors) = manifest.into_parts();
    errors.extend(manifest_errors);
    let manifest_ok = dependencies.is_some();
    let mut dependencies = dependencies.unwrap_or_default();
    if manifest_ok {
        produced += 1;
    }

    let (report, outdated_errors) = outdated.into_parts();
    errors.extend(outdated_errors);
    if let Some(report) = report {
        npm::merge_outdated(&mut dependencies, &report);
        produced += 1;
    }

    let vulnerabilities = match audit {
        Outcome::Failed(err) if cfg.enable_fallback_methods && manifest_ok => {
            let found = fallback::check(&dependencies);
            warn!(
                error = %err,
                matches = found.len(),
                "audit failed, used fallback vulnerability table"
            );
            errors.push(err.with_fallback());
            produced += 1;
            found
        }
        audit => {
            let (vulns, audit_errors) = audit.into_parts();
            errors.extend(audit_errors);
            if vulns.is_some() {
                produced += 1;
            }
            vulns.unwrap_or_default()
        }
    };

    let status = if errors.is_empty() {
        ScanStatus::Complete
    } else if produced == 0 {
        ScanStatus::Failed
    } else {
        ScanStatus::Partial
    };

    Collected {
        vulnerabilities,
        dependencies,
        errors,
        status,
    }
}
