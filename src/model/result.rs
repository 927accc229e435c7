use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::{DependencyInfo, Severity, Vulnerability};
use crate::error::ScanError;

static SCAN_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Complete,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    Expired,
}

/// Vulnerability counts per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeveritySummary {
    pub critical: usize,
    pub high: usize,
    pub moderate: usize,
    pub low: usize,
    pub total: usize,
}

impl SeveritySummary {
    pub fn from_vulnerabilities(vulns: &[Vulnerability]) -> Self {
        let mut summary = Self::default();
        for vuln in vulns {
            summary.total += 1;
            match vuln.severity {
                Severity::Critical => summary.critical += 1,
                Severity::High => summary.high += 1,
                Severity::Moderate => summary.moderate += 1,
                Severity::Low => summary.low += 1,
            }
        }
        summary
    }
}

/// The outcome of one [`run_scan`](crate::DependencyScanner::run_scan) call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub timestamp: DateTime<Utc>,
    pub scan_id: String,
    pub duration: u64,
    pub vulnerabilities: Vec<Vulnerability>,
    pub dependencies: Vec<DependencyInfo>,
    pub summary: SeveritySummary,
    pub overall_risk: Severity,
    pub recommendations: Vec<String>,
    pub scan_status: ScanStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ScanError>,
    pub cache_status: CacheStatus,
}

impl ScanResult {
    pub fn outdated_count(&self) -> usize {
        self.dependencies.iter().filter(|d| d.outdated).count()
    }

    /// Returns the copy handed out on a cache hit: same contents, fresh id.
    pub fn as_cache_hit(&self) -> Self {
        Self {
            scan_id: new_scan_id(),
            cache_status: CacheStatus::Hit,
            ..self.clone()
        }
    }
}

/// Generates an id unique within the process and practically unique across runs.
pub fn new_scan_id() -> String {
    let seq = SCAN_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("scan-{}-{}", Utc::now().timestamp_millis(), seq)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_ids_are_unique() {
        let a = new_scan_id();
        let b = new_scan_id();
        assert_ne!(a, b);
        assert!(a.starts_with("scan-"));
    }

    #[test]
    fn test_errors_omitted_when_empty() {
        let result = ScanResult {
            timestamp: Utc::now(),
            scan_id: new_scan_id(),
            duration: 12,
            vulnerabilities: vec![],
            dependencies: vec![],
            summary: SeveritySummary::default(),
            overall_risk: Severity::Low,
            recommendations: vec![],
            scan_status: ScanStatus::Complete,
            errors: vec![],
            cache_status: CacheStatus::Miss,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("errors").is_none());
        assert_eq!(json["scanStatus"], "complete");
        assert_eq!(json["cacheStatus"], "miss");
        assert_eq!(json["overallRisk"], "low");

        let hit = result.as_cache_hit();
        assert_eq!(hit.cache_status, CacheStatus::Hit);
        assert_ne!(hit.scan_id, result.scan_id);
        assert_eq!(hit.timestamp, result.timestamp);
    }
}
