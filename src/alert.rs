//! Alert notifications for dangerous scan results.
//!
//! A scan raises a critical alert when any critical vulnerability was found
//! and a high alert when three or more high-severity ones were. Delivery is
//! fire-and-forget: [`dispatch`] spawns a task and never delays the result.

use crate::model::{ScanResult, Severity};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

/// High-severity count at which a high alert is raised.
const HIGH_ALERT_THRESHOLD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Critical,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub title: String,
    pub description: String,
    pub details: serde_json::Value,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log.
pub struct TracingAlerter;

#[async_trait]
impl AlertSink for TracingAlerter {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        match alert.level {
            AlertLevel::Critical => error!(
                title = %alert.title,
                details = %alert.details,
                "{}",
                alert.description
            ),
            AlertLevel::High => warn!(
                title = %alert.title,
                details = %alert.details,
                "{}",
                alert.description
            ),
        }
        Ok(())
    }
}

/// POSTs alerts as JSON to a webhook.
pub struct WebhookAlerter {
    client: reqwest::Client,
    url: String,
}

impl WebhookAlerter {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl AlertSink for WebhookAlerter {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        self.client
            .post(&self.url)
            .json(alert)
            .send()
            .await
            .context("failed to reach alert webhook")?
            .error_for_status()
            .context("alert webhook rejected the alert")?;
        Ok(())
    }
}

/// Alerts warranted by `result`, most severe first.
pub fn alerts_for(result: &ScanResult) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let summary = &result.summary;

    let packages_at = |severity: Severity| -> Vec<String> {
        result
            .vulnerabilities
            .iter()
            .filter(|v| v.severity == severity)
            .map(|v| v.package.clone())
            .collect()
    };

    if summary.critical > 0 {
        alerts.push(Alert {
            level: AlertLevel::Critical,
            title: "Critical dependency vulnerabilities".to_string(),
            description: format!(
                "{} critical vulnerabilities found in project dependencies",
                summary.critical
            ),
            details: json!({
                "scanId": result.scan_id,
                "packages": packages_at(Severity::Critical),
                "summary": summary,
            }),
        });
    }

    if summary.high >= HIGH_ALERT_THRESHOLD {
        alerts.push(Alert {
            level: AlertLevel::High,
            title: "Multiple high-severity dependency vulnerabilities".to_string(),
            description: format!(
                "{} high-severity vulnerabilities found in project dependencies",
                summary.high
            ),
            details: json!({
                "scanId": result.scan_id,
                "packages": packages_at(Severity::High),
                "summary": summary,
            }),
        });
    }

    alerts
}

/// Sends `alerts` on a detached task. Failures are logged, never returned.
pub fn dispatch(sink: Arc<dyn AlertSink>, alerts: Vec<Alert>) {
    if alerts.is_empty() {
        return;
    }

    tokio::spawn(async move {
        for alert in &alerts {
            if let Err(e) = sink.send(alert).await {
                warn!(sink = sink.name(), title = %alert.title, error = %e, "failed to send alert");
            }
        }
    });
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingAlerter;
    use super::*;
    use crate::model::{
        new_scan_id, recommendation_for, CacheStatus, ScanStatus, SeveritySummary, Vulnerability,
    };
    use chrono::Utc;

    fn vuln(package: &str, severity: Severity) -> Vulnerability {
        Vulnerability {
            id: format!("GHSA-{}", package),
            title: "t".to_string(),
            overview: String::new(),
            severity,
            package: package.to_string(),
            version: "*".to_string(),
            patched_in: None,
            recommendation: recommendation_for(package, None),
            references: vec![],
            cwe: None,
            cvss: None,
        }
    }

    fn result_with(vulns: Vec<Vulnerability>) -> ScanResult {
        ScanResult {
            timestamp: Utc::now(),
            scan_id: new_scan_id(),
            duration: 0,
            summary: SeveritySummary::from_vulnerabilities(&vulns),
            vulnerabilities: vulns,
            dependencies: vec![],
            overall_risk: Severity::Low,
            recommendations: vec![],
            scan_status: ScanStatus::Complete,
            errors: vec![],
            cache_status: CacheStatus::Miss,
        }
    }

    #[test]
    fn test_no_alerts_below_thresholds() {
        let result = result_with(vec![
            vuln("a", Severity::High),
            vuln("b", Severity::High),
            vuln("c", Severity::Moderate),
        ]);
        assert!(alerts_for(&result).is_empty());
    }

    #[test]
    fn test_critical_and_high_alerts() {
        let result = result_with(vec![
            vuln("a", Severity::Critical),
            vuln("b", Severity::High),
            vuln("c", Severity::High),
            vuln("d", Severity::High),
        ]);

        let alerts = alerts_for(&result);
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert_eq!(alerts[0].details["packages"], json!(["a"]));
        assert_eq!(alerts[1].level, AlertLevel::High);
        assert_eq!(alerts[1].details["packages"], json!(["b", "c", "d"]));
    }

    #[tokio::test]
    async fn test_dispatch_delivers_in_background() {
        let sink = Arc::new(RecordingAlerter::default());
        let result = result_with(vec![vuln("a", Severity::Critical)]);

        dispatch(sink.clone(), alerts_for(&result));

        for _ in 0..100 {
            if !sink.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }
}
