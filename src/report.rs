//! Summary, risk and recommendations derived from collected scan data.

use crate::model::{DependencyInfo, Severity, SeveritySummary};

const BEST_PRACTICES: [&str; 3] = [
    "Automate dependency updates with a bot such as Dependabot or Renovate",
    "Run `npm audit` as part of your CI pipeline",
    "Use `npm ci` for reproducible installs in production",
];

/// Decision tree, not a weighted score: any critical wins, then more than two
/// highs, then any high or more than five moderates.
pub fn overall_risk(summary: &SeveritySummary) -> Severity {
    if summary.critical > 0 {
        Severity::Critical
    } else if summary.high > 2 {
        Severity::High
    } else if summary.high > 0 || summary.moderate > 5 {
        Severity::Moderate
    } else {
        Severity::Low
    }
}

fn plural(count: usize, one: &str, many: &str) -> String {
    if count == 1 {
        format!("{} {}", count, one)
    } else {
        format!("{} {}", count, many)
    }
}

pub fn recommendations(summary: &SeveritySummary, deps: &[DependencyInfo]) -> Vec<String> {
    let mut out = Vec::new();

    if summary.total > 0 {
        out.push("Run `npm audit fix` to apply available fixes automatically".to_string());

        if summary.critical > 0 {
            out.push(format!(
                "Address {} immediately",
                plural(summary.critical, "critical vulnerability", "critical vulnerabilities")
            ));
        }
        if summary.high > 0 {
            out.push(format!(
                "Address {} within 24 hours",
                plural(summary.high, "high-severity vulnerability", "high-severity vulnerabilities")
            ));
        }
    }

    let outdated = deps.iter().filter(|d| d.outdated).count();
    if outdated > 0 {
        out.push(format!(
            "Run `npm update` to update {}",
            plural(outdated, "outdated dependency", "outdated dependencies")
        ));
    }

    out.extend(BEST_PRACTICES.iter().map(|s| s.to_string()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(critical: usize, high: usize, moderate: usize, low: usize) -> SeveritySummary {
        SeveritySummary {
            critical,
            high,
            moderate,
            low,
            total: critical + high + moderate + low,
        }
    }

    #[test]
    fn test_overall_risk_tree() {
        assert_eq!(overall_risk(&summary(0, 0, 0, 0)), Severity::Low);
        assert_eq!(overall_risk(&summary(0, 0, 0, 40)), Severity::Low);
        assert_eq!(overall_risk(&summary(1, 0, 0, 0)), Severity::Critical);
        assert_eq!(overall_risk(&summary(1, 9, 9, 9)), Severity::Critical);
        assert_eq!(overall_risk(&summary(0, 3, 0, 0)), Severity::High);
        assert_eq!(overall_risk(&summary(0, 2, 0, 0)), Severity::Moderate);
        assert_eq!(overall_risk(&summary(0, 0, 6, 0)), Severity::Moderate);
        assert_eq!(overall_risk(&summary(0, 0, 5, 0)), Severity::Low);
    }

    #[test]
    fn test_clean_project_gets_only_best_practices() {
        let recs = recommendations(&summary(0, 0, 0, 0), &[]);
        assert_eq!(recs.len(), 3);
        assert!(recs[1].contains("CI"));
    }

    #[test]
    fn test_recommendations_are_additive() {
        let mut dep = DependencyInfo::new("next", "13.0.0", false);
        dep.mark_outdated("14.2.0");

        let recs = recommendations(&summary(2, 1, 0, 0), &[dep]);

        assert_eq!(recs.len(), 7);
        assert!(recs[0].contains("npm audit fix"));
        assert_eq!(recs[1], "Address 2 critical vulnerabilities immediately");
        assert_eq!(recs[2], "Address 1 high-severity vulnerability within 24 hours");
        assert_eq!(recs[3], "Run `npm update` to update 1 outdated dependency");
    }
}
