use serde::{Deserialize, Serialize};

/// Four-level severity scale used by `npm audit`, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    /// Maps an audit-tool severity string onto the scale.
    ///
    /// Matching is case-insensitive. Anything unrecognised maps to
    /// [`Severity::Moderate`].
    ///
    /// # Example
    ///
    /// ```
    /// use depscan::Severity;
    ///
    /// assert_eq!(Severity::from_audit("CRITICAL"), Severity::Critical);
    /// assert_eq!(Severity::from_audit("whatever"), Severity::Moderate);
    /// ```
    pub fn from_audit(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Severity::Low,
            "moderate" => Severity::Moderate,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Moderate,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cvss {
    pub score: f64,
    #[serde(rename = "vectorString")]
    pub vector: String,
}

/// A single advisory affecting a single dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vulnerability {
    pub id: String,
    pub title: String,
    pub overview: String,
    pub severity: Severity,
    pub package: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patched_in: Option<String>,
    pub recommendation: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwe: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cvss: Option<Cvss>,
}

/// Builds the remediation hint attached to every vulnerability.
pub fn recommendation_for(package: &str, patched_in: Option<&str>) -> String {
    match patched_in {
        Some(version) => format!("Upgrade {} to version {} or later", package, version),
        None => format!(
            "No fix available for {}; consider replacing it or limiting its exposure",
            package
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Moderate);
        assert!(Severity::Moderate < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_from_audit_case_insensitive() {
        assert_eq!(Severity::from_audit("low"), Severity::Low);
        assert_eq!(Severity::from_audit("Moderate"), Severity::Moderate);
        assert_eq!(Severity::from_audit("HIGH"), Severity::High);
        assert_eq!(Severity::from_audit(" critical "), Severity::Critical);
    }

    #[test]
    fn test_severity_unknown_defaults_to_moderate() {
        assert_eq!(Severity::from_audit("info"), Severity::Moderate);
        assert_eq!(Severity::from_audit(""), Severity::Moderate);
    }

    #[test]
    fn test_vulnerability_serializes_camel_case() {
        let vuln = Vulnerability {
            id: "GHSA-1".to_string(),
            title: "Prototype pollution".to_string(),
            overview: String::new(),
            severity: Severity::High,
            package: "lodash".to_string(),
            version: "<4.17.21".to_string(),
            patched_in: Some("4.17.21".to_string()),
            recommendation: recommendation_for("lodash", Some("4.17.21")),
            references: vec![],
            cwe: None,
            cvss: None,
        };

        let json = serde_json::to_value(&vuln).unwrap();
        assert_eq!(json["patchedIn"], "4.17.21");
        assert_eq!(json["severity"], "high");
        assert!(json.get("cwe").is_none());
    }
}
