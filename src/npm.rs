//! Parsers for `npm audit --json`, `npm outdated --json` and `package.json`.
//!
//! Command output is untrusted. Each advisory or package entry is decoded on
//! its own; a malformed entry is skipped without discarding the rest.

use crate::error::OperationError;
use crate::model::{recommendation_for, Cvss, DependencyInfo, Severity, Vulnerability};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Vulnerabilities decoded from one audit run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditReport {
    pub vulnerabilities: Vec<Vulnerability>,
    /// Advisory entries that could not be decoded.
    pub skipped: usize,
}

#[derive(Deserialize)]
struct AuditAdvisory {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    source: Option<Value>,
    title: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    references: Option<Value>,
    #[serde(default)]
    cwe: Option<Value>,
    #[serde(default)]
    cvss: Option<AuditCvss>,
    #[serde(default)]
    range: Option<String>,
}

#[derive(Deserialize)]
struct AuditCvss {
    #[serde(default)]
    score: Option<f64>,
    #[serde(default, rename = "vectorString", alias = "vector")]
    vector: Option<String>,
}

/// npm 6 `advisories` entry.
#[derive(Deserialize)]
struct LegacyAdvisory {
    #[serde(default)]
    id: Option<Value>,
    title: String,
    module_name: String,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    overview: Option<String>,
    #[serde(default)]
    recommendation: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    references: Option<Value>,
    #[serde(default)]
    cwe: Option<Value>,
    #[serde(default)]
    vulnerable_versions: Option<String>,
    #[serde(default)]
    patched_versions: Option<String>,
}

/// Parses `npm audit --json` output.
///
/// Both the npm 7+ `vulnerabilities` map and the npm 6 `advisories` map are
/// understood. An `error` object at the top level is reported as a failure.
pub fn parse_audit(stdout: &str) -> Result<AuditReport, OperationError> {
    let root: Value = serde_json::from_str(stdout).map_err(|source| OperationError::Json {
        what: "npm audit output".to_string(),
        source,
    })?;

    let Some(root) = root.as_object() else {
        return Err(OperationError::Other(
            "npm audit output is not a JSON object".to_string(),
        ));
    };

    if let Some(error) = root.get("error") {
        return Err(audit_error(error));
    }

    let mut report = AuditReport::default();

    if let Some(vulns) = root.get("vulnerabilities").and_then(Value::as_object) {
        for (package, entry) in vulns {
            parse_vulnerability_entry(package, entry, &mut report);
        }
    }

    if let Some(advisories) = root.get("advisories").and_then(Value::as_object) {
        for (key, advisory) in advisories {
            match serde_json::from_value::<LegacyAdvisory>(advisory.clone()) {
                Ok(advisory) => report.vulnerabilities.push(legacy_vulnerability(key, advisory)),
                Err(e) => {
                    debug!(advisory = %key, error = %e, "skipping malformed advisory");
                    report.skipped += 1;
                }
            }
        }
    }

    Ok(report)
}

fn audit_error(error: &Value) -> OperationError {
    let code = error.get("code").and_then(Value::as_str).unwrap_or("unknown");
    let summary = error
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or("no summary");
    OperationError::Other(format!("npm audit reported {}: {}", code, summary))
}

fn parse_vulnerability_entry(package: &str, entry: &Value, report: &mut AuditReport) {
    let Some(entry) = entry.as_object() else {
        debug!(package, "skipping non-object vulnerability entry");
        report.skipped += 1;
        return;
    };

    let range = entry.get("range").and_then(Value::as_str);
    let patched_in = fix_target(entry);

    let Some(via) = entry.get("via").and_then(Value::as_array) else {
        return;
    };

    for (index, item) in via.iter().enumerate() {
        // Strings name another vulnerable package this one depends on.
        if item.is_string() {
            continue;
        }

        let advisory = match serde_json::from_value::<AuditAdvisory>(item.clone()) {
            Ok(advisory) => advisory,
            Err(e) => {
                debug!(package, index, error = %e, "skipping malformed advisory");
                report.skipped += 1;
                continue;
            }
        };

        let id = advisory
            .id
            .as_ref()
            .or(advisory.source.as_ref())
            .and_then(value_to_id)
            .unwrap_or_else(|| format!("NPM-{}-{}", package, index));

        let version = range
            .map(str::to_string)
            .or(advisory.range)
            .unwrap_or_else(|| "*".to_string());

        report.vulnerabilities.push(Vulnerability {
            id,
            title: advisory.title,
            overview: advisory.overview.unwrap_or_default(),
            severity: Severity::from_audit(advisory.severity.as_deref().unwrap_or_default()),
            package: package.to_string(),
            version,
            recommendation: recommendation_for(package, patched_in.as_deref()),
            patched_in: patched_in.clone(),
            references: references(advisory.references.as_ref(), advisory.url.as_deref()),
            cwe: string_list(advisory.cwe.as_ref()),
            cvss: advisory.cvss.and_then(into_cvss),
        });
    }
}

/// `fixAvailable` is either a boolean or an object naming the fix.
fn fix_target(entry: &Map<String, Value>) -> Option<String> {
    let fix = entry.get("fixAvailable")?.as_object()?;
    fix.get("version")
        .or_else(|| fix.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn legacy_vulnerability(key: &str, advisory: LegacyAdvisory) -> Vulnerability {
    let patched_in = advisory
        .patched_versions
        .filter(|v| !v.is_empty() && v != "<0.0.0")
        .map(|v| strip_version_prefix(&v).to_string());

    let recommendation = advisory
        .recommendation
        .unwrap_or_else(|| recommendation_for(&advisory.module_name, patched_in.as_deref()));

    Vulnerability {
        id: advisory
            .id
            .as_ref()
            .and_then(value_to_id)
            .unwrap_or_else(|| key.to_string()),
        title: advisory.title,
        overview: advisory.overview.unwrap_or_default(),
        severity: Severity::from_audit(advisory.severity.as_deref().unwrap_or_default()),
        version: advisory
            .vulnerable_versions
            .unwrap_or_else(|| "*".to_string()),
        package: advisory.module_name,
        patched_in,
        recommendation,
        references: references(advisory.references.as_ref(), advisory.url.as_deref()),
        cwe: string_list(advisory.cwe.as_ref()),
        cvss: None,
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Accepts a list of strings or a single string, dropping anything else.
fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    let list: Vec<String> = match value? {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => return None,
    };
    if list.is_empty() {
        None
    } else {
        Some(list)
    }
}

/// Reference URLs, with the advisory URL first. npm 6 packs references into
/// one newline-separated markdown string.
fn references(refs: Option<&Value>, url: Option<&str>) -> Vec<String> {
    let mut out: Vec<String> = url.into_iter().map(str::to_string).collect();

    let listed = match refs {
        Some(Value::String(s)) => s
            .lines()
            .map(|l| l.trim().trim_start_matches("- ").trim().to_string())
            .filter(|l| !l.is_empty())
            .collect(),
        other => string_list(other).unwrap_or_default(),
    };

    for reference in listed {
        if !out.contains(&reference) {
            out.push(reference);
        }
    }
    out
}

fn into_cvss(cvss: AuditCvss) -> Option<Cvss> {
    let score = cvss.score.unwrap_or(0.0);
    let vector = cvss.vector.unwrap_or_default();
    if score <= 0.0 && vector.is_empty() {
        return None;
    }
    Some(Cvss { score, vector })
}

/// One row of `npm outdated --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutdatedPackage {
    #[serde(default)]
    pub current: Option<String>,
    #[serde(default)]
    pub wanted: Option<String>,
    pub latest: String,
}

/// Parses `npm outdated --json` output into `name -> versions`.
///
/// Empty output means nothing is outdated. Entries without a `latest`
/// version are skipped. When npm reports a package once per workspace (an
/// array), the first location is used.
pub fn parse_outdated(stdout: &str) -> Result<BTreeMap<String, OutdatedPackage>, OperationError> {
    if stdout.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let root: Map<String, Value> =
        serde_json::from_str(stdout).map_err(|source| OperationError::Json {
            what: "npm outdated output".to_string(),
            source,
        })?;

    if let Some(error) = root.get("error") {
        return Err(audit_error(error));
    }

    let mut packages = BTreeMap::new();
    for (name, entry) in root {
        let entry = match entry {
            Value::Array(mut locations) if !locations.is_empty() => locations.swap_remove(0),
            other => other,
        };
        match serde_json::from_value::<OutdatedPackage>(entry) {
            Ok(package) => {
                packages.insert(name, package);
            }
            Err(e) => debug!(package = %name, error = %e, "skipping outdated entry"),
        }
    }
    Ok(packages)
}

#[derive(Deserialize)]
struct Manifest {
    #[serde(default)]
    dependencies: BTreeMap<String, Value>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, Value>,
}

/// Parses `package.json` into production entries followed by dev entries.
///
/// Version ranges lose their leading operator (`^1.2.3` becomes `1.2.3`).
/// Non-string versions are skipped.
pub fn parse_manifest(content: &str) -> Result<Vec<DependencyInfo>, OperationError> {
    let manifest: Manifest =
        serde_json::from_str(content).map_err(|source| OperationError::Json {
            what: "package.json".to_string(),
            source,
        })?;

    let prod = manifest
        .dependencies
        .iter()
        .map(|(name, version)| (name, version, false));
    let dev = manifest
        .dev_dependencies
        .iter()
        .map(|(name, version)| (name, version, true));

    Ok(prod
        .chain(dev)
        .filter_map(|(name, version, is_dev)| {
            let version = version.as_str()?;
            Some(DependencyInfo::new(
                name.clone(),
                strip_version_prefix(version),
                is_dev,
            ))
        })
        .collect())
}

pub fn strip_version_prefix(range: &str) -> &str {
    range
        .trim()
        .trim_start_matches(|c: char| matches!(c, '^' | '~' | '=' | '>' | '<') || c.is_whitespace())
}

/// Marks every dependency the outdated report mentions.
pub fn merge_outdated(deps: &mut [DependencyInfo], outdated: &BTreeMap<String, OutdatedPackage>) {
    for dep in deps.iter_mut() {
        if let Some(report) = outdated.get(&dep.name) {
            dep.mark_outdated(report.latest.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEFT_PAD_AUDIT: &str = r#"{"vulnerabilities": {"left-pad": {"range": "1.0.0 - 1.0.2", "fixAvailable": {"name":"1.0.3"}, "via":[{"id":"GHSA-xxxx","title":"Regex DoS","severity":"high","overview":"...","references":[],"cwe":["CWE-400"]}]}}}"#;

    #[test]
    fn test_parse_audit_single_advisory() {
        let report = parse_audit(LEFT_PAD_AUDIT).unwrap();

        assert_eq!(report.skipped, 0);
        assert_eq!(report.vulnerabilities.len(), 1);
        let vuln = &report.vulnerabilities[0];
        assert_eq!(vuln.id, "GHSA-xxxx");
        assert_eq!(vuln.package, "left-pad");
        assert_eq!(vuln.severity, Severity::High);
        assert_eq!(vuln.patched_in.as_deref(), Some("1.0.3"));
        assert_eq!(vuln.version, "1.0.0 - 1.0.2");
        assert_eq!(vuln.cwe, Some(vec!["CWE-400".to_string()]));
        assert!(vuln.references.is_empty());
    }

    #[test]
    fn test_parse_audit_npm7_shape() {
        let stdout = r#"{
            "auditReportVersion": 2,
            "vulnerabilities": {
                "minimist": {
                    "name": "minimist",
                    "severity": "critical",
                    "range": "<0.2.4",
                    "fixAvailable": {"name": "minimist", "version": "0.2.4", "isSemVerMajor": false},
                    "via": [{
                        "source": 1097677,
                        "name": "minimist",
                        "title": "Prototype Pollution in minimist",
                        "url": "https://github.com/advisories/GHSA-xvch-5gv4-984h",
                        "severity": "critical",
                        "cwe": ["CWE-1321"],
                        "cvss": {"score": 9.8, "vectorString": "CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H"},
                        "range": "<0.2.4"
                    }]
                },
                "mkdirp": {
                    "name": "mkdirp",
                    "severity": "critical",
                    "range": "0.4.1 - 0.5.1",
                    "fixAvailable": true,
                    "via": ["minimist"]
                }
            }
        }"#;

        let report = parse_audit(stdout).unwrap();
        assert_eq!(report.vulnerabilities.len(), 1);

        let vuln = &report.vulnerabilities[0];
        assert_eq!(vuln.id, "1097677");
        assert_eq!(vuln.patched_in.as_deref(), Some("0.2.4"));
        assert_eq!(
            vuln.references,
            vec!["https://github.com/advisories/GHSA-xvch-5gv4-984h".to_string()]
        );
        let cvss = vuln.cvss.as_ref().unwrap();
        assert_eq!(cvss.score, 9.8);
        assert!(cvss.vector.starts_with("CVSS:3.1"));
    }

    #[test]
    fn test_parse_audit_skips_malformed_advisories() {
        let stdout = r#"{"vulnerabilities": {
            "a": {"range": "*", "via": [{"severity": "high"}, {"title": "ok", "severity": "low"}]},
            "b": 7
        }}"#;

        let report = parse_audit(stdout).unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.vulnerabilities.len(), 1);
        assert_eq!(report.vulnerabilities[0].id, "NPM-a-1");
        assert_eq!(report.vulnerabilities[0].severity, Severity::Low);
    }

    #[test]
    fn test_parse_audit_empty_and_error() {
        assert!(parse_audit(r#"{"vulnerabilities": {}}"#)
            .unwrap()
            .vulnerabilities
            .is_empty());

        let err = parse_audit(r#"{"error": {"code": "ENOLOCK", "summary": "no lockfile"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("ENOLOCK"));

        assert!(matches!(
            parse_audit("npm ERR! oops"),
            Err(OperationError::Json { .. })
        ));
    }

    #[test]
    fn test_parse_audit_legacy_advisories() {
        let stdout = r#"{"advisories": {"1179": {
            "id": 1179,
            "title": "Prototype Pollution",
            "module_name": "minimist",
            "severity": "low",
            "vulnerable_versions": "<0.2.1",
            "patched_versions": ">=0.2.1",
            "references": "- https://a.example\n- https://b.example",
            "url": "https://npmjs.com/advisories/1179",
            "cwe": "CWE-471"
        }}}"#;

        let report = parse_audit(stdout).unwrap();
        let vuln = &report.vulnerabilities[0];
        assert_eq!(vuln.id, "1179");
        assert_eq!(vuln.package, "minimist");
        assert_eq!(vuln.patched_in.as_deref(), Some("0.2.1"));
        assert_eq!(vuln.references.len(), 3);
        assert_eq!(vuln.cwe, Some(vec!["CWE-471".to_string()]));
    }

    #[test]
    fn test_parse_manifest_strips_prefixes() {
        let manifest = r#"{
            "name": "site",
            "dependencies": {"next": "^14.1.0", "react": "~18.2.0", "odd": 5},
            "devDependencies": {"typescript": ">=5.3.3"}
        }"#;

        let deps = parse_manifest(manifest).unwrap();
        assert_eq!(deps.len(), 3);
        assert_eq!(deps[0], DependencyInfo::new("next", "14.1.0", false));
        assert_eq!(deps[1].version, "18.2.0");
        assert_eq!(deps[2].name, "typescript");
        assert_eq!(deps[2].version, "5.3.3");
        assert!(deps[2].dev_dependency);
    }

    #[test]
    fn test_parse_manifest_without_dependencies() {
        assert!(parse_manifest(r#"{"name": "empty"}"#).unwrap().is_empty());
        assert!(parse_manifest("[1, 2]").is_err());
    }

    #[test]
    fn test_merge_outdated() {
        let mut deps = vec![
            DependencyInfo::new("foo", "1.0.0", false),
            DependencyInfo::new("bar", "3.0.0", true),
        ];
        let outdated =
            parse_outdated(r#"{"foo": {"current": "1.0.0", "latest": "2.0.0"}}"#).unwrap();

        merge_outdated(&mut deps, &outdated);

        assert!(deps[0].outdated);
        assert_eq!(deps[0].latest_version.as_deref(), Some("2.0.0"));
        assert!(!deps[1].outdated);
        assert_eq!(deps[1].latest_version, None);
    }

    #[test]
    fn test_parse_outdated_edge_cases() {
        assert!(parse_outdated("").unwrap().is_empty());
        assert!(parse_outdated("  \n").unwrap().is_empty());

        let outdated = parse_outdated(
            r#"{
                "a": {"current": "1.0.0", "wanted": "1.0.1", "latest": "2.0.0"},
                "b": {"current": "1.0.0"},
                "c": [{"current": "0.1.0", "latest": "0.2.0"}, {"current": "0.1.1", "latest": "0.2.0"}]
            }"#,
        )
        .unwrap();

        assert_eq!(outdated.len(), 2);
        assert_eq!(outdated["a"].wanted.as_deref(), Some("1.0.1"));
        assert_eq!(outdated["c"].current.as_deref(), Some("0.1.0"));
    }
}
