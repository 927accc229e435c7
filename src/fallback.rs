//! Built-in table of known-vulnerable package versions.
//!
//! Consulted only when `npm audit` could not produce a result. Matches are
//! reported at [`Severity::High`] regardless of the advisory's real rating.

use crate::model::{recommendation_for, DependencyInfo, Severity, Vulnerability};
use semver::{Version, VersionReq};
use tracing::debug;

struct KnownVulnerability {
    package: &'static str,
    affected: &'static str,
    id: &'static str,
    title: &'static str,
    patched_in: &'static str,
}

const KNOWN_VULNERABILITIES: &[KnownVulnerability] = &[
    KnownVulnerability {
        package: "lodash",
        affected: "<4.17.21",
        id: "CVE-2021-23337",
        title: "Command injection in lodash template",
        patched_in: "4.17.21",
    },
    KnownVulnerability {
        package: "minimist",
        affected: "<1.2.6",
        id: "CVE-2021-44906",
        title: "Prototype pollution in minimist",
        patched_in: "1.2.6",
    },
    KnownVulnerability {
        package: "axios",
        affected: "<0.21.2",
        id: "CVE-2021-3749",
        title: "Regular expression denial of service in axios",
        patched_in: "0.21.2",
    },
    KnownVulnerability {
        package: "node-fetch",
        affected: "<2.6.7",
        id: "CVE-2022-0235",
        title: "Exposure of sensitive headers on redirect in node-fetch",
        patched_in: "2.6.7",
    },
    KnownVulnerability {
        package: "jsonwebtoken",
        affected: "<9.0.0",
        id: "CVE-2022-23529",
        title: "Insecure key handling in jsonwebtoken",
        patched_in: "9.0.0",
    },
    KnownVulnerability {
        package: "moment",
        affected: ">=2.18.0, <2.29.4",
        id: "CVE-2022-31129",
        title: "Inefficient RFC2822 parsing in moment",
        patched_in: "2.29.4",
    },
    KnownVulnerability {
        package: "shell-quote",
        affected: "<1.7.3",
        id: "CVE-2021-42740",
        title: "Command injection in shell-quote",
        patched_in: "1.7.3",
    },
    KnownVulnerability {
        package: "tar",
        affected: "<6.1.9",
        id: "CVE-2021-37713",
        title: "Arbitrary file write in tar",
        patched_in: "6.1.9",
    },
    KnownVulnerability {
        package: "ansi-regex",
        affected: ">=4.0.0, <4.1.1",
        id: "CVE-2021-3807",
        title: "Regular expression denial of service in ansi-regex",
        patched_in: "4.1.1",
    },
    KnownVulnerability {
        package: "semver",
        affected: ">=7.0.0, <7.5.2",
        id: "CVE-2022-25883",
        title: "Regular expression denial of service in semver",
        patched_in: "7.5.2",
    },
];

/// Parses a manifest version, padding short forms like `4.17` to `4.17.0`.
fn parse_loose(version: &str) -> Option<Version> {
    let token = version
        .split_whitespace()
        .next()?
        .trim_start_matches('v');

    if let Ok(parsed) = Version::parse(token) {
        return Some(parsed);
    }

    let parts = token.split('.').count();
    if parts >= 3 {
        return None;
    }
    let padded = format!("{}{}", token, ".0".repeat(3 - parts));
    Version::parse(&padded).ok()
}

/// Checks the manifest against the built-in table.
pub fn check(deps: &[DependencyInfo]) -> Vec<Vulnerability> {
    let mut found = Vec::new();

    for dep in deps {
        let Some(version) = parse_loose(&dep.version) else {
            debug!(package = %dep.name, version = %dep.version, "unparseable version, skipping");
            continue;
        };

        for known in KNOWN_VULNERABILITIES.iter().filter(|k| k.package == dep.name) {
            let Ok(req) = VersionReq::parse(known.affected) else {
                continue;
            };
            if !req.matches(&version) {
                continue;
            }

            found.push(Vulnerability {
                id: known.id.to_string(),
                title: known.title.to_string(),
                overview: format!(
                    "{} {} matches a known-vulnerable range; run npm audit for a full report",
                    dep.name, dep.version
                ),
                severity: Severity::High,
                package: dep.name.clone(),
                version: known.affected.to_string(),
                patched_in: Some(known.patched_in.to_string()),
                recommendation: recommendation_for(&dep.name, Some(known.patched_in)),
                references: vec![format!("https://nvd.nist.gov/vuln/detail/{}", known.id)],
                cwe: None,
                cvss: None,
            });
        }
    }

    found
}
