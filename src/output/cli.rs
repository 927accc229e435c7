use crate::model::{ScanResult, ScanStatus, Severity};
use anyhow::Result;
use tabled::{settings::Style, Table, Tabled};

#[derive(Tabled)]
struct VulnRow {
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Fixed In")]
    fixed_in: String,
}

#[derive(Tabled)]
struct OutdatedRow {
    #[tabled(rename = "Package")]
    package: String,
    #[tabled(rename = "Declared")]
    current: String,
    #[tabled(rename = "Latest")]
    latest: String,
    #[tabled(rename = "Type")]
    update_type: String,
    #[tabled(rename = "Dev")]
    dev: String,
}

#[derive(Tabled)]
struct ErrorRow {
    #[tabled(rename = "Type")]
    error_type: String,
    #[tabled(rename = "Message")]
    message: String,
    #[tabled(rename = "Recoverable")]
    recoverable: String,
    #[tabled(rename = "Fallback")]
    fallback: String,
}

pub fn print_cli_table(result: &ScanResult) -> Result<()> {
    println!();
    println!(
        "Scan {} completed at {} in {}ms ({:?}, cache {:?})",
        result.scan_id,
        result.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        result.duration,
        result.scan_status,
        result.cache_status,
    );
    println!();

    if result.vulnerabilities.is_empty() {
        println!("No vulnerabilities found.");
    } else {
        println!("Found {} vulnerabilities:", result.vulnerabilities.len());
        println!();

        let mut vulns = result.vulnerabilities.clone();
        vulns.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.package.cmp(&b.package)));

        let rows: Vec<VulnRow> = vulns
            .iter()
            .map(|v| VulnRow {
                severity: format_severity(&v.severity),
                package: v.package.clone(),
                id: v.id.clone(),
                title: truncate(&v.title, 50),
                fixed_in: v.patched_in.clone().unwrap_or_else(|| "-".to_string()),
            })
            .collect();

        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    let outdated: Vec<OutdatedRow> = result
        .dependencies
        .iter()
        .filter(|d| d.outdated)
        .map(|d| {
            let latest = d.latest_version.clone().unwrap_or_default();
            OutdatedRow {
                package: d.name.clone(),
                update_type: classify_update(&d.version, &latest),
                current: d.version.clone(),
                latest,
                dev: if d.dev_dependency { "yes" } else { "" }.to_string(),
            }
        })
        .collect();

    if !outdated.is_empty() {
        println!();
        println!(
            "{} of {} dependencies are outdated:",
            outdated.len(),
            result.dependencies.len()
        );
        println!();
        println!("{}", Table::new(outdated).with(Style::rounded()));
    }

    if !result.errors.is_empty() {
        println!();
        println!("Problems during the scan:");
        println!();

        let rows: Vec<ErrorRow> = result
            .errors
            .iter()
            .map(|e| ErrorRow {
                error_type: e.error_type.to_string(),
                message: truncate(&e.message, 70),
                recoverable: yes_no(e.recoverable),
                fallback: yes_no(e.fallback_used),
            })
            .collect();

        println!("{}", Table::new(rows).with(Style::rounded()));
    }

    print_summary(result);
    Ok(())
}

fn print_summary(result: &ScanResult) {
    let s = &result.summary;
    println!();
    println!(
        "Summary: {} critical, {} high, {} moderate, {} low ({} total)",
        s.critical, s.high, s.moderate, s.low, s.total
    );
    println!("Overall risk: {}", format_severity(&result.overall_risk));

    if result.scan_status == ScanStatus::Failed {
        println!("\x1b[31mThe scan failed; results are incomplete.\x1b[0m");
    }

    if !result.recommendations.is_empty() {
        println!();
        println!("Recommendations:");
        for rec in &result.recommendations {
            println!("  - {}", rec);
        }
    }
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

fn format_severity(severity: &Severity) -> String {
    match severity {
        Severity::Critical => "\x1b[31mCRITICAL\x1b[0m".to_string(),
        Severity::High => "\x1b[91mHIGH\x1b[0m".to_string(),
        Severity::Moderate => "\x1b[33mMODERATE\x1b[0m".to_string(),
        Severity::Low => "\x1b[32mLOW\x1b[0m".to_string(),
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Classify version update as major, minor, or patch
fn classify_update(current: &str, latest: &str) -> String {
    let parse = |v: &str| semver::Version::parse(v.trim_start_matches('v')).ok();

    match (parse(current), parse(latest)) {
        (Some(c), Some(l)) if l.major > c.major => "MAJOR".to_string(),
        (Some(c), Some(l)) if l.major == c.major && l.minor > c.minor => "minor".to_string(),
        (Some(_), Some(_)) => "patch".to_string(),
        _ => "-".to_string(),
    }
}
