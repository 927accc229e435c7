use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use depscan::{
    config::{ConfigUpdate, ScannerConfig},
    logging,
    model::{ScanResult, ScanStatus, Severity},
    output::{print_result, OutputFormat},
    DependencyScanner,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::time::Duration;

/// Exit codes for CI integration
mod exit_codes {
    pub const SUCCESS: u8 = 0;
    pub const ERROR: u8 = 1;
    pub const CRITICAL_VULN: u8 = 2;
    pub const HIGH_VULN: u8 = 3;
    pub const MODERATE_VULN: u8 = 4;
    pub const LOW_VULN: u8 = 5;
    pub const SCAN_FAILED: u8 = 6;
}

#[derive(Parser)]
#[command(name = "depscan")]
#[command(
    author,
    version,
    about = "Audit an npm project's dependencies for vulnerabilities and staleness"
)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the project's dependencies
    Scan {
        /// Project directory containing package.json
        #[arg(short, long)]
        project: Option<PathBuf>,

        /// Ignore the cached scan result
        #[arg(long)]
        force: bool,

        /// Run audit, manifest and outdated checks one after another
        #[arg(long)]
        sequential: bool,

        /// Neither read nor write the cache
        #[arg(long)]
        no_cache: bool,

        /// Overall scan timeout in milliseconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Write the JSON result to a file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Exit with an error if vulnerabilities at or above this severity are found
        #[arg(long, value_enum)]
        fail_on: Option<FailLevel>,
    },

    /// Show or create the config file
    Config {
        /// Write the default config file
        #[arg(long)]
        init: bool,

        /// Show the config file path
        #[arg(long)]
        path: bool,
    },

    /// Delete cached scan results
    ClearCache,
}

#[derive(Clone, Copy, ValueEnum)]
enum FailLevel {
    Critical,
    High,
    Moderate,
    Low,
}

impl FailLevel {
    fn threshold(self) -> Severity {
        match self {
            FailLevel::Critical => Severity::Critical,
            FailLevel::High => Severity::High,
            FailLevel::Moderate => Severity::Moderate,
            FailLevel::Low => Severity::Low,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_codes::ERROR)
        }
    }
}

async fn run() -> Result<u8> {
    let cli = Cli::parse();
    let config = ScannerConfig::load()?;
    logging::init(cli.verbose || config.verbose_logging);

    match cli.command {
        Commands::Scan {
            project,
            force,
            sequential,
            no_cache,
            timeout,
            format,
            output,
            fail_on,
        } => {
            let format = OutputFormat::from_str(&format).map_err(|e| anyhow::anyhow!(e))?;
            let scanner = DependencyScanner::new(config);

            scanner.update_config(ConfigUpdate {
                project_root: project,
                scan_timeout_ms: timeout,
                enable_cache: no_cache.then_some(false),
                enable_parallel_processing: sequential.then_some(false),
                verbose_logging: cli.verbose.then_some(true),
                ..Default::default()
            });

            let result = scan_with_progress(&scanner, force, format == OutputFormat::Table).await;

            if let Some(path) = output {
                std::fs::write(&path, serde_json::to_string_pretty(&result)?)?;
                if format == OutputFormat::Table {
                    println!("Results written to: {}", path.display());
                }
            } else {
                print_result(&result, format)?;
            }

            Ok(determine_exit_code(&result, fail_on))
        }
        Commands::Config { init, path } => {
            handle_config(init, path)?;
            Ok(exit_codes::SUCCESS)
        }
        Commands::ClearCache => {
            let removed = DependencyScanner::new(config).clear_scan_cache()?;
            println!("Removed {} cached results.", removed);
            Ok(exit_codes::SUCCESS)
        }
    }
}

async fn scan_with_progress(scanner: &DependencyScanner, force: bool, interactive: bool) -> ScanResult {
    let progress = if interactive {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_message("Auditing dependencies...");
        Some(pb)
    } else {
        None
    };

    let result = scanner.run_scan(force).await;

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }
    result
}

/// A failed scan wins over any threshold; otherwise the most severe finding
/// at or above `--fail-on` picks the code.
fn determine_exit_code(result: &ScanResult, fail_on: Option<FailLevel>) -> u8 {
    if result.scan_status == ScanStatus::Failed {
        return exit_codes::SCAN_FAILED;
    }

    let Some(fail_on) = fail_on else {
        return exit_codes::SUCCESS;
    };

    let worst = result.vulnerabilities.iter().map(|v| v.severity).max();
    match worst {
        Some(severity) if severity >= fail_on.threshold() => match severity {
            Severity::Critical => exit_codes::CRITICAL_VULN,
            Severity::High => exit_codes::HIGH_VULN,
            Severity::Moderate => exit_codes::MODERATE_VULN,
            Severity::Low => exit_codes::LOW_VULN,
        },
        _ => exit_codes::SUCCESS,
    }
}

fn handle_config(init: bool, show_path: bool) -> Result<()> {
    let config_path = ScannerConfig::config_path();

    if show_path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config file already exists at: {}", config_path.display());
            return Ok(());
        }

        ScannerConfig::default().save()?;
        println!("Created config file at: {}", config_path.display());
        println!();
        println!("{}", ScannerConfig::generate_default_config());
        return Ok(());
    }

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        println!("Config file: {}", config_path.display());
        println!();
        println!("{}", content);
    } else {
        println!("No config file found.");
        println!("Run 'depscan config --init' to create one.");
        println!();
        println!("Config path: {}", config_path.display());
    }

    Ok(())
}
