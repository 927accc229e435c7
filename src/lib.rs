pub mod alert;
pub mod cache;
pub mod config;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod model;
pub mod npm;
pub mod outcome;
pub mod output;
pub mod report;
pub mod retry;
pub mod runner;
pub mod scanner;

pub use cache::ScanCache;
pub use config::{ConfigUpdate, ScannerConfig};
pub use error::{ScanError, ScanErrorType};
pub use model::{
    CacheStatus, DependencyInfo, ScanResult, ScanStatus, Severity, SeveritySummary, Vulnerability,
};
pub use scanner::DependencyScanner;
