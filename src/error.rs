//! Error taxonomy for scans.
//!
//! Operations fail with an [`OperationError`]. Before a failure is recorded
//! on a [`ScanResult`](crate::ScanResult) it is classified into a
//! [`ScanError`], which carries one of the six [`ScanErrorType`] values and
//! whether the scan can carry on without that operation.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("`{command}` exited with status {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse JSON from {what}: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanErrorType {
    NetworkTimeout,
    ParseError,
    CommandFailed,
    PermissionDenied,
    PackageNotFound,
    CacheError,
}

impl ScanErrorType {
    /// Permission failures are the only kind a retry cannot fix.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ScanErrorType::PermissionDenied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanErrorType::NetworkTimeout => "network-timeout",
            ScanErrorType::ParseError => "parse-error",
            ScanErrorType::CommandFailed => "command-failed",
            ScanErrorType::PermissionDenied => "permission-denied",
            ScanErrorType::PackageNotFound => "package-not-found",
            ScanErrorType::CacheError => "cache-error",
        }
    }
}

impl std::fmt::Display for ScanErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure recorded on a scan result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanError {
    #[serde(rename = "type")]
    pub error_type: ScanErrorType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub recoverable: bool,
    pub fallback_used: bool,
}

impl ScanError {
    pub fn new(error_type: ScanErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            context: None,
            recoverable: error_type.is_recoverable(),
            fallback_used: false,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_fallback(mut self) -> Self {
        self.fallback_used = true;
        self
    }

    /// Used for failures of the orchestration itself rather than of one operation.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            recoverable: false,
            ..Self::new(ScanErrorType::CommandFailed, message)
        }
    }
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.error_type, self.message)
    }
}

/// Assigns an error type from the message text and the operation it came from.
///
/// Checks run in a fixed order: timeouts, permission failures, parse
/// failures, missing packages or files, then cache operations. Anything else
/// is a plain command failure.
///
/// The `JSON` token is matched case-sensitively so file paths such as
/// `package-lock.json` in npm's stderr do not read as parse failures.
pub fn classify_message(message: &str, operation: &str) -> ScanErrorType {
    let msg = message.to_ascii_lowercase();

    if msg.contains("timeout") || msg.contains("timed out") || msg.contains("etimedout") {
        ScanErrorType::NetworkTimeout
    } else if msg.contains("eacces") || msg.contains("eperm") || msg.contains("permission") {
        ScanErrorType::PermissionDenied
    } else if message.contains("JSON") || msg.contains("parse") {
        ScanErrorType::ParseError
    } else if msg.contains("enoent") || msg.contains("not found") {
        ScanErrorType::PackageNotFound
    } else if operation.to_ascii_lowercase().contains("cache") {
        ScanErrorType::CacheError
    } else {
        ScanErrorType::CommandFailed
    }
}

/// Classifies an operation failure into a recordable [`ScanError`].
///
/// Typed information wins over text: command timeouts, JSON failures and
/// I/O error kinds are mapped directly. Otherwise only the underlying
/// detail (stderr, OS error text) goes through [`classify_message`]; the
/// command line and file path never do.
pub fn classify_error(err: &OperationError, operation: &str) -> ScanError {
    let error_type = match err {
        OperationError::Timeout { .. } => ScanErrorType::NetworkTimeout,
        OperationError::Json { .. } => ScanErrorType::ParseError,
        OperationError::CommandFailed { stderr, .. } => classify_message(stderr, operation),
        OperationError::Spawn { source, .. } | OperationError::Io { source, .. } => {
            match source.kind() {
                io::ErrorKind::PermissionDenied => ScanErrorType::PermissionDenied,
                io::ErrorKind::NotFound => ScanErrorType::PackageNotFound,
                io::ErrorKind::TimedOut => ScanErrorType::NetworkTimeout,
                _ => classify_message(&source.to_string(), operation),
            }
        }
        OperationError::Other(message) => classify_message(message, operation),
    };

    ScanError::new(error_type, err.to_string()).with_context(json!({ "operation": operation }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etimedout_is_recoverable_timeout() {
        let kind = classify_message("connect ETIMEDOUT 104.16.0.35:443", "npm-audit");
        assert_eq!(kind, ScanErrorType::NetworkTimeout);
        assert!(kind.is_recoverable());
    }

    #[test]
    fn test_eacces_is_not_recoverable() {
        let kind = classify_message("EACCES: permission denied, open 'package.json'", "manifest");
        assert_eq!(kind, ScanErrorType::PermissionDenied);
        assert!(!kind.is_recoverable());
    }

    #[test]
    fn test_message_heuristics() {
        assert_eq!(
            classify_message("Unexpected token < in JSON at position 0", "npm-audit"),
            ScanErrorType::ParseError
        );
        assert_eq!(
            classify_message("ENOENT: no such file", "manifest"),
            ScanErrorType::PackageNotFound
        );
        assert_eq!(
            classify_message("package foo not found", "npm-outdated"),
            ScanErrorType::PackageNotFound
        );
        assert_eq!(
            classify_message("disk full", "cache-write"),
            ScanErrorType::CacheError
        );
        assert_eq!(
            classify_message("exit code 1", "npm-audit"),
            ScanErrorType::CommandFailed
        );
    }

    #[test]
    fn test_classify_io_kinds() {
        let err = OperationError::Io {
            path: PathBuf::from("package.json"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        let scan_err = classify_error(&err, "manifest");
        assert_eq!(scan_err.error_type, ScanErrorType::PermissionDenied);
        assert!(!scan_err.recoverable);

        let err = OperationError::Spawn {
            program: "npm".to_string(),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        let scan_err = classify_error(&err, "npm-audit");
        assert_eq!(scan_err.error_type, ScanErrorType::PackageNotFound);
        assert!(scan_err.recoverable);
        assert!(!scan_err.fallback_used);
    }

    #[test]
    fn test_command_line_does_not_drive_classification() {
        let err = OperationError::CommandFailed {
            command: "npm audit --json".to_string(),
            code: Some(243),
            stderr: "npm ERR! code EACCES".to_string(),
        };
        assert_eq!(
            classify_error(&err, "npm-audit").error_type,
            ScanErrorType::PermissionDenied
        );
    }

    #[test]
    fn test_npm_eacces_stderr_with_json_path() {
        let err = OperationError::CommandFailed {
            command: "npm audit --json".to_string(),
            code: Some(243),
            stderr: "npm ERR! code EACCES\n\
                     npm ERR! syscall open\n\
                     npm ERR! path /app/package-lock.json\n\
                     npm ERR! Error: EACCES: permission denied, open '/app/package-lock.json'"
                .to_string(),
        };
        let scan_err = classify_error(&err, "npm-audit");
        assert_eq!(scan_err.error_type, ScanErrorType::PermissionDenied);
        assert!(!scan_err.recoverable);
    }

    #[test]
    fn test_enoent_with_json_path_is_not_found() {
        assert_eq!(
            classify_message(
                "ENOENT: no such file or directory, open '/app/package.json'",
                "manifest"
            ),
            ScanErrorType::PackageNotFound
        );
    }

    #[test]
    fn test_classify_command_timeout() {
        let err = OperationError::Timeout {
            command: "npm audit --json".to_string(),
            timeout_ms: 10,
        };
        assert_eq!(
            classify_error(&err, "npm-audit").error_type,
            ScanErrorType::NetworkTimeout
        );
    }

    #[test]
    fn test_scan_error_serializes_type_kebab_case() {
        let err = ScanError::new(ScanErrorType::NetworkTimeout, "slow").with_fallback();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "network-timeout");
        assert_eq!(json["fallbackUsed"], true);
        assert_eq!(json["recoverable"], true);
    }
}
