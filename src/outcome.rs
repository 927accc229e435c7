use crate::error::ScanError;

/// What one scan operation produced.
///
/// Operations never propagate failures to their siblings; each one settles
/// into exactly one of these states and the scanner combines them.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Complete(T),
    /// Usable data, with problems worth reporting.
    Partial { value: T, errors: Vec<ScanError> },
    Failed(ScanError),
}

impl<T> Outcome<T> {
    /// Splits into the produced value, if any, and the recorded errors.
    pub fn into_parts(self) -> (Option<T>, Vec<ScanError>) {
        match self {
            Outcome::Complete(value) => (Some(value), Vec::new()),
            Outcome::Partial { value, errors } => (Some(value), errors),
            Outcome::Failed(err) => (None, vec![err]),
        }
    }
}

impl<T> From<Result<T, ScanError>> for Outcome<T> {
    fn from(result: Result<T, ScanError>) -> Self {
        match result {
            Ok(value) => Outcome::Complete(value),
            Err(err) => Outcome::Failed(err),
        }
    }
}
