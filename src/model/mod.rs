//! Core data types for scan results.
//!
//! - [`Vulnerability`] - One advisory against one dependency
//! - [`Severity`] - Ordered severity scale, also used for the overall risk
//! - [`DependencyInfo`] - One manifest entry, with its outdated state
//! - [`ScanResult`] - Everything one scan produced
//!
//! Errors recorded during a scan live in [`crate::error`].

mod dependency;
mod result;
mod vulnerability;

pub use dependency::*;
pub use result::*;
pub use vulnerability::*;
