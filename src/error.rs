//! Failures a selection round can surface to the caller.
//!
//! Individual probe failures never show up here; they become blacklist
//! entries and the round carries on with the remaining candidates. Only
//! total exhaustion reaches the RPC layer.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    /// The candidate set was empty after blacklist filtering, or every
    /// probe failed before anything resolved.
    #[error("none available")]
    NoneAvailable,

    /// The probe race elapsed without a winner.
    #[error("probe race timed out after {0:?}")]
    ProbeTimeout(Duration),
}
