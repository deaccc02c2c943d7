//! Timeout enforcement.
//!
//! # Responsibilities
//! - Put a deadline on every blocking network call (dial, stream open, read, write)
//! - Report which operation timed out
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from other errors

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// A blocking operation exceeded its deadline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{operation} timed out after {after:?}")]
pub struct TimeoutError {
    pub operation: &'static str,
    pub after: Duration,
}

/// Run `fut` with a deadline.
pub async fn with_timeout<F, T>(
    operation: &'static str,
    after: Duration,
    fut: F,
) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(after, fut)
        .await
        .map_err(|_| TimeoutError { operation, after })
}
