//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a backend:
//!     → timeouts.rs (enforce dial/open/read/write deadline)
//!     → On expiry: caller counts it like any transport failure
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Reconnection pacing lives in the pool's reconnect cycle, not here

pub mod timeouts;

pub use timeouts::{with_timeout, TimeoutError};
