//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → cancel root token
//!     → pool cycles stop → sessions send TERMINATE → tasks joined → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - One root cancellation token, child tokens per task
//! - Shutdown has a deadline: TERMINATE_ACK is awaited for a bounded time

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
