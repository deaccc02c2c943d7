//! Load balancer core.
//!
//! # Data Flow
//! ```text
//! startup: every configured address → pending.rs
//!     → pool.rs dial cycle (one supervised task per address)
//!         → handshake ok → removed from pending, PeerSession runs
//!         → dial/handshake failed → failure counted, stays pending
//!     → session exits (unhealthy, terminated) → address pending again
//!     → reconnect cycle re-dials every idle pending address
//!
//! operator: command.rs parses `update ...` → broadcast_config
//!     → registry.for_each_healthy → CONFIG_UPDATE per healthy session
//! ```
//!
//! # Design Decisions
//! - Balancing is health gating only; no request routing
//! - The configured address list is immutable after startup
//! - At most one dial attempt or session per address at a time

pub mod command;
pub mod pending;
pub mod pool;

pub use command::{parse_command, Command, CommandError};
pub use pending::{PendingAddress, PendingSet};
pub use pool::{
    broadcast_config, AttemptOutcome, BroadcastReport, PoolHandle, PoolManager, PoolStatus,
    SessionExit,
};
