//! Health tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Peer session outcome (per health check):
//!     HEALTH_RESPONSE → registry.mark_healthy (counter reset)
//!     ERROR / read or write failure → registry.mark_unhealthy
//!         → threshold crossed? → session torn down, address pending
//!
//! Pool manager cycles:
//!     registry.snapshot / failing → status and health logs
//!     registry.for_each_healthy → config broadcast
//! ```
//!
//! # Design Decisions
//! - Keyed by backend-assigned identity, not by address
//! - Single source of truth for "is this backend usable"
//! - Health state is per-backend, not per-pool

pub mod record;
pub mod registry;

pub use record::{BackendStatus, HealthRecord};
pub use registry::{HealthRegistry, RegistrySnapshot};
