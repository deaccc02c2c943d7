//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → command-line overrides (main.rs)
//!     → validation.rs (semantic checks)
//!     → BalancerConfig (validated, immutable)
//!     → shared via Arc with the pool manager
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; runtime CONFIG_UPDATE messages change
//!   backend behaviour, never this struct
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::BalancerConfig;
pub use schema::{
    BackendServerConfig, LogFormat, ObservabilityConfig, PoolConfig, SessionConfig, TimeoutConfig,
    TlsConfig,
};
