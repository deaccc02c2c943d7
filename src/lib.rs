//! Health-gated connection pool for protocol backends.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────── BALANCER ─────────────────────────────┐
//!   │                                                                   │
//!   │  config ──▶ load_balancer::pool ──dial──▶ net (TCP / TLS / mem)   │
//!   │                  │      ▲                     │                   │
//!   │          spawn   │      │ SessionExit         ▼                   │
//!   │                  ▼      │             session::handshake ─HELLO─┐ │
//!   │            session::peer ◀───────────────── ACK ◀───────────────┘ │
//!   │                  │  HEALTH_REQUEST / reply                        │──▶ backend
//!   │                  ▼                                                │
//!   │            health::registry ◀── status / health-check cycles      │
//!   │                  │                                                │
//!   │                  └── for_each_healthy ──▶ CONFIG_UPDATE broadcast │
//!   └───────────────────────────────────────────────────────────────────┘
//!
//!   ┌──────────────── BACKEND ────────────────┐
//!   │ backend::server ─▶ backend::responder   │
//!   │                      └─ backend::sampler│
//!   └─────────────────────────────────────────┘
//! ```

// Wire format and transport
pub mod net;
pub mod protocol;

// Balancer core
pub mod health;
pub mod load_balancer;
pub mod session;

// Backend side
pub mod backend;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::BalancerConfig;
pub use lifecycle::Shutdown;
pub use load_balancer::{PoolHandle, PoolManager};
