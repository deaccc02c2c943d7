//! Backend side of the protocol.
//!
//! A backend accepts balancer connections, answers HELLO with an identity,
//! answers health requests with sampled host metrics and applies
//! configuration updates pushed by the pool.

pub mod responder;
pub mod sampler;
pub mod server;

pub use responder::{ActiveSettings, Reply, Responder};
pub use sampler::{Metrics, MetricsSampler, SampleError, StaticSampler, SystemSampler};
pub use server::BackendServer;
