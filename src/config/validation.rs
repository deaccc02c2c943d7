//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds and intervals > 0, addresses valid)
//! - Detect duplicate backends
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: BalancerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

use super::schema::BalancerConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("pool.servers must list at least one backend")]
    NoServers,

    #[error("invalid backend address {0:?}: expected host:port")]
    InvalidServerAddress(String),

    #[error("backend {0:?} is listed more than once")]
    DuplicateServer(String),

    #[error("{0} must be at least 1")]
    MustBePositive(&'static str),

    #[error("TLS certificate file {0:?} does not exist")]
    MissingCertFile(String),

    #[error("invalid backend bind address {0:?}")]
    InvalidBindAddress(String),

    #[error("tls.key_file is required to serve TLS")]
    MissingKeyFile,

    #[error("TLS key file {0:?} does not exist")]
    KeyFileNotFound(String),
}

/// Validate the balancer side of the configuration.
pub fn validate_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.pool.servers.is_empty() {
        errors.push(ValidationError::NoServers);
    }

    let mut seen = HashSet::new();
    for server in &config.pool.servers {
        if !is_host_port(server) {
            errors.push(ValidationError::InvalidServerAddress(server.clone()));
        }
        if !seen.insert(server.as_str()) {
            errors.push(ValidationError::DuplicateServer(server.clone()));
        }
    }

    let positive: [(&'static str, u64); 7] = [
        ("pool.max_fail_attempts", config.pool.max_fail_attempts as u64),
        ("pool.check_interval_secs", config.pool.check_interval_secs),
        ("pool.reconnect_interval_secs", config.pool.reconnect_interval_secs),
        ("session.check_interval_secs", config.session.check_interval_secs),
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.io_secs", config.timeouts.io_secs),
        ("timeouts.terminate_secs", config.timeouts.terminate_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::MustBePositive(field));
        }
    }

    validate_tls(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate the backend-responder side of the configuration.
pub fn validate_backend_config(config: &BalancerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.backend.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.backend.bind_address.clone(),
        ));
    }
    validate_tls(config, &mut errors);
    if let Some(tls) = &config.tls {
        match &tls.key_file {
            None => errors.push(ValidationError::MissingKeyFile),
            Some(key) if !Path::new(key).exists() => {
                errors.push(ValidationError::KeyFileNotFound(key.clone()))
            }
            Some(_) => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_tls(config: &BalancerConfig, errors: &mut Vec<ValidationError>) {
    if let Some(tls) = &config.tls {
        if !Path::new(&tls.cert_file).exists() {
            errors.push(ValidationError::MissingCertFile(tls.cert_file.clone()));
        }
    }
}

fn is_host_port(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
