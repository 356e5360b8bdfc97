//! Error types for broker orchestration
//!
//! Every fallible operation in the crate returns [`BrokerResult`]. Errors raised by
//! the AMQP client are carried unchanged inside the variant that names the stage
//! that failed, so callers can both match on the stage and inspect the broker payload.

use crate::config::ConfigError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for broker operations
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Connection failed: {0}")]
    Connection(#[source] lapin::Error),

    #[error("Channel operation failed: {0}")]
    Channel(#[source] lapin::Error),

    #[error("Publish to '{exchange}' with routing key '{routing_key}' failed: {reason}")]
    Publish {
        exchange: String,
        routing_key: String,
        reason: String,
    },

    #[error("Management API request failed: {0}")]
    Management(#[from] reqwest::Error),

    #[error("Management API returned HTTP {status} for {path}")]
    ManagementStatus { status: u16, path: String },

    #[error("Broker unavailable: {source}")]
    Unavailable {
        #[source]
        source: Box<BrokerError>,
    },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: String,
        timeout_ms: u64,
    },

    #[error("Invalid broker URI: {0}")]
    InvalidUri(String),

    #[error("TLS setup failed: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("Failed to read certificate file {path}: {source}")]
    CertificateRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Coarse classification used by health checks and callers deciding on restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Channel,
    Publish,
    Management,
    Unavailable,
    Timeout,
    Configuration,
    Serialization,
}

impl BrokerError {
    /// Wrap any failure into the "broker unavailable" signal, keeping the original
    pub fn unavailable(source: BrokerError) -> Self {
        Self::Unavailable {
            source: Box::new(source),
        }
    }

    /// Create a publish error
    pub fn publish<E, R, S>(exchange: E, routing_key: R, reason: S) -> Self
    where
        E: Into<String>,
        R: Into<String>,
        S: Into<String>,
    {
        Self::Publish {
            exchange: exchange.into(),
            routing_key: routing_key.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error; the deadline is reported in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, deadline: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BrokerError::Connection(_) => ErrorKind::Connection,
            BrokerError::Channel(_) => ErrorKind::Channel,
            BrokerError::Publish { .. } => ErrorKind::Publish,
            BrokerError::Management(_) | BrokerError::ManagementStatus { .. } => {
                ErrorKind::Management
            }
            BrokerError::Unavailable { .. } => ErrorKind::Unavailable,
            BrokerError::Timeout { .. } => ErrorKind::Timeout,
            BrokerError::InvalidUri(_)
            | BrokerError::Tls(_)
            | BrokerError::CertificateRead { .. }
            | BrokerError::Config(_) => ErrorKind::Configuration,
            BrokerError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// The broker-side error payload, if this error (or the one it wraps) came from the AMQP client
    pub fn amqp_error(&self) -> Option<&lapin::Error> {
        match self {
            BrokerError::Connection(e) | BrokerError::Channel(e) => Some(e),
            BrokerError::Unavailable { source } => source.amqp_error(),
            _ => None,
        }
    }
}

/// Result type for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;
