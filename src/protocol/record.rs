//! Connector identity and the connector configuration record
//!
//! The record is what registration hands back to the rest of the system; its JSON
//! field names are consumed by connectors written in other languages.

use super::naming::Naming;
use crate::config::BrokerConfig;
use serde::{Deserialize, Serialize};

/// Descriptive identity of a connector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorIdentity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub connector_type: String,
    pub scope: String,
}

impl ConnectorIdentity {
    pub fn new<I, N, T, S>(id: I, name: N, connector_type: T, scope: S) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        T: Into<String>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            name: name.into(),
            connector_type: connector_type.into(),
            scope: scope.into(),
        }
    }
}

/// Broker connection parameters handed to connectors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub vhost: String,
    pub use_ssl: bool,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

/// Everything a connector needs to reach its two queues
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub connection: ConnectionInfo,
    pub push: String,
    pub push_routing: String,
    pub push_exchange: String,
    pub listen: String,
    pub listen_routing: String,
    pub listen_exchange: String,
}

impl ConnectorConfig {
    /// Derive the record for `connector_id`; pure, no broker interaction
    pub fn derive(config: &BrokerConfig, naming: &Naming, connector_id: &str) -> Self {
        Self {
            connection: ConnectionInfo {
                host: config.amqp.hostname.clone(),
                vhost: config.amqp.vhost.clone(),
                use_ssl: config.amqp.use_ssl,
                port: config.amqp.port,
                user: config.amqp.username.clone(),
                pass: config.amqp.password.clone(),
            },
            push: naming.push_queue(connector_id),
            push_routing: naming.push_routing(connector_id),
            push_exchange: naming.worker_exchange(),
            listen: naming.listen_queue(connector_id),
            listen_routing: naming.listen_routing(connector_id),
            listen_exchange: naming.connector_exchange(),
        }
    }
}
