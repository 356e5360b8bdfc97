//! Connector messaging over an AMQP 0-9-1 broker
//!
//! Provisions per-connector queues and routing on RabbitMQ, publishes with
//! publisher confirms, runs long-lived consume loops and reports broker health
//! through the management API.
//!
//! # Overview
//!
//! - [`transport::amqp::ConnectionFactory`] turns configuration into a broker URI and TLS options
//! - [`transport::amqp::ChannelExecutor`] runs one unit of work per connection and confirm channel
//! - [`transport::amqp::TopologyManager`] declares, binds and deletes exchanges and queues
//! - [`transport::Publisher`] sends JSON messages to connectors and workers
//! - [`transport::amqp::QueueConsumer`] delivers a connector's messages to a handler
//! - [`health::BrokerProbe`] answers liveness, version and metrics queries
//!
//! # Quick Start
//!
//! ```rust
//! use connector_amqp::config::BrokerConfig;
//! use connector_amqp::protocol::{ConnectorConfig, Naming};
//!
//! let config = BrokerConfig::default();
//! let naming = Naming::new("demo_");
//!
//! // The record a connector receives after registration
//! let record = ConnectorConfig::derive(&config, &naming, "conn-1");
//! assert_eq!(record.listen, "demo_listen_conn-1");
//! assert_eq!(record.listen_routing, "demo_listen_routing_conn-1");
//! assert_eq!(record.push_exchange, "demo_amqp.worker.exchange");
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod health;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use broker::Broker;
pub use config::*;
pub use error::{BrokerError, BrokerResult, ErrorKind};
pub use protocol::*;
pub use transport::amqp::{ConsumerHandle, DeliveryHandler};
pub use transport::{Publisher, Transport};
