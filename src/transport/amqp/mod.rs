//! AMQP 0-9-1 transport built on lapin

pub mod connection;
pub mod consumer;
pub mod executor;
pub mod publisher;
pub mod topology;

pub use connection::{
    build_tls_connector, connection_options, connection_uri, load_tls_options, ClientIdentity,
    ConnectionFactory, ConnectionOptions, TlsOptions,
};
pub use consumer::{ConsumerHandle, DeliveryHandler, QueueConsumer};
pub use executor::ChannelExecutor;
pub use publisher::{AmqpPublisher, PERSISTENT_DELIVERY};
pub use topology::{connector_queue_arguments, ConnectorUnregistration, QueueDeletion, TopologyManager};
