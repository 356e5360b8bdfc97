//! Broker transport
//!
//! [`Transport`] is the seam between message routing and the wire. The AMQP
//! implementation lives in [`amqp`]; [`crate::testing::mocks::MockTransport`]
//! records sends for tests.

use crate::error::BrokerResult;

pub mod amqp;
pub mod management;
pub mod publisher;

pub use publisher::Publisher;

/// Raw message delivery to an exchange
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `payload` to `exchange` with `routing_key`, resolving once the
    /// broker has accepted it
    async fn send(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> BrokerResult<()>;
}

#[async_trait::async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> BrokerResult<()> {
        (**self).send(exchange, routing_key, payload).await
    }
}
