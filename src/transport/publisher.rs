//! Semantic publishing wrappers
//!
//! Each wrapper picks the exchange and routing key for a destination and sends
//! the JSON serialization of the message.

use super::Transport;
use crate::error::BrokerResult;
use crate::protocol::{Naming, INTERNAL_PLAYBOOK_QUEUE, INTERNAL_SYNC_QUEUE};
use serde::Serialize;
use tracing::debug;

/// Routes messages to connectors and workers
#[derive(Debug, Clone)]
pub struct Publisher<T: Transport> {
    transport: T,
    naming: Naming,
}

impl<T: Transport> Publisher<T> {
    pub fn new(transport: T, naming: Naming) -> Self {
        Self { transport, naming }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// Send an already-encoded payload
    pub async fn send(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> BrokerResult<()> {
        self.transport.send(exchange, routing_key, payload).await
    }

    async fn send_json<M: Serialize + ?Sized>(
        &self,
        exchange: &str,
        routing_key: &str,
        message: &M,
    ) -> BrokerResult<()> {
        let payload = serde_json::to_vec(message)?;
        debug!(exchange = %exchange, routing_key = %routing_key, "Publishing JSON message");
        self.transport.send(exchange, routing_key, &payload).await
    }

    /// Worker exchange, push routing of the internal sync queue
    pub async fn push_to_sync<M: Serialize + ?Sized>(&self, message: &M) -> BrokerResult<()> {
        self.send_json(
            &self.naming.worker_exchange(),
            &self.naming.push_routing(INTERNAL_SYNC_QUEUE),
            message,
        )
        .await
    }

    /// Worker exchange, push routing of the internal playbook queue
    pub async fn push_to_playbook<M: Serialize + ?Sized>(&self, message: &M) -> BrokerResult<()> {
        self.send_json(
            &self.naming.worker_exchange(),
            &self.naming.push_routing(INTERNAL_PLAYBOOK_QUEUE),
            message,
        )
        .await
    }

    /// Connector exchange, listen routing of `connector_id`
    pub async fn push_to_connector<M: Serialize + ?Sized>(
        &self,
        connector_id: &str,
        message: &M,
    ) -> BrokerResult<()> {
        self.send_json(
            &self.naming.connector_exchange(),
            &self.naming.listen_routing(connector_id),
            message,
        )
        .await
    }

    /// Worker exchange, push routing of `connector_id`
    pub async fn push_to_worker_for_connector<M: Serialize + ?Sized>(
        &self,
        connector_id: &str,
        message: &M,
    ) -> BrokerResult<()> {
        self.send_json(
            &self.naming.worker_exchange(),
            &self.naming.push_routing(connector_id),
            message,
        )
        .await
    }
}
