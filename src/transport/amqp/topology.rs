//! Exchange and connector queue topology
//!
//! Registration declares the two exchanges and a connector's listen/push queue
//! pair inside a single executor call. Declarations are idempotent, so a failed
//! registration is repaired by simply registering again.

use super::executor::ChannelExecutor;
use crate::config::QueueType;
use crate::error::{BrokerError, BrokerResult};
use crate::protocol::{
    ConnectorConfig, ConnectorIdentity, Direction, Naming, INTERNAL_PLAYBOOK_QUEUE,
    INTERNAL_SYNC_QUEUE,
};
use lapin::options::{
    ExchangeDeclareOptions, ExchangeDeleteOptions, QueueBindOptions, QueueDeclareOptions,
    QueueDeleteOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Channel, ExchangeKind};
use tracing::info;

/// Outcome of deleting one queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeletion {
    pub queue: String,
    /// Messages still in the queue when it was deleted
    pub message_count: u32,
}

/// Outcomes of unregistering a connector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorUnregistration {
    pub listen: QueueDeletion,
    pub push: QueueDeletion,
}

/// Descriptive queue arguments; they do not influence routing
pub fn connector_queue_arguments(identity: &ConnectorIdentity, queue_type: QueueType) -> FieldTable {
    let mut config = FieldTable::default();
    config.insert("id".into(), AMQPValue::LongString(identity.id.clone().into()));
    config.insert(
        "type".into(),
        AMQPValue::LongString(identity.connector_type.clone().into()),
    );
    config.insert(
        "scope".into(),
        AMQPValue::LongString(identity.scope.clone().into()),
    );

    let mut arguments = FieldTable::default();
    arguments.insert(
        "name".into(),
        AMQPValue::LongString(identity.name.clone().into()),
    );
    arguments.insert("config".into(), AMQPValue::FieldTable(config));
    arguments.insert(
        "x-queue-type".into(),
        AMQPValue::LongString(queue_type.as_str().into()),
    );
    arguments
}

fn durable_exchange() -> ExchangeDeclareOptions {
    ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    }
}

fn durable_queue() -> QueueDeclareOptions {
    QueueDeclareOptions {
        durable: true,
        exclusive: false,
        auto_delete: false,
        ..Default::default()
    }
}

async fn declare_exchange(channel: &Channel, exchange: &str) -> BrokerResult<()> {
    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Direct,
            durable_exchange(),
            FieldTable::default(),
        )
        .await
        .map_err(BrokerError::Channel)
}

async fn declare_and_bind(
    channel: &Channel,
    naming: &Naming,
    direction: Direction,
    identity: &ConnectorIdentity,
    queue_type: QueueType,
) -> BrokerResult<()> {
    let queue = naming.queue(direction, &identity.id);
    channel
        .queue_declare(
            &queue,
            durable_queue(),
            connector_queue_arguments(identity, queue_type),
        )
        .await
        .map_err(BrokerError::Channel)?;
    channel
        .queue_bind(
            &queue,
            &naming.exchange(direction),
            &naming.routing_key(direction, &identity.id),
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(BrokerError::Channel)
}

/// Declares, binds and deletes connector topology
#[derive(Debug, Clone)]
pub struct TopologyManager {
    executor: ChannelExecutor,
}

impl TopologyManager {
    pub fn new(executor: ChannelExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &ChannelExecutor {
        &self.executor
    }

    pub fn naming(&self) -> &Naming {
        self.executor.naming()
    }

    /// Declare both exchanges and the connector's queue pair, then return its record.
    ///
    /// All steps share one channel; the first failing step aborts the call with
    /// the broker error and nothing is rolled back.
    pub async fn register_connector_queues(
        &self,
        identity: &ConnectorIdentity,
    ) -> BrokerResult<ConnectorConfig> {
        let naming = self.executor.naming().clone();
        let queue_type = self.executor.config().queues.queue_type;
        let work_identity = identity.clone();

        self.executor
            .execute("register_connector_queues", move |channel| async move {
                declare_exchange(&channel, &naming.connector_exchange()).await?;
                declare_exchange(&channel, &naming.worker_exchange()).await?;
                declare_and_bind(
                    &channel,
                    &naming,
                    Direction::Listen,
                    &work_identity,
                    queue_type,
                )
                .await?;
                declare_and_bind(
                    &channel,
                    &naming,
                    Direction::Push,
                    &work_identity,
                    queue_type,
                )
                .await
            })
            .await?;

        info!(
            connector_id = %identity.id,
            connector_type = %identity.connector_type,
            "Registered connector queues"
        );

        Ok(ConnectorConfig::derive(
            self.executor.config(),
            self.executor.naming(),
            &identity.id,
        ))
    }

    /// Register the pseudo-connectors backing the internal sync and playbook workers
    pub async fn register_internal_queues(&self) -> BrokerResult<Vec<ConnectorConfig>> {
        let internal = [
            ConnectorIdentity::new(
                INTERNAL_SYNC_QUEUE,
                "Internal sync manager",
                "internal",
                "sync",
            ),
            ConnectorIdentity::new(
                INTERNAL_PLAYBOOK_QUEUE,
                "Internal playbook manager",
                "internal",
                "playbook",
            ),
        ];

        let mut records = Vec::with_capacity(internal.len());
        for identity in &internal {
            records.push(self.register_connector_queues(identity).await?);
        }
        Ok(records)
    }

    /// Delete one queue in its own executor call
    pub async fn delete_queue(&self, queue: &str) -> BrokerResult<QueueDeletion> {
        let name = queue.to_string();
        let message_count = self
            .executor
            .execute("delete_queue", move |channel| async move {
                channel
                    .queue_delete(&name, QueueDeleteOptions::default())
                    .await
                    .map_err(BrokerError::Channel)
            })
            .await?;

        info!(queue = %queue, message_count, "Deleted queue");
        Ok(QueueDeletion {
            queue: queue.to_string(),
            message_count,
        })
    }

    /// Delete the listen queue, then the push queue, in two independent calls.
    ///
    /// If the listen deletion fails the push queue is left untouched; callers
    /// retry the whole operation.
    pub async fn unregister_connector(&self, connector_id: &str) -> BrokerResult<ConnectorUnregistration> {
        let naming = self.executor.naming();
        let listen = self.delete_queue(&naming.listen_queue(connector_id)).await?;
        let push = self.delete_queue(&naming.push_queue(connector_id)).await?;
        Ok(ConnectorUnregistration { listen, push })
    }

    /// Delete one exchange in its own executor call
    pub async fn delete_exchange(&self, exchange: &str) -> BrokerResult<()> {
        let name = exchange.to_string();
        self.executor
            .execute("delete_exchange", move |channel| async move {
                channel
                    .exchange_delete(&name, ExchangeDeleteOptions::default())
                    .await
                    .map_err(BrokerError::Channel)
            })
            .await?;

        info!(exchange = %exchange, "Deleted exchange");
        Ok(())
    }

    /// Delete the connector exchange, then the worker exchange.
    ///
    /// Destructive and unconditional: bound queues are not checked.
    pub async fn unregister_exchanges(&self) -> BrokerResult<()> {
        let naming = self.executor.naming();
        self.delete_exchange(&naming.connector_exchange()).await?;
        self.delete_exchange(&naming.worker_exchange()).await
    }

    /// Idempotently declare the connector exchange
    pub async fn declare_connector_exchange(&self) -> BrokerResult<()> {
        let exchange = self.executor.naming().connector_exchange();
        self.executor
            .execute("declare_connector_exchange", move |channel| async move {
                declare_exchange(&channel, &exchange).await
            })
            .await
    }
}
