//! Wiring of the broker components from one configuration

use crate::config::BrokerConfig;
use crate::error::BrokerResult;
use crate::health::{BrokerHealthCheck, BrokerProbe, HealthCheckManager, ManagementHealthCheck};
use crate::protocol::Naming;
use crate::transport::amqp::{
    AmqpPublisher, ChannelExecutor, ConnectionFactory, QueueConsumer, TopologyManager,
};
use crate::transport::management::ManagementClient;
use crate::transport::Publisher;
use std::sync::Arc;
use tracing::info;

/// All broker-facing components sharing one configuration
#[derive(Debug, Clone)]
pub struct Broker {
    config: Arc<BrokerConfig>,
    topology: TopologyManager,
    publisher: Publisher<AmqpPublisher>,
    consumer: QueueConsumer,
    probe: Arc<BrokerProbe>,
}

impl Broker {
    /// Build every component; reads TLS material but opens no connection
    pub fn from_config(config: Arc<BrokerConfig>) -> BrokerResult<Self> {
        let factory = ConnectionFactory::new(config.clone())?;
        let executor = ChannelExecutor::new(factory.clone());
        let naming = executor.naming().clone();

        let topology = TopologyManager::new(executor.clone());
        let publisher = Publisher::new(AmqpPublisher::new(executor), naming);
        let consumer = QueueConsumer::new(factory);
        let probe = Arc::new(BrokerProbe::new(
            topology.clone(),
            ManagementClient::new(&config)?,
        ));

        info!(
            host = %config.amqp.hostname,
            port = config.amqp.port,
            vhost = %config.amqp.vhost,
            prefix = %config.queues.prefix,
            "Broker components ready"
        );

        Ok(Self {
            config,
            topology,
            publisher,
            consumer,
            probe,
        })
    }

    pub fn config(&self) -> &Arc<BrokerConfig> {
        &self.config
    }

    pub fn naming(&self) -> &Naming {
        self.topology.naming()
    }

    pub fn topology(&self) -> &TopologyManager {
        &self.topology
    }

    pub fn publisher(&self) -> &Publisher<AmqpPublisher> {
        &self.publisher
    }

    pub fn consumer(&self) -> &QueueConsumer {
        &self.consumer
    }

    pub fn probe(&self) -> &BrokerProbe {
        &self.probe
    }

    /// Broker liveness and management reachability, in that order
    pub fn health_checks(&self) -> HealthCheckManager {
        let mut manager = HealthCheckManager::new();
        manager.add_health_check(Box::new(BrokerHealthCheck::new(self.probe.clone())));
        manager.add_health_check(Box::new(ManagementHealthCheck::new(self.probe.clone())));
        manager
    }
}
