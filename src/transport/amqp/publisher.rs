//! Confirmed publishing over the channel executor

use super::executor::ChannelExecutor;
use crate::error::{BrokerError, BrokerResult};
use crate::transport::Transport;
use lapin::options::BasicPublishOptions;
use lapin::BasicProperties;
use tracing::debug;

/// AMQP delivery mode 2: the broker writes the message to disk
pub const PERSISTENT_DELIVERY: u8 = 2;

/// Sends raw payloads on a fresh confirm channel per message.
///
/// A call returns only after the broker confirmed the message. Unroutable
/// messages are still acknowledged by the broker and silently dropped.
#[derive(Debug, Clone)]
pub struct AmqpPublisher {
    executor: ChannelExecutor,
}

impl AmqpPublisher {
    pub fn new(executor: ChannelExecutor) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &ChannelExecutor {
        &self.executor
    }
}

#[async_trait::async_trait]
impl Transport for AmqpPublisher {
    async fn send(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> BrokerResult<()> {
        let work_exchange = exchange.to_string();
        let work_routing_key = routing_key.to_string();
        let body = payload.to_vec();

        self.executor
            .execute("send", move |channel| async move {
                let confirmation = channel
                    .basic_publish(
                        &work_exchange,
                        &work_routing_key,
                        BasicPublishOptions::default(),
                        &body,
                        BasicProperties::default().with_delivery_mode(PERSISTENT_DELIVERY),
                    )
                    .await
                    .map_err(BrokerError::Channel)?
                    .await
                    .map_err(BrokerError::Channel)?;

                if confirmation.is_nack() {
                    return Err(BrokerError::publish(
                        work_exchange,
                        work_routing_key,
                        "broker rejected the message",
                    ));
                }
                Ok(())
            })
            .await?;

        debug!(
            exchange = %exchange,
            routing_key = %routing_key,
            bytes = payload.len(),
            "Message confirmed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::error::ErrorKind;
    use crate::transport::amqp::ConnectionFactory;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_send_to_unreachable_broker() {
        let mut config = BrokerConfig::test_config();
        config.amqp.hostname = "127.0.0.1".to_string();
        config.amqp.port = 1;
        let factory = ConnectionFactory::new(Arc::new(config)).unwrap();
        let publisher = AmqpPublisher::new(ChannelExecutor::new(factory));

        let error = publisher
            .send("test_amqp.worker.exchange", "test_push_routing_sync", b"{}")
            .await
            .unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Connection);
    }
}
