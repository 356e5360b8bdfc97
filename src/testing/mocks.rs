//! Mock implementations for testing
//!
//! [`MockTransport`] stands in for the broker so publishing wrappers can be
//! tested without RabbitMQ.

use crate::error::{BrokerError, BrokerResult};
use crate::transport::Transport;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// One recorded `send`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

impl SentMessage {
    /// Payload parsed as JSON, `Value::Null` if it is not JSON
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.payload).unwrap_or(Value::Null)
    }
}

/// Records every send; optionally rejects them all
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    failure: Option<String>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send fails with a publish error carrying `reason`
    pub fn with_failure(mut self, reason: impl Into<String>) -> Self {
        self.failure = Some(reason.into());
        self
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Messages sent with `routing_key`, in send order
    pub fn sent_to(&self, routing_key: &str) -> Vec<SentMessage> {
        self.sent_messages()
            .into_iter()
            .filter(|message| message.routing_key == routing_key)
            .collect()
    }

    pub fn clear_history(&self) {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, exchange: &str, routing_key: &str, payload: &[u8]) -> BrokerResult<()> {
        if let Some(reason) = &self.failure {
            return Err(BrokerError::publish(exchange, routing_key, reason.clone()));
        }

        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(SentMessage {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload: payload.to_vec(),
            });
        Ok(())
    }
}
