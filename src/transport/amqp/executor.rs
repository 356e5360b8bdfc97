//! Channel executor
//!
//! Every short-lived broker interaction (declare, bind, delete, publish) runs as
//! one [`ChannelExecutor::execute`] call: a fresh connection, a fresh confirm-mode
//! channel, the unit of work, then closure of both. There is no pooling.

use super::connection::ConnectionFactory;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::protocol::Naming;
use lapin::options::ConfirmSelectOptions;
use lapin::{Channel, Connection};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, Instrument};

const REPLY_SUCCESS: u16 = 200;

/// Runs units of work on a dedicated confirm channel
#[derive(Debug, Clone)]
pub struct ChannelExecutor {
    factory: ConnectionFactory,
    naming: Naming,
    timeout: Duration,
}

impl ChannelExecutor {
    pub fn new(factory: ConnectionFactory) -> Self {
        let naming = Naming::new(factory.config().queues.prefix.clone());
        let timeout = factory.config().amqp.operation_timeout();
        Self {
            factory,
            naming,
            timeout,
        }
    }

    /// Override the per-operation deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    pub fn config(&self) -> &Arc<BrokerConfig> {
        self.factory.config()
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// Run `work` on a fresh confirm channel and close everything afterwards.
    ///
    /// Connection failures surface as [`BrokerError::Connection`], channel setup
    /// failures as [`BrokerError::Channel`]. An asynchronous error reported by the
    /// broker on either the connection or the channel while `work` is pending fails
    /// the call (first error wins). The whole call is bounded by the configured
    /// operation timeout.
    pub async fn execute<T, F, Fut>(&self, operation: &str, work: F) -> BrokerResult<T>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = BrokerResult<T>>,
    {
        let span = crate::amqp_span!(operation = %operation);
        match tokio::time::timeout(self.timeout, self.run(work).instrument(span)).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::timeout(operation, self.timeout)),
        }
    }

    async fn run<T, F, Fut>(&self, work: F) -> BrokerResult<T>
    where
        F: FnOnce(Channel) -> Fut,
        Fut: Future<Output = BrokerResult<T>>,
    {
        let connection = self.factory.connect().await?;

        let (error_tx, mut error_rx) = mpsc::unbounded_channel();
        let connection_errors = error_tx.clone();
        connection.on_error(move |error| {
            let _ = connection_errors.send(BrokerError::Connection(error));
        });

        let channel = match open_confirm_channel(&connection).await {
            Ok(channel) => channel,
            Err(error) => {
                close_connection(&connection).await;
                return Err(error);
            }
        };
        channel.on_error(move |error| {
            let _ = error_tx.send(BrokerError::Channel(error));
        });

        let outcome = tokio::select! {
            result = work(channel.clone()) => result,
            Some(error) = error_rx.recv() => Err(error),
        };

        close_channel(&channel).await;
        close_connection(&connection).await;
        outcome
    }
}

async fn open_confirm_channel(connection: &Connection) -> BrokerResult<Channel> {
    let channel = connection
        .create_channel()
        .await
        .map_err(BrokerError::Channel)?;
    channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(BrokerError::Channel)?;
    Ok(channel)
}

async fn close_channel(channel: &Channel) {
    if !channel.status().connected() {
        return;
    }
    if let Err(e) = channel.close(REPLY_SUCCESS, "OK").await {
        debug!("Channel close failed: {}", e);
    }
}

async fn close_connection(connection: &Connection) {
    if !connection.status().connected() {
        return;
    }
    if let Err(e) = connection.close(REPLY_SUCCESS, "OK").await {
        debug!("Connection close failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn executor_for(port: u16, timeout_secs: u64) -> ChannelExecutor {
        let mut config = BrokerConfig::test_config();
        config.amqp.hostname = "127.0.0.1".to_string();
        config.amqp.port = port;
        config.amqp.operation_timeout_secs = timeout_secs;
        ChannelExecutor::new(ConnectionFactory::new(Arc::new(config)).unwrap())
    }

    #[test]
    fn test_executor_takes_naming_and_timeout_from_config() {
        let executor = executor_for(5672, 7);
        assert_eq!(executor.naming().prefix(), "test_");
        assert_eq!(executor.timeout, Duration::from_secs(7));

        let executor = executor.with_timeout(Duration::from_millis(250));
        assert_eq!(executor.timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_with_connection_error() {
        let executor = executor_for(1, 5);

        let result = executor
            .execute("noop", |_channel| async { Ok(()) })
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_silent_broker_hits_deadline() {
        // Accepts TCP but never speaks AMQP
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let executor = executor_for(port, 1).with_timeout(Duration::from_millis(300));

        let result = executor
            .execute("silent", |_channel| async { Ok(()) })
            .await;

        let error = result.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert_eq!(error.to_string(), "silent timed out after 300ms");
        drop(listener);
    }
}
