//! Long-running consumer for a connector's listen queue
//!
//! Each consume loop owns a dedicated connection and a plain (non-confirm)
//! channel. Messages are consumed without acknowledgement, so a message is
//! gone from the broker as soon as it is delivered, whether or not the handler
//! succeeds with it.

use super::connection::ConnectionFactory;
use crate::error::{BrokerError, BrokerResult};
use crate::protocol::Naming;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::BasicConsumeOptions;
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

const REPLY_SUCCESS: u16 = 200;

/// Receives each delivery's payload, one at a time, in delivery order
#[async_trait::async_trait]
pub trait DeliveryHandler<C: Send + Sync>: Send + Sync {
    async fn on_message(&self, context: &C, payload: String);
}

/// Forwards payloads into a channel; the context is ignored
#[async_trait::async_trait]
impl<C: Send + Sync + 'static> DeliveryHandler<C> for mpsc::Sender<String> {
    async fn on_message(&self, _context: &C, payload: String) {
        if self.send(payload).await.is_err() {
            debug!("Delivery receiver dropped; discarding payload");
        }
    }
}

/// Handed to the caller once the consumer connection is up
#[derive(Debug, Clone)]
pub struct ConsumerHandle {
    connection: Arc<Connection>,
    closed: Arc<Notify>,
    requested: Arc<AtomicBool>,
}

impl ConsumerHandle {
    /// Close the consumer connection; the consume loop then returns `Ok(())`.
    /// In-flight deliveries are not drained.
    pub async fn close(&self) -> BrokerResult<()> {
        self.requested.store(true, Ordering::SeqCst);
        self.closed.notify_one();
        if !self.connection.status().connected() {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "OK")
            .await
            .map_err(BrokerError::Connection)
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}

/// Whether a broker error ends the consume loop.
///
/// Channel errors raised while no delivery stream is active (the consume
/// request was refused, or the broker cancelled the consumer) leave the
/// connection open. Connection errors always end the loop.
fn ends_loop(error: &BrokerError, consuming: bool) -> bool {
    consuming || !matches!(error, BrokerError::Channel(_))
}

async fn next_delivery(
    deliveries: &mut Option<lapin::Consumer>,
) -> Option<lapin::Result<Delivery>> {
    match deliveries {
        Some(consumer) => consumer.next().await,
        None => futures::future::pending().await,
    }
}

/// Consumes connector listen queues
#[derive(Debug, Clone)]
pub struct QueueConsumer {
    factory: ConnectionFactory,
    naming: Naming,
}

impl QueueConsumer {
    pub fn new(factory: ConnectionFactory) -> Self {
        let naming = Naming::new(factory.config().queues.prefix.clone());
        Self { factory, naming }
    }

    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// Consume `connector_id`'s listen queue until the connection fails or is
    /// closed through the handle given to `on_connection`.
    ///
    /// A failed connect returns immediately. A failure to start consuming,
    /// including the broker closing the channel because the queue is missing
    /// or access is refused, is logged and the connection is kept open, idle,
    /// until it errors or is closed. Once deliveries flow, a channel failure
    /// ends the loop with that error; a connection failure always does.
    pub async fn consume_queue<C, H, F>(
        &self,
        context: C,
        connector_id: &str,
        on_connection: F,
        handler: H,
    ) -> BrokerResult<()>
    where
        C: Send + Sync,
        H: DeliveryHandler<C>,
        F: FnOnce(ConsumerHandle),
    {
        let queue = self.naming.listen_queue(connector_id);
        let span = crate::consumer_span!(connector_id = %connector_id, queue = %queue);

        async move {
            let connection = Arc::new(self.factory.connect().await?);

            let (error_tx, mut error_rx) = mpsc::unbounded_channel();
            let connection_errors = error_tx.clone();
            connection.on_error(move |error| {
                let _ = connection_errors.send(BrokerError::Connection(error));
            });

            let closed = Arc::new(Notify::new());
            let requested = Arc::new(AtomicBool::new(false));
            let closed_by_handle = || requested.load(Ordering::SeqCst);
            on_connection(ConsumerHandle {
                connection: connection.clone(),
                closed: closed.clone(),
                requested: requested.clone(),
            });

            let channel = match connection.create_channel().await {
                Ok(channel) => channel,
                Err(_) if closed_by_handle() => return Ok(()),
                Err(e) => return Err(BrokerError::Channel(e)),
            };
            channel.on_error(move |error| {
                let _ = error_tx.send(BrokerError::Channel(error));
            });

            let consumer_tag = format!("{}-{}", queue, Uuid::new_v4());
            let mut deliveries = match channel
                .basic_consume(
                    &queue,
                    &consumer_tag,
                    BasicConsumeOptions {
                        no_ack: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
            {
                Ok(consumer) => {
                    info!(consumer_tag = %consumer_tag, "Consuming listen queue");
                    Some(consumer)
                }
                Err(e) => {
                    error!(error = %e, "Failed to start consuming; connection stays open");
                    None
                }
            };

            loop {
                tokio::select! {
                    biased;
                    _ = closed.notified() => {
                        info!("Consumer closed through handle");
                        return Ok(());
                    }
                    Some(error) = error_rx.recv() => {
                        if closed_by_handle() {
                            return Ok(());
                        }
                        if !ends_loop(&error, deliveries.is_some()) {
                            warn!(error = %error, "Channel closed while not consuming; connection stays open");
                            continue;
                        }
                        warn!(error = %error, "Consumer connection failed");
                        return Err(error);
                    }
                    next = next_delivery(&mut deliveries) => match next {
                        Some(Ok(delivery)) => {
                            let payload = String::from_utf8_lossy(&delivery.data).into_owned();
                            handler.on_message(&context, payload).await;
                        }
                        Some(Err(_)) | None if closed_by_handle() => return Ok(()),
                        Some(Err(e)) => return Err(BrokerError::Channel(e)),
                        None if connection.status().closed() => {
                            return Err(BrokerError::Connection(
                                lapin::Error::InvalidConnectionState(ConnectionState::Closed),
                            ));
                        }
                        None => {
                            warn!("Delivery stream ended; waiting for the connection to close");
                            deliveries = None;
                        }
                    },
                }
            }
        }
        .instrument(span)
        .await
    }
}
