//! Producer: writes with a bounded flush, plus the delivery report loop.

use crate::delivery::{DeliveryExit, DeliveryLoop};
use crate::options::ProducerOptions;
use bytes::Bytes;
use ferrule_core::{
    probe, ClientFactory, DeliverySender, Error, Message, ProducerClient, Result,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const COMPONENT: &str = "Producer";

/// A producer handle with a background delivery report loop.
///
/// Every write produces one message and then flushes, so a successful write
/// means the handle accepted the message and the flush either drained the
/// queue or timed out. Delivery outcomes arrive on the delivery sender passed
/// to [`Producer::write_message`], or on the handle's event stream, which the
/// delivery loop drains.
pub struct Producer {
    handle: Arc<dyn ProducerClient>,
    flush_timeout: Duration,
    disposed: RwLock<bool>,
    delivery: Mutex<Option<JoinHandle<DeliveryExit>>>,
}

impl Producer {
    /// Probe the bootstrap servers, create the handle and start the delivery
    /// report loop.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Connectivity`] when no bootstrap address is reachable
    /// - any error from creating the handle
    /// - [`Error::Internal`] if the handle's event stream was already taken
    pub async fn new(options: ProducerOptions, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        let addresses = options.config.bootstrap_servers();
        probe(&addresses, options.ping_timeout).await?;

        let handle = factory.create_producer(&options.config)?;
        let Some(events) = handle.take_events() else {
            handle.close();
            return Err(Error::internal("producer event stream already taken"));
        };
        let delivery = DeliveryLoop::new(
            events,
            options.error_handler,
            options.fatal_handler,
            options.retry_hook,
        );
        let task = tokio::spawn(delivery.run());
        info!(servers = ?addresses, "producer created");

        Ok(Self {
            handle,
            flush_timeout: options.flush_timeout,
            disposed: RwLock::new(false),
            delivery: Mutex::new(Some(task)),
        })
    }

    /// Create a producer backed by librdkafka.
    ///
    /// # Errors
    ///
    /// See [`Producer::new`].
    #[cfg(feature = "rdkafka")]
    pub async fn with_rdkafka(options: ProducerOptions) -> Result<Self> {
        Self::new(
            options,
            Arc::new(ferrule_core::client::rdkafka::RdKafkaFactory::new()),
        )
        .await
    }

    /// The underlying client handle.
    pub fn handle(&self) -> &Arc<dyn ProducerClient> {
        &self.handle
    }

    /// The flush timeout applied by [`Producer::write`] and
    /// [`Producer::write_message`].
    pub const fn flush_timeout(&self) -> Duration {
        self.flush_timeout
    }

    /// True once [`Producer::close`] has started.
    pub fn is_disposed(&self) -> bool {
        *self.disposed.read()
    }

    /// Write `value` under `key` to `topic` and flush with the default timeout.
    ///
    /// # Errors
    ///
    /// - [`Error::Disposed`] once the producer is closed
    /// - [`Error::Client`] when the handle rejects the message
    pub async fn write(&self, topic: &str, key: Option<&[u8]>, value: &[u8]) -> Result<()> {
        self.write_with_timeout(topic, key, value, self.flush_timeout)
            .await
    }

    /// Like [`Producer::write`], flushing with `timeout`.
    ///
    /// # Errors
    ///
    /// See [`Producer::write`].
    pub async fn write_with_timeout(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        value: &[u8],
        timeout: Duration,
    ) -> Result<()> {
        let mut builder = Message::builder(topic).payload(Bytes::copy_from_slice(value));
        if let Some(key) = key {
            builder = builder.key(Bytes::copy_from_slice(key));
        }
        self.write_message_with_timeout(builder.build(), None, timeout)
            .await
    }

    /// Write a prepared message and flush with the default timeout.
    ///
    /// The delivery report goes to `delivery` when given, otherwise to the
    /// delivery report loop.
    ///
    /// # Errors
    ///
    /// See [`Producer::write`].
    pub async fn write_message(
        &self,
        message: Message,
        delivery: Option<DeliverySender>,
    ) -> Result<()> {
        self.write_message_with_timeout(message, delivery, self.flush_timeout)
            .await
    }

    /// Like [`Producer::write_message`], flushing with `timeout`.
    ///
    /// A flush that fails or times out is logged and does not fail the
    /// write; the delivery report carries the outcome.
    ///
    /// # Errors
    ///
    /// See [`Producer::write`].
    pub async fn write_message_with_timeout(
        &self,
        message: Message,
        delivery: Option<DeliverySender>,
        timeout: Duration,
    ) -> Result<()> {
        {
            let disposed = self.disposed.read();
            if *disposed {
                return Err(Error::Disposed { component: COMPONENT });
            }
            self.handle.produce(message, delivery)?;
        }

        let handle = Arc::clone(&self.handle);
        match tokio::task::spawn_blocking(move || handle.flush(timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(code = ?err.code, error = %err, "flush did not complete"),
            Err(err) => warn!(error = %err, "flush task failed"),
        }
        Ok(())
    }

    /// Close the handle and wait for the delivery report loop to drain.
    ///
    /// Idempotent. Writes fail with [`Error::Disposed`] once this starts.
    pub async fn close(&self) {
        {
            let mut disposed = self.disposed.write();
            if *disposed {
                return;
            }
            *disposed = true;
        }

        let handle = Arc::clone(&self.handle);
        if let Err(err) = tokio::task::spawn_blocking(move || handle.close()).await {
            warn!(error = %err, "closing producer handle panicked");
        }

        let task = self.delivery.lock().await.take();
        if let Some(task) = task {
            match task.await {
                Ok(exit) => debug!(?exit, "delivery loop joined"),
                Err(err) => warn!(error = %err, "delivery loop panicked"),
            }
        }
        info!("producer closed");
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        if !*self.disposed.get_mut() {
            self.handle.close();
        }
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Producer")
            .field("flush_timeout", &self.flush_timeout)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}
