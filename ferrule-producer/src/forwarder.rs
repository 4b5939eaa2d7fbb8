//! Forwarder: a producer used to pass messages on to another topic.

use crate::options::ForwarderOptions;
use crate::producer::Producer;
use ferrule_core::{ClientFactory, Result};
use std::ops::Deref;
use std::sync::Arc;
use tracing::info;

/// A [`Producer`] dedicated to forwarding. It carries no extra state and
/// derefs to the producer for writes.
#[derive(Debug)]
pub struct Forwarder {
    producer: Producer,
}

impl Forwarder {
    /// Create a forwarder. See [`Producer::new`].
    ///
    /// # Errors
    ///
    /// Same as [`Producer::new`].
    pub async fn new(options: ForwarderOptions, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        Ok(Self {
            producer: Producer::new(options, factory).await?,
        })
    }

    /// Create a forwarder backed by librdkafka.
    ///
    /// # Errors
    ///
    /// Same as [`Producer::new`].
    #[cfg(feature = "rdkafka")]
    pub async fn with_rdkafka(options: ForwarderOptions) -> Result<Self> {
        Ok(Self {
            producer: Producer::with_rdkafka(options).await?,
        })
    }

    /// The producer behind this forwarder.
    pub const fn producer(&self) -> &Producer {
        &self.producer
    }

    /// A start/stop wrapper for service runners.
    pub const fn runner(&self) -> ForwarderRunner<'_> {
        ForwarderRunner { forwarder: self }
    }
}

impl Deref for Forwarder {
    type Target = Producer;

    fn deref(&self) -> &Producer {
        &self.producer
    }
}

/// Ties a [`Forwarder`] to a service start/stop lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct ForwarderRunner<'a> {
    forwarder: &'a Forwarder,
}

impl ForwarderRunner<'_> {
    /// The forwarder is live from construction; this only logs.
    pub fn start(&self) {
        info!("forwarder started");
    }

    /// Close the forwarder.
    pub async fn stop(&self) {
        info!("forwarder stopping");
        self.forwarder.close().await;
        info!("forwarder stopped");
    }
}
