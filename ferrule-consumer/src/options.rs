//! Consumer options.

use crate::worker::ConsumeWorker;
use ferrule_core::{
    terminate_process, BrokerError, ClientConfig, ErrorHandler, FatalError, FatalHandler, Message,
    Result, TopicPartition,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default time a polling loop blocks waiting for an event.
pub const DEFAULT_POLLING_TIMEOUT: Duration = Duration::from_millis(100);

/// Default connect timeout for each bootstrap address probe.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Message callback. Runs on the polling loop's thread; blocking here delays
/// the next poll of that topic only.
pub type MessageHandler = Arc<dyn Fn(&ConsumeWorker, Message) + Send + Sync>;

/// Rebalance callback, invoked after the loop applied the change to its handle.
pub type RebalanceCallback = Arc<dyn Fn(&ConsumeWorker, &RebalanceEvent) -> Result<()> + Send + Sync>;

/// A group rebalance seen by one polling loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    /// Partitions assigned to the handle
    Assigned(Vec<TopicPartition>),
    /// Partitions revoked from the handle
    Revoked(Vec<TopicPartition>),
}

impl RebalanceEvent {
    /// Partitions affected by the rebalance.
    #[must_use]
    pub fn partitions(&self) -> &[TopicPartition] {
        match self {
            Self::Assigned(partitions) | Self::Revoked(partitions) => partitions,
        }
    }
}

/// Consumer configuration and callbacks. Fixed once the consumer is built.
#[derive(Clone)]
pub struct ConsumerOptions {
    /// Settings passed to every client handle
    pub config: ClientConfig,

    /// How long one poll blocks when nothing is pending
    pub polling_timeout: Duration,

    /// Connect timeout for each bootstrap address probe
    pub ping_timeout: Duration,

    /// Called for every message
    pub message_handler: Option<MessageHandler>,

    /// Called with messages when no message handler is set, or when a
    /// handler forwards them
    pub unhandled_message_handler: Option<MessageHandler>,

    /// Consulted for handler-eligible client errors
    pub error_handler: Option<ErrorHandler>,

    /// Receives errors this layer cannot recover from
    pub fatal_handler: FatalHandler,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            polling_timeout: DEFAULT_POLLING_TIMEOUT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            message_handler: None,
            unhandled_message_handler: None,
            error_handler: None,
            fatal_handler: terminate_process(),
        }
    }
}

impl ConsumerOptions {
    /// Options with the given client settings and default timeouts.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the polling timeout.
    #[must_use]
    pub const fn with_polling_timeout(mut self, timeout: Duration) -> Self {
        self.polling_timeout = timeout;
        self
    }

    /// Set the bootstrap probe timeout.
    #[must_use]
    pub const fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Set the message handler.
    #[must_use]
    pub fn with_message_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ConsumeWorker, Message) + Send + Sync + 'static,
    {
        self.message_handler = Some(Arc::new(handler));
        self
    }

    /// Set the unhandled message handler.
    #[must_use]
    pub fn with_unhandled_message_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ConsumeWorker, Message) + Send + Sync + 'static,
    {
        self.unhandled_message_handler = Some(Arc::new(handler));
        self
    }

    /// Set the error handler. It returns `true` when it handled the error.
    #[must_use]
    pub fn with_error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&BrokerError) -> bool + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Replace the default fatal handler, which exits the process.
    #[must_use]
    pub fn with_fatal_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&FatalError) + Send + Sync + 'static,
    {
        self.fatal_handler = Arc::new(handler);
        self
    }
}

impl fmt::Debug for ConsumerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerOptions")
            .field("config", &self.config)
            .field("polling_timeout", &self.polling_timeout)
            .field("ping_timeout", &self.ping_timeout)
            .field("message_handler", &self.message_handler.is_some())
            .field(
                "unhandled_message_handler",
                &self.unhandled_message_handler.is_some(),
            )
            .field("error_handler", &self.error_handler.is_some())
            .finish_non_exhaustive()
    }
}
