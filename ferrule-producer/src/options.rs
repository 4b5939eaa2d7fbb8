//! Producer options.

use crate::delivery::{LogRetryHook, RetryHook};
use ferrule_core::{terminate_process, BrokerError, ClientConfig, ErrorHandler, FatalError, FatalHandler};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default flush timeout applied by the write operations.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

/// Default connect timeout for each bootstrap address probe.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Producer configuration and callbacks.
#[derive(Clone)]
pub struct ProducerOptions {
    /// Settings passed to the client handle
    pub config: ClientConfig,

    /// How long each write waits for outstanding deliveries
    pub flush_timeout: Duration,

    /// Connect timeout for each bootstrap address probe
    pub ping_timeout: Duration,

    /// Consulted for handler-eligible client and delivery errors
    pub error_handler: Option<ErrorHandler>,

    /// Receives errors this layer cannot recover from
    pub fatal_handler: FatalHandler,

    /// Receives deliveries that failed with a retryable error
    pub retry_hook: Arc<dyn RetryHook>,
}

/// Forwarders are configured exactly like producers.
pub type ForwarderOptions = ProducerOptions;

impl Default for ProducerOptions {
    fn default() -> Self {
        Self {
            config: ClientConfig::default(),
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            error_handler: None,
            fatal_handler: terminate_process(),
            retry_hook: Arc::new(LogRetryHook),
        }
    }
}

impl ProducerOptions {
    /// Options with the given client settings and default timeouts.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Set the flush timeout.
    #[must_use]
    pub const fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Set the bootstrap probe timeout.
    #[must_use]
    pub const fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
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

    /// Replace the retry hook.
    #[must_use]
    pub fn with_retry_hook(mut self, hook: impl RetryHook) -> Self {
        self.retry_hook = Arc::new(hook);
        self
    }
}

impl fmt::Debug for ProducerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerOptions")
            .field("config", &self.config)
            .field("flush_timeout", &self.flush_timeout)
            .field("ping_timeout", &self.ping_timeout)
            .field("error_handler", &self.error_handler.is_some())
            .finish_non_exhaustive()
    }
}
