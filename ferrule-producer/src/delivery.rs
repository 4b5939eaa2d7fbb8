//! The delivery report engine.
//!
//! A producer handle reports deliveries and client errors on one event
//! stream. [`DeliveryLoop`] drains that stream for the lifetime of the
//! handle and applies the same three-tier error policy as the consumer
//! loops. It ends when the stream closes, which happens when the handle is
//! closed.

use ferrule_core::{
    dispatch_error, is_retryable, BrokerError, DeliveryReport, Disposition, ErrorHandler,
    FatalError, FatalHandler, ProducerEvent, ProducerEventStream,
};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const CONTEXT: &str = "producer";

/// Extension point for deliveries that failed with a retryable error.
///
/// The producer never retries on its own. Implementations may re-queue the
/// message through their own producer or record it for later.
pub trait RetryHook: Send + Sync + 'static {
    /// Called once per failed delivery whose error is retryable.
    ///
    /// # Parameters
    ///
    /// * `report` - The delivery report, with the message as the client saw it
    /// * `error` - The retryable error carried by the report
    fn on_retryable(&self, report: &DeliveryReport, error: &BrokerError);
}

/// Default [`RetryHook`]: logs the failed delivery and drops it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRetryHook;

impl RetryHook for LogRetryHook {
    fn on_retryable(&self, report: &DeliveryReport, error: &BrokerError) {
        warn!(
            topic = %report.message.topic,
            partition = %report.message.partition,
            code = ?error.code,
            error = %error,
            "delivery failed with a retryable error, not retried"
        );
    }
}

impl<F> RetryHook for F
where
    F: Fn(&DeliveryReport, &BrokerError) + Send + Sync + 'static,
{
    fn on_retryable(&self, report: &DeliveryReport, error: &BrokerError) {
        self(report, error);
    }
}

/// Why the delivery loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryExit {
    /// The event stream closed
    Closed,
    /// An unhandled error ended the loop
    Stopped,
    /// A fatal error was passed to the fatal handler
    Fatal,
}

/// Drains a producer handle's event stream.
pub struct DeliveryLoop {
    events: ProducerEventStream,
    error_handler: Option<ErrorHandler>,
    fatal_handler: FatalHandler,
    retry_hook: Arc<dyn RetryHook>,
}

impl DeliveryLoop {
    /// Build a loop over `events`.
    pub fn new(
        events: ProducerEventStream,
        error_handler: Option<ErrorHandler>,
        fatal_handler: FatalHandler,
        retry_hook: Arc<dyn RetryHook>,
    ) -> Self {
        Self {
            events,
            error_handler,
            fatal_handler,
            retry_hook,
        }
    }

    /// Run until the stream closes or an error ends the loop.
    pub async fn run(mut self) -> DeliveryExit {
        debug!("delivery loop started");
        let exit = loop {
            let Some(event) = self.events.recv().await else {
                break DeliveryExit::Closed;
            };
            if let Some(exit) = self.route(event) {
                break exit;
            }
        };
        info!(?exit, "delivery loop finished");
        exit
    }

    fn route(&self, event: ProducerEvent) -> Option<DeliveryExit> {
        match event {
            ProducerEvent::Delivery(report) => match &report.error {
                None => {
                    trace!(
                        topic = %report.message.topic,
                        partition = %report.message.partition,
                        offset = %report.message.offset,
                        "message delivered"
                    );
                    None
                }
                Some(err) if is_retryable(err) => {
                    self.retry_hook.on_retryable(&report, err);
                    None
                }
                Some(err) => self.classify(err.clone()),
            },
            ProducerEvent::Error(err) => self.classify(err),
            ProducerEvent::Other(description) => {
                debug!(event = %description, "ignored producer event");
                None
            }
        }
    }

    fn classify(&self, err: BrokerError) -> Option<DeliveryExit> {
        match dispatch_error(&err, self.error_handler.as_ref()) {
            Disposition::Continue => None,
            Disposition::StopLoop => Some(DeliveryExit::Stopped),
            Disposition::Fatal => {
                (self.fatal_handler)(&FatalError::Broker {
                    context: CONTEXT.to_string(),
                    error: err,
                });
                Some(DeliveryExit::Fatal)
            }
        }
    }
}
