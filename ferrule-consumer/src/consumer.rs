//! Consumer lifecycle: subscribe, run one polling loop per topic, close.

use crate::options::{ConsumerOptions, RebalanceCallback};
use crate::polling::{Dispatch, LoopExit, PollingLoop};
use crate::worker::ConsumeWorker;
use ferrule_core::{probe, ClientFactory, ConsumerClient, Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "Consumer";

/// Consumer lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConsumerState {
    /// Built, never subscribed
    New,
    /// Internal resources prepared
    Initialized,
    /// Polling loops started
    Running,
    /// Closed, or failed to start; terminal
    Disposed,
}

impl ConsumerState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Initialized,
            2 => Self::Running,
            _ => Self::Disposed,
        }
    }
}

struct LoopHandle {
    topic: String,
    token: CancellationToken,
    task: JoinHandle<LoopExit>,
}

#[derive(Default)]
struct Lifecycle {
    /// Handles created by a subscribe that has not started their loops yet.
    pending: Vec<(String, Arc<dyn ConsumerClient>)>,
    loops: Vec<LoopHandle>,
}

/// A consumer that polls each subscribed topic on its own handle.
///
/// `subscribe` and `close` are serialized by an internal mutex, so the
/// consumer can be shared (`Arc<Consumer>`) and driven from several tasks.
pub struct Consumer {
    options: ConsumerOptions,
    factory: Arc<dyn ClientFactory>,
    lifecycle: Mutex<Lifecycle>,
    state: AtomicU8,
}

impl Consumer {
    /// Create a consumer that builds its handles through `factory`.
    pub fn new(options: ConsumerOptions, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            options,
            factory,
            lifecycle: Mutex::new(Lifecycle::default()),
            state: AtomicU8::new(ConsumerState::New as u8),
        }
    }

    /// Create a consumer backed by librdkafka.
    #[cfg(feature = "rdkafka")]
    pub fn with_rdkafka(options: ConsumerOptions) -> Self {
        Self::new(
            options,
            Arc::new(ferrule_core::client::rdkafka::RdKafkaFactory::new()),
        )
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConsumerState {
        ConsumerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// True while polling loops are running.
    pub fn is_running(&self) -> bool {
        self.state() == ConsumerState::Running
    }

    /// Topics with a started polling loop.
    pub async fn topics(&self) -> Vec<String> {
        self.lifecycle
            .lock()
            .await
            .loops
            .iter()
            .map(|l| l.topic.clone())
            .collect()
    }

    /// The options the consumer was built with.
    pub const fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Subscribe to `topics`, one handle and one polling loop per topic.
    ///
    /// Returns once every loop has started, without waiting for any event.
    ///
    /// # Errors
    ///
    /// - [`Error::Disposed`] after `close` or after a failed `subscribe`
    /// - [`Error::AlreadyRunning`] while the loops of an earlier call run
    /// - [`Error::Connectivity`] when no bootstrap address is reachable
    /// - any error from creating or subscribing a handle
    ///
    /// The first two leave the consumer untouched. Any other error disposes
    /// it. Handles created before such an error are closed when the consumer
    /// is dropped.
    pub async fn subscribe(
        &self,
        topics: &[&str],
        rebalance: Option<RebalanceCallback>,
    ) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ConsumerState::Disposed => return Err(Error::Disposed { component: COMPONENT }),
            ConsumerState::Running => return Err(Error::AlreadyRunning { component: COMPONENT }),
            ConsumerState::New => {
                self.set_state(ConsumerState::Initialized);
                debug!("consumer initialized");
            }
            ConsumerState::Initialized => {}
        }
        self.set_state(ConsumerState::Running);

        match self.start(&mut lifecycle, topics, rebalance).await {
            Ok(()) => {
                info!(topics = ?topics, "consumer running");
                Ok(())
            }
            Err(err) => {
                self.set_state(ConsumerState::Disposed);
                error!(error = %err, "consumer failed to start");
                Err(err)
            }
        }
    }

    async fn start(
        &self,
        lifecycle: &mut Lifecycle,
        topics: &[&str],
        rebalance: Option<RebalanceCallback>,
    ) -> Result<()> {
        let addresses = self.options.config.bootstrap_servers();
        probe(&addresses, self.options.ping_timeout).await?;

        for topic in topics {
            let handle = self.factory.create_consumer(&self.options.config)?;
            if let Err(err) = handle.subscribe(&[(*topic).to_string()]) {
                if let Err(close_err) = handle.close() {
                    debug!(topic = %topic, error = %close_err, "closing unsubscribed handle failed");
                }
                return Err(err.into());
            }
            lifecycle.pending.push(((*topic).to_string(), handle));
        }

        let dispatch = Dispatch {
            message_handler: self.options.message_handler.clone(),
            error_handler: self.options.error_handler.clone(),
            fatal_handler: Arc::clone(&self.options.fatal_handler),
            rebalance,
        };
        for (topic, handle) in lifecycle.pending.drain(..) {
            let worker = ConsumeWorker::new(
                Arc::clone(&handle),
                topic.as_str(),
                self.options.unhandled_message_handler.clone(),
                Arc::clone(&self.options.fatal_handler),
            );
            let token = CancellationToken::new();
            let polling = PollingLoop::new(
                topic.clone(),
                handle,
                worker,
                dispatch.clone(),
                self.options.polling_timeout,
                token.clone(),
            );
            let task = tokio::task::spawn_blocking(move || polling.run());
            lifecycle.loops.push(LoopHandle { topic, token, task });
        }
        Ok(())
    }

    /// Stop every polling loop and wait until each has released its handle.
    ///
    /// Idempotent. Returns immediately once the consumer is disposed.
    /// Shutdown latency is bounded by the polling timeout.
    pub async fn close(&self) {
        if self.state() == ConsumerState::Disposed {
            return;
        }
        let mut lifecycle = self.lifecycle.lock().await;
        if self.state() == ConsumerState::Disposed {
            return;
        }

        let loops = std::mem::take(&mut lifecycle.loops);
        for l in &loops {
            l.token.cancel();
        }
        self.set_state(ConsumerState::Disposed);
        lifecycle.pending.clear();

        for l in loops {
            match l.task.await {
                Ok(exit) => debug!(topic = %l.topic, ?exit, "polling loop joined"),
                Err(err) => warn!(topic = %l.topic, error = %err, "polling loop panicked"),
            }
        }
        info!("consumer closed");
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        for l in &lifecycle.loops {
            l.token.cancel();
        }
        for (topic, handle) in lifecycle.pending.drain(..) {
            if let Err(err) = handle.close() {
                debug!(topic = %topic, error = %err, "closing leftover handle failed");
            }
        }
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("state", &self.state())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip_through_atomic() {
        for state in [
            ConsumerState::New,
            ConsumerState::Initialized,
            ConsumerState::Running,
            ConsumerState::Disposed,
        ] {
            assert_eq!(ConsumerState::from_u8(state as u8), state);
        }
        assert!(ConsumerState::Running < ConsumerState::Disposed);
    }
}
