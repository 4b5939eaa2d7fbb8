//! The per-topic polling loop.
//!
//! Each subscribed topic gets one loop on tokio's blocking pool. The loop
//! owns its handle: whatever ends the loop (cancellation, an unhandled error,
//! a fatal error, a panicking handler) the handle is unassigned, unsubscribed
//! and closed before the loop's join handle resolves.

use crate::options::{MessageHandler, RebalanceCallback, RebalanceEvent};
use crate::worker::ConsumeWorker;
use ferrule_core::{
    dispatch_error, ConsumerClient, ConsumerEvent, Disposition, ErrorHandler, FatalError,
    FatalHandler,
};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a polling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopExit {
    /// The consumer was closed
    Cancelled,
    /// An unhandled error ended the loop
    Stopped,
    /// A fatal error was passed to the fatal handler
    Fatal,
}

/// Callbacks shared by every loop of one consumer.
#[derive(Clone)]
pub(crate) struct Dispatch {
    pub(crate) message_handler: Option<MessageHandler>,
    pub(crate) error_handler: Option<ErrorHandler>,
    pub(crate) fatal_handler: FatalHandler,
    pub(crate) rebalance: Option<RebalanceCallback>,
}

pub(crate) struct PollingLoop {
    topic: String,
    handle: Arc<dyn ConsumerClient>,
    worker: ConsumeWorker,
    dispatch: Dispatch,
    polling_timeout: Duration,
    token: CancellationToken,
}

impl PollingLoop {
    pub(crate) fn new(
        topic: String,
        handle: Arc<dyn ConsumerClient>,
        worker: ConsumeWorker,
        dispatch: Dispatch,
        polling_timeout: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            topic,
            handle,
            worker,
            dispatch,
            polling_timeout,
            token,
        }
    }

    /// Poll until cancelled or stopped, then release the handle.
    pub(crate) fn run(self) -> LoopExit {
        let _release = ReleaseOnExit {
            topic: self.topic.clone(),
            handle: Arc::clone(&self.handle),
        };
        info!(topic = %self.topic, "polling loop started");
        let exit = self.poll_until_stopped();
        info!(topic = %self.topic, ?exit, "polling loop finished");
        exit
    }

    fn poll_until_stopped(&self) -> LoopExit {
        let mut draining = false;
        while !self.token.is_cancelled() {
            // Drain bursts without blocking; block again once the queue is empty.
            let timeout = if draining {
                Duration::ZERO
            } else {
                self.polling_timeout
            };
            let Some(event) = self.handle.poll(timeout) else {
                draining = false;
                continue;
            };
            draining = true;
            if let ControlFlow::Break(exit) = self.route(event) {
                return exit;
            }
        }
        LoopExit::Cancelled
    }

    fn route(&self, event: ConsumerEvent) -> ControlFlow<LoopExit> {
        match event {
            ConsumerEvent::Assigned(partitions) => {
                debug!(topic = %self.topic, partitions = partitions.len(), "partitions assigned");
                if let Err(err) = self.handle.assign(&partitions) {
                    warn!(topic = %self.topic, error = %err, "failed to apply assignment");
                }
                self.notify_rebalance(&RebalanceEvent::Assigned(partitions));
            }
            ConsumerEvent::Revoked(partitions) => {
                debug!(topic = %self.topic, partitions = partitions.len(), "partitions revoked");
                if let Err(err) = self.handle.unassign() {
                    warn!(topic = %self.topic, error = %err, "failed to drop assignment");
                }
                self.notify_rebalance(&RebalanceEvent::Revoked(partitions));
            }
            ConsumerEvent::PartitionEof(partition) => {
                info!(topic = %self.topic, partition = %partition, "reached end of partition");
            }
            ConsumerEvent::Message(message) => {
                match &self.dispatch.message_handler {
                    Some(handler) => handler(&self.worker, message),
                    None => self.worker.forward_unhandled_message(message),
                }
                if self.worker.is_aborted() {
                    return ControlFlow::Break(LoopExit::Fatal);
                }
            }
            ConsumerEvent::Error(err) => {
                match dispatch_error(&err, self.dispatch.error_handler.as_ref()) {
                    Disposition::Continue => {}
                    Disposition::StopLoop => return ControlFlow::Break(LoopExit::Stopped),
                    Disposition::Fatal => {
                        (self.dispatch.fatal_handler)(&FatalError::Broker {
                            context: self.topic.clone(),
                            error: err,
                        });
                        return ControlFlow::Break(LoopExit::Fatal);
                    }
                }
            }
            ConsumerEvent::Other(description) => {
                debug!(topic = %self.topic, event = %description, "ignored event");
            }
        }
        ControlFlow::Continue(())
    }

    fn notify_rebalance(&self, event: &RebalanceEvent) {
        if let Some(callback) = &self.dispatch.rebalance {
            if let Err(err) = callback(&self.worker, event) {
                warn!(topic = %self.topic, error = %err, "rebalance callback failed");
            }
        }
    }
}

struct ReleaseOnExit {
    topic: String,
    handle: Arc<dyn ConsumerClient>,
}

impl Drop for ReleaseOnExit {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!(topic = %self.topic, "polling loop panicked, releasing handle");
        }
        if let Err(err) = self.handle.unassign() {
            debug!(topic = %self.topic, error = %err, "unassign on release failed");
        }
        if let Err(err) = self.handle.unsubscribe() {
            debug!(topic = %self.topic, error = %err, "unsubscribe on release failed");
        }
        if let Err(err) = self.handle.close() {
            warn!(topic = %self.topic, error = %err, "close on release failed");
        }
        debug!(topic = %self.topic, "handle released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrule_core::testing::{MockCluster, Op};
    use ferrule_core::{
        error_handler, fatal_handler, BrokerError, ClientConfig, ClientFactory, ErrorCode,
        Message, TopicPartition, GROUP_ID,
    };
    use parking_lot::Mutex;

    struct Harness {
        cluster: MockCluster,
        fatal: Arc<Mutex<Vec<FatalError>>>,
        handled: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                cluster: MockCluster::new(),
                fatal: Arc::new(Mutex::new(Vec::new())),
                handled: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn polling_loop(&self, error_handler: Option<ErrorHandler>) -> (PollingLoop, CancellationToken) {
            let handle = self
                .cluster
                .create_consumer(&ClientConfig::new().with(GROUP_ID, "g"))
                .expect("consumer");
            handle.subscribe(&["orders".to_string()]).expect("subscribe");

            let fatal = Arc::clone(&self.fatal);
            let fatal_handler = fatal_handler(move |err| fatal.lock().push(err.clone()));
            let handled = Arc::clone(&self.handled);
            let message_handler: MessageHandler = Arc::new(move |_: &ConsumeWorker, m: Message| {
                handled.lock().push(m.topic);
            });

            let worker = ConsumeWorker::new(Arc::clone(&handle), "orders", None, Arc::clone(&fatal_handler));
            let token = CancellationToken::new();
            let dispatch = Dispatch {
                message_handler: Some(message_handler),
                error_handler,
                fatal_handler,
                rebalance: None,
            };
            let polling = PollingLoop::new(
                "orders".into(),
                handle,
                worker,
                dispatch,
                Duration::from_millis(5),
                token.clone(),
            );
            (polling, token)
        }
    }

    #[test]
    fn test_unhandled_error_stops_loop_and_releases_handle() {
        let harness = Harness::new();
        let (polling, _token) = harness.polling_loop(None);
        harness.cluster.push_message(Message::new("orders", "a"));
        harness.cluster.push(
            "orders",
            ConsumerEvent::Error(BrokerError::new(ErrorCode::MessageTimedOut, "slow")),
        );
        harness.cluster.push_message(Message::new("orders", "never"));

        assert_eq!(polling.run(), LoopExit::Stopped);
        assert_eq!(harness.handled.lock().len(), 1);

        let mock = &harness.cluster.consumers()[0];
        let ops = mock.ops();
        assert_eq!(&ops[ops.len() - 3..], &[Op::Unassign, Op::Unsubscribe, Op::Close]);
        assert_eq!(mock.close_count(), 1);
    }

    #[test]
    fn test_transport_error_keeps_polling() {
        let harness = Harness::new();
        let (polling, token) = harness.polling_loop(None);
        harness.cluster.push(
            "orders",
            ConsumerEvent::Error(BrokerError::new(ErrorCode::Transport, "reset")),
        );
        harness.cluster.push_message(Message::new("orders", "after"));

        let handled = Arc::clone(&harness.handled);
        let canceller = std::thread::spawn(move || {
            while handled.lock().is_empty() {
                std::thread::sleep(Duration::from_millis(1));
            }
            token.cancel();
        });
        assert_eq!(polling.run(), LoopExit::Cancelled);
        canceller.join().expect("canceller");
        assert_eq!(harness.handled.lock().len(), 1);
        assert!(harness.fatal.lock().is_empty());
    }

    #[test]
    fn test_fatal_error_goes_to_fatal_handler() {
        let harness = Harness::new();
        let consulted = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&consulted);
        let (polling, _token) = harness.polling_loop(Some(error_handler(move |_| {
            *counter.lock() += 1;
            true
        })));
        harness.cluster.push(
            "orders",
            ConsumerEvent::Error(BrokerError::new(ErrorCode::AllBrokersDown, "down")),
        );

        assert_eq!(polling.run(), LoopExit::Fatal);
        assert_eq!(*consulted.lock(), 0);
        assert!(matches!(
            harness.fatal.lock().as_slice(),
            [FatalError::Broker { context, .. }] if context == "orders"
        ));
        assert!(harness.cluster.consumers()[0].is_closed());
    }

    #[test]
    fn test_burst_is_drained_without_blocking() {
        let harness = Harness::new();
        let (polling, token) = harness.polling_loop(None);
        let partition = TopicPartition::new("orders", 0);
        harness.cluster.push_message(Message::new("orders", "a"));
        harness.cluster.push_message(Message::new("orders", "b"));
        harness
            .cluster
            .push("orders", ConsumerEvent::PartitionEof(partition));
        harness
            .cluster
            .push("orders", ConsumerEvent::Other("stats".into()));
        harness.cluster.push_message(Message::new("orders", "c"));

        let mock = Arc::clone(&harness.cluster.consumers()[0]);
        let watched = Arc::clone(&mock);
        let canceller = std::thread::spawn(move || {
            // Five events, one empty zero-timeout poll, then a blocking poll.
            while watched.poll_timeouts().len() < 7 {
                std::thread::sleep(Duration::from_millis(1));
            }
            token.cancel();
        });
        assert_eq!(polling.run(), LoopExit::Cancelled);
        canceller.join().expect("canceller");

        let blocking = Duration::from_millis(5);
        let zero = Duration::ZERO;
        assert_eq!(
            &mock.poll_timeouts()[..7],
            &[blocking, zero, zero, zero, zero, zero, blocking]
        );
        assert_eq!(harness.handled.lock().len(), 3);
        assert!(harness.fatal.lock().is_empty());
    }

    #[test]
    fn test_rebalance_applies_assignment() {
        let harness = Harness::new();
        let (polling, token) = harness.polling_loop(None);
        let partitions = vec![TopicPartition::new("orders", 0), TopicPartition::new("orders", 1)];
        harness
            .cluster
            .push("orders", ConsumerEvent::Assigned(partitions.clone()));
        harness.cluster.push("orders", ConsumerEvent::Revoked(partitions.clone()));
        harness.cluster.push_message(Message::new("orders", "sentinel"));

        let handled = Arc::clone(&harness.handled);
        let canceller = std::thread::spawn(move || {
            while handled.lock().is_empty() {
                std::thread::sleep(Duration::from_millis(1));
            }
            token.cancel();
        });
        polling.run();
        canceller.join().expect("canceller");

        let mock = &harness.cluster.consumers()[0];
        let assigns = mock.calls_of(Op::Assign);
        assert_eq!(assigns.len(), 1);
        assert_eq!(assigns[0].partitions, partitions);
        // One unassign for the revoke, one on release.
        assert_eq!(mock.calls_of(Op::Unassign).len(), 2);
    }
}
