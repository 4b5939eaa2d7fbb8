//! Per-handle view given to message handlers.

use crate::options::MessageHandler;
use ferrule_core::{
    ConsumerClient, Error, FatalError, FatalHandler, Message, Result, TopicPartition,
};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Handle operations available to message handlers, plus unhandled-message
/// forwarding and the timed pause used for backpressure.
///
/// A worker is cheap to clone. Every clone shares the handle of the polling
/// loop it came from.
#[derive(Clone)]
pub struct ConsumeWorker {
    handle: Arc<dyn ConsumerClient>,
    topic: Arc<str>,
    unhandled_message_handler: Option<MessageHandler>,
    fatal_handler: FatalHandler,
    forwarded: bool,
    aborted: Arc<AtomicBool>,
}

/// Handlers written against the context name use the same type.
pub type ConsumeContext = ConsumeWorker;

impl ConsumeWorker {
    /// Create a worker over `handle` for `topic`.
    pub fn new(
        handle: Arc<dyn ConsumerClient>,
        topic: impl Into<Arc<str>>,
        unhandled_message_handler: Option<MessageHandler>,
        fatal_handler: FatalHandler,
    ) -> Self {
        Self {
            handle,
            topic: topic.into(),
            unhandled_message_handler,
            fatal_handler,
            forwarded: false,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The underlying client handle.
    #[must_use]
    pub fn handle(&self) -> &Arc<dyn ConsumerClient> {
        &self.handle
    }

    /// Topic of the polling loop this worker belongs to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// True when this worker was handed to the unhandled message handler.
    #[must_use]
    pub const fn is_forwarded(&self) -> bool {
        self.forwarded
    }

    /// True once a fatal error was raised through this worker or one of its
    /// forwards. The polling loop stops after the current message.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Commit the current positions of all assigned partitions.
    pub fn commit(&self) -> Result<Vec<TopicPartition>> {
        Ok(self.handle.commit()?)
    }

    /// Commit the position following `message`.
    pub fn commit_message(&self, message: &Message) -> Result<Vec<TopicPartition>> {
        Ok(self.handle.commit_message(message)?)
    }

    /// Commit explicit offsets.
    pub fn commit_offsets(&self, offsets: &[TopicPartition]) -> Result<Vec<TopicPartition>> {
        Ok(self.handle.commit_offsets(offsets)?)
    }

    /// Fetch committed offsets for `partitions`.
    pub fn committed(
        &self,
        partitions: &[TopicPartition],
        timeout: Duration,
    ) -> Result<Vec<TopicPartition>> {
        Ok(self.handle.committed(partitions, timeout)?)
    }

    /// Stop fetching from `partitions`.
    pub fn pause(&self, partitions: &[TopicPartition]) -> Result<()> {
        Ok(self.handle.pause(partitions)?)
    }

    /// Resume fetching from `partitions`.
    pub fn resume(&self, partitions: &[TopicPartition]) -> Result<()> {
        Ok(self.handle.resume(partitions)?)
    }

    /// Store offsets for a later commit.
    pub fn store_offsets(&self, offsets: &[TopicPartition]) -> Result<Vec<TopicPartition>> {
        Ok(self.handle.store_offsets(offsets)?)
    }

    /// Pause `partitions` now, and after `duration` run `callback` then
    /// resume them.
    ///
    /// Returns as soon as the partitions are paused. The partitions are
    /// resumed even when the callback fails or panics. Awaiting the returned
    /// [`WaitHandle`] yields the callback's result; dropping it leaves the
    /// timer running.
    ///
    /// # Errors
    ///
    /// Fails without scheduling anything if the pause fails or no tokio
    /// runtime is available.
    pub fn wait<F>(
        &self,
        partitions: Vec<TopicPartition>,
        duration: Duration,
        callback: F,
    ) -> Result<WaitHandle>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|err| Error::internal(format!("wait needs a tokio runtime: {err}")))?;
        self.pause(&partitions)?;
        debug!(topic = %self.topic, partitions = partitions.len(), ?duration, "partitions paused");

        let resume = ResumeOnDrop {
            handle: Arc::clone(&self.handle),
            topic: Arc::clone(&self.topic),
            partitions,
        };
        let task = runtime.spawn(async move {
            let resume = resume;
            tokio::time::sleep(duration).await;
            let result = tokio::task::spawn_blocking(callback)
                .await
                .unwrap_or_else(|err| Err(Error::handler(format!("wait callback panicked: {err}"))));
            if let Err(err) = &result {
                warn!(topic = %resume.topic, error = %err, "wait callback failed");
            }
            drop(resume);
            result
        });
        Ok(WaitHandle { task })
    }

    /// Hand `message` to the unhandled message handler.
    ///
    /// The handler receives a worker marked as forwarded. Forwarding again
    /// from that worker is a fatal error: it reports
    /// [`FatalError::RecursiveForward`] and stops the polling loop.
    pub fn forward_unhandled_message(&self, message: Message) {
        if self.forwarded {
            self.aborted.store(true, Ordering::SeqCst);
            (self.fatal_handler)(&FatalError::RecursiveForward {
                topic: self.topic.to_string(),
            });
            return;
        }

        match &self.unhandled_message_handler {
            Some(handler) => {
                let forwarded = Self {
                    forwarded: true,
                    ..self.clone()
                };
                handler(&forwarded, message);
            }
            None => {
                debug!(topic = %self.topic, message = %message, "dropping unhandled message");
            }
        }
    }
}

impl fmt::Debug for ConsumeWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumeWorker")
            .field("topic", &self.topic)
            .field("forwarded", &self.forwarded)
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}

struct ResumeOnDrop {
    handle: Arc<dyn ConsumerClient>,
    topic: Arc<str>,
    partitions: Vec<TopicPartition>,
}

impl Drop for ResumeOnDrop {
    fn drop(&mut self) {
        match self.handle.resume(&self.partitions) {
            Ok(()) => debug!(topic = %self.topic, "partitions resumed"),
            Err(err) => warn!(topic = %self.topic, error = %err, "failed to resume partitions"),
        }
    }
}

/// Completion of a [`ConsumeWorker::wait`] timer.
///
/// Resolves after the callback ran and the partitions were resumed.
#[derive(Debug)]
#[must_use = "dropping the handle detaches the timer; await it to observe the callback result"]
pub struct WaitHandle {
    task: JoinHandle<Result<()>>,
}

impl WaitHandle {
    /// True once the callback ran and the partitions were resumed.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Future for WaitHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|err| Err(Error::internal(format!("wait timer failed: {err}"))))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferrule_core::testing::{MockCluster, Op};
    use ferrule_core::{
        fatal_handler, BrokerError, ClientConfig, ClientFactory, ErrorCode, Offset, GROUP_ID,
    };
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn worker(
        cluster: &MockCluster,
        unhandled: Option<MessageHandler>,
        fatal: FatalHandler,
    ) -> ConsumeWorker {
        let handle = cluster
            .create_consumer(&ClientConfig::new().with(GROUP_ID, "g"))
            .expect("consumer");
        ConsumeWorker::new(handle, "orders", unhandled, fatal)
    }

    fn recording_fatal() -> (FatalHandler, Arc<Mutex<Vec<FatalError>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (fatal_handler(move |err| sink.lock().push(err.clone())), seen)
    }

    #[test]
    fn test_forward_reaches_unhandled_handler_once() {
        let cluster = MockCluster::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let unhandled: MessageHandler = Arc::new(move |worker: &ConsumeWorker, _message: Message| {
            assert!(worker.is_forwarded());
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let (fatal, seen) = recording_fatal();
        let worker = worker(&cluster, Some(unhandled), fatal);

        worker.forward_unhandled_message(Message::new("orders", "x"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(seen.lock().is_empty());
        assert!(!worker.is_aborted());
    }

    #[test]
    fn test_recursive_forward_is_fatal_and_bounded() {
        let cluster = MockCluster::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let unhandled: MessageHandler = Arc::new(move |worker: &ConsumeWorker, message: Message| {
            counter.fetch_add(1, Ordering::SeqCst);
            worker.forward_unhandled_message(message);
        });
        let (fatal, seen) = recording_fatal();
        let worker = worker(&cluster, Some(unhandled), fatal);

        worker.forward_unhandled_message(Message::new("orders", "loop"));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            seen.lock().as_slice(),
            &[FatalError::RecursiveForward {
                topic: "orders".into()
            }]
        );
        assert!(worker.is_aborted());
    }

    #[test]
    fn test_forward_without_handler_drops_message() {
        let cluster = MockCluster::new();
        let (fatal, seen) = recording_fatal();
        let worker = worker(&cluster, None, fatal);
        worker.forward_unhandled_message(Message::new("orders", "x"));
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_commit_message_passes_through() {
        let cluster = MockCluster::new();
        let (fatal, _) = recording_fatal();
        let worker = worker(&cluster, None, fatal);
        let message = Message::builder("orders").partition(0).offset(4_i64).build();

        let committed = worker.commit_message(&message).expect("commit");
        assert_eq!(committed[0].offset, Offset::Offset(5));
        assert_eq!(cluster.consumers()[0].calls_of(Op::CommitMessage).len(), 1);
    }

    #[tokio::test]
    async fn test_wait_resumes_even_when_callback_fails() {
        let cluster = MockCluster::new();
        let (fatal, _) = recording_fatal();
        let worker = worker(&cluster, None, fatal);
        let mock = Arc::clone(&cluster.consumers()[0]);
        let partitions = vec![TopicPartition::new("orders", 0)];

        let started = Instant::now();
        let handle = worker
            .wait(partitions.clone(), Duration::from_millis(50), || {
                Err(Error::handler("downstream unavailable"))
            })
            .expect("wait");

        assert_eq!(mock.ops(), vec![Op::Pause]);

        let result = handle.await;
        assert!(matches!(result, Err(Error::Handler { .. })));

        let resumes = mock.calls_of(Op::Resume);
        assert_eq!(resumes.len(), 1);
        assert_eq!(resumes[0].partitions, partitions);
        assert!(resumes[0].at.duration_since(started) >= Duration::from_millis(50));
        assert_eq!(mock.ops(), vec![Op::Pause, Op::Resume]);
    }

    #[tokio::test]
    async fn test_wait_fails_fast_when_pause_fails() {
        let cluster = MockCluster::new();
        let (fatal, _) = recording_fatal();
        let worker = worker(&cluster, None, fatal);
        let mock = Arc::clone(&cluster.consumers()[0]);
        mock.fail_next(Op::Pause, BrokerError::new(ErrorCode::Fail, "no such partition"));

        let result = worker.wait(
            vec![TopicPartition::new("orders", 9)],
            Duration::from_millis(1),
            || Ok(()),
        );
        assert!(matches!(result, Err(Error::Client(_))));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(mock.calls_of(Op::Resume).is_empty());
    }

    #[test]
    fn test_wait_without_runtime_is_an_error() {
        let cluster = MockCluster::new();
        let (fatal, _) = recording_fatal();
        let worker = worker(&cluster, None, fatal);

        let result = worker.wait(Vec::new(), Duration::ZERO, || Ok(()));
        assert!(matches!(result, Err(Error::Internal { .. })));
        assert!(cluster.consumers()[0].calls_of(Op::Pause).is_empty());
    }
}
