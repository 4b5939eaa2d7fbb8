//! In-memory client used by the consumer and producer test suites.
//!
//! [`MockCluster`] implements [`ClientFactory`]. Events pushed to a topic are
//! delivered to whichever mock consumer is subscribed to it, and every call a
//! handle receives is journaled with a timestamp so tests can assert ordering
//! (pause before resume, close after unsubscribe, and so on).

use crate::client::{
    ClientFactory, ClientResult, ConsumerClient, DeliverySender, ProducerClient,
    ProducerEventStream,
};
use crate::code::{BrokerError, ErrorCode};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::event::{ConsumerEvent, ProducerEvent};
use crate::message::{DeliveryReport, Message};
use crate::types::{Offset, PartitionId, TopicPartition};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedSender};

/// Consumer handle operation, as recorded in a [`MockConsumer`]'s journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `subscribe`
    Subscribe,
    /// `unsubscribe`
    Unsubscribe,
    /// `assign`
    Assign,
    /// `unassign`
    Unassign,
    /// `commit`
    Commit,
    /// `commit_message`
    CommitMessage,
    /// `commit_offsets`
    CommitOffsets,
    /// `committed`
    Committed,
    /// `pause`
    Pause,
    /// `resume`
    Resume,
    /// `store_offsets`
    StoreOffsets,
    /// `close`
    Close,
}

/// One journaled consumer handle call.
#[derive(Debug, Clone)]
pub struct Call {
    /// Operation
    pub op: Op,
    /// Partitions passed to the call; subscribed topics appear as any-partition entries
    pub partitions: Vec<TopicPartition>,
    /// When the call was made
    pub at: Instant,
}

#[derive(Default)]
struct Broker {
    queues: HashMap<String, VecDeque<ConsumerEvent>>,
    rejected: HashSet<String>,
}

#[derive(Default)]
struct Shared {
    broker: Mutex<Broker>,
    ready: Condvar,
}

/// In-memory stand-in for a broker cluster.
#[derive(Clone, Default)]
pub struct MockCluster {
    shared: Arc<Shared>,
    consumers: Arc<Mutex<Vec<Arc<MockConsumer>>>>,
    producers: Arc<Mutex<Vec<Arc<MockProducer>>>>,
}

impl MockCluster {
    /// Create an empty cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `event` for the consumer subscribed to `topic`.
    pub fn push(&self, topic: &str, event: ConsumerEvent) {
        let mut broker = self.shared.broker.lock();
        broker
            .queues
            .entry(topic.to_string())
            .or_default()
            .push_back(event);
        self.shared.ready.notify_all();
    }

    /// Queue a message event on the message's own topic.
    pub fn push_message(&self, message: Message) {
        let topic = message.topic.clone();
        self.push(&topic, ConsumerEvent::Message(message));
    }

    /// Events queued on `topic` and not yet polled.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.shared
            .broker
            .lock()
            .queues
            .get(topic)
            .map_or(0, VecDeque::len)
    }

    /// Make subscriptions to `topic` fail with an unknown topic error.
    pub fn reject_topic(&self, topic: &str) {
        self.shared.broker.lock().rejected.insert(topic.to_string());
    }

    /// Every consumer handle created so far, in creation order.
    #[must_use]
    pub fn consumers(&self) -> Vec<Arc<MockConsumer>> {
        self.consumers.lock().clone()
    }

    /// The consumer handle subscribed to `topic`.
    #[must_use]
    pub fn consumer_for(&self, topic: &str) -> Option<Arc<MockConsumer>> {
        self.consumers
            .lock()
            .iter()
            .find(|c| c.topics().iter().any(|t| t == topic))
            .cloned()
    }

    /// Every producer handle created so far, in creation order.
    #[must_use]
    pub fn producers(&self) -> Vec<Arc<MockProducer>> {
        self.producers.lock().clone()
    }

    /// Total `close` calls across all consumer handles.
    #[must_use]
    pub fn consumer_closes(&self) -> usize {
        self.consumers.lock().iter().map(|c| c.close_count()).sum()
    }
}

impl ClientFactory for MockCluster {
    fn create_consumer(&self, config: &ClientConfig) -> Result<Arc<dyn ConsumerClient>> {
        if config.group_id().is_none() {
            return Err(Error::configuration("group.id must be set for consumers"));
        }
        let mut consumers = self.consumers.lock();
        let consumer = Arc::new(MockConsumer {
            id: consumers.len(),
            config: config.clone(),
            shared: Arc::clone(&self.shared),
            topics: Mutex::new(Vec::new()),
            assignment: Mutex::new(Vec::new()),
            committed: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            polls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        });
        consumers.push(Arc::clone(&consumer));
        Ok(consumer)
    }

    fn create_producer(&self, config: &ClientConfig) -> Result<Arc<dyn ProducerClient>> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut producers = self.producers.lock();
        let producer = Arc::new(MockProducer {
            id: producers.len(),
            config: config.clone(),
            produced: Mutex::new(Vec::new()),
            events_tx: Mutex::new(Some(events_tx)),
            events_rx: Mutex::new(Some(events_rx)),
            produce_failure: Mutex::new(None),
            delivery_failure: Mutex::new(None),
            flushes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        producers.push(Arc::clone(&producer));
        Ok(producer)
    }
}

/// Mock consumer handle.
pub struct MockConsumer {
    id: usize,
    config: ClientConfig,
    shared: Arc<Shared>,
    topics: Mutex<Vec<String>>,
    assignment: Mutex<Vec<TopicPartition>>,
    committed: Mutex<HashMap<(String, PartitionId), Offset>>,
    calls: Mutex<Vec<Call>>,
    polls: Mutex<Vec<Duration>>,
    failures: Mutex<HashMap<Op, BrokerError>>,
    closed: AtomicBool,
    closes: AtomicUsize,
}

impl MockConsumer {
    /// Creation index within the cluster.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Configuration the handle was created with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Currently subscribed topics.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().clone()
    }

    /// Current assignment.
    #[must_use]
    pub fn assignment(&self) -> Vec<TopicPartition> {
        self.assignment.lock().clone()
    }

    /// Full call journal.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Journal entries for one operation.
    #[must_use]
    pub fn calls_of(&self, op: Op) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.op == op)
            .cloned()
            .collect()
    }

    /// Operations in call order.
    #[must_use]
    pub fn ops(&self) -> Vec<Op> {
        self.calls.lock().iter().map(|c| c.op).collect()
    }

    /// Timeout of every `poll` call, in call order.
    #[must_use]
    pub fn poll_timeouts(&self) -> Vec<Duration> {
        self.polls.lock().clone()
    }

    /// Number of `close` calls received.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// True once `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make the next call of `op` fail with `error`. The call is still journaled.
    pub fn fail_next(&self, op: Op, error: BrokerError) {
        self.failures.lock().insert(op, error);
    }

    fn record(&self, op: Op, partitions: Vec<TopicPartition>) -> ClientResult<()> {
        self.calls.lock().push(Call {
            op,
            partitions,
            at: Instant::now(),
        });
        match self.failures.lock().remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn remember_commits(&self, offsets: &[TopicPartition]) {
        let mut committed = self.committed.lock();
        for tp in offsets {
            committed.insert((tp.topic.clone(), tp.partition), tp.offset);
        }
    }

    fn next_event(&self, broker: &mut Broker, topics: &[String]) -> Option<ConsumerEvent> {
        topics
            .iter()
            .find_map(|topic| broker.queues.get_mut(topic).and_then(VecDeque::pop_front))
    }
}

impl ConsumerClient for MockConsumer {
    fn subscribe(&self, topics: &[String]) -> ClientResult<()> {
        self.record(Op::Subscribe, topics.iter().map(TopicPartition::any).collect())?;
        let broker = self.shared.broker.lock();
        if let Some(rejected) = topics.iter().find(|t| broker.rejected.contains(*t)) {
            return Err(BrokerError::new(
                ErrorCode::UnknownTopicOrPartition,
                format!("subscribed topic not available: {rejected}"),
            ));
        }
        drop(broker);
        *self.topics.lock() = topics.to_vec();
        Ok(())
    }

    fn unsubscribe(&self) -> ClientResult<()> {
        self.record(Op::Unsubscribe, Vec::new())?;
        self.topics.lock().clear();
        Ok(())
    }

    fn assign(&self, partitions: &[TopicPartition]) -> ClientResult<()> {
        self.record(Op::Assign, partitions.to_vec())?;
        *self.assignment.lock() = partitions.to_vec();
        Ok(())
    }

    fn unassign(&self) -> ClientResult<()> {
        self.record(Op::Unassign, Vec::new())?;
        self.assignment.lock().clear();
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Option<ConsumerEvent> {
        self.polls.lock().push(timeout);
        let topics = self.topics();
        let deadline = Instant::now() + timeout;
        let mut broker = self.shared.broker.lock();
        loop {
            if self.is_closed() {
                return None;
            }
            if let Some(event) = self.next_event(&mut broker, &topics) {
                return Some(event);
            }
            if self.shared.ready.wait_until(&mut broker, deadline).timed_out() {
                return self.next_event(&mut broker, &topics);
            }
        }
    }

    fn commit(&self) -> ClientResult<Vec<TopicPartition>> {
        let assignment = self.assignment();
        self.record(Op::Commit, assignment.clone())?;
        Ok(assignment)
    }

    fn commit_message(&self, message: &Message) -> ClientResult<Vec<TopicPartition>> {
        let position = message.topic_partition().with_offset(message.offset.next());
        self.record(Op::CommitMessage, vec![position.clone()])?;
        self.remember_commits(std::slice::from_ref(&position));
        Ok(vec![position])
    }

    fn commit_offsets(&self, offsets: &[TopicPartition]) -> ClientResult<Vec<TopicPartition>> {
        self.record(Op::CommitOffsets, offsets.to_vec())?;
        self.remember_commits(offsets);
        Ok(offsets.to_vec())
    }

    fn committed(
        &self,
        partitions: &[TopicPartition],
        _timeout: Duration,
    ) -> ClientResult<Vec<TopicPartition>> {
        self.record(Op::Committed, partitions.to_vec())?;
        let committed = self.committed.lock();
        Ok(partitions
            .iter()
            .map(|tp| {
                let offset = committed
                    .get(&(tp.topic.clone(), tp.partition))
                    .copied()
                    .unwrap_or(Offset::Invalid);
                tp.clone().with_offset(offset)
            })
            .collect())
    }

    fn pause(&self, partitions: &[TopicPartition]) -> ClientResult<()> {
        self.record(Op::Pause, partitions.to_vec())
    }

    fn resume(&self, partitions: &[TopicPartition]) -> ClientResult<()> {
        self.record(Op::Resume, partitions.to_vec())
    }

    fn store_offsets(&self, offsets: &[TopicPartition]) -> ClientResult<Vec<TopicPartition>> {
        self.record(Op::StoreOffsets, offsets.to_vec())?;
        Ok(offsets.to_vec())
    }

    fn close(&self) -> ClientResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        let _broker = self.shared.broker.lock();
        self.shared.ready.notify_all();
        drop(_broker);
        self.record(Op::Close, Vec::new())
    }
}

/// Mock producer handle.
pub struct MockProducer {
    id: usize,
    config: ClientConfig,
    produced: Mutex<Vec<Message>>,
    events_tx: Mutex<Option<UnboundedSender<ProducerEvent>>>,
    events_rx: Mutex<Option<ProducerEventStream>>,
    produce_failure: Mutex<Option<BrokerError>>,
    delivery_failure: Mutex<Option<BrokerError>>,
    flushes: AtomicUsize,
    closed: AtomicBool,
}

impl MockProducer {
    /// Creation index within the cluster.
    #[must_use]
    pub const fn id(&self) -> usize {
        self.id
    }

    /// Configuration the handle was created with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Messages accepted by `produce`, with partition and offset assigned.
    #[must_use]
    pub fn produced(&self) -> Vec<Message> {
        self.produced.lock().clone()
    }

    /// Number of `flush` calls received.
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// True once `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Make the next `produce` call fail with `error`.
    pub fn fail_next_produce(&self, error: BrokerError) {
        *self.produce_failure.lock() = Some(error);
    }

    /// Make the next delivery report carry `error`.
    pub fn fail_next_delivery(&self, error: BrokerError) {
        *self.delivery_failure.lock() = Some(error);
    }

    /// Push an event onto the handle's event stream. Returns `false` once closed.
    pub fn emit(&self, event: ProducerEvent) -> bool {
        self.events_tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(event).is_ok())
    }
}

impl ProducerClient for MockProducer {
    fn produce(&self, mut message: Message, delivery: Option<DeliverySender>) -> ClientResult<()> {
        if self.is_closed() {
            return Err(BrokerError::new(ErrorCode::Fail, "producer handle is closed"));
        }
        if let Some(err) = self.produce_failure.lock().take() {
            return Err(err);
        }

        let mut produced = self.produced.lock();
        if message.partition.is_any() {
            message.partition = PartitionId::new(0);
        }
        message.offset = Offset::Offset(produced.len() as i64);
        produced.push(message.clone());
        drop(produced);

        let report = match self.delivery_failure.lock().take() {
            Some(err) => DeliveryReport::failed(message, err),
            None => DeliveryReport::delivered(message),
        };
        match delivery {
            Some(tx) => {
                let _ = tx.send(report);
            }
            None => {
                self.emit(ProducerEvent::Delivery(report));
            }
        }
        Ok(())
    }

    fn flush(&self, _timeout: Duration) -> ClientResult<()> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn take_events(&self) -> Option<ProducerEventStream> {
        self.events_rx.lock().take()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.events_tx.lock().take();
    }
}
