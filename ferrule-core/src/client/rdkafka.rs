//! Adapter over librdkafka through the `rdkafka` crate.
//!
//! Consumers wrap a [`BaseConsumer`] polled directly by the consumer's
//! blocking loop. Rebalance notifications and global client errors arrive
//! through context callbacks while `poll` runs; they are queued and handed
//! out ahead of the next message. The rebalance callback does not touch the
//! assignment. The polling loop applies it through
//! [`ConsumerClient::assign`] and [`ConsumerClient::unassign`], which use the
//! incremental calls when the group runs the cooperative protocol.

use super::{
    ClientFactory, ClientResult, ConsumerClient, DeliverySender, ProducerClient,
    ProducerEventStream,
};
use crate::code::{BrokerError, ErrorCode};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::event::{ConsumerEvent, ProducerEvent};
use crate::message::{DeliveryReport, Header, Message};
use crate::types::{Offset, PartitionId, TopicPartition};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use parking_lot::{Mutex, RwLock};
use rdkafka::client::ClientContext;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, RebalanceProtocol};
use rdkafka::error::KafkaError;
use rdkafka::message::{BorrowedMessage, DeliveryResult, Headers, Message as _, OwnedHeaders};
use rdkafka::producer::{BaseRecord, Producer, ProducerContext, ThreadedProducer};
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::types::RDKafkaRespErr;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

/// Creates rdkafka-backed handles.
#[derive(Debug, Clone, Copy, Default)]
pub struct RdKafkaFactory;

impl RdKafkaFactory {
    /// Create a factory.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ClientFactory for RdKafkaFactory {
    fn create_consumer(&self, config: &ClientConfig) -> Result<Arc<dyn ConsumerClient>> {
        if config.group_id().is_none() {
            return Err(Error::configuration("group.id must be set for consumers"));
        }
        let consumer: BaseConsumer<ConsumerBridge> = native_config(config)
            .create_with_context(ConsumerBridge::default())
            .map_err(|err| Error::configuration(err.to_string()))?;
        Ok(Arc::new(RdKafkaConsumer {
            inner: RwLock::new(Some(consumer)),
            topics: Mutex::new(Vec::new()),
        }))
    }

    fn create_producer(&self, config: &ClientConfig) -> Result<Arc<dyn ProducerClient>> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let context = ProducerBridge {
            events: Mutex::new(Some(events_tx)),
        };
        let producer: ThreadedProducer<ProducerBridge> = native_config(config)
            .create_with_context(context)
            .map_err(|err| Error::configuration(err.to_string()))?;
        Ok(Arc::new(RdKafkaProducer {
            inner: RwLock::new(Some(producer)),
            events: Mutex::new(Some(events_rx)),
        }))
    }
}

fn native_config(config: &ClientConfig) -> rdkafka::ClientConfig {
    let mut native = rdkafka::ClientConfig::new();
    for (key, value) in config.iter() {
        native.set(key, value);
    }
    native
}

/// Code carried by client errors that have no librdkafka code.
const UNCODED: ErrorCode = ErrorCode::Other(-1);

fn broker_error(err: &KafkaError) -> BrokerError {
    let code = err
        .rdkafka_error_code()
        .map_or(UNCODED, |code| ErrorCode::from(code as i32));
    BrokerError::new(code, err.to_string())
}

fn closed_error() -> BrokerError {
    BrokerError::new(ErrorCode::Fail, "client handle is closed")
}

fn native_offset(offset: Offset) -> rdkafka::Offset {
    match offset {
        Offset::Beginning => rdkafka::Offset::Beginning,
        Offset::End => rdkafka::Offset::End,
        Offset::Stored => rdkafka::Offset::Stored,
        Offset::Invalid => rdkafka::Offset::Invalid,
        Offset::Offset(value) => rdkafka::Offset::Offset(value),
    }
}

fn from_native_offset(offset: rdkafka::Offset) -> Offset {
    match offset {
        rdkafka::Offset::Beginning => Offset::Beginning,
        rdkafka::Offset::End => Offset::End,
        rdkafka::Offset::Stored => Offset::Stored,
        rdkafka::Offset::Offset(value) => Offset::Offset(value),
        _ => Offset::Invalid,
    }
}

fn native_list(partitions: &[TopicPartition]) -> ClientResult<TopicPartitionList> {
    let mut list = TopicPartitionList::new();
    for tp in partitions {
        list.add_partition_offset(&tp.topic, tp.partition.value(), native_offset(tp.offset))
            .map_err(|err| broker_error(&err))?;
    }
    Ok(list)
}

fn from_native_list(list: &TopicPartitionList) -> Vec<TopicPartition> {
    list.elements()
        .iter()
        .map(|elem| TopicPartition {
            topic: elem.topic().to_string(),
            partition: PartitionId::new(elem.partition()),
            offset: from_native_offset(elem.offset()),
            error: elem.error().err().map(|err| broker_error(&err)),
        })
        .collect()
}

fn owned_message<M: rdkafka::message::Message>(message: &M) -> Message {
    let headers = message
        .headers()
        .map(|headers| {
            headers
                .iter()
                .map(|h| Header {
                    key: h.key.to_string(),
                    value: h.value.map(Bytes::copy_from_slice),
                })
                .collect()
        })
        .unwrap_or_default();
    Message {
        topic: message.topic().to_string(),
        partition: PartitionId::new(message.partition()),
        offset: Offset::Offset(message.offset()),
        key: message.key().map(Bytes::copy_from_slice),
        payload: message.payload().map(Bytes::copy_from_slice),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        headers,
    }
}

/// Consumer context that queues rebalances and global errors.
#[derive(Default)]
struct ConsumerBridge {
    pending: Mutex<VecDeque<ConsumerEvent>>,
    /// Partitions of the last revoke, for an incremental unassign.
    revoked: Mutex<Option<TopicPartitionList>>,
}

impl ClientContext for ConsumerBridge {
    fn error(&self, error: KafkaError, reason: &str) {
        let mut err = broker_error(&error);
        if !reason.is_empty() {
            err.message = reason.to_string();
        }
        self.pending.lock().push_back(ConsumerEvent::Error(err));
    }
}

impl ConsumerContext for ConsumerBridge {
    fn rebalance(
        &self,
        _base_consumer: &BaseConsumer<Self>,
        err: RDKafkaRespErr,
        tpl: &mut TopicPartitionList,
    ) {
        let event = rebalance_notice(err, tpl);
        if matches!(event, ConsumerEvent::Revoked(_)) {
            *self.revoked.lock() = Some(tpl.clone());
        }
        debug!(event = event.kind(), "rebalance queued");
        self.pending.lock().push_back(event);
    }
}

fn rebalance_notice(err: RDKafkaRespErr, tpl: &TopicPartitionList) -> ConsumerEvent {
    match err {
        RDKafkaRespErr::RD_KAFKA_RESP_ERR__ASSIGN_PARTITIONS => {
            ConsumerEvent::Assigned(from_native_list(tpl))
        }
        RDKafkaRespErr::RD_KAFKA_RESP_ERR__REVOKE_PARTITIONS => {
            ConsumerEvent::Revoked(from_native_list(tpl))
        }
        other => ConsumerEvent::Other(format!("rebalance error: {other:?}")),
    }
}

struct RdKafkaConsumer {
    inner: RwLock<Option<BaseConsumer<ConsumerBridge>>>,
    topics: Mutex<Vec<String>>,
}

impl RdKafkaConsumer {
    fn with<T>(
        &self,
        f: impl FnOnce(&BaseConsumer<ConsumerBridge>) -> ClientResult<T>,
    ) -> ClientResult<T> {
        match self.inner.read().as_ref() {
            Some(consumer) => f(consumer),
            None => Err(closed_error()),
        }
    }

    fn translate(&self, result: rdkafka::error::KafkaResult<BorrowedMessage<'_>>) -> ConsumerEvent {
        match result {
            Ok(message) => ConsumerEvent::Message(owned_message(&message)),
            Err(KafkaError::PartitionEOF(partition)) => {
                let topic = self.topics.lock().first().cloned().unwrap_or_default();
                ConsumerEvent::PartitionEof(TopicPartition::new(topic, partition))
            }
            Err(err) => ConsumerEvent::Error(broker_error(&err)),
        }
    }
}

impl ConsumerClient for RdKafkaConsumer {
    fn subscribe(&self, topics: &[String]) -> ClientResult<()> {
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        self.with(|c| c.subscribe(&names).map_err(|err| broker_error(&err)))?;
        *self.topics.lock() = topics.to_vec();
        Ok(())
    }

    fn unsubscribe(&self) -> ClientResult<()> {
        self.with(|c| {
            c.unsubscribe();
            Ok(())
        })
    }

    fn assign(&self, partitions: &[TopicPartition]) -> ClientResult<()> {
        let list = native_list(partitions)?;
        self.with(|c| {
            match c.rebalance_protocol() {
                RebalanceProtocol::Cooperative => c.incremental_assign(&list),
                _ => c.assign(&list),
            }
            .map_err(|err| broker_error(&err))
        })
    }

    fn unassign(&self) -> ClientResult<()> {
        self.with(|c| {
            let revoked = c.context().revoked.lock().take();
            match (c.rebalance_protocol(), revoked) {
                (RebalanceProtocol::Cooperative, Some(list)) => c.incremental_unassign(&list),
                _ => c.unassign(),
            }
            .map_err(|err| broker_error(&err))
        })
    }

    fn poll(&self, timeout: Duration) -> Option<ConsumerEvent> {
        let guard = self.inner.read();
        let consumer = guard.as_ref()?;
        if let Some(event) = consumer.context().pending.lock().pop_front() {
            return Some(event);
        }
        let polled = consumer.poll(timeout).map(|result| self.translate(result));
        let mut pending = consumer.context().pending.lock();
        match polled {
            // Callbacks fired during the poll come first.
            Some(event) if !pending.is_empty() => {
                pending.push_back(event);
                pending.pop_front()
            }
            Some(event) => Some(event),
            None => pending.pop_front(),
        }
    }

    fn commit(&self) -> ClientResult<Vec<TopicPartition>> {
        self.with(|c| {
            c.commit_consumer_state(CommitMode::Sync)
                .map_err(|err| broker_error(&err))?;
            c.position()
                .map(|list| from_native_list(&list))
                .map_err(|err| broker_error(&err))
        })
    }

    fn commit_message(&self, message: &Message) -> ClientResult<Vec<TopicPartition>> {
        let position = message.topic_partition().with_offset(message.offset.next());
        self.commit_offsets(std::slice::from_ref(&position))
    }

    fn commit_offsets(&self, offsets: &[TopicPartition]) -> ClientResult<Vec<TopicPartition>> {
        let list = native_list(offsets)?;
        self.with(|c| c.commit(&list, CommitMode::Sync).map_err(|err| broker_error(&err)))?;
        Ok(offsets.to_vec())
    }

    fn committed(
        &self,
        partitions: &[TopicPartition],
        timeout: Duration,
    ) -> ClientResult<Vec<TopicPartition>> {
        let list = native_list(partitions)?;
        self.with(|c| {
            c.committed_offsets(list, timeout)
                .map(|list| from_native_list(&list))
                .map_err(|err| broker_error(&err))
        })
    }

    fn pause(&self, partitions: &[TopicPartition]) -> ClientResult<()> {
        let list = native_list(partitions)?;
        self.with(|c| c.pause(&list).map_err(|err| broker_error(&err)))
    }

    fn resume(&self, partitions: &[TopicPartition]) -> ClientResult<()> {
        let list = native_list(partitions)?;
        self.with(|c| c.resume(&list).map_err(|err| broker_error(&err)))
    }

    fn store_offsets(&self, offsets: &[TopicPartition]) -> ClientResult<Vec<TopicPartition>> {
        let list = native_list(offsets)?;
        self.with(|c| c.store_offsets(&list).map_err(|err| broker_error(&err)))?;
        Ok(offsets.to_vec())
    }

    fn close(&self) -> ClientResult<()> {
        // Waits for an in-flight poll to return before the consumer is dropped.
        match self.inner.write().take() {
            Some(consumer) => {
                debug!(topics = ?self.topics.lock(), "closing rdkafka consumer");
                drop(consumer);
                Ok(())
            }
            None => Err(closed_error()),
        }
    }
}

/// Producer context that routes delivery reports and global errors.
struct ProducerBridge {
    events: Mutex<Option<UnboundedSender<ProducerEvent>>>,
}

impl ProducerBridge {
    fn emit(&self, event: ProducerEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }
}

impl ClientContext for ProducerBridge {
    fn error(&self, error: KafkaError, reason: &str) {
        let mut err = broker_error(&error);
        if !reason.is_empty() {
            err.message = reason.to_string();
        }
        self.emit(ProducerEvent::Error(err));
    }
}

impl ProducerContext for ProducerBridge {
    type DeliveryOpaque = Box<Option<DeliverySender>>;

    fn delivery(&self, result: &DeliveryResult<'_>, opaque: Self::DeliveryOpaque) {
        let report = match result {
            Ok(message) => DeliveryReport::delivered(owned_message(message)),
            Err((err, message)) => DeliveryReport::failed(owned_message(message), broker_error(err)),
        };
        match *opaque {
            Some(tx) => {
                if tx.send(report).is_err() {
                    warn!("delivery report receiver dropped");
                }
            }
            None => self.emit(ProducerEvent::Delivery(report)),
        }
    }
}

struct RdKafkaProducer {
    inner: RwLock<Option<ThreadedProducer<ProducerBridge>>>,
    events: Mutex<Option<ProducerEventStream>>,
}

impl ProducerClient for RdKafkaProducer {
    fn produce(&self, message: Message, delivery: Option<DeliverySender>) -> ClientResult<()> {
        let guard = self.inner.read();
        let producer = guard.as_ref().ok_or_else(closed_error)?;

        let mut record: BaseRecord<'_, [u8], [u8], Box<Option<DeliverySender>>> =
            BaseRecord::with_opaque_to(&message.topic, Box::new(delivery));
        if let Some(key) = &message.key {
            record = record.key(&key[..]);
        }
        if let Some(payload) = &message.payload {
            record = record.payload(&payload[..]);
        }
        if !message.partition.is_any() {
            record = record.partition(message.partition.value());
        }
        if let Some(timestamp) = message.timestamp {
            record = record.timestamp(timestamp.timestamp_millis());
        }
        if !message.headers.is_empty() {
            let mut headers = OwnedHeaders::new();
            for header in &message.headers {
                headers = headers.insert(rdkafka::message::Header {
                    key: &header.key,
                    value: header.value.as_deref(),
                });
            }
            record = record.headers(headers);
        }

        producer.send(record).map_err(|(err, _)| broker_error(&err))
    }

    fn flush(&self, timeout: Duration) -> ClientResult<()> {
        let guard = self.inner.read();
        let producer = guard.as_ref().ok_or_else(closed_error)?;
        producer.flush(timeout).map_err(|err| broker_error(&err))
    }

    fn take_events(&self) -> Option<ProducerEventStream> {
        self.events.lock().take()
    }

    fn close(&self) {
        if let Some(producer) = self.inner.write().take() {
            producer.context().events.lock().take();
            drop(producer);
        }
    }
}
