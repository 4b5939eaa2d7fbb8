//! Client adapter traits.
//!
//! The consumer and producer never talk to a broker client library directly.
//! They drive handles through the traits in this module, which keeps the
//! lifecycle and dispatch logic independent of the wire client and lets the
//! test suites run against an in-memory cluster.
//!
//! Consumer handle methods block. The consumer calls them from tokio's
//! blocking pool, never from an async task.

#[cfg(feature = "rdkafka")]
pub mod rdkafka;

use crate::code::BrokerError;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::event::{ConsumerEvent, ProducerEvent};
use crate::message::{DeliveryReport, Message};
use crate::types::TopicPartition;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Per-message delivery report destination passed to [`ProducerClient::produce`].
pub type DeliverySender = UnboundedSender<DeliveryReport>;

/// Producer event stream. It ends when the handle is closed.
pub type ProducerEventStream = UnboundedReceiver<ProducerEvent>;

/// Result of a synchronous handle call.
pub type ClientResult<T> = std::result::Result<T, BrokerError>;

/// A consumer handle subscribed to one topic.
///
/// Implementations must be safe to share between the polling loop and any
/// number of consume workers, which call commit, pause and resume
/// concurrently with `poll`.
pub trait ConsumerClient: Send + Sync + 'static {
    /// Subscribe the handle to `topics`.
    fn subscribe(&self, topics: &[String]) -> ClientResult<()>;

    /// Drop the current subscription.
    fn unsubscribe(&self) -> ClientResult<()>;

    /// Apply a partition assignment received from the group.
    fn assign(&self, partitions: &[TopicPartition]) -> ClientResult<()>;

    /// Drop the current assignment.
    fn unassign(&self) -> ClientResult<()>;

    /// Wait up to `timeout` for the next event.
    ///
    /// Returns `None` when nothing arrived in time. A zero timeout returns
    /// immediately.
    fn poll(&self, timeout: Duration) -> Option<ConsumerEvent>;

    /// Commit the current positions of every assigned partition.
    fn commit(&self) -> ClientResult<Vec<TopicPartition>>;

    /// Commit the position following `message`.
    fn commit_message(&self, message: &Message) -> ClientResult<Vec<TopicPartition>>;

    /// Commit explicit offsets.
    fn commit_offsets(&self, offsets: &[TopicPartition]) -> ClientResult<Vec<TopicPartition>>;

    /// Fetch committed offsets for `partitions`, waiting up to `timeout`.
    fn committed(
        &self,
        partitions: &[TopicPartition],
        timeout: Duration,
    ) -> ClientResult<Vec<TopicPartition>>;

    /// Stop fetching from `partitions`.
    fn pause(&self, partitions: &[TopicPartition]) -> ClientResult<()>;

    /// Resume fetching from `partitions`.
    fn resume(&self, partitions: &[TopicPartition]) -> ClientResult<()>;

    /// Store offsets for a later automatic or manual commit.
    fn store_offsets(&self, offsets: &[TopicPartition]) -> ClientResult<Vec<TopicPartition>>;

    /// Leave the group and release the handle. Later calls may fail.
    fn close(&self) -> ClientResult<()>;
}

/// A producer handle.
pub trait ProducerClient: Send + Sync + 'static {
    /// Enqueue `message`.
    ///
    /// # Parameters
    ///
    /// * `message` - message to enqueue; [`crate::PartitionId::ANY`] lets the
    ///   client pick the partition
    /// * `delivery` - where to send this message's delivery report; when
    ///   `None` the report goes to the handle's event stream
    ///
    /// # Errors
    ///
    /// Returns the client's error when the message cannot be enqueued, e.g.
    /// the local queue is full.
    fn produce(&self, message: Message, delivery: Option<DeliverySender>) -> ClientResult<()>;

    /// Wait up to `timeout` for outstanding messages to be delivered.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::ErrorCode::TimedOut`] error if messages are still
    /// queued when `timeout` elapses.
    fn flush(&self, timeout: Duration) -> ClientResult<()>;

    /// Take the handle's event stream. Only the first call returns it.
    fn take_events(&self) -> Option<ProducerEventStream>;

    /// Release the handle. Ends the event stream.
    fn close(&self);
}

/// Creates client handles from a configuration map.
pub trait ClientFactory: Send + Sync + 'static {
    /// Create a consumer handle.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] when the configuration is rejected,
    /// for example when `group.id` is missing.
    fn create_consumer(&self, config: &ClientConfig) -> Result<Arc<dyn ConsumerClient>>;

    /// Create a producer handle.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Configuration`] when the configuration is rejected.
    fn create_producer(&self, config: &ClientConfig) -> Result<Arc<dyn ProducerClient>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_object_safe(_: Option<&dyn ConsumerClient>, _: Option<&dyn ProducerClient>) {}

    #[test]
    fn test_traits_are_object_safe() {
        assert_object_safe(None, None);
        let _factory: Option<Arc<dyn ClientFactory>> = None;
    }
}
