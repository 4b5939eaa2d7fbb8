//! Message types exchanged with client handles.

use crate::code::BrokerError;
use crate::types::{Offset, PartitionId, TopicPartition};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single message header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name
    pub key: String,
    /// Header value, absent for null headers
    pub value: Option<Bytes>,
}

/// A message consumed from, or produced to, a topic partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Topic name
    pub topic: String,

    /// Partition; [`PartitionId::ANY`] on produce lets the client choose
    pub partition: PartitionId,

    /// Offset within the partition, set on consumed messages
    pub offset: Offset,

    /// Optional message key
    pub key: Option<Bytes>,

    /// Optional message payload
    pub payload: Option<Bytes>,

    /// Creation or log-append time, when known
    pub timestamp: Option<DateTime<Utc>>,

    /// Message headers
    pub headers: Vec<Header>,
}

impl Message {
    /// Create a message for any partition of `topic` with the given payload.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self::builder(topic).payload(payload).build()
    }

    /// Start building a message for `topic`.
    pub fn builder(topic: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(topic)
    }

    /// The topic/partition this message belongs to, carrying its offset.
    #[must_use]
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition).with_offset(self.offset)
    }

    /// Payload size in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Get the first header value with the given name.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&Bytes> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .and_then(|h| h.value.as_ref())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]@{} ({} bytes)",
            self.topic,
            self.partition,
            self.offset,
            self.payload_len()
        )
    }
}

/// Builder for constructing messages.
#[derive(Debug)]
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    /// Start a message for any partition of `topic`.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            message: Message {
                topic: topic.into(),
                partition: PartitionId::ANY,
                offset: Offset::Invalid,
                key: None,
                payload: None,
                timestamp: None,
                headers: Vec::new(),
            },
        }
    }

    /// Set the partition.
    #[must_use]
    pub fn partition(mut self, partition: impl Into<PartitionId>) -> Self {
        self.message.partition = partition.into();
        self
    }

    /// Set the offset.
    #[must_use]
    pub fn offset(mut self, offset: impl Into<Offset>) -> Self {
        self.message.offset = offset.into();
        self
    }

    /// Set the key.
    #[must_use]
    pub fn key(mut self, key: impl Into<Bytes>) -> Self {
        self.message.key = Some(key.into());
        self
    }

    /// Set the payload.
    #[must_use]
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.message.payload = Some(payload.into());
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.message.timestamp = Some(timestamp);
        self
    }

    /// Append a header.
    #[must_use]
    pub fn header(mut self, key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        self.message.headers.push(Header {
            key: key.into(),
            value: Some(value.into()),
        });
        self
    }

    /// Finish the message.
    #[must_use]
    pub fn build(self) -> Message {
        self.message
    }
}

/// Outcome of a previously produced message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// The message as acknowledged (or rejected) by the client
    pub message: Message,
    /// Delivery failure, `None` on success
    pub error: Option<BrokerError>,
}

impl DeliveryReport {
    /// A successful delivery.
    #[must_use]
    pub const fn delivered(message: Message) -> Self {
        Self { message, error: None }
    }

    /// A failed delivery.
    #[must_use]
    pub const fn failed(message: Message, error: BrokerError) -> Self {
        Self {
            message,
            error: Some(error),
        }
    }

    /// True when the message was delivered.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        self.error.is_none()
    }
}
