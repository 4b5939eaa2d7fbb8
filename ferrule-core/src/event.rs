//! Events drained from client handles.

use crate::code::BrokerError;
use crate::message::{DeliveryReport, Message};
use crate::types::TopicPartition;

/// An event yielded by a consumer handle's poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerEvent {
    /// The group assigned these partitions to the handle
    Assigned(Vec<TopicPartition>),
    /// The group revoked these partitions from the handle
    Revoked(Vec<TopicPartition>),
    /// The handle reached the end of a partition
    PartitionEof(TopicPartition),
    /// An application message
    Message(Message),
    /// A broker or client error
    Error(BrokerError),
    /// Any other notice; carries a description for logging
    Other(String),
}

impl ConsumerEvent {
    /// Short name of the event kind, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Assigned(_) => "assigned",
            Self::Revoked(_) => "revoked",
            Self::PartitionEof(_) => "partition_eof",
            Self::Message(_) => "message",
            Self::Error(_) => "error",
            Self::Other(_) => "other",
        }
    }
}

/// An event yielded by a producer handle's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProducerEvent {
    /// Delivery report for a message produced without its own delivery channel
    Delivery(DeliveryReport),
    /// A broker or client error
    Error(BrokerError),
    /// Any other notice; carries a description for logging
    Other(String),
}
