//! Broker error codes and the error value reported by client handles.
//!
//! Codes carry librdkafka's numeric values so adapters can translate in both
//! directions. Local (client-side) codes are negative, broker codes positive.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error code reported by the broker or by the client library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Received a malformed message from a broker
    BadMessage,
    /// Generic low-level failure
    Fail,
    /// Connection failure to a single broker
    Transport,
    /// Failed to create a thread or similar system resource
    CriticalSystemResource,
    /// Failed to resolve a broker address
    Resolve,
    /// Produced message timed out before delivery
    MessageTimedOut,
    /// Reached the end of a partition
    PartitionEof,
    /// File or filesystem error in the offset management code
    FileSystem,
    /// Topic is not known locally
    UnknownTopic,
    /// All broker connections are down
    AllBrokersDown,
    /// Invalid argument or configuration
    InvalidArgument,
    /// Operation timed out
    TimedOut,
    /// Local producer queue is full
    QueueFull,
    /// Topic or partition does not exist on the broker
    UnknownTopicOrPartition,
    /// Not enough in-sync replicas to accept the write
    NotEnoughReplicas,
    /// Write was appended but not enough replicas acknowledged it
    NotEnoughReplicasAfterAppend,
    /// Any other numeric code
    Other(i32),
}

impl ErrorCode {
    /// The librdkafka numeric value of this code.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        match self {
            Self::BadMessage => -199,
            Self::Fail => -196,
            Self::Transport => -195,
            Self::CriticalSystemResource => -194,
            Self::Resolve => -193,
            Self::MessageTimedOut => -192,
            Self::PartitionEof => -191,
            Self::FileSystem => -189,
            Self::UnknownTopic => -188,
            Self::AllBrokersDown => -187,
            Self::InvalidArgument => -186,
            Self::TimedOut => -185,
            Self::QueueFull => -184,
            Self::UnknownTopicOrPartition => 3,
            Self::NotEnoughReplicas => 19,
            Self::NotEnoughReplicasAfterAppend => 20,
            Self::Other(code) => code,
        }
    }

    /// Short symbolic name, matching librdkafka's naming.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::BadMessage => "_BAD_MSG",
            Self::Fail => "_FAIL",
            Self::Transport => "_TRANSPORT",
            Self::CriticalSystemResource => "_CRIT_SYS_RESOURCE",
            Self::Resolve => "_RESOLVE",
            Self::MessageTimedOut => "_MSG_TIMED_OUT",
            Self::PartitionEof => "_PARTITION_EOF",
            Self::FileSystem => "_FS",
            Self::UnknownTopic => "_UNKNOWN_TOPIC",
            Self::AllBrokersDown => "_ALL_BROKERS_DOWN",
            Self::InvalidArgument => "_INVALID_ARG",
            Self::TimedOut => "_TIMED_OUT",
            Self::QueueFull => "_QUEUE_FULL",
            Self::UnknownTopicOrPartition => "UNKNOWN_TOPIC_OR_PART",
            Self::NotEnoughReplicas => "NOT_ENOUGH_REPLICAS",
            Self::NotEnoughReplicasAfterAppend => "NOT_ENOUGH_REPLICAS_AFTER_APPEND",
            Self::Other(_) => "UNKNOWN",
        }
    }
}

impl ErrorCode {
    /// The code with the given librdkafka numeric value.
    #[must_use]
    pub const fn from_i32(code: i32) -> Self {
        match code {
            -199 => Self::BadMessage,
            -196 => Self::Fail,
            -195 => Self::Transport,
            -194 => Self::CriticalSystemResource,
            -193 => Self::Resolve,
            -192 => Self::MessageTimedOut,
            -191 => Self::PartitionEof,
            -189 => Self::FileSystem,
            -188 => Self::UnknownTopic,
            -187 => Self::AllBrokersDown,
            -186 => Self::InvalidArgument,
            -185 => Self::TimedOut,
            -184 => Self::QueueFull,
            3 => Self::UnknownTopicOrPartition,
            19 => Self::NotEnoughReplicas,
            20 => Self::NotEnoughReplicasAfterAppend,
            other => Self::Other(other),
        }
    }

    /// The named variant for an `Other` value that has one; named codes are
    /// returned unchanged.
    #[must_use]
    pub const fn normalized(self) -> Self {
        Self::from_i32(self.as_i32())
    }
}

impl From<i32> for ErrorCode {
    fn from(code: i32) -> Self {
        Self::from_i32(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}

/// Error reported by a client handle, either from its event stream or as
/// the failure of a synchronous call.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct BrokerError {
    /// Coded category
    pub code: ErrorCode,
    /// Human readable description
    pub message: String,
    /// Whether the client library considers the operation retriable
    pub retriable: bool,
    /// Whether the client library flagged the instance as unusable
    pub fatal: bool,
}

impl BrokerError {
    /// Create an error with the given code and description.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retriable: false,
            fatal: false,
        }
    }

    /// Mark the error as retriable.
    #[must_use]
    pub const fn with_retriable(mut self, retriable: bool) -> Self {
        self.retriable = retriable;
        self
    }

    /// Mark the error as fatal for the client instance.
    #[must_use]
    pub const fn with_fatal(mut self, fatal: bool) -> Self {
        self.fatal = fatal;
        self
    }
}
