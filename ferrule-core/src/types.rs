//! Topic, partition and offset types shared by consumers and producers.

use crate::code::BrokerError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition identifier within a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub i32);

impl PartitionId {
    /// Let the client's partitioner pick the partition.
    pub const ANY: Self = Self(-1);

    /// Create a new partition ID.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Get the raw partition ID value.
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }

    /// True for [`PartitionId::ANY`].
    #[must_use]
    pub const fn is_any(self) -> bool {
        self.0 < 0
    }
}

impl Default for PartitionId {
    fn default() -> Self {
        Self::ANY
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            write!(f, "any")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<i32> for PartitionId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Position within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Offset {
    /// Earliest available offset
    Beginning,
    /// Next offset to be written
    End,
    /// Offset committed for the consumer group
    Stored,
    /// No offset known
    #[default]
    Invalid,
    /// Concrete offset
    Offset(i64),
}

impl Offset {
    /// The concrete value, if any.
    #[must_use]
    pub const fn value(self) -> Option<i64> {
        match self {
            Self::Offset(value) => Some(value),
            _ => None,
        }
    }

    /// The offset following a concrete offset; symbolic offsets are unchanged.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Offset(value) => Self::Offset(value.saturating_add(1)),
            other => other,
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Beginning => write!(f, "beginning"),
            Self::End => write!(f, "end"),
            Self::Stored => write!(f, "stored"),
            Self::Invalid => write!(f, "unset"),
            Self::Offset(value) => write!(f, "{value}"),
        }
    }
}

impl From<i64> for Offset {
    fn from(offset: i64) -> Self {
        Self::Offset(offset)
    }
}

/// A topic/partition pair with an optional position and per-partition error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicPartition {
    /// Topic name
    pub topic: String,
    /// Partition within the topic
    pub partition: PartitionId,
    /// Position, when relevant to the operation
    pub offset: Offset,
    /// Error reported for this partition by the last operation
    pub error: Option<BrokerError>,
}

impl TopicPartition {
    /// Create a topic/partition pair with no offset.
    pub fn new(topic: impl Into<String>, partition: impl Into<PartitionId>) -> Self {
        Self {
            topic: topic.into(),
            partition: partition.into(),
            offset: Offset::Invalid,
            error: None,
        }
    }

    /// Any partition of the given topic.
    pub fn any(topic: impl Into<String>) -> Self {
        Self::new(topic, PartitionId::ANY)
    }

    /// Set the offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: Offset) -> Self {
        self.offset = offset;
        self
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)?;
        if let Some(err) = &self.error {
            write!(f, "({err})")?;
        }
        Ok(())
    }
}
