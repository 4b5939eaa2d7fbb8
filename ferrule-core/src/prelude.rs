//! # Prelude
//!
//! Commonly used types from ferrule core.

pub use crate::{
    classify::{Disposition, ErrorHandler, FatalError, FatalHandler},
    client::{ClientFactory, ConsumerClient, ProducerClient},
    code::{BrokerError, ErrorCode},
    config::{ClientConfig, BOOTSTRAP_SERVERS, GROUP_ID},
    error::{Error, Result},
    event::{ConsumerEvent, ProducerEvent},
    message::{DeliveryReport, Message, MessageBuilder},
    types::{Offset, PartitionId, TopicPartition},
};

pub use bytes::Bytes;
pub use chrono::{DateTime, Utc};
