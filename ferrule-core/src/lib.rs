//! # Ferrule Core
//!
//! Shared building blocks for the ferrule consumer and producer.
//!
//! Ferrule layers lifecycle and concurrency management over a message broker
//! client. This crate holds everything both sides need:
//!
//! - [`message`], [`types`], [`event`]: owned value types for messages,
//!   topic/partitions and the events a client handle yields
//! - [`code`]: broker error codes and [`BrokerError`]
//! - [`error`]: the crate-wide [`Error`] and [`Result`]
//! - [`config`]: the [`ClientConfig`] settings map
//! - [`classify`]: the fatal/recoverable/stop error policy
//! - [`probe`]: the bootstrap connectivity check
//! - [`client`]: adapter traits the consumer and producer drive handles through
//!
//! ## Features
//!
//! - `rdkafka`: [`client::rdkafka::RdKafkaFactory`], handles backed by librdkafka
//! - `testing`: [`testing::MockCluster`], an in-memory client for tests
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrule_core::{ClientConfig, Message, BOOTSTRAP_SERVERS, GROUP_ID};
//!
//! let config = ClientConfig::new()
//!     .with(BOOTSTRAP_SERVERS, "localhost:9092")
//!     .with(GROUP_ID, "billing");
//! assert_eq!(config.bootstrap_servers(), vec!["localhost:9092".to_string()]);
//!
//! let message = Message::builder("invoices").key("customer-7").payload("{}").build();
//! assert_eq!(message.payload_len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod client;
pub mod code;
pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod prelude;
pub mod probe;
pub mod types;

#[cfg(feature = "testing")]
pub mod testing;

pub use crate::{
    classify::{
        classify, dispatch_error, error_handler, fatal_handler, is_retryable, terminate_process,
        Disposition, ErrorHandler, ErrorTier, FatalError, FatalHandler,
    },
    client::{ClientFactory, ConsumerClient, DeliverySender, ProducerClient, ProducerEventStream},
    code::{BrokerError, ErrorCode},
    config::{ClientConfig, BOOTSTRAP_SERVERS, GROUP_ID},
    error::{Error, Result},
    event::{ConsumerEvent, ProducerEvent},
    message::{DeliveryReport, Header, Message, MessageBuilder},
    probe::probe,
    types::{Offset, PartitionId, TopicPartition},
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
