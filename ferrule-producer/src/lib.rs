//! # Ferrule Producer
//!
//! A producer that pairs every write with a bounded flush and drains the
//! handle's delivery reports in the background.
//!
//! This crate provides:
//! - [`Producer`]: `write`/`write_message` with optional per-call flush
//!   timeouts, idempotent `close`
//! - [`DeliveryLoop`]: classifies failed deliveries and client errors with
//!   the shared three-tier policy, handing retryable failures to a
//!   [`RetryHook`]
//! - [`Forwarder`] and [`ForwarderRunner`]: a producer dedicated to passing
//!   messages on, with a start/stop wrapper
//!
//! ## Examples
//!
//! ```rust,no_run
//! use ferrule_core::{ClientConfig, ClientFactory, BOOTSTRAP_SERVERS};
//! use ferrule_producer::{Producer, ProducerOptions};
//! use std::sync::Arc;
//!
//! # async fn example(factory: Arc<dyn ClientFactory>) -> ferrule_producer::Result<()> {
//! let options = ProducerOptions::new(
//!     ClientConfig::new().with(BOOTSTRAP_SERVERS, "localhost:9092"),
//! );
//! let producer = Producer::new(options, factory).await?;
//! producer.write("invoices", Some(&b"customer-7"[..]), b"{\"total\":12}").await?;
//! producer.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod delivery;
pub mod forwarder;
pub mod options;
pub mod producer;

pub use delivery::{DeliveryExit, DeliveryLoop, LogRetryHook, RetryHook};
pub use ferrule_core::{Error, Result};
pub use forwarder::{Forwarder, ForwarderRunner};
pub use options::{ForwarderOptions, ProducerOptions};
pub use producer::Producer;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{Forwarder, ForwarderOptions, Producer, ProducerOptions, RetryHook};
    pub use ferrule_core::prelude::*;
}
