//! # Ferrule Consumer
//!
//! Turns independently polled per-topic client handles into one consumer
//! with defined startup, running, pausing and shutdown behaviour.
//!
//! This crate provides:
//! - [`Consumer`]: subscribe once, one polling loop per topic, drain on close
//! - [`ConsumeWorker`]: commit, pause/resume and offset calls for handlers,
//!   unhandled-message forwarding, and [`ConsumeWorker::wait`] for timed
//!   backpressure
//! - [`ConsumerOptions`]: client settings, timeouts and callbacks
//!
//! ## Examples
//!
//! ```rust,no_run
//! use ferrule_consumer::{Consumer, ConsumerOptions};
//! use ferrule_core::{ClientConfig, ClientFactory, BOOTSTRAP_SERVERS, GROUP_ID};
//! use std::sync::Arc;
//!
//! # async fn example(factory: Arc<dyn ClientFactory>) -> ferrule_consumer::Result<()> {
//! let options = ConsumerOptions::new(
//!     ClientConfig::new()
//!         .with(BOOTSTRAP_SERVERS, "localhost:9092")
//!         .with(GROUP_ID, "billing"),
//! )
//! .with_message_handler(|worker, message| {
//!     println!("{message}");
//!     let _ = worker.commit_message(&message);
//! });
//!
//! let consumer = Consumer::new(options, factory);
//! consumer.subscribe(&["invoices", "refunds"], None).await?;
//! // ...
//! consumer.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod consumer;
pub mod options;
mod polling;
pub mod worker;

pub use consumer::{Consumer, ConsumerState};
pub use ferrule_core::{Error, Result};
pub use options::{ConsumerOptions, MessageHandler, RebalanceCallback, RebalanceEvent};
pub use worker::{ConsumeContext, ConsumeWorker, WaitHandle};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        ConsumeContext, ConsumeWorker, Consumer, ConsumerOptions, ConsumerState, RebalanceEvent,
        WaitHandle,
    };
    pub use ferrule_core::prelude::*;
}
