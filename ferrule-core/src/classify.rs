//! Error classification shared by consumer polling loops and the producer's
//! delivery report loop.
//!
//! | Code | Tier |
//! |---|---|
//! | unknown topic, unknown topic or partition | [`ErrorTier::HandlerOrFatal`] |
//! | transport | [`ErrorTier::Recoverable`] |
//! | all brokers down, fail, resolve, critical resource, filesystem, bad message | [`ErrorTier::Fatal`] |
//! | anything else | [`ErrorTier::HandlerOrStop`] |
//!
//! The fatal tier never terminates the process from inside the library. It
//! produces [`Disposition::Fatal`] and the caller hands a [`FatalError`] to
//! the configured [`FatalHandler`]. [`terminate_process`] is the default.

use crate::code::{BrokerError, ErrorCode};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, warn};

/// Application error callback. Returns `true` when it handled the error.
pub type ErrorHandler = Arc<dyn Fn(&BrokerError) -> bool + Send + Sync>;

/// Receives errors classified as unrecoverable by this layer.
pub type FatalHandler = Arc<dyn Fn(&FatalError) + Send + Sync>;

/// Policy tier of an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorTier {
    /// Ask the handler; unhandled is fatal
    HandlerOrFatal,
    /// Ask the handler; unhandled is logged and polling continues
    Recoverable,
    /// Unrecoverable; the handler is not consulted
    Fatal,
    /// Ask the handler; unhandled ends the loop that saw it
    HandlerOrStop,
}

/// What the loop that saw an error should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Keep polling
    Continue,
    /// End this loop, leaving the process alone
    StopLoop,
    /// Hand the error to the fatal handler and end this loop
    Fatal,
}

impl ErrorTier {
    /// True if the application handler is consulted for this tier.
    #[must_use]
    pub const fn consults_handler(self) -> bool {
        !matches!(self, Self::Fatal)
    }

    /// Disposition given whether the application handler claimed the error.
    #[must_use]
    pub const fn resolve(self, handled: bool) -> Disposition {
        match (self, handled) {
            (Self::Fatal, _) | (Self::HandlerOrFatal, false) => Disposition::Fatal,
            (Self::HandlerOrStop, false) => Disposition::StopLoop,
            (Self::HandlerOrFatal | Self::Recoverable | Self::HandlerOrStop, true)
            | (Self::Recoverable, false) => Disposition::Continue,
        }
    }
}

/// Map an error code to its policy tier.
#[must_use]
pub const fn classify(code: ErrorCode) -> ErrorTier {
    match code.normalized() {
        ErrorCode::UnknownTopic | ErrorCode::UnknownTopicOrPartition => ErrorTier::HandlerOrFatal,
        ErrorCode::Transport => ErrorTier::Recoverable,
        ErrorCode::AllBrokersDown
        | ErrorCode::Fail
        | ErrorCode::Resolve
        | ErrorCode::CriticalSystemResource
        | ErrorCode::FileSystem
        | ErrorCode::BadMessage => ErrorTier::Fatal,
        _ => ErrorTier::HandlerOrStop,
    }
}

/// True for delivery failures that a retry could fix.
#[must_use]
pub const fn is_retryable(error: &BrokerError) -> bool {
    matches!(
        error.code.normalized(),
        ErrorCode::NotEnoughReplicas | ErrorCode::NotEnoughReplicasAfterAppend
    )
}

/// Classify `error`, consult `handler` where the tier allows, and log the
/// outcome. Fatal dispositions are returned, not acted on.
pub fn dispatch_error(error: &BrokerError, handler: Option<&ErrorHandler>) -> Disposition {
    let tier = classify(error.code);
    let handled = tier.consults_handler() && handler.is_some_and(|h| h(error));
    let disposition = tier.resolve(handled);

    match disposition {
        Disposition::Continue if !handled => {
            warn!(code = %error.code, error = %error.message, "unhandled client error");
        }
        Disposition::StopLoop => {
            warn!(code = %error.code, error = %error.message, "unhandled client error, stopping loop");
        }
        Disposition::Fatal => {
            error!(code = %error.code, error = %error.message, ?tier, "unrecoverable client error");
        }
        Disposition::Continue => {}
    }
    disposition
}

/// An error this layer will not recover from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// A classified broker error
    #[error("fatal client error on {context}: {error}")]
    Broker {
        /// Topic of the polling loop, or `producer`
        context: String,
        /// The error
        error: BrokerError,
    },

    /// A forwarded message was forwarded again
    #[error("invalid forward on {topic}; it might be a recursive forward to the unhandled message handler")]
    RecursiveForward {
        /// Topic of the polling loop
        topic: String,
    },
}

/// The default fatal handler: log and exit the process with status 1.
#[must_use]
pub fn terminate_process() -> FatalHandler {
    Arc::new(|fatal: &FatalError| {
        error!(error = %fatal, "terminating process");
        std::process::exit(1);
    })
}

/// Wrap a closure as an [`ErrorHandler`].
pub fn error_handler<F>(f: F) -> ErrorHandler
where
    F: Fn(&BrokerError) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`FatalHandler`].
pub fn fatal_handler<F>(f: F) -> FatalHandler
where
    F: Fn(&FatalError) + Send + Sync + 'static,
{
    Arc::new(f)
}

impl fmt::Display for ErrorTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HandlerOrFatal => "handler-or-fatal",
            Self::Recoverable => "recoverable",
            Self::Fatal => "fatal",
            Self::HandlerOrStop => "handler-or-stop",
        };
        f.write_str(name)
    }
}
