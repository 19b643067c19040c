// channel and task error types.

use std::{fmt, sync::Arc};


// ==== base error types ====


/// Error for a task that was interrupted while blocked
///
/// Raised by blocking operations when the enclosing scope tears down, or when
/// [`Task::interrupt`](crate::Task::interrupt) is called directly. Returning
/// this consumes the task's interrupt flag.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, thiserror::Error)]
#[error("interrupted")]
pub struct Interrupted;

/// Sticky terminal state of a channel
///
/// Once a channel is `Done` or `Error`, every later receive observes the same
/// state and every send fails. The state is checked before buffered elements,
/// so a closed channel reports its terminal state even while elements remain
/// buffered.
#[derive(Debug, Clone)]
pub enum Closed {
    /// The producer side closed normally; no more elements will arrive
    Done,
    /// The producer side closed with a failure
    Error(Arc<anyhow::Error>),
}

impl Closed {
    /// Whether this is the `Done` state
    pub fn is_done(&self) -> bool {
        matches!(self, Closed::Done)
    }

    /// Whether this is the `Error` state
    pub fn is_error(&self) -> bool {
        matches!(self, Closed::Error(_))
    }
}

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Closed::Done => write!(f, "channel done"),
            Closed::Error(cause) => write!(f, "channel failed: {}", cause),
        }
    }
}

impl std::error::Error for Closed {}


// ==== compound error types ====


/// Error for a blocking receive
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecvError {
    /// The receiving task was interrupted while blocked
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
    /// The channel is in a terminal state
    #[error(transparent)]
    Closed(#[from] Closed),
}

/// Error for a receive with a deadline
#[derive(Debug, Clone, thiserror::Error)]
pub enum RecvTimeoutError {
    /// No element arrived before the deadline
    #[error("receive timed out")]
    TimedOut,
    /// The receiving task was interrupted while blocked
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
    /// The channel is in a terminal state
    #[error(transparent)]
    Closed(#[from] Closed),
}

/// Error for a blocking send; gives the unsent element back
pub struct SendError<T> {
    /// The element that could not be sent
    pub value: T,
    /// The reason the element could not be sent
    pub cause: SendErrorCause,
}

/// See [`SendError`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum SendErrorCause {
    /// The sending task was interrupted while blocked
    #[error(transparent)]
    Interrupted(#[from] Interrupted),
    /// The channel is in a terminal state
    #[error(transparent)]
    Closed(#[from] Closed),
}

impl<T> SendError<T> {
    /// Recover the element that was not sent
    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendError").field("cause", &self.cause).finish_non_exhaustive()
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send failed: {}", self.cause)
    }
}

impl<T> std::error::Error for SendError<T> {}

/// Error for a non-blocking send; gives the unsent element back
pub struct TrySendError<T> {
    /// The element that could not be sent
    pub value: T,
    /// The reason the element could not be sent
    pub cause: TrySendErrorCause,
}

/// See [`TrySendError`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum TrySendErrorCause {
    /// No waiting receiver and no free buffer slot
    #[error("channel full")]
    Full,
    /// The channel is in a terminal state
    #[error(transparent)]
    Closed(#[from] Closed),
}

impl<T> TrySendError<T> {
    /// Recover the element that was not sent
    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrySendError").field("cause", &self.cause).finish_non_exhaustive()
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send failed: {}", self.cause)
    }
}

impl<T> std::error::Error for TrySendError<T> {}
