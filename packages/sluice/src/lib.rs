//! Synchronous channels with multi-channel select, for scoped structured
//! concurrency.
//!
//! Tasks rendezvous on typed, bounded [`Channel`]s: a sender blocks while the
//! buffer is full, a receiver blocks until an element (or the channel's
//! terminal state) arrives, and [`select`] waits on several channels at once
//! while consuming exactly one element. Channels close stickily through
//! [`done`](Channel::done) and [`error`](Channel::error), and the operators
//! ([`map`](Channel::map), [`merge`](Channel::merge), [`zip`](Channel::zip),
//! [`tick`], ...) compose channels by forking pipeline workers in a
//! [`Scope`], which interrupts and joins everything it spawned before it
//! ends.
//!
//! ```
//! use sluice::{from_iter, scoped};
//!
//! let sum = scoped(|scope| {
//!     let numbers = from_iter(scope, 1..=10);
//!     let doubled = numbers.map(scope, |n| anyhow::Ok(n * 2));
//!     doubled.to_list().unwrap().into_iter().sum::<i32>()
//! });
//! assert_eq!(sum, 110);
//! ```

// the basic architecture is as such:
//
// channel handles wrap around Arc<shared state>
//                      |
//       /--------------/
//       v
//    shared state
//       |
//       |------ a buffer: the bounded FIFO of elements, with parked putters
//       |
//       \------ a waiter deque: cells of parked receivers
//
// the two sides are coupled only loosely; the send path re-pairs them after
// buffering, and the select path re-checks after registering a cell. the one
// synchronization point that arbitrates every race is the ownership flag on
// a cell (cell.rs); scopes and task interruption (scope.rs, task.rs) supply
// the surrounding structured-concurrency machinery, and ops.rs builds the
// pipeline stages on top.

#[allow(unused_imports)]
#[macro_use]
extern crate tracing;

mod buffer;
mod cell;
mod channel;
mod error;
mod ops;
mod scope;
mod select;
mod task;

pub use crate::{
    channel::{Channel, Sink, Source},
    error::{
        Closed, Interrupted, RecvError, RecvTimeoutError, SendError, SendErrorCause,
        TrySendError, TrySendErrorCause,
    },
    ops::{from_fn, from_iter, tick, timeout, SourceIter},
    scope::{scoped, Fork, Scope},
    select::{select, select_now, select_timeout},
    task::{current, sleep, Task},
};
