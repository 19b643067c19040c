// multi-source receive.
//
// the fast path scans the sources that are still open for a buffered
// element; a terminal state only resolves the call once no source has an
// element ready. the slow path registers one shared cell on every source,
// so that however many senders race across however many channels, at most
// one of them can win the cell's ownership flag and deliver. after
// registering, the caller re-checks the sources: an element or a terminal
// state that arrived in the gap means the cell may never be completed, so
// the caller tries to own its own cell to withdraw it. losing that race
// means a completion is already on its way and must be honored.
//
// a completer that claimed the cell but lost its element redirects the
// waiter to a replacement cell, pushed back only on the channel that ran
// the repair; the waiter re-registers that replacement on every other
// source and repeats the re-check before parking on it, so a multi-source
// wait stays reachable from all of its sources.
//
// the same ownership dance resolves interruption and expired deadlines: the
// waiter that wants to give up first has to win the cell; if a completer got
// there first, the delivery is accepted and the interrupt flag is re-set for
// the caller to observe afterwards. no delivered element is ever dropped.

use crate::{
    cell::{Cell, Payload, TakeError},
    channel::Channel,
    error::{Closed, Interrupted, RecvError, RecvTimeoutError},
    task::{self, Timeout},
};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// Receive one element from whichever source has one, without blocking
///
/// Scans `sources` in order and returns the first buffered element of a
/// source that is not closed, or `Ok(None)` when every source is empty.
/// A source in a terminal state resolves the scan with that state only
/// when no element is ready anywhere. Fairness between sources is not
/// promised; callers that need it can rotate the slice.
///
/// # Panics
///
/// Panics if `sources` is empty.
pub fn select_now<T>(sources: &[&Channel<T>]) -> Result<Option<T>, Closed> {
    assert!(!sources.is_empty(), "select over no sources");
    for source in sources {
        if source.closed().is_some() {
            // sticky: this source's own buffered elements are out of reach.
            continue;
        }
        if let Some(element) = source.poll_element() {
            return Ok(Some(element));
        }
    }
    for source in sources {
        if let Some(closed) = source.closed() {
            return Err(closed.clone());
        }
    }
    Ok(None)
}

/// Receive one element from whichever source delivers first
///
/// Blocks until one of the sources has an element for this caller; exactly
/// one element is consumed across all of them. A source in a terminal state
/// resolves the wait with that state once no source has an element ready.
/// Fairness between sources is not promised.
///
/// # Panics
///
/// Panics if `sources` is empty.
pub fn select<T>(sources: &[&Channel<T>]) -> Result<T, RecvError> {
    match select_inner(sources, Timeout::Never) {
        Ok(element) => Ok(element),
        Err(RecvTimeoutError::Interrupted(e)) => Err(e.into()),
        Err(RecvTimeoutError::Closed(closed)) => Err(closed.into()),
        Err(RecvTimeoutError::TimedOut) => unreachable!("timed out without a deadline"),
    }
}

/// [`select`] with a deadline
///
/// # Panics
///
/// Panics if `sources` is empty.
pub fn select_timeout<T>(
    sources: &[&Channel<T>],
    timeout: Duration,
) -> Result<T, RecvTimeoutError> {
    select_inner(sources, Timeout::At(Instant::now() + timeout))
}

fn select_inner<T>(
    sources: &[&Channel<T>],
    timeout: Timeout,
) -> Result<T, RecvTimeoutError> {
    'register: loop {
        match select_now(sources) {
            Ok(Some(element)) => return Ok(element),
            Ok(None) => {}
            Err(closed) => return Err(closed.into()),
        }
        if let Timeout::At(deadline) = timeout {
            if Instant::now() >= deadline {
                return Err(RecvTimeoutError::TimedOut);
            }
        }
        let mut cell = Cell::new();
        for source in sources {
            source.offer_cell(Arc::clone(&cell));
        }
        // wait on the cell, following replacement cells as owners produce
        // them. every pass runs the re-check first, both for the fresh
        // registration above and for each re-registered replacement.
        loop {
            // the registration may have raced with arriving elements or a
            // close; if so nobody may ever complete this cell, so withdraw
            // it and start over.
            if sources.iter().any(|source| source.has_element() || source.closed().is_some()) {
                if cell.try_own() {
                    cleanup(sources, &cell, true);
                    continue 'register;
                }
                // lost the withdrawal race: a completion is on its way.
            }
            let payload = match cell.take(timeout) {
                Ok(payload) => payload,
                Err(reason) => {
                    if cell.try_own() {
                        // nobody had completed the cell: withdraw cleanly,
                        // with no element consumed.
                        cleanup(sources, &cell, false);
                        return Err(match reason {
                            TakeError::Interrupted => Interrupted.into(),
                            TakeError::TimedOut => RecvTimeoutError::TimedOut,
                        });
                    }
                    // an owner beat us to the cell and is delivering: accept
                    // the payload rather than dropping it, and leave the
                    // interrupt visible for the caller.
                    let payload = cell.take_granted();
                    if let TakeError::Interrupted = reason {
                        task::current().set_interrupt_flag();
                    }
                    payload
                }
            };
            cleanup(sources, &cell, false);
            match payload {
                Payload::Element(element) => return Ok(element),
                Payload::Terminal(closed) => return Err(closed.into()),
                Payload::Forward(next) => {
                    // the owner put the replacement back only on the channel
                    // that ran the repair; register it on the remaining
                    // sources so any of them can still complete this wait.
                    for source in sources {
                        source.offer_cell_if_absent(&next);
                    }
                    cell = next;
                }
            }
        }
    }
}

// remove a defunct cell from every participating channel. with a single
// source this can be skipped: the channel drops owned cells on its next
// probe of the waiter deque.
fn cleanup<T>(sources: &[&Channel<T>], cell: &Arc<Cell<T>>, also_when_single: bool) {
    if sources.len() > 1 || also_when_single {
        for source in sources {
            source.cleanup_cell(cell);
        }
    }
}
