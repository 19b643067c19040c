// one-shot rendezvous slot.
//
// a cell is created by a receiving party that found no element immediately,
// enqueued on the waiter deque of one or more channels, and completed exactly
// once by whichever task wins its ownership flag. the slot then holds either
// the delivered element, a pointer to a replacement cell, or the channel's
// terminal state. the winner of the flag must complete the cell; the task
// that created it is the only one that takes from it.

use crate::{
    error::Closed,
    task::{self, Task, Timeout},
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering::{AcqRel, Acquire}},
        Arc, Mutex,
    },
    thread,
    time::Instant,
};

pub(crate) struct Cell<T> {
    // false until one task wins the right to complete this cell. the flag is
    // the arbitration point between competing senders, closers, and the
    // waiter itself when it withdraws.
    owned: AtomicBool,
    // one-shot slot, filled exactly once by the owner.
    slot: Mutex<Option<Payload<T>>>,
    // the task blocked in take, woken on completion.
    waiter: Task,
}

pub(crate) enum Payload<T> {
    // a delivered element.
    Element(T),
    // the owner had nothing to deliver; the waiter moves on to this
    // replacement cell.
    Forward(Arc<Cell<T>>),
    // the channel reached a terminal state while the waiter was enqueued.
    Terminal(Closed),
}

// why a take ended without a payload.
pub(crate) enum TakeError {
    Interrupted,
    TimedOut,
}

impl<T> Cell<T> {
    pub(crate) fn new() -> Arc<Self> {
        Cell::with_waiter(task::current())
    }

    fn with_waiter(waiter: Task) -> Arc<Self> {
        Arc::new(Cell {
            owned: AtomicBool::new(false),
            slot: Mutex::new(None),
            waiter,
        })
    }

    // claim the exclusive right to complete this cell. a true result obliges
    // the caller to call put or put_forward exactly once.
    pub(crate) fn try_own(&self) -> bool {
        self.owned.compare_exchange(false, true, AcqRel, Acquire).is_ok()
    }

    #[cfg(test)]
    pub(crate) fn is_owned(&self) -> bool {
        self.owned.load(Acquire)
    }

    // complete the cell and wake the waiter. owner only; the slot is empty by
    // the ownership invariant.
    pub(crate) fn put(&self, payload: Payload<T>) {
        let mut slot = self.slot.lock().unwrap();
        debug_assert!(slot.is_none(), "cell completed twice");
        *slot = Some(payload);
        drop(slot);
        self.waiter.unpark();
    }

    // the owner claimed the cell but has no element: redirect the waiter to a
    // fresh cell bound to the same waiting task.
    pub(crate) fn put_forward(&self) -> Arc<Cell<T>> {
        let replacement = Cell::with_waiter(self.waiter.clone());
        self.put(Payload::Forward(Arc::clone(&replacement)));
        replacement
    }

    // wait for completion. only the waiter calls this; an interrupt or an
    // expired deadline ends the wait without consuming a completion.
    pub(crate) fn take(&self, timeout: Timeout) -> Result<Payload<T>, TakeError> {
        loop {
            if let Some(payload) = self.slot.lock().unwrap().take() {
                return Ok(payload);
            }
            if self.waiter.take_interrupt() {
                return Err(TakeError::Interrupted);
            }
            match timeout {
                Timeout::Never => thread::park(),
                Timeout::At(deadline) => match deadline.checked_duration_since(Instant::now()) {
                    Some(left) => thread::park_timeout(left),
                    None => return Err(TakeError::TimedOut),
                },
            }
        }
    }

    // wait for a completion that is guaranteed to arrive: the waiter lost the
    // ownership race while aborting, so some owner is mid-put. not
    // interruptible, and never long.
    pub(crate) fn take_granted(&self) -> Payload<T> {
        loop {
            if let Some(payload) = self.slot.lock().unwrap().take() {
                return payload;
            }
            thread::park();
        }
    }
}
