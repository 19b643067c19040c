// channel core: a bounded element buffer loosely coupled with a deque of
// waiting cells.
//
// the two structures are mutated independently, so a send that buffers an
// element can race with a receiver enqueueing a fresh cell, leaving a
// buffered element alongside an unclaimed waiter. the send side repairs
// that window after every enqueue: it keeps pairing head waiters with head
// elements until one side runs dry, so that at quiescence either the buffer
// is empty or every waiting cell is already owned. the receive side has the
// mirror-image re-check after registering a cell (see select.rs).
//
// waiter order matters: the deque is popped at the head, and a replacement
// cell produced while re-pairing goes back to the head so its waiter does
// not lose its place. elements stay a strict queue; re-inserting one would
// break arrival order.

use crate::{
    buffer::{Buffer, PutError, TryPutError},
    cell::{Cell, Payload},
    error::{
        Closed, Interrupted, RecvError, RecvTimeoutError, SendError, TrySendError,
        TrySendErrorCause,
    },
    select,
};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};

/// A bounded channel on which tasks rendezvous
///
/// Cheap to clone; all clones refer to the same channel. Any number of tasks
/// may send and receive concurrently. Elements are delivered in the order
/// their senders enqueued or paired, and a sender blocks while the buffer is
/// full. Closing is sticky: after [`done`](Channel::done) or
/// [`error`](Channel::error), every receive reports the terminal state and
/// every send fails.
pub struct Channel<T>(Arc<Shared<T>>);

struct Shared<T> {
    buffer: Buffer<T>,
    // cells of parked receivers, in arrival order.
    waiting: Mutex<VecDeque<Arc<Cell<T>>>>,
    // sticky terminal state.
    closed: OnceLock<Closed>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Channel(Arc::clone(&self.0))
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Channel::new()
    }
}

impl<T> Channel<T> {
    /// Create a channel with room for one buffered element
    pub fn new() -> Self {
        Channel::with_capacity(1)
    }

    /// Create a channel with room for `capacity` buffered elements
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        Channel(Arc::new(Shared {
            buffer: Buffer::new(capacity),
            waiting: Mutex::new(VecDeque::new()),
            closed: OnceLock::new(),
        }))
    }

    /// The sticky terminal state, if the channel has one
    pub fn closed(&self) -> Option<&Closed> {
        self.0.closed.get()
    }

    /// Close the channel normally
    ///
    /// Every parked receiver wakes with [`Closed::Done`], as does every later
    /// receive. Fails with the pre-existing state if the channel is already
    /// closed.
    pub fn done(&self) -> Result<(), Closed> {
        self.close(Closed::Done)
    }

    /// Close the channel with a failure
    ///
    /// Every parked receiver wakes with [`Closed::Error`], as does every
    /// later receive. Fails with the pre-existing state if the channel is
    /// already closed.
    pub fn error(&self, cause: anyhow::Error) -> Result<(), Closed> {
        self.close(Closed::Error(Arc::new(cause)))
    }

    pub(crate) fn close(&self, state: Closed) -> Result<(), Closed> {
        if self.0.closed.set(state.clone()).is_err() {
            return Err(self.closed().expect("internal bug").clone());
        }
        trace!(done = state.is_done(), "channel closed");
        // senders blocked on a full buffer give up.
        self.0.buffer.close();
        // every parked waiter learns the terminal state. cells enqueued after
        // this sweep are withdrawn by their own post-offer re-check, which
        // observes the state set above.
        loop {
            let cell = self.0.waiting.lock().unwrap().pop_front();
            let Some(cell) = cell else { break };
            if cell.try_own() {
                cell.put(Payload::Terminal(state.clone()));
            }
        }
        Ok(())
    }

    /// Send an element, blocking while the buffer is full
    ///
    /// Pairs directly with a parked receiver when one exists; otherwise the
    /// element is buffered. On interruption or a closed channel the element
    /// is handed back in the error and nothing is enqueued.
    pub fn send(&self, element: T) -> Result<(), SendError<T>> {
        if let Some(closed) = self.closed() {
            return Err(SendError { value: element, cause: closed.clone().into() });
        }
        // pair with a parked waiter if one exists. cells that lost their
        // rendezvous elsewhere are already owned; drop those and keep looking.
        loop {
            let cell = self.0.waiting.lock().unwrap().pop_front();
            match cell {
                Some(cell) => {
                    if cell.try_own() {
                        cell.put(Payload::Element(element));
                        return Ok(());
                    }
                }
                None => break,
            }
        }
        // no waiter: buffer the element, blocking while full.
        match self.0.buffer.put(element) {
            Ok(()) => {}
            Err(PutError::Interrupted(value)) => {
                return Err(SendError { value, cause: Interrupted.into() });
            }
            Err(PutError::Closed(value)) => {
                let closed = self.closed().expect("internal bug").clone();
                return Err(SendError { value, cause: closed.into() });
            }
        }
        // buffering may have raced with an arriving waiter; collapse the
        // window where an element and an unclaimed cell coexist.
        self.repair();
        Ok(())
    }

    /// Send an element only if that needs no blocking
    pub fn try_send(&self, element: T) -> Result<(), TrySendError<T>> {
        if let Some(closed) = self.closed() {
            return Err(TrySendError { value: element, cause: closed.clone().into() });
        }
        loop {
            let cell = self.0.waiting.lock().unwrap().pop_front();
            match cell {
                Some(cell) => {
                    if cell.try_own() {
                        cell.put(Payload::Element(element));
                        return Ok(());
                    }
                }
                None => break,
            }
        }
        match self.0.buffer.try_put(element) {
            Ok(()) => {
                self.repair();
                Ok(())
            }
            Err(TryPutError::Full(value)) => {
                Err(TrySendError { value, cause: TrySendErrorCause::Full })
            }
            Err(TryPutError::Closed(value)) => {
                let closed = self.closed().expect("internal bug").clone();
                Err(TrySendError { value, cause: closed.into() })
            }
        }
    }

    /// Receive an element, blocking until one is available
    ///
    /// Equivalent to a `select` over this channel alone; a buffered element,
    /// a racing sender, or the terminal state all resolve the wait.
    pub fn receive(&self) -> Result<T, RecvError> {
        select::select(&[self])
    }

    /// Receive an element, giving up after `timeout`
    pub fn receive_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        select::select_timeout(&[self], timeout)
    }

    // pair head waiters with head elements until either side runs dry. if an
    // owned cell's element was snatched in between, the waiter is redirected
    // to a replacement cell pushed back to the head of the deque.
    fn repair(&self) {
        loop {
            if !self.0.buffer.has_element() {
                return;
            }
            let cell = self.0.waiting.lock().unwrap().pop_front();
            let Some(cell) = cell else { return };
            if !cell.try_own() {
                continue;
            }
            match self.0.buffer.poll() {
                Some(element) => cell.put(Payload::Element(element)),
                None => {
                    let replacement = cell.put_forward();
                    self.0.waiting.lock().unwrap().push_front(replacement);
                }
            }
        }
    }

    // ==== primitives used by select ====

    // non-blocking dequeue of a buffered element.
    pub(crate) fn poll_element(&self) -> Option<T> {
        self.0.buffer.poll()
    }

    // whether an element is currently buffered.
    pub(crate) fn has_element(&self) -> bool {
        self.0.buffer.has_element()
    }

    // enqueue a receiver's cell at the tail of the waiter deque.
    pub(crate) fn offer_cell(&self, cell: Arc<Cell<T>>) {
        self.0.waiting.lock().unwrap().push_back(cell);
    }

    // enqueue a cell unless it is already registered here. replacement cells
    // reach the repairing channel's head directly and must not be doubled up
    // when the select path re-registers them on every source.
    pub(crate) fn offer_cell_if_absent(&self, cell: &Arc<Cell<T>>) {
        let mut waiting = self.0.waiting.lock().unwrap();
        if !waiting.iter().any(|c| Arc::ptr_eq(c, cell)) {
            waiting.push_back(Arc::clone(cell));
        }
    }

    // drop a defunct cell from the waiter deque, wherever it is.
    pub(crate) fn cleanup_cell(&self, cell: &Arc<Cell<T>>) {
        let mut waiting = self.0.waiting.lock().unwrap();
        if let Some(position) = waiting.iter().position(|c| Arc::ptr_eq(c, cell)) {
            waiting.remove(position);
        }
    }

    // ==== introspection for tests ====

    #[cfg(test)]
    pub(crate) fn buffered_len(&self) -> usize {
        self.0.buffer.len()
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.0.waiting.lock().unwrap().len()
    }

    #[cfg(test)]
    pub(crate) fn unowned_waiter_count(&self) -> usize {
        self.0.waiting.lock().unwrap().iter().filter(|cell| !cell.is_owned()).count()
    }

    #[cfg(test)]
    pub(crate) fn pop_waiter(&self) -> Option<Arc<Cell<T>>> {
        self.0.waiting.lock().unwrap().pop_front()
    }
}

/// The consuming half of a channel
pub trait Source<T> {
    /// Receive an element, blocking until one is available
    fn receive(&self) -> Result<T, RecvError>;

    /// Receive an element, giving up after `timeout`
    fn receive_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError>;
}

/// The producing half of a channel
pub trait Sink<T> {
    /// Send an element, blocking while the buffer is full
    fn send(&self, element: T) -> Result<(), SendError<T>>;

    /// Send an element only if that needs no blocking
    fn try_send(&self, element: T) -> Result<(), TrySendError<T>>;
}

impl<T> Source<T> for Channel<T> {
    fn receive(&self) -> Result<T, RecvError> {
        Channel::receive(self)
    }

    fn receive_timeout(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        Channel::receive_timeout(self, timeout)
    }
}

impl<T> Sink<T> for Channel<T> {
    fn send(&self, element: T) -> Result<(), SendError<T>> {
        Channel::send(self, element)
    }

    fn try_send(&self, element: T) -> Result<(), TrySendError<T>> {
        Channel::try_send(self, element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SendErrorCause;
    use std::{thread, time::Duration};

    #[test]
    fn send_then_receive_through_the_buffer() {
        let channel = Channel::new();
        channel.send(5).unwrap();
        assert_eq!(channel.receive().unwrap(), 5);
    }

    #[test]
    fn rejects_zero_capacity() {
        let result = std::panic::catch_unwind(|| Channel::<i32>::with_capacity(0));
        assert!(result.is_err());
    }

    #[test]
    fn fifo_with_one_sender_and_one_receiver() {
        let channel = Channel::with_capacity(4);
        let sender = {
            let channel = channel.clone();
            thread::spawn(move || {
                for i in 0..1_000 {
                    channel.send(i).unwrap();
                }
            })
        };
        for i in 0..1_000 {
            assert_eq!(channel.receive().unwrap(), i);
        }
        sender.join().unwrap();
    }

    #[test]
    fn send_blocks_until_the_receiver_drains() {
        let channel = Channel::new();
        channel.send(1).unwrap();
        let sender = {
            let channel = channel.clone();
            thread::spawn(move || channel.send(2).is_ok())
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(channel.receive().unwrap(), 1);
        assert!(sender.join().unwrap());
        assert_eq!(channel.receive().unwrap(), 2);
    }

    #[test]
    fn done_is_sticky_and_beats_buffered_elements() {
        let channel = Channel::with_capacity(2);
        channel.send(1).unwrap();
        channel.done().unwrap();
        assert!(matches!(channel.receive(), Err(RecvError::Closed(Closed::Done))));
        assert!(matches!(channel.receive(), Err(RecvError::Closed(Closed::Done))));
        assert!(channel.done().is_err());
    }

    #[test]
    fn error_state_carries_the_cause() {
        let channel = Channel::<i32>::new();
        channel.error(anyhow::anyhow!("upstream exploded")).unwrap();
        match channel.receive() {
            Err(RecvError::Closed(Closed::Error(cause))) => {
                assert_eq!(cause.to_string(), "upstream exploded");
            }
            _ => panic!("expected the error state"),
        }
    }

    #[test]
    fn send_on_a_closed_channel_hands_the_element_back() {
        let channel = Channel::new();
        channel.done().unwrap();
        match channel.send(9) {
            Err(SendError { value: 9, cause: SendErrorCause::Closed(Closed::Done) }) => {}
            _ => panic!("expected the element back"),
        }
    }

    #[test]
    fn done_wakes_a_parked_receiver() {
        let channel = Channel::<i32>::new();
        let receiver = {
            let channel = channel.clone();
            thread::spawn(move || channel.receive())
        };
        thread::sleep(Duration::from_millis(20));
        channel.done().unwrap();
        assert!(matches!(receiver.join().unwrap(), Err(RecvError::Closed(Closed::Done))));
    }

    #[test]
    fn done_fails_a_sender_blocked_on_a_full_buffer() {
        let channel = Channel::new();
        channel.send(1).unwrap();
        let sender = {
            let channel = channel.clone();
            thread::spawn(move || channel.send(2))
        };
        thread::sleep(Duration::from_millis(20));
        channel.done().unwrap();
        match sender.join().unwrap() {
            Err(SendError { value: 2, cause: SendErrorCause::Closed(Closed::Done) }) => {}
            _ => panic!("expected the element back"),
        }
    }

    #[test]
    fn try_send_reports_full() {
        let channel = Channel::new();
        channel.try_send(1).unwrap();
        assert!(matches!(
            channel.try_send(2),
            Err(TrySendError { value: 2, cause: TrySendErrorCause::Full })
        ));
    }

    #[test]
    fn try_send_pairs_with_a_parked_receiver() {
        let channel = Channel::new();
        // fill the buffer so only a direct pairing can succeed.
        channel.try_send(0).unwrap();
        let receiver = {
            let channel = channel.clone();
            thread::spawn(move || (channel.receive().unwrap(), channel.receive().unwrap()))
        };
        // wait for the receiver to drain the buffer and park a cell.
        while channel.waiter_count() == 0 {
            thread::sleep(Duration::from_millis(5));
        }
        channel.try_send(1).unwrap();
        assert_eq!(receiver.join().unwrap(), (0, 1));
    }

    #[test]
    fn receive_timeout_expires_on_an_empty_channel() {
        let channel = Channel::<i32>::new();
        let outcome = channel.receive_timeout(Duration::from_millis(20));
        assert!(matches!(outcome, Err(RecvTimeoutError::TimedOut)));
        // the expired waiter left no usable cell behind: a later exchange
        // still works.
        channel.send(3).unwrap();
        assert_eq!(channel.receive().unwrap(), 3);
    }
}
