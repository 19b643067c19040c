// bounded element buffer.
//
// holds the buffered elements of one channel. poll and the presence probe
// never block; put blocks while the buffer is full, parked until a poll
// frees a slot, the owning channel closes, or the putting task is
// interrupted. in every failure case the element is handed back unenqueued.

use crate::task;
use std::{
    collections::VecDeque,
    sync::Mutex,
    thread::{self, Thread, ThreadId},
};

pub(crate) struct Buffer<T> {
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    elements: VecDeque<T>,
    capacity: usize,
    // threads blocked in put, in arrival order. woken front-first as slots
    // free up; each removes itself once it proceeds or gives up.
    putters: VecDeque<Putter>,
    // set when the owning channel closes; current and future puts fail.
    closed: bool,
}

struct Putter {
    id: ThreadId,
    thread: Thread,
}

// why a put ended with the element unenqueued.
pub(crate) enum PutError<T> {
    Interrupted(T),
    Closed(T),
}

pub(crate) enum TryPutError<T> {
    Full(T),
    Closed(T),
}

impl<T> Buffer<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "channel capacity must be at least 1");
        Buffer {
            inner: Mutex::new(Inner {
                elements: VecDeque::new(),
                capacity,
                putters: VecDeque::new(),
                closed: false,
            }),
        }
    }

    // non-blocking dequeue. wakes the next blocked putter when a slot frees.
    pub(crate) fn poll(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        let element = inner.elements.pop_front();
        if element.is_some() {
            if let Some(putter) = inner.putters.front() {
                putter.thread.unpark();
            }
        }
        element
    }

    // whether an element is currently buffered.
    pub(crate) fn has_element(&self) -> bool {
        !self.inner.lock().unwrap().elements.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().elements.len()
    }

    // non-blocking enqueue.
    pub(crate) fn try_put(&self, element: T) -> Result<(), TryPutError<T>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            Err(TryPutError::Closed(element))
        } else if inner.elements.len() < inner.capacity {
            inner.elements.push_back(element);
            Ok(())
        } else {
            Err(TryPutError::Full(element))
        }
    }

    // blocking enqueue. returns the element on interruption or close, with
    // nothing enqueued.
    pub(crate) fn put(&self, element: T) -> Result<(), PutError<T>> {
        let task = task::current();
        let me = thread::current();
        let mut registered = false;
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.closed {
                    if registered {
                        remove_putter(&mut inner, me.id());
                    }
                    return Err(PutError::Closed(element));
                }
                if inner.elements.len() < inner.capacity {
                    if registered {
                        remove_putter(&mut inner, me.id());
                    }
                    inner.elements.push_back(element);
                    // room may remain; let the next putter try as well.
                    if inner.elements.len() < inner.capacity {
                        if let Some(next) = inner.putters.front() {
                            next.thread.unpark();
                        }
                    }
                    return Ok(());
                }
                if !registered {
                    inner.putters.push_back(Putter { id: me.id(), thread: me.clone() });
                    registered = true;
                }
            }
            if task.take_interrupt() {
                let mut inner = self.inner.lock().unwrap();
                remove_putter(&mut inner, me.id());
                // pass a pending wakeup along rather than swallowing it.
                if inner.elements.len() < inner.capacity {
                    if let Some(next) = inner.putters.front() {
                        next.thread.unpark();
                    }
                }
                return Err(PutError::Interrupted(element));
            }
            thread::park();
        }
    }

    // fail all current and future blocking puts.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        for putter in &inner.putters {
            putter.thread.unpark();
        }
    }
}

fn remove_putter<T>(inner: &mut Inner<T>, id: ThreadId) {
    inner.putters.retain(|putter| putter.id != id);
}
