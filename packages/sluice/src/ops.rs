// source operators and factories.
//
// each operator forks one worker in the supplied scope and connects it to a
// fresh channel; the worker pulls from its input(s), applies the stage, and
// pushes downstream. a finished input closes the downstream the same way it
// closed itself, a failed user function closes it with that failure, and an
// interrupted worker closes it clean.

use crate::{
    channel::Channel,
    error::{Closed, RecvError, SendErrorCause},
    scope::Scope,
    select::select,
    task,
};
use std::{sync::Arc, time::Duration};

/// Blocking iterator over a source
///
/// Yields elements until the channel reaches a terminal state or the
/// consuming task is interrupted; the channel itself remembers the terminal
/// state (see [`Channel::closed`]).
pub struct SourceIter<T> {
    channel: Channel<T>,
}

impl<T> Iterator for SourceIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.channel.receive().ok()
    }
}

impl<T> Channel<T> {
    /// Iterate over received elements
    pub fn iter(&self) -> SourceIter<T> {
        SourceIter { channel: self.clone() }
    }

    /// Apply `f` to every element until the channel is done
    ///
    /// A clean close resolves to `Ok`; an error state or an interruption of
    /// the calling task surfaces as the error.
    pub fn foreach(&self, mut f: impl FnMut(T)) -> Result<(), RecvError> {
        loop {
            match self.receive() {
                Ok(element) => f(element),
                Err(RecvError::Closed(Closed::Done)) => return Ok(()),
                Err(other) => return Err(other),
            }
        }
    }

    /// Collect every element until the channel is done
    pub fn to_list(&self) -> Result<Vec<T>, RecvError> {
        let mut elements = Vec::new();
        self.foreach(|element| elements.push(element))?;
        Ok(elements)
    }
}

impl<T: Send + 'static> Channel<T> {
    /// Transform every element one-to-one
    ///
    /// A failing `f` closes the output with its error.
    pub fn map<U, F>(&self, scope: &Scope, mut f: F) -> Channel<U>
    where
        U: Send + 'static,
        F: FnMut(T) -> anyhow::Result<U> + Send + 'static,
    {
        let input = self.clone();
        let output = Channel::new();
        let worker_out = output.clone();
        scope.fork(move || loop {
            match input.receive() {
                Ok(element) => match f(element) {
                    Ok(mapped) => {
                        if let Err(failed) = worker_out.send(mapped) {
                            close_if_interrupted(&worker_out, &failed.cause);
                            break;
                        }
                    }
                    Err(cause) => {
                        debug!(%cause, "map stage failed, closing downstream");
                        let _ = worker_out.error(cause);
                        break;
                    }
                },
                Err(RecvError::Closed(_)) => {
                    propagate_close(&input, &worker_out);
                    break;
                }
                Err(RecvError::Interrupted(_)) => {
                    let _ = worker_out.done();
                    break;
                }
            }
        });
        output
    }

    /// Drive a user-supplied transformation of the whole element sequence
    ///
    /// `f` receives the input as a pull-based iterator and returns the
    /// sequence to relay downstream, which lets a stage filter, expand,
    /// batch, or cut short.
    pub fn transform<U, I, F>(&self, scope: &Scope, f: F) -> Channel<U>
    where
        U: Send + 'static,
        I: IntoIterator<Item = U>,
        F: FnOnce(SourceIter<T>) -> I + Send + 'static,
    {
        let input = self.clone();
        let output = Channel::new();
        let worker_out = output.clone();
        scope.fork(move || {
            for element in f(input.iter()) {
                if let Err(failed) = worker_out.send(element) {
                    close_if_interrupted(&worker_out, &failed.cause);
                    return;
                }
            }
            propagate_close(&input, &worker_out);
        });
        output
    }

    /// Interleave this channel with another
    ///
    /// Elements keep their per-input order; the relative order between the
    /// inputs is whatever the race produces. When one input is done the
    /// other keeps flowing; an error on either side propagates immediately.
    pub fn merge(&self, scope: &Scope, other: &Channel<T>) -> Channel<T> {
        let left = self.clone();
        let right = other.clone();
        let output = Channel::new();
        let worker_out = output.clone();
        scope.fork(move || {
            let mut left_open = true;
            let mut right_open = true;
            loop {
                let received = match (left_open, right_open) {
                    (true, true) => select(&[&left, &right]),
                    (true, false) => left.receive(),
                    (false, true) => right.receive(),
                    (false, false) => {
                        let _ = worker_out.done();
                        return;
                    }
                };
                match received {
                    Ok(element) => {
                        if let Err(failed) = worker_out.send(element) {
                            close_if_interrupted(&worker_out, &failed.cause);
                            return;
                        }
                    }
                    Err(RecvError::Closed(Closed::Done)) => {
                        // one input finished; keep draining the other.
                        left_open = left_open && left.closed().is_none();
                        right_open = right_open && right.closed().is_none();
                    }
                    Err(RecvError::Closed(Closed::Error(cause))) => {
                        let _ = worker_out.close(Closed::Error(cause));
                        return;
                    }
                    Err(RecvError::Interrupted(_)) => {
                        let _ = worker_out.done();
                        return;
                    }
                }
            }
        });
        output
    }

    /// Pair this channel with another, element by element
    ///
    /// One element is taken from each input per pair; the output closes as
    /// soon as either input does.
    pub fn zip<U>(&self, scope: &Scope, other: &Channel<U>) -> Channel<(T, U)>
    where
        U: Send + 'static,
    {
        let left = self.clone();
        let right = other.clone();
        let output = Channel::new();
        let worker_out = output.clone();
        scope.fork(move || loop {
            let first = match left.receive() {
                Ok(element) => element,
                Err(reason) => {
                    close_from(&worker_out, reason);
                    return;
                }
            };
            let second = match right.receive() {
                Ok(element) => element,
                Err(reason) => {
                    close_from(&worker_out, reason);
                    return;
                }
            };
            if let Err(failed) = worker_out.send((first, second)) {
                close_if_interrupted(&worker_out, &failed.cause);
                return;
            }
        });
        output
    }
}

/// Emit every element of `elements`, then close done
pub fn from_iter<T, I>(scope: &Scope, elements: I) -> Channel<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let output = Channel::new();
    let worker_out = output.clone();
    let iter = elements.into_iter();
    scope.fork(move || {
        for element in iter {
            if let Err(failed) = worker_out.send(element) {
                close_if_interrupted(&worker_out, &failed.cause);
                return;
            }
        }
        let _ = worker_out.done();
    });
    output
}

/// Emit elements pulled from a thunk until it is exhausted or fails
///
/// `Ok(None)` closes the output done; an error closes it with that failure.
pub fn from_fn<T, F>(scope: &Scope, mut next: F) -> Channel<T>
where
    T: Send + 'static,
    F: FnMut() -> anyhow::Result<Option<T>> + Send + 'static,
{
    let output = Channel::new();
    let worker_out = output.clone();
    scope.fork(move || loop {
        match next() {
            Ok(Some(element)) => {
                if let Err(failed) = worker_out.send(element) {
                    close_if_interrupted(&worker_out, &failed.cause);
                    return;
                }
            }
            Ok(None) => {
                let _ = worker_out.done();
                return;
            }
            Err(cause) => {
                debug!(%cause, "source thunk failed, closing downstream");
                let _ = worker_out.error(cause);
                return;
            }
        }
    });
    output
}

/// Emit a clone of `element` every `interval`, forever
///
/// The channel never closes on its own; the emissions stop when the scope
/// tears the worker down.
pub fn tick<T>(scope: &Scope, interval: Duration, element: T) -> Channel<T>
where
    T: Clone + Send + 'static,
{
    let output = Channel::new();
    let worker_out = output.clone();
    scope.fork(move || loop {
        if task::sleep(interval).is_err() {
            let _ = worker_out.done();
            return;
        }
        if let Err(failed) = worker_out.send(element.clone()) {
            close_if_interrupted(&worker_out, &failed.cause);
            return;
        }
    });
    output
}

/// Emit `element` once after `after`, then close done
pub fn timeout<T>(scope: &Scope, after: Duration, element: T) -> Channel<T>
where
    T: Send + 'static,
{
    let output = Channel::new();
    let worker_out = output.clone();
    scope.fork(move || {
        if task::sleep(after).is_ok() {
            let _ = worker_out.send(element);
        }
        let _ = worker_out.done();
    });
    output
}

// close the downstream the way the upstream ended: a failure propagates,
// anything else (done, or a stage that stopped pulling early) closes clean.
fn propagate_close<T, U>(input: &Channel<T>, output: &Channel<U>) {
    let result = match input.closed() {
        Some(Closed::Error(cause)) => output.close(Closed::Error(Arc::clone(cause))),
        _ => output.done(),
    };
    // the consumer may have closed the output already.
    let _ = result;
}

// a worker stopped by its own interruption mid-send still closes the
// downstream clean; a downstream closed by its consumer needs nothing.
fn close_if_interrupted<T>(output: &Channel<T>, cause: &SendErrorCause) {
    if matches!(cause, SendErrorCause::Interrupted(_)) {
        let _ = output.done();
    }
}

fn close_from<T>(output: &Channel<T>, reason: RecvError) {
    let result = match reason {
        RecvError::Closed(Closed::Error(cause)) => output.close(Closed::Error(cause)),
        _ => output.done(),
    };
    let _ = result;
}
