// task identity and cooperative interruption.
//
// every thread that enters a blocking operation has a task identity: threads
// forked in a scope get theirs before they start, any other thread gets a
// detached one on first use. interrupting a task sets its flag and unparks
// its thread; the blocking loops in this crate poll the flag around parking,
// so an interrupt wakes a task out of any suspension point.

use crate::error::Interrupted;
use std::{
    cell::RefCell,
    sync::{
        atomic::{AtomicBool, Ordering::SeqCst},
        Arc, OnceLock,
    },
    thread::{self, Thread},
    time::{Duration, Instant},
};

/// Handle to a task
///
/// Cheap to clone; all clones refer to the same task. Obtained from
/// [`current`] on the task's own thread.
#[derive(Clone)]
pub struct Task {
    core: Arc<TaskCore>,
}

struct TaskCore {
    // set by interrupt, consumed by the blocking operation that observes it.
    interrupted: AtomicBool,
    // the task's thread, filled in once the task is running.
    thread: OnceLock<Thread>,
}

impl Task {
    // a task identity for a thread that was not forked through a scope.
    fn detached() -> Self {
        let task = Task::unstarted();
        let _ = task.core.thread.set(thread::current());
        task
    }

    // a task identity created ahead of its thread; the scope hands this to
    // the forked thread, which binds it via make_current.
    pub(crate) fn unstarted() -> Self {
        Task {
            core: Arc::new(TaskCore {
                interrupted: AtomicBool::new(false),
                thread: OnceLock::new(),
            }),
        }
    }

    /// Interrupt this task
    ///
    /// Sets the task's interrupt flag and wakes it if it is blocked. The next
    /// blocking operation the task runs (or the one it is currently blocked
    /// in) aborts with [`Interrupted`], except where a rendezvous has already
    /// been completed for it, in which case the element is delivered and the
    /// flag is left set for the task to observe.
    pub fn interrupt(&self) {
        self.core.interrupted.store(true, SeqCst);
        if let Some(thread) = self.core.thread.get() {
            thread.unpark();
        }
    }

    /// Whether the interrupt flag is currently set, without consuming it
    pub fn is_interrupted(&self) -> bool {
        self.core.interrupted.load(SeqCst)
    }

    // consume the interrupt flag.
    pub(crate) fn take_interrupt(&self) -> bool {
        self.core.interrupted.swap(false, SeqCst)
    }

    // re-set the flag without waking anything; used by a task on itself after
    // it accepted a delivery that raced with its interruption.
    pub(crate) fn set_interrupt_flag(&self) {
        self.core.interrupted.store(true, SeqCst);
    }

    // wake the task's thread if it is parked.
    pub(crate) fn unpark(&self) {
        if let Some(thread) = self.core.thread.get() {
            thread.unpark();
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Task>> = const { RefCell::new(None) };
}

/// The task identity of the calling thread
pub fn current() -> Task {
    CURRENT.with(|slot| {
        let mut slot = slot.borrow_mut();
        slot.get_or_insert_with(Task::detached).clone()
    })
}

// bind a pre-created task to the calling thread. called first thing on a
// forked thread.
pub(crate) fn make_current(task: Task) {
    let _ = task.core.thread.set(thread::current());
    CURRENT.with(|slot| *slot.borrow_mut() = Some(task));
}

/// Sleep for the given duration, waking early if the task is interrupted
pub fn sleep(duration: Duration) -> Result<(), Interrupted> {
    let task = current();
    let deadline = Instant::now() + duration;
    loop {
        if task.take_interrupt() {
            return Err(Interrupted);
        }
        let Some(left) = deadline.checked_duration_since(Instant::now()) else {
            return Ok(());
        };
        thread::park_timeout(left);
    }
}

// timeout for blocking on a rendezvous.
#[derive(Copy, Clone)]
pub(crate) enum Timeout {
    // never time out.
    Never,
    // time out at the given deadline.
    At(Instant),
}
