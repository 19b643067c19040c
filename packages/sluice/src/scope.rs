// structured concurrency scope.
//
// every task forked in a scope is joined before scoped returns; tasks still
// running once the body has finished are interrupted first. a panicking
// fork cancels the whole scope and the panic resurfaces at the scope
// boundary (or at join, if the fork is joined before the scope ends).

use crate::task::{self, Task};
use std::{
    any::Any,
    mem,
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex},
    thread,
};

/// Run `body` in a new scope
///
/// Tasks forked through the [`Scope`] may outlive the body, but never this
/// call: once the body returns, every task still running is interrupted, and
/// all of them are joined before the body's value is handed back. A panic in
/// the body or in any fork propagates out of this call after the scope is
/// drained.
pub fn scoped<R>(body: impl FnOnce(&Scope) -> R) -> R {
    let scope = Scope { shared: Arc::new(ScopeShared::new()) };
    let result = catch_unwind(AssertUnwindSafe(|| body(&scope)));
    let fork_panic = scope.shared.drain();
    match result {
        Ok(value) => {
            if let Some(panic) = fork_panic {
                resume_unwind(panic);
            }
            value
        }
        Err(panic) => resume_unwind(panic),
    }
}

/// A live scope in which tasks can be forked
///
/// Clonable so that forks can fork; all clones refer to the same scope.
#[derive(Clone)]
pub struct Scope {
    shared: Arc<ScopeShared>,
}

struct ScopeShared {
    running: Mutex<Registry>,
    // panic payloads from forks that nobody joined, surfaced at scope exit.
    panics: Mutex<Vec<Box<dyn Any + Send>>>,
}

// None once the scope has been drained.
type Registry = Option<Vec<RunningFork>>;

struct RunningFork {
    task: Task,
    handle: thread::JoinHandle<()>,
}

impl Scope {
    /// Fork a task in this scope
    ///
    /// The task starts immediately on its own thread. Its result can be
    /// claimed through the returned [`Fork`]; an unclaimed result is simply
    /// dropped when the scope ends.
    ///
    /// # Panics
    ///
    /// Panics if the scope has already ended.
    pub fn fork<T, F>(&self, f: F) -> Fork<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let fork = Fork { shared: Arc::new(ForkShared::new()) };
        let task = Task::unstarted();
        let thread_body = {
            let fork = Fork { shared: Arc::clone(&fork.shared) };
            let task = task.clone();
            let scope = Arc::clone(&self.shared);
            move || {
                task::make_current(task);
                match catch_unwind(AssertUnwindSafe(f)) {
                    Ok(value) => fork.shared.complete(value),
                    Err(panic) => {
                        fork.shared.mark_panicked();
                        scope.panics.lock().unwrap().push(panic);
                        // a failing fork takes the rest of the scope with it.
                        scope.cancel_running();
                    }
                }
            }
        };
        let mut running = self.shared.running.lock().unwrap();
        let Some(registry) = running.as_mut() else {
            panic!("fork on a scope that has already ended");
        };
        let handle = thread::Builder::new()
            .name("sluice-fork".to_owned())
            .spawn(thread_body)
            .expect("failed to spawn fork thread");
        registry.push(RunningFork { task, handle });
        fork
    }

    /// Interrupt every task currently running in this scope
    pub fn cancel(&self) {
        self.shared.cancel_running();
    }
}

impl ScopeShared {
    fn new() -> Self {
        ScopeShared {
            running: Mutex::new(Some(Vec::new())),
            panics: Mutex::new(Vec::new()),
        }
    }

    fn cancel_running(&self) {
        if let Some(registry) = self.running.lock().unwrap().as_ref() {
            for fork in registry {
                fork.task.interrupt();
            }
        }
    }

    // interrupt and join everything, in rounds, until no fork remains; forks
    // spawned by still-running forks are caught by the next round.
    fn drain(&self) -> Option<Box<dyn Any + Send>> {
        loop {
            let batch = {
                let mut running = self.running.lock().unwrap();
                let Some(registry) = running.as_mut() else { break };
                if registry.is_empty() {
                    *running = None;
                    break;
                }
                mem::take(registry)
            };
            trace!(forks = batch.len(), "draining scope");
            for fork in &batch {
                fork.task.interrupt();
            }
            for fork in batch {
                // fork bodies never unwind out of their thread; panics were
                // captured into the registry already.
                let _ = fork.handle.join();
            }
        }
        self.panics.lock().unwrap().drain(..).next()
    }
}

/// Handle to a forked task's pending result
pub struct Fork<T> {
    shared: Arc<ForkShared<T>>,
}

enum ForkState<T> {
    Pending,
    Returned(Option<T>),
    Panicked,
}

struct ForkShared<T> {
    state: Mutex<ForkState<T>>,
    done: Condvar,
}

impl<T> ForkShared<T> {
    fn new() -> Self {
        ForkShared { state: Mutex::new(ForkState::Pending), done: Condvar::new() }
    }

    fn complete(&self, value: T) {
        *self.state.lock().unwrap() = ForkState::Returned(Some(value));
        self.done.notify_all();
    }

    fn mark_panicked(&self) {
        *self.state.lock().unwrap() = ForkState::Panicked;
        self.done.notify_all();
    }
}

impl<T> Fork<T> {
    /// Block until the forked task finishes and claim its result
    ///
    /// # Panics
    ///
    /// Panics if the forked task panicked; the original payload surfaces at
    /// the scope boundary.
    pub fn join(self) -> T {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            match &mut *state {
                ForkState::Pending => state = self.shared.done.wait(state).unwrap(),
                ForkState::Returned(value) => {
                    return value.take().expect("internal bug: fork result taken twice");
                }
                ForkState::Panicked => panic!("joined a fork that panicked"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::atomic::{AtomicBool, Ordering::SeqCst},
        time::{Duration, Instant},
    };

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn forks_join_in_call_order() {
        let (sum, elapsed) = scoped(|scope| {
            let start = Instant::now();
            let f1 = scope.fork(|| {
                task::sleep(ms(50)).unwrap();
                5
            });
            let f2 = scope.fork(|| {
                task::sleep(ms(100)).unwrap();
                6
            });
            let a = f1.join();
            let b = f2.join();
            (a + b, start.elapsed())
        });
        assert_eq!(sum, 11);
        // the two sleeps overlapped.
        assert!(elapsed >= ms(100) && elapsed < ms(200));
    }

    #[test]
    fn nested_forks_complete_inside_out() {
        let value = scoped(|scope| {
            let scope2 = scope.clone();
            let outer = scope.fork(move || {
                let inner = scope2.fork(|| 6);
                5 + inner.join()
            });
            outer.join()
        });
        assert_eq!(value, 11);
    }

    #[test]
    fn scope_end_interrupts_unfinished_forks() {
        let interrupted = Arc::new(AtomicBool::new(false));
        let value = scoped(|scope| {
            let flag = Arc::clone(&interrupted);
            let scope2 = scope.clone();
            let outer = scope.fork(move || {
                scope2.fork(move || {
                    if task::sleep(Duration::from_secs(10)).is_err() {
                        flag.store(true, SeqCst);
                    }
                });
                task::sleep(ms(50)).unwrap();
                5
            });
            outer.join()
        });
        assert_eq!(value, 5);
        assert!(interrupted.load(SeqCst));
    }

    #[test]
    fn fork_panic_resurfaces_at_the_scope_boundary() {
        let result = std::panic::catch_unwind(|| {
            scoped(|scope| {
                scope.fork(|| panic!("fork went wrong"));
                task::sleep(ms(100)).unwrap();
            })
        });
        assert!(result.is_err());
    }

    #[test]
    fn fork_panic_cancels_the_siblings() {
        let sibling_interrupted = Arc::new(AtomicBool::new(false));
        let result = std::panic::catch_unwind(|| {
            scoped(|scope| {
                let flag = Arc::clone(&sibling_interrupted);
                scope.fork(move || {
                    if task::sleep(Duration::from_secs(10)).is_err() {
                        flag.store(true, SeqCst);
                    }
                });
                scope.fork(|| panic!("fork went wrong"));
                task::sleep(ms(100)).unwrap();
            })
        });
        assert!(result.is_err());
        assert!(sibling_interrupted.load(SeqCst));
    }
}
