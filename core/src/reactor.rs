//! The reactor: a fixed pool of single-threaded event loops, each owning
//! a disjoint set of connections for their full lifetime.
//!
//! A readiness-based selector loop with an explicit task queue and
//! timer wheel is the classic shape here; a Tokio current-thread
//! runtime *is* one (an OS-level selector plus a task queue plus a
//! timer wheel), so [`ReactorLoop`] is a thin, explicit handle around
//! one such runtime rather than a reimplementation of epoll/kqueue
//! polling.
//!
//! Invariants preserved by this module:
//! - a connection's I/O and timer callbacks run only on its owning loop
//!   thread — every connection is spawned on exactly one
//!   [`ReactorLoop`]'s runtime and never migrated;
//! - cross-thread registration/wakeup (`invoke_later`, `schedule`) is
//!   safe from any thread via an unbounded channel into the loop;
//! - timers are deadline-ordered by Tokio's own timer wheel and fire on
//!   the loop thread;
//! - a panicking task never kills the loop — Tokio isolates task panics
//!   to the task's own `JoinHandle`, so callback exceptions are caught
//!   and logged while the loop continues.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Task = Box<dyn FnOnce(&tokio::runtime::Handle) + Send + 'static>;

/// A single reactor loop: one OS thread running a Tokio current-thread
/// runtime, plus a task-queue sender for cross-thread work.
pub struct ReactorLoop {
    id: usize,
    handle: tokio::runtime::Handle,
    task_tx: mpsc::UnboundedSender<Task>,
    _runtime_thread: std::thread::JoinHandle<()>,
}

impl std::fmt::Debug for ReactorLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactorLoop").field("id", &self.id).finish_non_exhaustive()
    }
}

impl ReactorLoop {
    /// Spawn a new reactor loop on a dedicated OS thread.
    pub fn spawn(id: usize) -> Self {
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (task_tx, mut task_rx) = mpsc::unbounded_channel::<Task>();

        let thread = std::thread::Builder::new()
            .name(format!("junction-reactor-{id}"))
            .spawn(move || {
                let runtime: Runtime = Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build reactor loop runtime");
                let handle = runtime.handle().clone();
                ready_tx.send(handle).expect("reactor loop startup channel closed");

                // Drain the task queue on the loop thread. Each entry is
                // spawned rather than run inline so one slow task cannot
                // block the drain of the next registration.
                runtime.block_on(async move {
                    let handle = tokio::runtime::Handle::current();
                    while let Some(task) = task_rx.recv().await {
                        task(&handle);
                    }
                });
            })
            .expect("failed to spawn reactor loop thread");

        let handle = ready_rx.recv().expect("reactor loop failed to start");

        Self { id, handle, task_tx, _runtime_thread: thread }
    }

    /// This loop's index within its pool (used for round-robin accept
    /// assignment).
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Queue a future to run on this loop, safe to call from any thread.
    /// A panic inside `fut` is isolated to its own task by Tokio and
    /// logged; the loop keeps draining further work.
    pub fn invoke_later<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sent = self.task_tx.send(Box::new(move |handle| {
            let join = handle.spawn(fut);
            handle.spawn(async move {
                if let Err(panic) = join.await {
                    tracing::error!(panic = ?panic, "reactor task panicked; loop continues");
                }
            });
        }));
        if sent.is_err() {
            tracing::warn!(loop_id = self.id, "invoke_later on a shut-down reactor loop, dropped");
        }
    }

    /// Spawn a connection-owning task directly on this loop's runtime.
    /// This is the call used by the accept path: once assigned,
    /// everything for that connection runs via this handle until close.
    pub fn spawn_owned<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(fut)
    }

    /// Schedule a one-shot timer; the callback runs on this loop's thread
    /// after `delay`.
    pub fn schedule<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let deadline = Instant::now() + delay;
        self.invoke_later(async move {
            let now = Instant::now();
            if deadline > now {
                tokio::time::sleep(deadline - now).await;
            }
            callback();
        });
    }
}

/// A fixed pool of reactor loops.
#[derive(Debug)]
pub struct ReactorPool {
    loops: Vec<Arc<ReactorLoop>>,
    next: AtomicUsize,
}

impl ReactorPool {
    /// Build a pool of `worker_count` loops, defaulting to the number of
    /// available cores when `worker_count` is `None`.
    #[must_use]
    pub fn new(worker_count: Option<usize>) -> Self {
        let n = worker_count.unwrap_or_else(|| {
            std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1)
        });
        let loops = (0..n.max(1)).map(|id| Arc::new(ReactorLoop::spawn(id))).collect();
        Self { loops, next: AtomicUsize::new(0) }
    }

    /// Number of loops in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// True if the pool has no loops (never happens via [`Self::new`]).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    /// Assign the next loop in round-robin order.
    pub fn assign(&self) -> Arc<ReactorLoop> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.loops.len();
        self.loops[idx].clone()
    }

    /// All loops, for broadcasting shutdown.
    #[must_use]
    pub fn loops(&self) -> &[Arc<ReactorLoop>] {
        &self.loops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize as AU, Ordering as Ord};
    use std::time::Duration;

    #[test]
    fn round_robin_assignment_cycles_through_all_loops() {
        let pool = ReactorPool::new(Some(3));
        let mut seen = std::collections::HashSet::new();
        for _ in 0..6 {
            seen.insert(pool.assign().id());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn invoke_later_runs_on_loop_thread() {
        let reactor = ReactorLoop::spawn(0);
        let counter = Arc::new(AU::new(0));
        let counter2 = counter.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        reactor.invoke_later(async move {
            counter2.fetch_add(1, Ord::SeqCst);
            tx.send(()).ok();
        });
        rx.recv_timeout(Duration::from_secs(1)).expect("task did not run");
        assert_eq!(counter.load(Ord::SeqCst), 1);
    }

    #[test]
    fn panicking_task_does_not_kill_the_loop() {
        let reactor = ReactorLoop::spawn(0);
        reactor.invoke_later(async { panic!("boom") });

        let counter = Arc::new(AU::new(0));
        let counter2 = counter.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        reactor.invoke_later(async move {
            counter2.fetch_add(1, Ord::SeqCst);
            tx.send(()).ok();
        });
        rx.recv_timeout(Duration::from_secs(1)).expect("loop died after panic");
        assert_eq!(counter.load(Ord::SeqCst), 1);
    }

    #[test]
    fn timer_fires_after_delay_not_before() {
        let reactor = ReactorLoop::spawn(0);
        let (tx, rx) = std::sync::mpsc::channel();
        let start = Instant::now();
        reactor.schedule(Duration::from_millis(50), move || {
            tx.send(Instant::now()).ok();
        });
        let fired_at = rx.recv_timeout(Duration::from_secs(2)).expect("timer never fired");
        assert!(fired_at.duration_since(start) >= Duration::from_millis(40));
    }
}
