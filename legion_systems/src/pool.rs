//! Two-stage, grouped thread pool (spec §4.G).
//!
//! Task storage is the [`legion_core::stack::LockFreeStack`] this crate's
//! sibling provides — workers push/pop it directly with no lock. A
//! `crossbeam_channel` doorbell wakes blocked workers and blocked
//! `finalize_tasks` callers; it carries no payload, the stack is the only
//! source of truth for what's actually queued, so a spurious or doubled-up
//! wakeup just costs an extra `try_pop_front` that returns `None`.
//!
//! Finalizers never run on a worker: a worker that finishes a task with a
//! finalizer pushes `(finalizer, result)` onto that task's *group*'s
//! finalizer stack and pings the group's doorbell; only the thread blocked
//! in `finalize_tasks` for that group ever pops and runs them, which is
//! what makes finalizer order-on-one-thread (spec §5) hold.

use legion_core::stack::LockFreeStack;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::trace;

pub type GroupId = u64;

type BoxedValue = Box<dyn Any + Send>;
type TaskBody = Box<dyn FnOnce() -> BoxedValue + Send>;
type Finalizer = Box<dyn FnOnce(BoxedValue) + Send>;

struct QueuedTask {
    group: GroupId,
    body: TaskBody,
    finalizer: Option<Finalizer>,
}

struct QueuedFinalizer {
    finalizer: Finalizer,
    value: BoxedValue,
}

struct GroupState {
    finalizers: LockFreeStack<QueuedFinalizer>,
    /// Tasks submitted to this group minus tasks (and their finalizer, if
    /// any) that have fully completed. `finalize_tasks` blocks until this
    /// reaches zero.
    pending: AtomicUsize,
    wake_tx: crossbeam_channel::Sender<()>,
    wake_rx: crossbeam_channel::Receiver<()>,
}

impl GroupState {
    fn new() -> Self {
        let (wake_tx, wake_rx) = crossbeam_channel::unbounded();
        GroupState {
            finalizers: LockFreeStack::new(),
            pending: AtomicUsize::new(0),
            wake_tx,
            wake_rx,
        }
    }
}

struct Shared {
    tasks: LockFreeStack<QueuedTask>,
    doorbell_tx: crossbeam_channel::Sender<()>,
    doorbell_rx: crossbeam_channel::Receiver<()>,
    shutdown: AtomicBool,
    groups: RwLock<fxhash::FxHashMap<GroupId, Arc<GroupState>>>,
}

impl Shared {
    fn group(&self, id: GroupId) -> Arc<GroupState> {
        if let Some(g) = self.groups.read().get(&id) {
            return g.clone();
        }
        self.groups.write().entry(id).or_insert_with(|| Arc::new(GroupState::new())).clone()
    }
}

/// A pool of OS threads pulling tasks off a shared lock-free stack.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for ThreadPool {
    /// A pool with no workers yet; pair with [`ThreadPool::spawn_threads`].
    fn default() -> Self {
        let (doorbell_tx, doorbell_rx) = crossbeam_channel::unbounded();
        ThreadPool {
            shared: Arc::new(Shared {
                tasks: LockFreeStack::new(),
                doorbell_tx,
                doorbell_rx,
                shutdown: AtomicBool::new(false),
                groups: RwLock::new(fxhash::FxHashMap::default()),
            }),
            workers: Mutex::new(Vec::new()),
        }
    }
}

impl ThreadPool {
    pub fn new(worker_count: usize) -> Self {
        let pool = Self::default();
        pool.spawn_threads(worker_count);
        pool
    }

    /// Sizes the pool to the machine's available parallelism, falling back
    /// to a single worker if that can't be determined.
    pub fn new_default() -> Self {
        let worker_count = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::new(worker_count)
    }

    pub fn spawn_threads(&self, n: usize) {
        let mut workers = self.workers.lock();
        for _ in 0..n {
            let shared = self.shared.clone();
            workers.push(thread::spawn(move || worker_loop(shared)));
        }
    }

    pub fn worker_count(&self) -> usize { self.workers.lock().len() }

    /// Submits to group `0`.
    pub fn submit<F, V, Fin>(&self, task: F, finalizer: Option<Fin>)
    where
        F: FnOnce() -> V + Send + 'static,
        V: Send + 'static,
        Fin: FnOnce(V) + Send + 'static,
    {
        self.submit_in_group(0, task, finalizer);
    }

    pub fn submit_in_group<F, V, Fin>(&self, group: GroupId, task: F, finalizer: Option<Fin>)
    where
        F: FnOnce() -> V + Send + 'static,
        V: Send + 'static,
        Fin: FnOnce(V) + Send + 'static,
    {
        let group_state = self.shared.group(group);
        group_state.pending.fetch_add(1, Ordering::AcqRel);

        let body: TaskBody = Box::new(move || Box::new(task()) as BoxedValue);
        let finalizer: Option<Finalizer> = finalizer.map(|f| -> Finalizer {
            Box::new(move |value: BoxedValue| {
                let value = value.downcast::<V>().expect("thread pool finalizer type mismatch");
                f(*value);
            })
        });

        self.shared.tasks.push_front(QueuedTask { group, body, finalizer });
        let _ = self.shared.doorbell_tx.send(());
    }

    /// Blocks until group `0` is fully drained.
    pub fn finalize_tasks(&self) { self.finalize_group(0); }

    /// Blocks until every task and finalizer submitted to `group` (including
    /// ones submitted by a finalizer of this same group while we wait) has
    /// completed. Drains finalizers on the calling thread.
    pub fn finalize_group(&self, group: GroupId) {
        let state = self.shared.group(group);
        loop {
            while let Some(queued) = state.finalizers.try_pop_front() {
                (queued.finalizer)(queued.value);
                state.pending.fetch_sub(1, Ordering::AcqRel);
            }
            if state.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            let _ = state.wake_rx.recv();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        if shared.doorbell_rx.recv().is_err() {
            return;
        }
        while let Some(task) = shared.tasks.try_pop_front() {
            run_task(task, &shared);
        }
        if shared.shutdown.load(Ordering::Acquire) && shared.tasks.is_empty() {
            return;
        }
    }
}

fn run_task(task: QueuedTask, shared: &Shared) {
    let group = shared.group(task.group);
    let value = (task.body)();
    match task.finalizer {
        Some(finalizer) => {
            group.finalizers.push_front(QueuedFinalizer { finalizer, value });
        }
        None => {
            group.pending.fetch_sub(1, Ordering::AcqRel);
        }
    }
    let _ = group.wake_tx.send(());
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        let mut workers = self.workers.lock();
        for _ in 0..workers.len() {
            let _ = self.shared.doorbell_tx.send(());
        }
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
        trace!("thread pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as Counter;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn submit_without_finalizer_runs_on_a_worker() {
        let pool = ThreadPool::new(2);
        let counter = Arc::new(Counter::new(0));
        for _ in 0..10 {
            let counter = counter.clone();
            pool.submit(move || { counter.fetch_add(1, Ordering::SeqCst); }, None::<fn(())>);
        }
        pool.finalize_tasks();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn finalizer_runs_on_the_calling_thread() {
        let pool = ThreadPool::new(4);
        let finalize_thread = thread::current().id();
        let observed = Arc::new(StdMutex::new(Vec::new()));
        for i in 0..8 {
            let observed = observed.clone();
            pool.submit(
                move || i,
                Some(move |v: i32| observed.lock().unwrap().push(v)),
            );
        }
        pool.finalize_tasks();
        assert_eq!(finalize_thread, thread::current().id());
        let mut results = observed.lock().unwrap().clone();
        results.sort_unstable();
        assert_eq!(results, (0..8).collect::<Vec<_>>());
    }

    /// End-to-end Scenario 4 (spec §8): grouped thread pool.
    #[test]
    fn finalizer_spawning_more_tasks_extends_the_group() {
        let pool = Arc::new(ThreadPool::new(4));
        let tasks_run = Arc::new(Counter::new(0));
        let finalizers_run = Arc::new(Counter::new(0));

        for _ in 0..5 {
            let tasks_run = tasks_run.clone();
            let finalizers_run = finalizers_run.clone();
            let pool_for_finalizer = pool.clone();
            pool.submit(
                move || {
                    tasks_run.fetch_add(1, Ordering::SeqCst);
                },
                Some(move |()| {
                    finalizers_run.fetch_add(1, Ordering::SeqCst);
                    for _ in 0..2 {
                        let tasks_run = tasks_run.clone();
                        pool_for_finalizer.submit(move || { tasks_run.fetch_add(1, Ordering::SeqCst); }, None::<fn(())>);
                    }
                }),
            );
        }
        pool.finalize_tasks();

        assert_eq!(tasks_run.load(Ordering::SeqCst), 15);
        assert_eq!(finalizers_run.load(Ordering::SeqCst), 5);
    }

    /// End-to-end Scenario 5 (spec §8): nested group finalized from inside a task.
    #[test]
    fn nested_group_finalized_from_within_a_task() {
        let pool = Arc::new(ThreadPool::new(6));
        let inner_tasks = Arc::new(Counter::new(0));
        let inner_finalizers = Arc::new(Counter::new(0));
        let outer_tasks = Arc::new(Counter::new(0));
        let outer_finalizers = Arc::new(Counter::new(0));

        for _ in 0..5 {
            let pool = pool.clone();
            let inner_tasks = inner_tasks.clone();
            let inner_finalizers = inner_finalizers.clone();
            let outer_tasks = outer_tasks.clone();
            pool.submit(
                move || {
                    outer_tasks.fetch_add(1, Ordering::SeqCst);
                    for _ in 0..2 {
                        let inner_tasks = inner_tasks.clone();
                        let inner_finalizers = inner_finalizers.clone();
                        pool.submit_in_group(
                            1,
                            move || inner_tasks.fetch_add(1, Ordering::SeqCst),
                            Some(move |_: usize| {
                                inner_finalizers.fetch_add(1, Ordering::SeqCst);
                            }),
                        );
                    }
                    pool.finalize_group(1);
                },
                Some(move |()| {
                    outer_finalizers.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }
        pool.finalize_tasks();

        assert_eq!(inner_tasks.load(Ordering::SeqCst), 10);
        assert_eq!(outer_tasks.load(Ordering::SeqCst), 5);
        assert_eq!(inner_finalizers.load(Ordering::SeqCst), 10);
        assert_eq!(outer_finalizers.load(Ordering::SeqCst), 5);
    }
}
