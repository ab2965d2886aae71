//! Parallel task execution.
//!
//! A single process-wide pool, sized to the hardware thread count at first
//! use, serves FIFO-ordered tasks. The design is built around one property
//! the serializer depends on: **`join` can steal**. Joining a task that no
//! worker has picked up yet removes it from the queue and runs it inline on
//! the calling thread. An encoder draining its own task list therefore
//! never deadlocks, even when every worker is busy with that same encoder's
//! siblings — whatever is still queued gets executed by the drain itself.
//!
//! Pool anatomy:
//!
//! - a pending FIFO (`VecDeque` of ids) plus an id→closure map, under one
//!   mutex with a condition variable — the map is the steal side-channel:
//!   `join` removes the closure, and a worker that pops an id with no
//!   closure left just skips it;
//! - a finished-id set under its own mutex; workers insert on completion,
//!   `join` spin-waits (yielding) and consumes;
//! - one worker thread per hardware thread, looping: wait until the queue
//!   is non-empty or the pool shuts down, run, mark finished.
//!
//! FIFO dispatch is best effort only; nothing may rely on it for
//! correctness. There is no priority, no cancellation of running tasks and
//! no preemption — the only way to keep a queued task from running on a
//! worker is to `join` it first.
//!
//! Two scheduling modes exist: [`ThreadMode::Pooled`] (the default for the
//! serializer) and [`ThreadMode::Independent`], which spawns a dedicated
//! thread whose join is direct.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Once};
use std::thread;

use once_cell::sync::Lazy;

/// Identity of a scheduled task: the key for the finished set and the
/// pending map.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a task is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadMode {
    /// Run on the shared worker pool.
    Pooled,
    /// Run on a dedicated thread of its own.
    Independent,
}

type Job = Box<dyn FnOnce() + Send>;

struct PoolState {
    queue: VecDeque<TaskId>,
    jobs: HashMap<TaskId, Job>,
    running: bool,
}

/// The process-wide worker pool.
pub struct TaskPool {
    state: Mutex<PoolState>,
    ready: Condvar,
    finished: Mutex<HashSet<TaskId>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    boot: Once,
}

static POOL: Lazy<TaskPool> = Lazy::new(|| TaskPool {
    state: Mutex::new(PoolState {
        queue: VecDeque::new(),
        jobs: HashMap::new(),
        running: true,
    }),
    ready: Condvar::new(),
    finished: Mutex::new(HashSet::new()),
    workers: Mutex::new(Vec::new()),
    boot: Once::new(),
});

impl TaskPool {
    /// Returns the shared pool, spawning its workers on first use.
    pub fn global() -> &'static TaskPool {
        let pool = &*POOL;
        pool.boot.call_once(|| pool.spawn_workers());
        pool
    }

    fn spawn_workers(&'static self) {
        let threads = thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(4);
        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        for index in 0..threads {
            let handle = thread::Builder::new()
                .name(format!("eleki-task-{index}"))
                .spawn(move || self.work())
                .expect("failed to spawn pool worker");
            workers.push(handle);
        }
    }

    fn work(&self) {
        loop {
            let job = {
                let mut state = self
                    .state
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner());
                loop {
                    if let Some(id) = state.queue.pop_front() {
                        // A missing closure means the task was stolen by a
                        // join; drop the stale id and keep looking.
                        if let Some(run) = state.jobs.remove(&id) {
                            break Some((id, run));
                        }
                        continue;
                    }
                    if !state.running {
                        break None;
                    }
                    state = self
                        .ready
                        .wait(state)
                        .unwrap_or_else(|poison| poison.into_inner());
                }
            };
            let Some((id, run)) = job else { return };
            run();
            self.finished
                .lock()
                .unwrap_or_else(|poison| poison.into_inner())
                .insert(id);
        }
    }

    /// Enqueues a closure under `id`. Returns false after shutdown.
    pub fn add(&self, id: TaskId, run: Job) -> bool {
        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            if !state.running {
                return false;
            }
            state.queue.push_back(id);
            state.jobs.insert(id, run);
        }
        self.ready.notify_one();
        true
    }

    /// Waits for `id` to finish, stealing it inline when still queued.
    ///
    /// The stolen closure runs on the calling thread; otherwise this
    /// spin-waits on the finished set and consumes the entry. Must not be
    /// called while holding a lock the task needs.
    pub fn join(&self, id: TaskId) {
        let stolen = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            state.jobs.remove(&id)
        };
        if let Some(run) = stolen {
            run();
            return;
        }
        loop {
            {
                let mut finished = self
                    .finished
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner());
                if finished.remove(&id) {
                    return;
                }
            }
            thread::yield_now();
        }
    }

    /// Non-blocking query: has `id` run to completion on a worker?
    pub fn finished(&self, id: TaskId) -> bool {
        self.finished
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .contains(&id)
    }

    /// Stops accepting work and joins the workers once the queue drains.
    pub fn shutdown(&self) {
        {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            state.running = false;
        }
        self.ready.notify_all();
        let handles = {
            let mut workers = self
                .workers
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            std::mem::take(&mut *workers)
        };
        for handle in handles {
            let _ = handle.join();
        }
    }
}

/// A unit of parallel work with a result slot.
///
/// Constructed and enqueued in one step by [`parallel`]; moves through
/// queued → running → finished. [`join`] observes the transition from any
/// state: a still-queued task is stolen and run inline exactly once, and a
/// second `join` is a no-op. Dropping an unjoined task joins it, so a task
/// never outlives the data its closure captured by reference upstream.
///
/// [`join`]: Self::join
pub struct Task<R> {
    id: TaskId,
    mode: ThreadMode,
    result: Arc<Mutex<Option<R>>>,
    thread: Option<thread::JoinHandle<()>>,
    joined: bool,
}

/// Runs `func` in parallel and returns its task handle.
pub fn parallel<R, F>(func: F, mode: ThreadMode) -> Task<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let id = TaskId::next();
    let result = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&result);
    let run = move || {
        let value = func();
        *slot.lock().unwrap_or_else(|poison| poison.into_inner()) = Some(value);
    };
    let thread = match mode {
        ThreadMode::Pooled => {
            // A refused enqueue (pool already shut down) yields an
            // already-joined task with no result.
            if !TaskPool::global().add(id, Box::new(run)) {
                return Task {
                    id,
                    mode: ThreadMode::Pooled,
                    result,
                    thread: None,
                    joined: true,
                };
            }
            None
        }
        ThreadMode::Independent => Some(
            thread::Builder::new()
                .name(format!("eleki-task-{id}"))
                .spawn(run)
                .expect("failed to spawn independent task thread"),
        ),
    };
    Task {
        id,
        mode,
        result,
        thread,
        joined: false,
    }
}

impl<R> Task<R> {
    /// Returns this task's identity.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Waits for completion and takes the result.
    ///
    /// A still-queued pooled task is executed inline on the caller; a
    /// second call returns `None` without waiting.
    pub fn join(&mut self) -> Option<R> {
        if self.joined {
            return None;
        }
        self.joined = true;
        match self.mode {
            ThreadMode::Pooled => TaskPool::global().join(self.id),
            ThreadMode::Independent => {
                if let Some(handle) = self.thread.take() {
                    let _ = handle.join();
                }
            }
        }
        self.result
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take()
    }

    /// Non-blocking completion query.
    pub fn finished(&self) -> bool {
        if self.joined {
            return true;
        }
        match self.mode {
            ThreadMode::Pooled => TaskPool::global().finished(self.id),
            ThreadMode::Independent => self
                .thread
                .as_ref()
                .map(|handle| handle.is_finished())
                .unwrap_or(true),
        }
    }
}

impl<R> Drop for Task<R> {
    fn drop(&mut self) {
        if !self.joined {
            self.join();
        }
    }
}
