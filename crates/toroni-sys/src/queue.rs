//! The two work-queue shapes the topic layer is built on: a multi-producer
//! staging queue that tells its single drainer exactly when to (re)start,
//! and a single-consumer serial queue that runs arbitrary closures in order
//! on a dedicated thread.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

/// A staging area for items produced by many threads and drained by one
/// worker at a time. The queue itself never spawns that worker; it only
/// tells callers, via the return value of [`MpscStagingQueue::enqueue`],
/// whether *this* call is the one that must start it.
pub struct MpscStagingQueue<T> {
    state: Mutex<MpscState<T>>,
}

struct MpscState<T> {
    items: Vec<T>,
    drainer_running: bool,
}

impl<T> Default for MpscStagingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> MpscStagingQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MpscState {
                items: Vec::new(),
                drainer_running: false,
            }),
        }
    }

    /// Stages `item`. Returns `true` exactly when this call found no
    /// drainer running and armed one — the caller must then schedule a
    /// drain loop. Every other concurrent enqueue while a drainer is
    /// running returns `false`.
    pub fn enqueue(&self, item: T) -> bool {
        let mut state = self.state.lock().unwrap();
        state.items.push(item);
        if state.drainer_running {
            false
        } else {
            state.drainer_running = true;
            true
        }
    }

    /// Takes every currently staged item. An empty result means the queue
    /// was found empty at the instant of the call, and that same instant
    /// disarms the drainer flag — the next `enqueue` after this point
    /// returns `true` again.
    pub fn drain(&self) -> Vec<T> {
        let mut state = self.state.lock().unwrap();
        if state.items.is_empty() {
            state.drainer_running = false;
            return Vec::new();
        }
        std::mem::take(&mut state.items)
    }
}

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A FIFO of closures run one at a time, in submission order, on a
/// dedicated thread. A panicking job is caught so it cannot take the queue
/// (or any other pending job) down with it.
pub struct SerialWorkQueue {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

struct Shared {
    mutex: Mutex<Inner>,
    condvar: Condvar,
}

struct Inner {
    jobs: VecDeque<Job>,
    stopping: bool,
}

impl SerialWorkQueue {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let shared = Arc::new(Shared {
            mutex: Mutex::new(Inner {
                jobs: VecDeque::new(),
                stopping: false,
            }),
            condvar: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let thread_name = name.clone();
        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || Self::run(worker_shared, thread_name))
            .expect("failed to spawn serial work queue thread");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    fn run(shared: Arc<Shared>, name: String) {
        loop {
            let job = {
                let mut inner = shared.mutex.lock().unwrap();
                loop {
                    if let Some(job) = inner.jobs.pop_front() {
                        break Some(job);
                    }
                    if inner.stopping {
                        break None;
                    }
                    inner = shared.condvar.wait(inner).unwrap();
                }
            };
            match job {
                Some(job) => {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::warn!(queue = %name, "work item panicked; queue continues");
                    }
                }
                None => return,
            }
        }
    }

    /// Appends `job` to the tail of the queue; it runs after every job
    /// already enqueued.
    pub fn enqueue<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.mutex.lock().unwrap();
        inner.jobs.push_back(Box::new(job));
        self.shared.condvar.notify_one();
    }
}

impl Drop for SerialWorkQueue {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.mutex.lock().unwrap();
            inner.stopping = true;
        }
        self.shared.condvar.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
