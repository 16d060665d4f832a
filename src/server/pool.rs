//! Bounded worker pool
//!
//! A small core of resident threads, growth up to a hard maximum, and
//! idle expiry back toward the core. The admission queue holds a single
//! slot: once every thread is busy and the slot is taken, `submit`
//! blocks the caller. That blocking is the engine's backpressure -
//! slow workers throttle the accept loop instead of letting queued
//! work accumulate without bound.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Admission queue capacity. Deliberately one slot - see module docs.
const QUEUE_SLOTS: usize = 1;

struct PoolState {
    queue: VecDeque<Job>,
    threads: usize,
    idle: usize,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Signaled when a job lands in the queue
    job_ready: Condvar,
    /// Signaled when the queue slot frees up
    slot_free: Condvar,
}

/// Bounded worker-thread pool
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    core: usize,
    max: usize,
    idle_timeout: Duration,
}

impl WorkerPool {
    /// Create a pool with `core` resident threads, growth to `max`, and
    /// the given idle expiry for surplus threads
    pub fn new(core: usize, max: usize, idle_timeout: Duration) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::with_capacity(QUEUE_SLOTS),
                threads: 0,
                idle: 0,
                shutdown: false,
            }),
            job_ready: Condvar::new(),
            slot_free: Condvar::new(),
        });

        WorkerPool {
            shared,
            handles: Mutex::new(Vec::new()),
            core: core.max(1),
            max: max.max(core.max(1)),
            idle_timeout,
        }
    }

    /// Submit a job, blocking while the pool is saturated
    ///
    /// Returns false if the pool is shutting down and the job was not
    /// accepted. Blocking here is load-shedding by design: the caller
    /// (normally the accept loop) stalls until a worker frees up.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();

        loop {
            if state.shutdown {
                return false;
            }

            if state.queue.len() < QUEUE_SLOTS {
                state.queue.push_back(Box::new(job));
                if state.idle == 0 && state.threads < self.max {
                    self.spawn_worker(&mut state);
                }
                drop(state);
                self.shared.job_ready.notify_one();
                return true;
            }

            state = self.shared.slot_free.wait(state).unwrap();
        }
    }

    /// Live worker threads
    pub fn threads(&self) -> usize {
        self.shared.state.lock().unwrap().threads
    }

    /// Workers currently waiting for a job
    pub fn idle(&self) -> usize {
        self.shared.state.lock().unwrap().idle
    }

    fn spawn_worker(&self, state: &mut PoolState) {
        state.threads += 1;

        let shared = Arc::clone(&self.shared);
        let core = self.core;
        let idle_timeout = self.idle_timeout;

        let handle = thread::Builder::new()
            .name("hearth-worker".to_string())
            .spawn(move || worker_loop(shared, core, idle_timeout))
            .expect("failed to spawn worker thread");

        self.handles.lock().unwrap().push(handle);
    }

    /// Stop accepting work and join every worker
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
        }
        self.shared.job_ready.notify_all();
        self.shared.slot_free.notify_all();

        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>, core: usize, idle_timeout: Duration) {
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap();

            loop {
                if let Some(job) = state.queue.pop_front() {
                    shared.slot_free.notify_one();
                    break job;
                }
                if state.shutdown {
                    state.threads -= 1;
                    return;
                }

                state.idle += 1;
                let (guard, timeout) = shared
                    .job_ready
                    .wait_timeout(state, idle_timeout)
                    .unwrap();
                state = guard;
                state.idle -= 1;

                // Surplus threads expire once they sit idle past the timeout
                if timeout.timed_out() && state.queue.is_empty() && state.threads > core {
                    state.threads -= 1;
                    return;
                }
            }
        };

        // A panicking job must not take the worker down with it
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::error!("worker job panicked");
        }
    }
}
