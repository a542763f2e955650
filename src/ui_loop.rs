//! Single-threaded UI event loop
//!
//! Workers never touch UI state directly. They post closures through a
//! `UiHandle`; the thread that owns the `UiLoop` runs them when it pumps.
//! A windowing toolkit would call `pump` from its idle or timer hook.

use std::sync::mpsc;
use std::time::{Duration, Instant};

type Task = Box<dyn FnOnce() + Send>;

/// Poll interval used by `run_until` while waiting for work
const IDLE_POLL: Duration = Duration::from_millis(100);

/// The UI thread's task queue
pub struct UiLoop {
    tx: mpsc::Sender<Task>,
    rx: mpsc::Receiver<Task>,
}

/// Cloneable sender that workers use to reach the UI thread
#[derive(Clone)]
pub struct UiHandle {
    tx: mpsc::Sender<Task>,
}

impl UiHandle {
    /// Queue `task` to run on the UI thread
    ///
    /// Returns false if the loop has been dropped.
    pub fn post<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.tx.send(Box::new(task)).is_ok()
    }
}

impl Default for UiLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl UiLoop {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        Self { tx, rx }
    }

    pub fn handle(&self) -> UiHandle {
        UiHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run every queued task on the calling thread
    pub fn pump(&self) -> usize {
        let mut ran = 0;
        while let Ok(task) = self.rx.try_recv() {
            task();
            ran += 1;
        }
        ran
    }

    /// Wait up to `wait` for a task, then drain the queue
    pub fn pump_for(&self, wait: Duration) -> usize {
        match self.rx.recv_timeout(wait) {
            Ok(task) => {
                task();
                1 + self.pump()
            }
            Err(_) => 0,
        }
    }

    /// Keep pumping until `done` holds or `timeout` passes
    ///
    /// Returns whether `done` was satisfied.
    pub fn run_until<P>(&self, mut done: P, timeout: Duration) -> bool
    where
        P: FnMut() -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_for((deadline - now).min(IDLE_POLL));
        }
    }
}
