//! Supervised worker threads.
//!
//! A [`TaskHandle`] owns a named thread and a stop signal. The thread body
//! receives a [`StopToken`] and is expected to return promptly once it
//! observes a stop request. Dropping the handle requests stop and joins.

use dmagpio_common::error::{GpioError, GpioResult};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct TaskSignal {
    stop: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

/// Stop request observed by a task body.
#[derive(Debug, Clone)]
pub struct StopToken(Arc<TaskSignal>);

impl StopToken {
    /// True once stop has been requested.
    pub fn is_stopped(&self) -> bool {
        self.0.stop.load(Ordering::Acquire)
    }

    /// Sleep up to `timeout`, waking early on a stop request.
    ///
    /// Returns `true` if stop was requested.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut guard = self.0.lock.lock();
        if self.is_stopped() {
            return true;
        }
        self.0.cond.wait_for(&mut guard, timeout);
        self.is_stopped()
    }
}

/// Handle to a supervised thread.
#[derive(Debug)]
pub struct TaskHandle {
    name: String,
    signal: Arc<TaskSignal>,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `body` on a new thread named `name`.
    ///
    /// # Errors
    /// Returns `GpioError::InitFailed` if the OS refuses the thread.
    pub fn spawn<F>(name: &str, body: F) -> GpioResult<Self>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let signal = Arc::new(TaskSignal::default());
        let token = StopToken(Arc::clone(&signal));
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(token))
            .map_err(|e| GpioError::InitFailed(format!("spawn {name}: {e}")))?;
        debug!("Task '{}' started", name);
        Ok(Self {
            name: name.to_string(),
            signal,
            join: Some(join),
        })
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the task to stop without waiting.
    pub fn request_stop(&self) {
        let _guard = self.signal.lock.lock();
        self.signal.stop.store(true, Ordering::Release);
        self.signal.cond.notify_all();
    }

    /// True once the thread body has returned.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }

    /// Request stop and wait for the thread to exit.
    pub fn stop(mut self) {
        self.request_stop();
        self.join_inner();
    }

    /// Wait for the body to return on its own.
    pub fn join(mut self) {
        self.join_inner();
    }

    fn join_inner(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        // A task tearing itself down cannot join its own thread.
        if join.thread().id() == thread::current().id() {
            return;
        }
        if join.join().is_err() {
            warn!("Task '{}' panicked", self.name);
        } else {
            debug!("Task '{}' stopped", self.name);
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.request_stop();
        self.join_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn stop_wakes_a_waiting_task() {
        let count = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&count);
        let task = TaskHandle::spawn("test-loop", move |token| {
            while !token.wait_timeout(Duration::from_secs(10)) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap();
        assert_eq!(task.name(), "test-loop");
        let started = std::time::Instant::now();
        task.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn finished_after_body_returns() {
        let task = TaskHandle::spawn("test-once", |_token| {}).unwrap();
        for _ in 0..100 {
            if task.is_finished() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(task.is_finished());
    }

    #[test]
    fn join_waits_for_body() {
        let count = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&count);
        let task = TaskHandle::spawn("test-join", move |_token| {
            thread::sleep(Duration::from_millis(20));
            seen.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        task.join();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_joins() {
        let flag = Arc::new(AtomicBool::new(false));
        let done = Arc::clone(&flag);
        {
            let _task = TaskHandle::spawn("test-drop", move |token| {
                while !token.wait_timeout(Duration::from_millis(5)) {}
                done.store(true, Ordering::SeqCst);
            })
            .unwrap();
        }
        assert!(flag.load(Ordering::SeqCst));
    }
}
