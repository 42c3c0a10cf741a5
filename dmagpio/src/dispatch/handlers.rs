//! Handler capabilities and their delivery workers.
//!
//! Every registered alert or samples handler gets its own worker thread fed
//! by a bounded channel. Dispatch only ever `try_send`s, so a slow handler
//! delays its own stream and nothing else; when its channel is full the
//! event is dropped and counted in [`DispatchStats::handler_drops`].
//!
//! Posting happens with the dispatch lock held, in the middle of a batch
//! that also feeds notification queues, watchdogs and edge waiters. A
//! handler that blocked the dispatcher would stall all of them for every
//! pin, and the sample ring would overwrite samples meanwhile. Dropping
//! loses events for the slow handler only, and the count tells its owner.
//!
//! [`DispatchStats::handler_drops`]: super::DispatchStats::handler_drops

use crate::task::TaskHandle;
use dmagpio_common::error::GpioResult;
use dmagpio_common::report::Sample;
use dmagpio_common::types::Level;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;
use tracing::warn;

/// Receives edge and watchdog events for one pin.
pub trait AlertHandler: Send + Sync + 'static {
    /// Called with the pin, its new level (or `Timeout`) and the tick.
    fn on_alert(&self, pin: u8, level: Level, tick: u32);
}

impl<F> AlertHandler for F
where
    F: Fn(u8, Level, u32) + Send + Sync + 'static,
{
    fn on_alert(&self, pin: u8, level: Level, tick: u32) {
        self(pin, level, tick)
    }
}

/// Receives batches of raw samples.
pub trait SamplesHandler: Send + Sync + 'static {
    /// Called once per dispatch batch with the batch's samples.
    fn on_samples(&self, samples: &[Sample]);
}

impl<F> SamplesHandler for F
where
    F: Fn(&[Sample]) + Send + Sync + 'static,
{
    fn on_samples(&self, samples: &[Sample]) {
        self(samples)
    }
}

/// Receives periodic timer ticks.
pub trait TimerHandler: Send + Sync + 'static {
    /// Called once per timer period.
    fn on_timer(&self);
}

impl<F> TimerHandler for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn on_timer(&self) {
        self()
    }
}

const RECV_POLL: Duration = Duration::from_millis(50);

/// Thread delivering events of type `E` to one handler.
///
/// Field order matters: the sender drops first so the worker sees the
/// channel close before the task handle joins it.
pub(crate) struct HandlerWorker<E: Send + 'static> {
    tx: SyncSender<E>,
    dropped: AtomicU64,
    label: String,
    _task: TaskHandle,
}

impl<E: Send + 'static> HandlerWorker<E> {
    /// Spawn a worker calling `deliver` for each posted event.
    pub(crate) fn spawn<D>(label: &str, depth: usize, mut deliver: D) -> GpioResult<Self>
    where
        D: FnMut(E) + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<E>(depth.max(1));
        let task = TaskHandle::spawn(label, move |token| {
            loop {
                match rx.recv_timeout(RECV_POLL) {
                    Ok(event) => deliver(event),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
                if token.is_stopped() {
                    break;
                }
            }
        })?;
        Ok(Self {
            tx,
            dropped: AtomicU64::new(0),
            label: label.to_string(),
            _task: task,
        })
    }

    /// Queue `event` without blocking. Returns `false` if it was dropped;
    /// the caller counts the drop.
    pub(crate) fn post(&self, event: E) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if n.is_power_of_two() {
                    warn!("Handler '{}' lagging: {} events dropped", self.label, n);
                }
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn closures_are_handlers() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Arc<dyn AlertHandler> =
            Arc::new(move |pin: u8, level: Level, tick: u32| sink.lock().push((pin, level, tick)));
        handler.on_alert(4, Level::High, 99);
        assert_eq!(*seen.lock(), vec![(4, Level::High, 99)]);
    }

    #[test]
    fn worker_delivers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let worker = HandlerWorker::spawn("test-worker", 16, move |v: u32| sink.lock().push(v)).unwrap();
        for v in 0..10 {
            assert!(worker.post(v));
        }
        for _ in 0..200 {
            if seen.lock().len() == 10 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock();
        let blocker = Arc::clone(&gate);
        let worker = HandlerWorker::spawn("test-slow", 2, move |_: u32| {
            let _g = blocker.lock();
        })
        .unwrap();
        let accepted = (0..20).filter(|&v| worker.post(v)).count();
        assert!(accepted <= 3, "accepted {accepted}");
        assert!(worker.dropped.load(Ordering::Relaxed) >= 17);
        drop(held);
    }
}
