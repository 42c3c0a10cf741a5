//! Periodic timers.
//!
//! Ten independent slots, each a supervised task calling its handler once
//! per period. Deadlines advance by whole periods so the schedule does not
//! drift with handler run time.

use crate::dispatch::TimerHandler;
use crate::task::TaskHandle;
use dmagpio_common::consts::{MAX_TIMER_MILLIS, MIN_TIMER_MILLIS, TIMER_COUNT};
use dmagpio_common::error::{GpioError, GpioResult};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Fixed set of periodic timers.
pub struct TimerBank {
    slots: Mutex<Vec<Option<TaskHandle>>>,
}

impl TimerBank {
    /// Create a bank with every timer idle.
    pub fn new() -> Self {
        Self {
            slots: Mutex::new((0..TIMER_COUNT).map(|_| None).collect()),
        }
    }

    /// Start timer `timer` with `handler` every `millis`, replacing any
    /// previous handler. `None` cancels the timer.
    ///
    /// # Errors
    /// `BadTimer` for an index above 9, `BadMs` for a period outside
    /// 10..=60000 ms, `InitFailed` if the thread cannot start.
    pub fn set_timer(
        &self,
        timer: u32,
        millis: u32,
        handler: Option<Arc<dyn TimerHandler>>,
    ) -> GpioResult<()> {
        let index = timer as usize;
        if index >= TIMER_COUNT {
            return Err(GpioError::BadTimer(timer));
        }
        let task = match handler {
            Some(handler) => {
                if !(MIN_TIMER_MILLIS..=MAX_TIMER_MILLIS).contains(&millis) {
                    return Err(GpioError::BadMs(millis));
                }
                let period = Duration::from_millis(u64::from(millis));
                Some(TaskHandle::spawn(
                    &format!("dmagpio-timer-{timer}"),
                    move |token| {
                        let mut next = Instant::now() + period;
                        loop {
                            let now = Instant::now();
                            if next > now && token.wait_timeout(next - now) {
                                break;
                            }
                            if token.is_stopped() {
                                break;
                            }
                            handler.on_timer();
                            next += period;
                        }
                    },
                )?)
            }
            None => None,
        };
        let armed = task.is_some();
        let previous = std::mem::replace(&mut self.slots.lock()[index], task);
        drop(previous);
        debug!("Timer {} {}", timer, if armed { "armed" } else { "cancelled" });
        Ok(())
    }

    /// True if timer `timer` is running.
    pub fn is_active(&self, timer: u32) -> bool {
        self.slots
            .lock()
            .get(timer as usize)
            .is_some_and(Option::is_some)
    }

    /// Cancel every timer.
    pub fn cancel_all(&self) {
        let tasks: Vec<TaskHandle> = self.slots.lock().iter_mut().filter_map(Option::take).collect();
        drop(tasks);
    }
}

impl Default for TimerBank {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn rejects_bad_slots_and_periods() {
        let bank = TimerBank::new();
        let noop: Arc<dyn TimerHandler> = Arc::new(|| {});
        assert_eq!(
            bank.set_timer(10, 100, Some(Arc::clone(&noop))),
            Err(GpioError::BadTimer(10))
        );
        assert_eq!(
            bank.set_timer(0, 9, Some(Arc::clone(&noop))),
            Err(GpioError::BadMs(9))
        );
        assert_eq!(
            bank.set_timer(0, 60_001, Some(noop)),
            Err(GpioError::BadMs(60_001))
        );
        assert!(!bank.is_active(0));
    }

    #[test]
    fn fires_periodically_until_cancelled() {
        let bank = TimerBank::new();
        let count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&count);
        bank.set_timer(3, 10, Some(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })))
        .unwrap();
        assert!(bank.is_active(3));
        std::thread::sleep(Duration::from_millis(75));
        bank.set_timer(3, 0, None).unwrap();
        let fired = count.load(Ordering::SeqCst);
        assert!((3..=9).contains(&fired), "fired {fired}");
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), fired);
        assert!(!bank.is_active(3));
    }
}
