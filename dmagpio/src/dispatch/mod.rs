//! Dispatch engine.
//!
//! The dispatcher thread drains the sample ring about once per dispatch
//! period and hands the batch to [`DispatchEngine::process_batch`], which
//! diffs consecutive level vectors and fans each change out to:
//!
//! - the alert handler of the pin (filtered by its [`Edge`]),
//! - the pin's watchdog, which is re-armed by the edge,
//! - every running notification handle whose mask covers the pin,
//! - any [`EdgeWaiter`] blocked on the pin (script `WAIT`).
//!
//! Pins with a glitch or noise filter are passed through it before the
//! diff, so every consumer above sees the filtered level.
//!
//! Watchdogs are evaluated against each sample's tick, after that sample's
//! edges, and against the dispatch tick, so an idle pin fires once per
//! period. Samples captured before a watchdog was armed never fire it. The
//! samples handler receives the whole raw batch once.
//!
//! Changes are delivered in capture order across samples and in ascending
//! pin order within one sample.

mod filter;
pub mod handlers;
pub mod notify;

pub use handlers::{AlertHandler, SamplesHandler, TimerHandler};
pub use notify::{HandleState, NotifyReader, NotifyRegistry, ReportQueue};

use crate::clock::TickSource;
use crate::sampler::SampleRing;
use crate::task::TaskHandle;
use dmagpio_common::consts::{
    HANDLER_QUEUE_DEPTH, MAX_WATCHDOG_MILLIS, USER_GPIO_COUNT, USER_GPIO_MASK,
};
use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::report::Sample;
use dmagpio_common::tick::{tick_add, tick_reached};
use dmagpio_common::types::{Edge, Level, pin_bit, user_gpio_index};
use filter::PinFilter;
use handlers::HandlerWorker;
use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info};

type AlertEvent = (u8, Level, u32);

struct AlertSlot {
    edge: Edge,
    worker: HandlerWorker<AlertEvent>,
}

struct SamplesSlot {
    bits: u64,
    worker: HandlerWorker<Vec<Sample>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct Watchdog {
    period_micros: u32,
    last_tick: u32,
}

/// Dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Batches processed.
    pub batches: u64,
    /// Samples processed.
    pub samples: u64,
    /// Pin changes observed.
    pub edges: u64,
    /// Watchdog timeouts fired.
    pub timeouts: u64,
    /// Handler events dropped because the handler's queue was full.
    pub handler_drops: u64,
}

struct DispatchState {
    baseline: Option<u64>,
    alerts: Vec<Option<AlertSlot>>,
    watchdogs: [Watchdog; USER_GPIO_COUNT],
    armed: u32,
    filters: [Option<PinFilter>; USER_GPIO_COUNT],
    filtered: u32,
    samples: Option<SamplesSlot>,
    stats: DispatchStats,
}

impl DispatchState {
    fn alert_mask(&self) -> u64 {
        self.alerts
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_some())
            .fold(0, |acc, (pin, _)| acc | pin_bit(pin as u8))
    }

    /// `sample`'s level vector with every filtered pin replaced by the
    /// level its filter shows.
    fn filter_level(&mut self, sample: &Sample) -> u64 {
        let mut level = sample.level;
        let mut pins = self.filtered;
        while pins != 0 {
            let pin = pins.trailing_zeros() as u8;
            pins &= pins - 1;
            let Some(filter) = &mut self.filters[usize::from(pin)] else {
                continue;
            };
            let bit = pin_bit(pin);
            let raw = sample.level & bit != 0;
            let shown = self.baseline.map_or(raw, |b| b & bit != 0);
            if filter.apply(raw, shown, sample.tick) {
                level |= bit;
            } else {
                level &= !bit;
            }
        }
        level
    }

    fn install_filter(&mut self, pin: u8, filter: Option<PinFilter>) {
        let bit = pin_bit(pin) as u32;
        if filter.is_some() {
            self.filtered |= bit;
        } else {
            self.filtered &= !bit;
        }
        self.filters[usize::from(pin)] = filter;
    }
}

// ─── Edge waiters ───────────────────────────────────────────────────

/// Blocks a caller until an edge occurs on one of a set of pins.
#[derive(Debug)]
pub struct EdgeWaiter {
    mask: u32,
    hits: Mutex<u32>,
    cond: Condvar,
}

impl EdgeWaiter {
    /// Pins this waiter watches.
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Wait up to `timeout` for an edge. Returns the pins that changed
    /// since the last successful wait, or `None` on timeout.
    pub fn wait(&self, timeout: Duration) -> Option<u32> {
        let deadline = Instant::now() + timeout;
        let mut hits = self.hits.lock();
        while *hits == 0 {
            if self.cond.wait_until(&mut hits, deadline).timed_out() {
                break;
            }
        }
        match std::mem::take(&mut *hits) {
            0 => None,
            bits => Some(bits),
        }
    }

    fn signal(&self, changed: u32) {
        let bits = changed & self.mask;
        if bits != 0 {
            *self.hits.lock() |= bits;
            self.cond.notify_all();
        }
    }
}

// ─── Engine ─────────────────────────────────────────────────────────

/// Fans sampled changes out to handlers, watchdogs and notifications.
pub struct DispatchEngine {
    state: Mutex<DispatchState>,
    notify: Arc<NotifyRegistry>,
    waiters: Mutex<Vec<Weak<EdgeWaiter>>>,
}

impl DispatchEngine {
    /// Create an engine publishing into `notify`.
    pub fn new(notify: Arc<NotifyRegistry>) -> Self {
        Self {
            state: Mutex::new(DispatchState {
                baseline: None,
                alerts: (0..USER_GPIO_COUNT).map(|_| None).collect(),
                watchdogs: [Watchdog::default(); USER_GPIO_COUNT],
                armed: 0,
                filters: [None; USER_GPIO_COUNT],
                filtered: 0,
                samples: None,
                stats: DispatchStats::default(),
            }),
            notify,
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Notification registry fed by this engine.
    pub fn notify(&self) -> &Arc<NotifyRegistry> {
        &self.notify
    }

    /// Register (or with `None`, clear) the alert handler of `pin`.
    ///
    /// # Errors
    /// `BadUserGpio` if `pin` is not a user pin, `InitFailed` if the
    /// handler's worker cannot start.
    pub fn set_alert(
        &self,
        pin: u32,
        edge: Edge,
        handler: Option<Arc<dyn AlertHandler>>,
    ) -> GpioResult<()> {
        let index = user_gpio_index(pin)?;
        let slot = match handler {
            Some(handler) => {
                let worker = HandlerWorker::spawn(
                    &format!("dmagpio-alert-{index}"),
                    HANDLER_QUEUE_DEPTH,
                    move |(pin, level, tick): AlertEvent| handler.on_alert(pin, level, tick),
                )?;
                Some(AlertSlot { edge, worker })
            }
            None => None,
        };
        let installed = slot.is_some();
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.alerts[usize::from(index)], slot)
        };
        // The old worker joins here, outside the dispatch lock.
        drop(previous);
        debug!("Alert on pin {} {}", index, if installed { "set" } else { "cleared" });
        Ok(())
    }

    /// Arm (or with 0, disarm) the watchdog of `pin`, starting at `now`.
    ///
    /// # Errors
    /// `BadUserGpio` or `BadWatchdogTimeout` (above 60000 ms).
    pub fn set_watchdog(&self, pin: u32, timeout_millis: u32, now: u32) -> GpioResult<()> {
        let index = user_gpio_index(pin)?;
        if timeout_millis > MAX_WATCHDOG_MILLIS {
            return Err(GpioError::BadWatchdogTimeout(timeout_millis));
        }
        let mut state = self.state.lock();
        state.watchdogs[usize::from(index)] = Watchdog {
            period_micros: timeout_millis * 1_000,
            last_tick: now,
        };
        let bit = pin_bit(index) as u32;
        if timeout_millis == 0 {
            state.armed &= !bit;
        } else {
            state.armed |= bit;
        }
        debug!("Watchdog on pin {} set to {} ms", index, timeout_millis);
        Ok(())
    }

    /// Show a level change on `pin` only once it has held for `steady` µs
    /// (0 removes the filter). Replaces a noise filter on the pin.
    ///
    /// # Errors
    /// `BadUserGpio` or `BadFilter` (`steady` above 300000).
    pub fn set_glitch_filter(&self, pin: u32, steady: u32) -> GpioResult<()> {
        let index = user_gpio_index(pin)?;
        let filter = PinFilter::glitch(steady)?;
        self.state.lock().install_filter(index, filter);
        debug!("Glitch filter on pin {} set to {} us", index, steady);
        Ok(())
    }

    /// Hide changes on `pin` until it has been quiet for `steady` µs, then
    /// show them for `active` µs (`steady` 0 removes the filter). Replaces a
    /// glitch filter on the pin.
    ///
    /// # Errors
    /// `BadUserGpio` or `BadFilter` (`steady` above 300000, `active` above
    /// 1000000).
    pub fn set_noise_filter(&self, pin: u32, steady: u32, active: u32) -> GpioResult<()> {
        let index = user_gpio_index(pin)?;
        let filter = PinFilter::noise(steady, active)?;
        self.state.lock().install_filter(index, filter);
        debug!(
            "Noise filter on pin {} set to {}/{} us",
            index, steady, active
        );
        Ok(())
    }

    /// Register (or with `None`, clear) the samples handler. `bits` selects
    /// pins beyond those already covered by alerts and notifications.
    ///
    /// # Errors
    /// `InitFailed` if the handler's worker cannot start.
    pub fn set_samples_handler(
        &self,
        handler: Option<Arc<dyn SamplesHandler>>,
        bits: u64,
    ) -> GpioResult<()> {
        let slot = match handler {
            Some(handler) => {
                let worker = HandlerWorker::spawn(
                    "dmagpio-samples",
                    HANDLER_QUEUE_DEPTH,
                    move |batch: Vec<Sample>| handler.on_samples(&batch),
                )?;
                Some(SamplesSlot { bits, worker })
            }
            None => None,
        };
        let previous = std::mem::replace(&mut self.state.lock().samples, slot);
        drop(previous);
        Ok(())
    }

    /// Waiter woken by edges on the pins in `mask`.
    pub fn edge_waiter(&self, mask: u32) -> Arc<EdgeWaiter> {
        let waiter = Arc::new(EdgeWaiter {
            mask,
            hits: Mutex::new(0),
            cond: Condvar::new(),
        });
        let mut waiters = self.waiters.lock();
        waiters.retain(|w| w.strong_count() > 0);
        waiters.push(Arc::downgrade(&waiter));
        waiter
    }

    /// Counters since start.
    pub fn stats(&self) -> DispatchStats {
        self.state.lock().stats
    }

    /// Process one batch of samples, then evaluate watchdogs at `now`.
    pub fn process_batch(&self, samples: &[Sample], now: u32) {
        let mut changed_any = 0u32;
        {
            let mut state = self.state.lock();
            let state = &mut *state;
            state.stats.batches += 1;
            state.stats.samples += samples.len() as u64;

            for sample in samples {
                let level = state.filter_level(sample);
                if let Some(baseline) = state.baseline.replace(level) {
                    let changed = ((level ^ baseline) & USER_GPIO_MASK) as u32;
                    if changed != 0 {
                        changed_any |= changed;
                        self.deliver_changes(state, changed, sample.tick, level);
                    }
                }
                if state.armed != 0 {
                    self.check_watchdogs(state, sample.tick, level);
                }
            }

            if state.armed != 0 {
                let level = state.baseline.unwrap_or(0);
                self.check_watchdogs(state, now, level);
            }

            if let Some(slot) = &state.samples {
                if !samples.is_empty() {
                    let mask = slot.bits
                        | state.alert_mask()
                        | u64::from(self.notify.active_mask());
                    let batch = samples
                        .iter()
                        .map(|s| Sample {
                            tick: s.tick,
                            level: s.level & mask,
                        })
                        .collect();
                    if !slot.worker.post(batch) {
                        state.stats.handler_drops += 1;
                    }
                }
            }
        }

        if changed_any != 0 {
            let waiters = self.waiters.lock();
            for waiter in waiters.iter().filter_map(Weak::upgrade) {
                waiter.signal(changed_any);
            }
        }
    }

    /// Fan the pins in `changed` out in ascending order, then publish one
    /// report for the sample.
    fn deliver_changes(&self, state: &mut DispatchState, changed: u32, tick: u32, level: u64) {
        let mut bits = changed;
        while bits != 0 {
            let pin = bits.trailing_zeros() as u8;
            bits &= bits - 1;
            state.stats.edges += 1;
            let pin_level = Level::from_vector(level, pin);
            let dog = &mut state.watchdogs[usize::from(pin)];
            // Samples older than the arming tick must not pull it back.
            if tick_reached(tick, dog.last_tick) {
                dog.last_tick = tick;
            }
            if let Some(slot) = &state.alerts[usize::from(pin)] {
                if slot.edge.accepts(pin_level) && !slot.worker.post((pin, pin_level, tick)) {
                    state.stats.handler_drops += 1;
                }
            }
        }
        self.notify.publish_change(changed, tick, level as u32);
    }

    fn check_watchdogs(&self, state: &mut DispatchState, tick: u32, level: u64) {
        let mut armed = state.armed;
        while armed != 0 {
            let pin = armed.trailing_zeros() as u8;
            armed &= armed - 1;
            let dog = &mut state.watchdogs[usize::from(pin)];
            let fired_at = tick_add(dog.last_tick, dog.period_micros);
            if !tick_reached(tick, fired_at) {
                continue;
            }
            dog.last_tick = fired_at;
            if tick_reached(tick, tick_add(fired_at, dog.period_micros)) {
                dog.last_tick = tick;
            }
            state.stats.timeouts += 1;
            if let Some(slot) = &state.alerts[usize::from(pin)] {
                if !slot.worker.post((pin, Level::Timeout, fired_at)) {
                    state.stats.handler_drops += 1;
                }
            }
            self.notify.publish_watchdog(pin, fired_at, level as u32);
        }
    }

    /// Drop every handler and watchdog. Handler workers are joined.
    pub fn shutdown(&self) {
        let (alerts, samples) = {
            let mut state = self.state.lock();
            state.armed = 0;
            state.filtered = 0;
            state.filters = [None; USER_GPIO_COUNT];
            let alerts: Vec<_> = state.alerts.iter_mut().filter_map(Option::take).collect();
            (alerts, state.samples.take())
        };
        drop(alerts);
        drop(samples);
    }
}

/// Start the dispatcher thread draining `ring` every `period`.
///
/// # Errors
/// `InitFailed` if the thread cannot be spawned.
pub fn spawn_dispatcher(
    engine: Arc<DispatchEngine>,
    ring: Arc<SampleRing>,
    clock: Arc<dyn TickSource>,
    period: Duration,
) -> GpioResult<TaskHandle> {
    info!("Dispatcher period {} us", period.as_micros());
    TaskHandle::spawn("dmagpio-dispatch", move |token| {
        let mut batch = Vec::with_capacity(ring.capacity());
        while !token.wait_timeout(period) {
            batch.clear();
            ring.drain_into(&mut batch);
            engine.process_batch(&batch, clock.tick());
        }
        info!("Dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmagpio_common::report::ReportFlags;

    fn engine() -> DispatchEngine {
        DispatchEngine::new(Arc::new(NotifyRegistry::new(64)))
    }

    fn recorder() -> (Arc<Mutex<Vec<AlertEvent>>>, Arc<dyn AlertHandler>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Arc<dyn AlertHandler> =
            Arc::new(move |pin: u8, level: Level, tick: u32| sink.lock().push((pin, level, tick)));
        (seen, handler)
    }

    fn settle<T>(seen: &Mutex<Vec<T>>, count: usize) {
        for _ in 0..200 {
            if seen.lock().len() >= count {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn s(tick: u32, level: u64) -> Sample {
        Sample { tick, level }
    }

    #[test]
    fn first_sample_primes_baseline() {
        let engine = engine();
        let (seen, handler) = recorder();
        engine.set_alert(3, Edge::Either, Some(handler)).unwrap();
        engine.process_batch(&[s(0, 1 << 3)], 0);
        std::thread::sleep(Duration::from_millis(30));
        assert!(seen.lock().is_empty());
        assert_eq!(engine.stats().edges, 0);
    }

    #[test]
    fn edges_follow_capture_then_pin_order() {
        let engine = engine();
        let (seen, handler) = recorder();
        let (seen2, handler2) = recorder();
        engine.set_alert(2, Edge::Either, Some(handler)).unwrap();
        engine.set_alert(5, Edge::Either, Some(handler2)).unwrap();
        engine.process_batch(
            &[s(0, 0), s(10, (1 << 2) | (1 << 5)), s(20, 1 << 5)],
            20,
        );
        settle(&seen, 2);
        settle(&seen2, 1);
        assert_eq!(
            *seen.lock(),
            vec![(2, Level::High, 10), (2, Level::Low, 20)]
        );
        assert_eq!(*seen2.lock(), vec![(5, Level::High, 10)]);
        assert_eq!(engine.stats().edges, 3);
    }

    #[test]
    fn edge_filter_applies() {
        let engine = engine();
        let (seen, handler) = recorder();
        engine.set_alert(1, Edge::Falling, Some(handler)).unwrap();
        engine.process_batch(&[s(0, 0), s(5, 2), s(9, 0), s(12, 2)], 12);
        settle(&seen, 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(*seen.lock(), vec![(1, Level::Low, 9)]);
    }

    #[test]
    fn watchdog_fires_repeatedly_on_idle_pin() {
        let engine = engine();
        let (seen, handler) = recorder();
        engine.set_alert(4, Edge::Rising, Some(handler)).unwrap();
        engine.set_watchdog(4, 10, 0).unwrap();
        engine.process_batch(&[s(0, 0)], 5_000);
        engine.process_batch(&[], 10_000);
        engine.process_batch(&[], 25_000);
        engine.process_batch(&[], 30_000);
        settle(&seen, 3);
        assert_eq!(
            *seen.lock(),
            vec![
                (4, Level::Timeout, 10_000),
                (4, Level::Timeout, 20_000),
                (4, Level::Timeout, 30_000)
            ]
        );
    }

    #[test]
    fn edge_rearms_watchdog() {
        let engine = engine();
        let (seen, handler) = recorder();
        engine.set_alert(4, Edge::Either, Some(handler)).unwrap();
        engine.set_watchdog(4, 10, 0).unwrap();
        engine.process_batch(&[s(0, 0), s(8_000, 1 << 4)], 8_000);
        engine.process_batch(&[], 15_000);
        engine.process_batch(&[], 18_000);
        settle(&seen, 2);
        assert_eq!(
            *seen.lock(),
            vec![(4, Level::High, 8_000), (4, Level::Timeout, 18_000)]
        );
    }

    #[test]
    fn stalled_watchdog_snaps_to_now() {
        let engine = engine();
        engine.set_watchdog(7, 1, 0).unwrap();
        engine.process_batch(&[], 50_000);
        engine.process_batch(&[], 50_500);
        assert_eq!(engine.stats().timeouts, 1);
        engine.process_batch(&[], 51_000);
        assert_eq!(engine.stats().timeouts, 2);
    }

    #[test]
    fn samples_before_arming_do_not_fire() {
        let engine = engine();
        let (seen, handler) = recorder();
        engine.set_alert(4, Edge::Either, Some(handler)).unwrap();
        engine.set_watchdog(4, 10, 1_000).unwrap();
        engine.process_batch(&[s(500, 0)], 1_000);
        assert_eq!(engine.stats().timeouts, 0);
        // an edge captured before arming does not move the deadline back
        engine.process_batch(&[s(800, 1 << 4)], 10_999);
        assert_eq!(engine.stats().timeouts, 0);
        engine.process_batch(&[], 11_000);
        assert_eq!(engine.stats().timeouts, 1);
        settle(&seen, 2);
        assert_eq!(
            *seen.lock(),
            vec![(4, Level::High, 800), (4, Level::Timeout, 11_000)]
        );
    }

    #[test]
    fn edge_at_deadline_wins_over_timeout() {
        let engine = engine();
        engine.set_watchdog(2, 10, 0).unwrap();
        engine.process_batch(&[s(0, 0), s(10_000, 1 << 2)], 10_000);
        assert_eq!(engine.stats().edges, 1);
        assert_eq!(engine.stats().timeouts, 0);
        engine.process_batch(&[], 20_000);
        assert_eq!(engine.stats().timeouts, 1);
    }

    #[test]
    fn watchdog_survives_tick_wrap() {
        let engine = engine();
        engine.set_watchdog(1, 10, u32::MAX - 4_000).unwrap();
        engine.process_batch(&[s(u32::MAX - 3_000, 0)], 4_000);
        assert_eq!(engine.stats().timeouts, 0);
        engine.process_batch(&[], 6_000);
        assert_eq!(engine.stats().timeouts, 1);
    }

    #[test]
    fn full_handler_queue_is_counted() {
        let engine = engine();
        let gate = Arc::new(Mutex::new(()));
        let held = gate.lock();
        let blocker = Arc::clone(&gate);
        let handler: Arc<dyn AlertHandler> = Arc::new(move |_: u8, _: Level, _: u32| {
            let _g = blocker.lock();
        });
        engine.set_alert(0, Edge::Either, Some(handler)).unwrap();
        let batch: Vec<Sample> = (0..HANDLER_QUEUE_DEPTH as u32 + 101)
            .map(|t| s(t, u64::from(t & 1)))
            .collect();
        engine.process_batch(&batch, batch.len() as u32);
        let stats = engine.stats();
        assert_eq!(stats.edges, HANDLER_QUEUE_DEPTH as u64 + 100);
        assert!(stats.handler_drops >= 99, "drops {}", stats.handler_drops);
        drop(held);
    }

    #[test]
    fn glitch_filter_hides_short_pulses() {
        let engine = engine();
        let (seen, handler) = recorder();
        engine.set_alert(3, Edge::Either, Some(handler)).unwrap();
        engine.set_glitch_filter(3, 100).unwrap();
        let bit = 1 << 3;
        engine.process_batch(
            &[s(0, 0), s(10, bit), s(40, 0), s(60, bit), s(160, bit | 1)],
            160,
        );
        settle(&seen, 1);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(*seen.lock(), vec![(3, Level::High, 160)]);
        // pin 0 is unfiltered and changed once
        assert_eq!(engine.stats().edges, 2);
    }

    #[test]
    fn noise_filter_gates_changes() {
        let engine = engine();
        let waiter = engine.edge_waiter(1 << 5);
        engine.set_noise_filter(5, 100, 50).unwrap();
        let bit = 1 << 5;
        engine.process_batch(&[s(0, 0), s(20, bit), s(60, 0), s(160, 0)], 160);
        assert_eq!(waiter.wait(Duration::from_millis(5)), None);
        engine.process_batch(&[s(170, bit)], 170);
        assert_eq!(waiter.wait(Duration::from_millis(10)), Some(bit as u32));
    }

    #[test]
    fn filter_bounds_and_removal() {
        let engine = engine();
        assert_eq!(
            engine.set_glitch_filter(3, 300_001),
            Err(GpioError::BadFilter(300_001))
        );
        assert_eq!(
            engine.set_noise_filter(3, 10, 1_000_001),
            Err(GpioError::BadFilter(1_000_001))
        );
        assert_eq!(engine.set_glitch_filter(40, 10), Err(GpioError::BadUserGpio(40)));
        engine.set_glitch_filter(3, 1_000).unwrap();
        engine.set_glitch_filter(3, 0).unwrap();
        engine.process_batch(&[s(0, 0), s(1, 1 << 3)], 1);
        assert_eq!(engine.stats().edges, 1);
    }

    #[test]
    fn watchdog_bounds() {
        let engine = engine();
        assert_eq!(
            engine.set_watchdog(3, 60_001, 0),
            Err(GpioError::BadWatchdogTimeout(60_001))
        );
        assert_eq!(engine.set_watchdog(32, 10, 0), Err(GpioError::BadUserGpio(32)));
        engine.set_watchdog(3, 10, 0).unwrap();
        engine.set_watchdog(3, 0, 0).unwrap();
        engine.process_batch(&[], 1_000_000);
        assert_eq!(engine.stats().timeouts, 0);
    }

    #[test]
    fn notifications_carry_watchdog_flags() {
        let engine = engine();
        let notify = Arc::clone(engine.notify());
        let h = notify.open().unwrap();
        notify.begin(h, 1 << 6).unwrap();
        engine.set_watchdog(6, 5, 0).unwrap();
        engine.process_batch(&[s(0, 0), s(100, 1 << 6), s(200, (1 << 6) | 1)], 6_000);
        let mut reader = notify.reader(h).unwrap();
        let edge = reader.try_read_report().unwrap();
        assert_eq!((edge.seqno, edge.tick, edge.level), (0, 100, 1 << 6));
        // pin 0 is outside the mask and produces no report
        let timeout = reader.try_read_report().unwrap();
        assert_eq!(timeout.seqno, 1);
        assert!(timeout.report_flags().contains(ReportFlags::WATCHDOG));
        assert_eq!(timeout.watchdog_pin(), Some(6));
        assert_eq!(timeout.tick, 5_100);
        assert!(reader.try_read_report().is_none());
    }

    #[test]
    fn samples_handler_sees_masked_batch() {
        let engine = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Arc<dyn SamplesHandler> =
            Arc::new(move |batch: &[Sample]| sink.lock().extend_from_slice(batch));
        engine.set_samples_handler(Some(handler), 0b1).unwrap();
        engine.process_batch(&[s(1, 0b111), s(2, 0b110)], 2);
        settle(&seen, 2);
        assert_eq!(*seen.lock(), vec![s(1, 0b1), s(2, 0)]);
    }

    #[test]
    fn waiters_collect_changed_bits() {
        let engine = engine();
        let waiter = engine.edge_waiter(0b1100);
        engine.process_batch(&[s(0, 0), s(1, 0b0101)], 1);
        assert_eq!(waiter.wait(Duration::from_millis(10)), Some(0b0100));
        assert_eq!(waiter.wait(Duration::from_millis(10)), None);
    }

    #[test]
    fn cleared_alert_stops_delivery() {
        let engine = engine();
        let (seen, handler) = recorder();
        engine.set_alert(0, Edge::Either, Some(handler)).unwrap();
        engine.set_alert(0, Edge::Either, None).unwrap();
        engine.process_batch(&[s(0, 0), s(1, 1)], 1);
        std::thread::sleep(Duration::from_millis(20));
        assert!(seen.lock().is_empty());
    }
}
