//! Periodic level sampler.
//!
//! A dedicated thread snapshots the level vector every sample period and
//! appends `(tick, levels)` to a bounded ring. When the dispatch side falls
//! behind, the oldest samples are overwritten; the sampler never blocks on
//! its consumer.

use crate::clock::TickSource;
use crate::rt;
use crate::task::TaskHandle;
use dmagpio_common::config::SamplingConfig;
use dmagpio_common::error::GpioResult;
use dmagpio_common::hal::GpioBackend;
use dmagpio_common::report::Sample;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug)]
struct RingInner {
    samples: VecDeque<Sample>,
    overwritten: u64,
}

/// Bounded sample buffer with drop-oldest overflow.
#[derive(Debug)]
pub struct SampleRing {
    inner: Mutex<RingInner>,
    capacity: usize,
}

impl SampleRing {
    /// Create a ring holding `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(RingInner {
                samples: VecDeque::with_capacity(capacity),
                overwritten: 0,
            }),
            capacity,
        }
    }

    /// Append a sample, overwriting the oldest when full.
    pub fn push(&self, sample: Sample) {
        let mut inner = self.inner.lock();
        if inner.samples.len() == self.capacity {
            inner.samples.pop_front();
            inner.overwritten += 1;
            let n = inner.overwritten;
            if n.is_power_of_two() {
                warn!("Sample ring overrun: {} samples overwritten", n);
            }
        }
        inner.samples.push_back(sample);
    }

    /// Move every buffered sample into `out`, oldest first.
    pub fn drain_into(&self, out: &mut Vec<Sample>) {
        let mut inner = self.inner.lock();
        out.extend(inner.samples.drain(..));
    }

    /// Buffered samples.
    pub fn len(&self) -> usize {
        self.inner.lock().samples.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring size.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples lost to overwrite since creation.
    pub fn overwritten(&self) -> u64 {
        self.inner.lock().overwritten
    }
}

/// Start the sampler thread.
///
/// The period is paced with a running deadline; if the thread is delayed by
/// more than a hundred periods it re-bases instead of bursting.
///
/// # Errors
/// `InitFailed` if the thread cannot be spawned.
pub fn spawn_sampler(
    config: &SamplingConfig,
    backend: Arc<dyn GpioBackend>,
    clock: Arc<dyn TickSource>,
    ring: Arc<SampleRing>,
) -> GpioResult<TaskHandle> {
    let period = Duration::from_micros(u64::from(config.sample_micros));
    let realtime = config.realtime.then_some(config.realtime_priority);
    info!(
        "Sampler period {}us, ring {} samples",
        config.sample_micros,
        ring.capacity()
    );
    TaskHandle::spawn("dmagpio-sampler", move |token| {
        if let Some(priority) = realtime {
            rt::promote_current_thread(priority);
        }
        let mut next = Instant::now();
        while !token.is_stopped() {
            let level = backend.read_levels();
            let tick = clock.tick();
            ring.push(Sample { tick, level });

            next += period;
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            } else if now - next > period * 100 {
                next = now;
            }
        }
        info!("Sampler stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MonotonicClock;
    use crate::drivers::simulation::SimulationBackend;
    use dmagpio_common::tick::tick_diff;

    #[test]
    fn ring_drops_oldest() {
        let ring = SampleRing::new(3);
        for tick in 0..5 {
            ring.push(Sample { tick, level: 0 });
        }
        assert_eq!(ring.overwritten(), 2);
        let mut out = Vec::new();
        ring.drain_into(&mut out);
        let ticks: Vec<u32> = out.iter().map(|s| s.tick).collect();
        assert_eq!(ticks, vec![2, 3, 4]);
        assert!(ring.is_empty());
    }

    #[test]
    fn sampler_captures_time_ordered_levels() {
        let sim = Arc::new(SimulationBackend::new());
        let ring = Arc::new(SampleRing::new(100_000));
        sim.drive(3, true);
        let task = spawn_sampler(
            &SamplingConfig::default(),
            sim.clone(),
            Arc::new(MonotonicClock::new()),
            Arc::clone(&ring),
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(20));
        task.stop();

        let mut out = Vec::new();
        ring.drain_into(&mut out);
        assert!(out.len() > 5, "only {} samples", out.len());
        assert!(out.iter().all(|s| s.level & (1 << 3) != 0));
        assert!(
            out.windows(2)
                .all(|w| tick_diff(w[1].tick, w[0].tick) < 1_000_000)
        );
    }
}
