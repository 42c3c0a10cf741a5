//! Pulse pool: pending pulses awaiting compilation.
//!
//! Each add merges the new pulses into the pool by absolute time. Pulses
//! from the two sequences that start at the same instant are combined into
//! one pulse whose masks and flags are the union of both.
//!
//! Failed adds leave the pool untouched.

use dmagpio_common::consts::{
    MAX_USER_GPIO, WAVE_MAX_BAUD, WAVE_MAX_CHARS, WAVE_MAX_MICROS, WAVE_MIN_BAUD,
};
use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::pulse::{RawPulse, WaveFlags};
use dmagpio_common::types::pin_bit;

/// A pulse placed at an absolute offset from the start of the waveform.
#[derive(Debug, Clone, Copy)]
struct Timed {
    at: u64,
    set: u64,
    clear: u64,
    flags: WaveFlags,
}

/// Bounded pool of pending pulses, kept in time order.
#[derive(Debug, Clone)]
pub struct PulsePool {
    pulses: Vec<RawPulse>,
    max_pulses: usize,
}

impl PulsePool {
    /// Create an empty pool holding at most `max_pulses`.
    pub fn new(max_pulses: usize) -> Self {
        Self {
            pulses: Vec::new(),
            max_pulses,
        }
    }

    /// Pulses currently in the pool.
    pub fn pulses(&self) -> &[RawPulse] {
        &self.pulses
    }

    /// Number of pulses.
    pub fn len(&self) -> usize {
        self.pulses.len()
    }

    /// True if no pulse is pending.
    pub fn is_empty(&self) -> bool {
        self.pulses.is_empty()
    }

    /// Pool bound.
    pub fn max_pulses(&self) -> usize {
        self.max_pulses
    }

    /// Total duration of the pool.
    pub fn total_micros(&self) -> u64 {
        self.pulses.iter().map(|p| u64::from(p.delay_micros)).sum()
    }

    /// Drop every pending pulse.
    pub fn clear(&mut self) {
        self.pulses.clear();
    }

    /// Merge `added` into the pool. Returns the new pulse count.
    ///
    /// # Errors
    /// `TooManyPulses` or `TooManyMicros`; the pool is unchanged on error.
    pub fn add(&mut self, added: &[RawPulse]) -> GpioResult<usize> {
        let added: Vec<RawPulse> = added.iter().copied().filter(|p| !p.is_empty()).collect();
        if added.is_empty() {
            return Ok(self.pulses.len());
        }
        let merged = if self.pulses.is_empty() {
            added
        } else {
            merge(&self.pulses, &added)
        };
        if merged.len() > self.max_pulses {
            return Err(GpioError::TooManyPulses);
        }
        let micros: u64 = merged.iter().map(|p| u64::from(p.delay_micros)).sum();
        if micros > WAVE_MAX_MICROS {
            return Err(GpioError::TooManyMicros);
        }
        self.pulses = merged;
        Ok(self.pulses.len())
    }

    /// Merge bit-banged serial data for `pin` starting `offset` µs into the
    /// waveform. Returns the new pulse count.
    ///
    /// # Errors
    /// `BadUserGpio`, `BadWaveBaud`, `TooManyChars`, `BadSerialOffset`, or
    /// any error of [`add`](Self::add).
    pub fn add_serial(
        &mut self,
        pin: u32,
        baud: u32,
        offset: u32,
        data: &[u8],
    ) -> GpioResult<usize> {
        if pin > MAX_USER_GPIO {
            return Err(GpioError::BadUserGpio(pin));
        }
        if !(WAVE_MIN_BAUD..=WAVE_MAX_BAUD).contains(&baud) {
            return Err(GpioError::BadWaveBaud(baud));
        }
        if data.len() > WAVE_MAX_CHARS {
            return Err(GpioError::TooManyChars);
        }
        if u64::from(offset) > WAVE_MAX_MICROS {
            return Err(GpioError::BadSerialOffset(offset));
        }
        if data.is_empty() {
            return Ok(self.pulses.len());
        }
        let pulses = super::serial::frame_pulses(pin as u8, baud, offset, data);
        self.add(&pulses)
    }
}

fn timeline(pulses: &[RawPulse]) -> (Vec<Timed>, u64) {
    let mut at = 0u64;
    let mut out = Vec::with_capacity(pulses.len());
    for p in pulses {
        out.push(Timed {
            at,
            set: p.set,
            clear: p.clear,
            flags: p.flags,
        });
        at += u64::from(p.delay_micros);
    }
    (out, at)
}

/// Merge two pulse sequences by absolute time.
///
/// Pulses of different sequences starting at the same instant are unioned;
/// zero-delay pulses within one sequence stay separate. The result lasts as
/// long as the longer input.
pub fn merge(a: &[RawPulse], b: &[RawPulse]) -> Vec<RawPulse> {
    let (ta, end_a) = timeline(a);
    let (tb, end_b) = timeline(b);
    let end = end_a.max(end_b);

    let mut events: Vec<Timed> = Vec::with_capacity(ta.len() + tb.len());
    let (mut i, mut j) = (0, 0);
    while i < ta.len() || j < tb.len() {
        let next = match (ta.get(i), tb.get(j)) {
            (Some(x), Some(y)) if x.at == y.at => {
                i += 1;
                j += 1;
                Timed {
                    at: x.at,
                    set: x.set | y.set,
                    clear: x.clear | y.clear,
                    flags: x.flags | y.flags,
                }
            }
            (Some(x), Some(y)) if x.at < y.at => {
                i += 1;
                *x
            }
            (Some(_), Some(y)) => {
                j += 1;
                *y
            }
            (Some(x), None) => {
                i += 1;
                *x
            }
            (None, Some(y)) => {
                j += 1;
                *y
            }
            (None, None) => break,
        };
        events.push(next);
    }

    let mut out = Vec::with_capacity(events.len());
    for (k, ev) in events.iter().enumerate() {
        let until = events.get(k + 1).map_or(end, |n| n.at);
        out.push(RawPulse::new(
            ev.set,
            ev.clear,
            u32::try_from(until - ev.at).unwrap_or(u32::MAX),
            ev.flags,
        ));
    }
    out
}

/// Mask of every pin touched by `pulses`.
pub fn touched_pins(pulses: &[RawPulse]) -> u64 {
    pulses.iter().fold(0, |acc, p| acc | p.set | p.clear)
}

/// Convenience: a single-pin square wave of `cycles` periods.
pub fn square_wave(pin: u8, high_micros: u32, low_micros: u32, cycles: usize) -> Vec<RawPulse> {
    let bit = pin_bit(pin);
    (0..cycles)
        .flat_map(|_| {
            [
                RawPulse::new(bit, 0, high_micros, WaveFlags::empty()),
                RawPulse::new(0, bit, low_micros, WaveFlags::empty()),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dmagpio_common::pulse::Pulse;

    fn raw(set: u64, clear: u64, delay: u32) -> RawPulse {
        Pulse::new(set, clear, delay).into()
    }

    #[test]
    fn first_add_takes_pulses_verbatim() {
        let mut pool = PulsePool::new(100);
        let count = pool.add(&[raw(1, 0, 10), raw(0, 1, 20)]).unwrap();
        assert_eq!(count, 2);
        assert_eq!(pool.total_micros(), 30);
    }

    #[test]
    fn simultaneous_masks_are_unioned() {
        let mut pool = PulsePool::new(100);
        pool.add(&[raw(0b01, 0, 10), raw(0, 0b01, 10)]).unwrap();
        pool.add(&[raw(0b10, 0, 10), raw(0, 0b10, 10)]).unwrap();
        assert_eq!(
            pool.pulses(),
            &[raw(0b11, 0, 10), raw(0, 0b11, 10)],
            "equal instants merge into one pulse"
        );
    }

    #[test]
    fn interleaved_sequences_keep_time_order() {
        let a = [raw(1, 0, 10), raw(0, 1, 10)];
        let b = [raw(0, 0, 5), raw(2, 0, 10), raw(0, 2, 10)];
        let merged = merge(&a, &b);
        // events at 0 (a set1 + b delay), 5 (b set2), 10 (a clear1), 15 (b clear2)
        assert_eq!(
            merged,
            vec![raw(1, 0, 5), raw(2, 0, 5), raw(0, 1, 5), raw(0, 2, 10)]
        );
        let micros: u64 = merged.iter().map(|p| u64::from(p.delay_micros)).sum();
        assert_eq!(micros, 25);
    }

    #[test]
    fn empty_pulses_are_ignored() {
        let mut pool = PulsePool::new(100);
        assert_eq!(pool.add(&[RawPulse::default()]).unwrap(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn overflow_rolls_back() {
        let mut pool = PulsePool::new(3);
        pool.add(&[raw(1, 0, 10), raw(0, 1, 10)]).unwrap();
        let before = pool.pulses().to_vec();
        let err = pool.add(&[raw(2, 0, 3), raw(0, 2, 3)]).unwrap_err();
        assert_eq!(err, GpioError::TooManyPulses);
        assert_eq!(pool.pulses(), before.as_slice());
    }

    #[test]
    fn duration_limit_rolls_back() {
        let mut pool = PulsePool::new(10);
        let long = u32::MAX;
        assert_eq!(
            pool.add(&[raw(1, 0, long)]).unwrap_err(),
            GpioError::TooManyMicros
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn serial_validation() {
        let mut pool = PulsePool::new(1000);
        assert_eq!(
            pool.add_serial(32, 9600, 0, b"x"),
            Err(GpioError::BadUserGpio(32))
        );
        assert_eq!(
            pool.add_serial(4, 50, 0, b"x"),
            Err(GpioError::BadWaveBaud(50))
        );
        assert_eq!(
            pool.add_serial(4, 9600, 0, &[0u8; 1025]),
            Err(GpioError::TooManyChars)
        );
        assert_eq!(
            pool.add_serial(4, 9600, u32::MAX, b"x"),
            Err(GpioError::BadSerialOffset(u32::MAX))
        );
        assert!(pool.is_empty());
    }

    #[test]
    fn two_serial_streams_coexist() {
        let mut pool = PulsePool::new(1000);
        pool.add_serial(4, 9600, 0, b"U").unwrap();
        pool.add_serial(5, 19200, 100, b"U").unwrap();
        let pins = touched_pins(pool.pulses());
        assert_eq!(pins, pin_bit(4) | pin_bit(5));
        // 10 bits at 9600 baud
        assert_eq!(pool.total_micros(), 1042);
    }

    #[test]
    fn square_wave_shape() {
        let wave = square_wave(3, 100, 300, 2);
        assert_eq!(wave.len(), 4);
        assert_eq!(wave[0].set, 8);
        assert_eq!(wave[1].clear, 8);
    }
}
