//! Bit-banged serial framing.
//!
//! 8N1 frames: start bit (low), eight data bits LSB first, stop bit (high).
//! Bit edges are placed at `round(n * 1e6 / baud)` from the start of the
//! stream so rounding error never accumulates over long payloads.

use dmagpio_common::pulse::RawPulse;
use dmagpio_common::types::pin_bit;

const BITS_PER_FRAME: u64 = 10;

/// Offset of bit edge `n` from the start of the stream.
fn bit_edge(n: u64, baud: u32) -> u64 {
    let baud = u64::from(baud);
    (n * 1_000_000 + baud / 2) / baud
}

fn frame_bit(byte: u8, index: u64) -> bool {
    match index {
        0 => false,
        9 => true,
        n => (byte >> (n - 1)) & 1 == 1,
    }
}

/// Pulses transmitting `data` on `pin`, preceded by `offset` µs of delay.
///
/// Consecutive bits at the same level share one pulse.
pub fn frame_pulses(pin: u8, baud: u32, offset: u32, data: &[u8]) -> Vec<RawPulse> {
    let bit = pin_bit(pin);
    let mut pulses = Vec::new();
    if offset > 0 {
        pulses.push(RawPulse::delay(offset));
    }

    let mut run: Option<(bool, u64)> = None;
    let mut n = 0u64;
    for &byte in data {
        for index in 0..BITS_PER_FRAME {
            let level = frame_bit(byte, index);
            match run {
                Some((current, _)) if current == level => {}
                Some((current, started)) => {
                    pulses.push(level_pulse(bit, current, started, n, baud));
                    run = Some((level, n));
                }
                None => run = Some((level, n)),
            }
            n += 1;
        }
    }
    if let Some((current, started)) = run {
        pulses.push(level_pulse(bit, current, started, n, baud));
    }
    pulses
}

fn level_pulse(bit: u64, high: bool, from: u64, to: u64, baud: u32) -> RawPulse {
    let micros = (bit_edge(to, baud) - bit_edge(from, baud)) as u32;
    if high {
        RawPulse::new(bit, 0, micros, Default::default())
    } else {
        RawPulse::new(0, bit, micros, Default::default())
    }
}
