//! Wave chain programs.
//!
//! A chain is a byte string naming stored waveforms to play back to back.
//! A byte of 255 introduces a command:
//!
//! | bytes         | meaning                                     |
//! |---------------|---------------------------------------------|
//! | `255 0`       | loop start                                  |
//! | `255 1 x y`   | loop end; play the body `x + 256·y` times   |
//! | `255 2 x y`   | delay `x + 256·y` µs                        |
//! | `255 3`       | loop forever (must be last)                 |
//!
//! Any other byte is a waveform id. [`WaveChain::parse`] checks the
//! structure and flattens it into [`ChainOp`]s with resolved jump targets;
//! playback checks the waveform ids when the chain is sent.

use dmagpio_common::consts::{MAX_CHAIN_BYTES, MAX_CHAIN_LOOPS, MAX_CHAIN_NESTING};
use dmagpio_common::error::{GpioError, GpioResult};

const COMMAND: u8 = 255;
const LOOP_START: u8 = 0;
const LOOP_END: u8 = 1;
const DELAY: u8 = 2;
const FOREVER: u8 = 3;

/// One flattened chain instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOp {
    /// Play waveform `id` once.
    Wave(u32),
    /// Pause for the given µs.
    Delay(u32),
    /// End of a counted loop: bump `counter` and jump to `to` until the
    /// body has run `count` times, then reset the counter and fall through.
    Repeat {
        /// Counter slot owned by this loop.
        counter: usize,
        /// Times the body runs.
        count: u32,
        /// First op of the body.
        to: usize,
    },
    /// Jump to `to` unconditionally.
    Forever {
        /// First op of the body.
        to: usize,
    },
}

/// A validated chain program.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaveChain {
    ops: Vec<ChainOp>,
    counters: usize,
}

impl WaveChain {
    /// Parse and validate a chain program.
    ///
    /// # Errors
    /// - `ChainTooBig` above 600 bytes
    /// - `BadChainCmd` for an unknown or truncated command, or anything
    ///   after loop forever
    /// - `BadChainLoop` for an unbalanced or empty loop
    /// - `ChainLoopCnt` for a loop count of zero
    /// - `ChainNesting` past 20 open loops
    /// - `ChainCounter` past 20 counted loops
    pub fn parse(bytes: &[u8]) -> GpioResult<Self> {
        if bytes.len() > MAX_CHAIN_BYTES {
            return Err(GpioError::ChainTooBig);
        }
        let mut ops = Vec::new();
        let mut open: Vec<usize> = Vec::new();
        let mut counters = 0;
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != COMMAND {
                ops.push(ChainOp::Wave(u32::from(bytes[i])));
                i += 1;
                continue;
            }
            let cmd = *bytes.get(i + 1).ok_or(GpioError::BadChainCmd)?;
            match cmd {
                LOOP_START => {
                    if open.len() >= MAX_CHAIN_NESTING {
                        return Err(GpioError::ChainNesting);
                    }
                    open.push(ops.len());
                    i += 2;
                }
                LOOP_END => {
                    let count = operand(bytes, i)?;
                    let to = open.pop().ok_or(GpioError::BadChainLoop)?;
                    if count == 0 {
                        return Err(GpioError::ChainLoopCnt(count));
                    }
                    if !plays_anything(&ops[to..]) {
                        return Err(GpioError::BadChainLoop);
                    }
                    if counters >= MAX_CHAIN_LOOPS {
                        return Err(GpioError::ChainCounter);
                    }
                    ops.push(ChainOp::Repeat {
                        counter: counters,
                        count,
                        to,
                    });
                    counters += 1;
                    i += 4;
                }
                DELAY => {
                    ops.push(ChainOp::Delay(operand(bytes, i)?));
                    i += 4;
                }
                FOREVER => {
                    if i + 2 != bytes.len() {
                        return Err(GpioError::BadChainCmd);
                    }
                    let to = open.pop().unwrap_or(0);
                    if !open.is_empty() || !plays_anything(&ops[to..]) {
                        return Err(GpioError::BadChainLoop);
                    }
                    ops.push(ChainOp::Forever { to });
                    i += 2;
                }
                _ => return Err(GpioError::BadChainCmd),
            }
        }
        if !open.is_empty() {
            return Err(GpioError::BadChainLoop);
        }
        Ok(Self { ops, counters })
    }

    /// Flattened program.
    pub fn ops(&self) -> &[ChainOp] {
        &self.ops
    }

    /// Number of loop counters the program needs.
    pub fn counters(&self) -> usize {
        self.counters
    }

    /// True if the program has nothing to play.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// True if the program ends in loop forever.
    pub fn is_endless(&self) -> bool {
        matches!(self.ops.last(), Some(ChainOp::Forever { .. }))
    }

    /// Waveform ids named by the program, in order of appearance.
    pub fn waves(&self) -> impl Iterator<Item = u32> + '_ {
        self.ops.iter().filter_map(|op| match op {
            ChainOp::Wave(id) => Some(*id),
            _ => None,
        })
    }
}

/// Little-endian 16-bit operand of the command at `i`.
fn operand(bytes: &[u8], i: usize) -> GpioResult<u32> {
    match bytes.get(i + 2..i + 4) {
        Some(&[lo, hi]) => Ok(u32::from(lo) | (u32::from(hi) << 8)),
        _ => Err(GpioError::BadChainCmd),
    }
}

fn plays_anything(ops: &[ChainOp]) -> bool {
    ops.iter()
        .any(|op| matches!(op, ChainOp::Wave(_) | ChainOp::Delay(_)))
}
