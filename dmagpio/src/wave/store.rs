//! Waveform registry and descriptor arenas.
//!
//! Waveforms are stacked: wave `n` occupies the descriptor and OOL ranges
//! directly above wave `n - 1`. Ids equal stack positions, so deleting id
//! `k` truncates both arenas at wave `k`'s base and removes every id `>= k`.

use super::compiler::{ChainPlan, Descriptor, Link, Transfer};
use dmagpio_common::config::WaveConfig;
use dmagpio_common::consts::MAX_WAVES;
use dmagpio_common::error::{GpioError, GpioResult};
use tracing::debug;

/// Registry entry for one compiled waveform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveInfo {
    /// Waveform id.
    pub id: u32,
    /// First descriptor index.
    pub head: usize,
    /// Descriptor count.
    pub descriptors: usize,
    /// First OOL index.
    pub ool_base: usize,
    /// OOL words used.
    pub ool_len: usize,
    /// Duration of one pass.
    pub micros: u64,
    /// Pulses compiled into the chain.
    pub pulses: usize,
}

impl WaveInfo {
    /// Index of the last descriptor.
    pub fn tail(&self) -> usize {
        self.head + self.descriptors - 1
    }
}

/// A value captured during playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// Level vector recorded by a READ pulse.
    Levels(u64),
    /// Tick recorded by a TICK pulse.
    Tick(u32),
}

/// Descriptor arena, OOL arena and id table.
#[derive(Debug)]
pub struct WaveStore {
    descriptors: Vec<Descriptor>,
    ool: Vec<u64>,
    waves: Vec<WaveInfo>,
    max_descriptors: usize,
    max_ool: usize,
    max_waves: usize,
}

impl WaveStore {
    /// Create empty arenas sized from `config`.
    pub fn new(config: &WaveConfig) -> Self {
        Self {
            descriptors: Vec::new(),
            ool: Vec::new(),
            waves: Vec::new(),
            max_descriptors: config.max_descriptors,
            max_ool: config.max_ool,
            max_waves: MAX_WAVES,
        }
    }

    /// Place `plan` and register it under the next id.
    ///
    /// # Errors
    /// `NoWaveformId`, `TooManyDescriptors`, `TooManyOutOfLine` or
    /// `EmptyWaveform`; nothing is allocated on error.
    pub fn insert(&mut self, plan: &ChainPlan) -> GpioResult<u32> {
        if plan.transfers.is_empty() {
            return Err(GpioError::EmptyWaveform);
        }
        if self.waves.len() >= self.max_waves {
            return Err(GpioError::NoWaveformId);
        }
        if self.descriptors.len() + plan.transfers.len() > self.max_descriptors {
            return Err(GpioError::TooManyDescriptors);
        }
        if self.ool.len() + plan.ool.len() > self.max_ool {
            return Err(GpioError::TooManyOutOfLine);
        }

        let head = self.descriptors.len();
        let ool_base = self.ool.len();
        let last = plan.transfers.len() - 1;
        self.descriptors
            .extend(plan.transfers.iter().enumerate().map(|(i, t)| Descriptor {
                transfer: t.relocated(ool_base),
                next: if i == last {
                    Link::End
                } else {
                    Link::Next(head + i + 1)
                },
            }));
        self.ool.extend_from_slice(&plan.ool);

        let id = self.waves.len() as u32;
        self.waves.push(WaveInfo {
            id,
            head,
            descriptors: plan.transfers.len(),
            ool_base,
            ool_len: plan.ool.len(),
            micros: plan.micros,
            pulses: plan.pulses,
        });
        debug!(
            "Wave {} placed: {} descriptors at {}, {} ool words",
            id,
            plan.transfers.len(),
            head,
            plan.ool.len()
        );
        Ok(id)
    }

    /// Remove `id` and every later id.
    ///
    /// # Errors
    /// `BadWaveId` if `id` is not registered.
    pub fn delete_from(&mut self, id: u32) -> GpioResult<()> {
        let info = self.get(id).ok_or(GpioError::BadWaveId(id))?;
        let (head, ool_base) = (info.head, info.ool_base);
        self.descriptors.truncate(head);
        self.ool.truncate(ool_base);
        self.waves.truncate(id as usize);
        debug!("Waves >= {} deleted, {} remain", id, self.waves.len());
        Ok(())
    }

    /// Remove every waveform.
    pub fn clear(&mut self) {
        self.descriptors.clear();
        self.ool.clear();
        self.waves.clear();
    }

    /// Registry entry for `id`.
    pub fn get(&self, id: u32) -> Option<&WaveInfo> {
        self.waves.get(id as usize)
    }

    /// Number of registered waveforms.
    pub fn len(&self) -> usize {
        self.waves.len()
    }

    /// True if no waveform is registered.
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Descriptors in use across all waveforms.
    pub fn descriptors_in_use(&self) -> usize {
        self.descriptors.len()
    }

    /// Descriptor arena size.
    pub fn max_descriptors(&self) -> usize {
        self.max_descriptors
    }

    /// Descriptor at `index`.
    pub fn descriptor(&self, index: usize) -> Option<Descriptor> {
        self.descriptors.get(index).copied()
    }

    /// Re-link descriptor `index`.
    pub fn set_link(&mut self, index: usize, next: Link) {
        if let Some(d) = self.descriptors.get_mut(index) {
            d.next = next;
        }
    }

    /// OOL word at `index`.
    pub fn ool(&self, index: usize) -> u64 {
        self.ool.get(index).copied().unwrap_or(0)
    }

    /// Overwrite OOL word `index`.
    pub fn set_ool(&mut self, index: usize, value: u64) {
        if let Some(w) = self.ool.get_mut(index) {
            *w = value;
        }
    }

    /// Descriptors of wave `id` in chain order.
    pub fn chain(&self, id: u32) -> GpioResult<Vec<Descriptor>> {
        let info = self.get(id).ok_or(GpioError::BadWaveId(id))?;
        Ok(self.descriptors[info.head..info.head + info.descriptors].to_vec())
    }

    /// Values captured by the READ/TICK pulses of wave `id`, in chain order.
    pub fn captures(&self, id: u32) -> GpioResult<Vec<Capture>> {
        Ok(self
            .chain(id)?
            .iter()
            .filter_map(|d| match d.transfer {
                Transfer::ReadLevels { ool } => Some(Capture::Levels(self.ool(ool))),
                Transfer::ReadTick { ool } => Some(Capture::Tick(self.ool(ool) as u32)),
                _ => None,
            })
            .collect())
    }
}
