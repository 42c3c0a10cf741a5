//! Waveform subsystem.
//!
//! Data flow: pulses → [`PulsePool`] → [`compile`](compiler::compile) →
//! [`WaveStore`] → [`PlaybackController`] → backend. A [`WaveChain`]
//! sequences stored waveforms without copying them.
//!
//! [`WaveEngine`] ties the pieces together behind one set of operations
//! and keeps the current and high-water statistics.

pub mod chain;
pub mod compiler;
pub mod playback;
pub mod pool;
pub mod serial;
pub mod store;

pub use chain::{ChainOp, WaveChain};
pub use compiler::{ChainPlan, Descriptor, Link, Transfer};
pub use playback::{PlaybackController, PlaybackInfo, PlaybackPhase};
pub use pool::PulsePool;
pub use store::{Capture, WaveInfo, WaveStore};

use crate::clock::TickSource;
use dmagpio_common::config::WaveConfig;
use dmagpio_common::consts::WAVE_MAX_MICROS;
use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::hal::GpioBackend;
use dmagpio_common::pulse::{Pulse, RawPulse};
use dmagpio_common::types::WaveMode;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info};

/// Current and high-water waveform statistics.
///
/// `micros` and `pulses` describe the pool after the latest add and survive
/// `create`; `cbs` is the descriptor count of the latest created chain.
/// High-water values never decrease.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WaveStats {
    /// Duration of the pool.
    pub micros: u64,
    /// Highest `micros` seen.
    pub high_micros: u64,
    /// Pulses in the pool.
    pub pulses: usize,
    /// Highest `pulses` seen.
    pub high_pulses: usize,
    /// Descriptors of the latest chain.
    pub cbs: usize,
    /// Highest `cbs` seen.
    pub high_cbs: usize,
}

impl WaveStats {
    fn record_pool(&mut self, pool: &PulsePool) {
        self.micros = pool.total_micros();
        self.pulses = pool.len();
        self.high_micros = self.high_micros.max(self.micros);
        self.high_pulses = self.high_pulses.max(self.pulses);
    }

    fn record_chain(&mut self, descriptors: usize) {
        self.cbs = descriptors;
        self.high_cbs = self.high_cbs.max(descriptors);
    }

    fn reset_current(&mut self) {
        self.micros = 0;
        self.pulses = 0;
        self.cbs = 0;
    }
}

/// Pool, registry and playback behind one interface.
pub struct WaveEngine {
    pool: Mutex<PulsePool>,
    store: Arc<RwLock<WaveStore>>,
    stats: Mutex<WaveStats>,
    playback: PlaybackController,
    admin: Mutex<()>,
    max_delay_micros: u32,
}

impl WaveEngine {
    /// Build the engine and start playback.
    ///
    /// # Errors
    /// `InitFailed` if the playback thread cannot start.
    pub fn start(
        config: &WaveConfig,
        backend: Arc<dyn GpioBackend>,
        clock: Arc<dyn TickSource>,
    ) -> GpioResult<Self> {
        let store = Arc::new(RwLock::new(WaveStore::new(config)));
        let playback = PlaybackController::start(Arc::clone(&store), backend, clock)?;
        info!(
            "Wave engine ready: {} pulses, {} descriptors, {} ool words",
            config.max_pulses, config.max_descriptors, config.max_ool
        );
        Ok(Self {
            pool: Mutex::new(PulsePool::new(config.max_pulses)),
            store,
            stats: Mutex::new(WaveStats::default()),
            playback,
            admin: Mutex::new(()),
            max_delay_micros: config.max_delay_micros,
        })
    }

    // ─── Pool ───────────────────────────────────────────────────────

    /// Stop playback, delete every waveform and empty the pool.
    pub fn clear(&self) {
        let _admin = self.admin.lock();
        self.playback.stop();
        self.pool.lock().clear();
        self.store.write().clear();
        self.stats.lock().reset_current();
        debug!("Waveforms cleared");
    }

    /// Merge plain pulses into the pool.
    pub fn add_pulses(&self, pulses: &[Pulse]) -> GpioResult<usize> {
        let raw: Vec<RawPulse> = pulses.iter().copied().map(RawPulse::from).collect();
        self.add_raw(&raw)
    }

    /// Merge pulses carrying capture flags into the pool.
    pub fn add_raw(&self, pulses: &[RawPulse]) -> GpioResult<usize> {
        let mut pool = self.pool.lock();
        let count = pool.add(pulses)?;
        self.stats.lock().record_pool(&pool);
        Ok(count)
    }

    /// Merge serial data into the pool.
    pub fn add_serial(&self, pin: u32, baud: u32, offset: u32, data: &[u8]) -> GpioResult<usize> {
        let mut pool = self.pool.lock();
        let count = pool.add_serial(pin, baud, offset, data)?;
        self.stats.lock().record_pool(&pool);
        Ok(count)
    }

    /// Pulses pending in the pool.
    pub fn pool_len(&self) -> usize {
        self.pool.lock().len()
    }

    // ─── Registry ───────────────────────────────────────────────────

    /// Compile the pool into a new waveform and clear the pool.
    ///
    /// # Errors
    /// `EmptyWaveform`, `NoWaveformId`, `TooManyDescriptors` or
    /// `TooManyOutOfLine`; the pool is left intact on error.
    pub fn create(&self) -> GpioResult<u32> {
        let mut pool = self.pool.lock();
        let plan = compiler::compile(pool.pulses(), self.max_delay_micros)?;
        let id = self.store.write().insert(&plan)?;
        pool.clear();
        self.stats.lock().record_chain(plan.transfers.len());
        debug!(
            "Wave {} created: {} pulses, {} us, {} descriptors",
            id,
            plan.pulses,
            plan.micros,
            plan.transfers.len()
        );
        Ok(id)
    }

    /// Delete `id` and every later waveform, stopping playback first if the
    /// active session, a chain or a queued sync send uses one of them.
    ///
    /// # Errors
    /// `BadWaveId` if `id` is not registered.
    pub fn delete(&self, id: u32) -> GpioResult<()> {
        let _admin = self.admin.lock();
        if self.store.read().get(id).is_none() {
            return Err(GpioError::BadWaveId(id));
        }
        if self.playback.uses_wave_from(id) {
            self.playback.stop();
        }
        self.store.write().delete_from(id)
    }

    /// Registry entry for `id`.
    pub fn info(&self, id: u32) -> Option<WaveInfo> {
        self.store.read().get(id).cloned()
    }

    /// Number of registered waveforms.
    pub fn count(&self) -> usize {
        self.store.read().len()
    }

    /// Values captured by READ/TICK pulses of `id`.
    pub fn captures(&self, id: u32) -> GpioResult<Vec<Capture>> {
        self.store.read().captures(id)
    }

    // ─── Playback ───────────────────────────────────────────────────

    /// Transmit `id`. Returns the descriptor count.
    pub fn send(&self, id: u32, mode: WaveMode) -> GpioResult<usize> {
        let _admin = self.admin.lock();
        self.playback.send(id, mode)
    }

    /// Parse `program` and play it, stopping any active session.
    ///
    /// # Errors
    /// Any [`WaveChain::parse`] error, or `BadWaveId` for a waveform the
    /// program names that is not registered.
    pub fn send_chain(&self, program: &[u8]) -> GpioResult<()> {
        let chain = WaveChain::parse(program)?;
        let _admin = self.admin.lock();
        self.playback.send_chain(&chain)
    }

    /// Waveform being transmitted right now, if any.
    pub fn tx_at(&self) -> Option<u32> {
        self.playback.tx_at()
    }

    /// True while a waveform is transmitting.
    pub fn busy(&self) -> bool {
        self.playback.busy()
    }

    /// Stop transmission at the next descriptor boundary.
    pub fn stop(&self) {
        self.playback.stop();
    }

    /// Active session.
    pub fn current(&self) -> Option<PlaybackInfo> {
        self.playback.current()
    }

    /// Playback phase.
    pub fn phase(&self) -> PlaybackPhase {
        self.playback.phase()
    }

    /// Wait for playback to go idle.
    pub fn wait_idle(&self, timeout: std::time::Duration) -> bool {
        self.playback.wait_idle(timeout)
    }

    // ─── Statistics ─────────────────────────────────────────────────

    /// Snapshot of the statistics.
    pub fn stats(&self) -> WaveStats {
        *self.stats.lock()
    }

    /// Longest allowed waveform.
    pub fn max_micros(&self) -> u64 {
        WAVE_MAX_MICROS
    }

    /// Pool bound.
    pub fn max_pulses(&self) -> usize {
        self.pool.lock().max_pulses()
    }

    /// Descriptor arena size.
    pub fn max_cbs(&self) -> usize {
        self.store.read().max_descriptors()
    }

    /// Stop playback and the engine thread.
    pub fn shutdown(&self) {
        self.playback.shutdown();
    }
}
