//! `Gpio` facade.
//!
//! [`Gpio`] owns every subsystem and the threads behind them. It is created
//! once per process with [`Gpio::initialise`] and torn down with
//! [`Gpio::terminate`] (or on drop); all registries live inside it, so a new
//! instance always starts from empty state.

use crate::backend_registry::BackendRegistry;
use crate::clock::{self, MonotonicClock, TickSource};
use crate::dispatch::{
    self, AlertHandler, DispatchEngine, DispatchStats, EdgeWaiter, HandleState, NotifyReader,
    NotifyRegistry, SamplesHandler, TimerHandler,
};
use crate::pins::PinIo;
use crate::pwm::PwmEngine;
use crate::sampler::{self, SampleRing};
use crate::script::{ScriptHost, ScriptRegistry};
use crate::task::{StopToken, TaskHandle};
use crate::timer::TimerBank;
use crate::wave::{Capture, PlaybackPhase, WaveEngine};
use dmagpio_common::config::GpioConfig;
use dmagpio_common::consts::MAX_SCRIPT_PARAMS;
use dmagpio_common::error::GpioResult;
use dmagpio_common::hal::GpioBackend;
use dmagpio_common::pulse::{Pulse, RawPulse};
use dmagpio_common::types::{Edge, Level, PinMode, Pull, ScriptStatus, WaveMode};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Services scripts reach through the facade's subsystems.
struct CoreHost {
    pins: Arc<PinIo>,
    pwm: Arc<PwmEngine>,
    waves: Arc<WaveEngine>,
    dispatch: Arc<DispatchEngine>,
    clock: Arc<dyn TickSource>,
}

impl ScriptHost for CoreHost {
    fn read(&self, pin: u32) -> GpioResult<u32> {
        self.pins.read(pin).map(Level::as_u32)
    }

    fn write(&self, pin: u32, level: u32) -> GpioResult<()> {
        self.pins.write(pin, level)
    }

    fn set_mode(&self, pin: u32, mode: PinMode) -> GpioResult<()> {
        self.pins.set_mode(pin, mode)
    }

    fn mode(&self, pin: u32) -> GpioResult<PinMode> {
        self.pins.mode(pin)
    }

    fn set_pull(&self, pin: u32, pull: Pull) -> GpioResult<()> {
        self.pins.set_pull(pin, pull)
    }

    fn pwm(&self, pin: u32, duty: u32) -> GpioResult<()> {
        self.pwm.set_duty(pin, duty)
    }

    fn servo(&self, pin: u32, width: u32) -> GpioResult<()> {
        self.pwm.set_servo(pin, width)
    }

    fn trigger(&self, pin: u32, pulse_len: u32, level: u32) -> GpioResult<()> {
        self.pins.trigger(pin, pulse_len, level)
    }

    fn watchdog(&self, pin: u32, millis: u32) -> GpioResult<()> {
        self.dispatch.set_watchdog(pin, millis, self.clock.tick())
    }

    fn read_bank1(&self) -> u32 {
        self.pins.read_bank1()
    }

    fn read_bank2(&self) -> u32 {
        self.pins.read_bank2()
    }

    fn set_bank1(&self, bits: u32) {
        self.pins.set_bank1(bits)
    }

    fn set_bank2(&self, bits: u32) {
        self.pins.set_bank2(bits)
    }

    fn clear_bank1(&self, bits: u32) {
        self.pins.clear_bank1(bits)
    }

    fn clear_bank2(&self, bits: u32) {
        self.pins.clear_bank2(bits)
    }

    fn tick(&self) -> u32 {
        self.clock.tick()
    }

    fn wave_send(&self, id: u32, mode: WaveMode) -> GpioResult<usize> {
        self.waves.send(id, mode)
    }

    fn wave_stop(&self) {
        self.waves.stop()
    }

    fn wave_busy(&self) -> bool {
        self.waves.busy()
    }

    fn edge_waiter(&self, mask: u32) -> Arc<EdgeWaiter> {
        self.dispatch.edge_waiter(mask)
    }
}

/// The engine: pins, waveforms, sampling, notifications, timers, scripts.
pub struct Gpio {
    config: GpioConfig,
    backend: Arc<dyn GpioBackend>,
    clock: Arc<dyn TickSource>,
    pins: Arc<PinIo>,
    pwm: Arc<PwmEngine>,
    waves: Arc<WaveEngine>,
    notify: Arc<NotifyRegistry>,
    dispatch: Arc<DispatchEngine>,
    ring: Arc<SampleRing>,
    timers: TimerBank,
    scripts: ScriptRegistry,
    sampler: Mutex<Option<TaskHandle>>,
    dispatcher: Mutex<Option<TaskHandle>>,
    terminated: AtomicBool,
}

impl Gpio {
    /// Validate `config`, create its backend and start every thread.
    ///
    /// # Errors
    /// `Config` on invalid configuration, `BackendNotFound` for an unknown
    /// backend name, `InitFailed` if a thread cannot start.
    pub fn initialise(config: GpioConfig) -> GpioResult<Self> {
        config.validate()?;
        let backend = BackendRegistry::with_builtin()?.create(&config.backend.name)?;
        Self::with_backend(config, backend)
    }

    /// Start the engine on an existing backend.
    ///
    /// # Errors
    /// As [`initialise`](Self::initialise), minus backend lookup.
    pub fn with_backend(config: GpioConfig, backend: Arc<dyn GpioBackend>) -> GpioResult<Self> {
        config.validate()?;
        info!(
            "Initialising {} on backend '{}' v{}",
            config.shared.service_name,
            backend.name(),
            backend.version()
        );
        let clock: Arc<dyn TickSource> = Arc::new(MonotonicClock::new());

        let pwm = Arc::new(PwmEngine::start(Arc::clone(&backend))?);
        let pins = Arc::new(PinIo::new(Arc::clone(&backend), Arc::clone(&pwm)));
        let waves = Arc::new(WaveEngine::start(
            &config.waves,
            Arc::clone(&backend),
            Arc::clone(&clock),
        )?);
        let notify = Arc::new(NotifyRegistry::new(config.notify.queue_depth));
        let dispatch = Arc::new(DispatchEngine::new(Arc::clone(&notify)));
        let ring = Arc::new(SampleRing::new(config.sampling.ring_capacity()));

        let host = Arc::new(CoreHost {
            pins: Arc::clone(&pins),
            pwm: Arc::clone(&pwm),
            waves: Arc::clone(&waves),
            dispatch: Arc::clone(&dispatch),
            clock: Arc::clone(&clock),
        });
        let scripts = ScriptRegistry::new(host);

        let sampler = sampler::spawn_sampler(
            &config.sampling,
            Arc::clone(&backend),
            Arc::clone(&clock),
            Arc::clone(&ring),
        )?;
        let dispatcher = dispatch::spawn_dispatcher(
            Arc::clone(&dispatch),
            Arc::clone(&ring),
            Arc::clone(&clock),
            Duration::from_micros(u64::from(config.sampling.dispatch_micros)),
        )?;

        info!("Engine ready");
        Ok(Self {
            config,
            backend,
            clock,
            pins,
            pwm,
            waves,
            notify,
            dispatch,
            ring,
            timers: TimerBank::new(),
            scripts,
            sampler: Mutex::new(Some(sampler)),
            dispatcher: Mutex::new(Some(dispatcher)),
            terminated: AtomicBool::new(false),
        })
    }

    /// Stop every thread, clear every registry and release the backend.
    /// Idempotent.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Terminating");
        self.scripts.shutdown();
        self.timers.cancel_all();
        let sampler = self.sampler.lock().take();
        if let Some(task) = sampler {
            task.stop();
        }
        let dispatcher = self.dispatcher.lock().take();
        if let Some(task) = dispatcher {
            task.stop();
        }
        self.dispatch.shutdown();
        self.notify.close_all();
        self.waves.clear();
        self.waves.shutdown();
        self.pwm.shutdown();
        self.backend.shutdown();
        info!("Terminated");
    }

    /// Active configuration.
    pub fn config(&self) -> &GpioConfig {
        &self.config
    }

    /// Backend in use.
    pub fn backend(&self) -> &Arc<dyn GpioBackend> {
        &self.backend
    }

    // ─── Pins ───────────────────────────────────────────────────────

    /// Select the function of `pin` (0..=53).
    pub fn set_mode(&self, pin: u32, mode: PinMode) -> GpioResult<()> {
        self.pins.set_mode(pin, mode)
    }

    /// Function of `pin`.
    pub fn get_mode(&self, pin: u32) -> GpioResult<PinMode> {
        self.pins.mode(pin)
    }

    /// Configure the pull resistor of `pin`.
    pub fn set_pull_up_down(&self, pin: u32, pull: Pull) -> GpioResult<()> {
        self.pins.set_pull(pin, pull)
    }

    /// Level of `pin`.
    pub fn read(&self, pin: u32) -> GpioResult<Level> {
        self.pins.read(pin)
    }

    /// Drive `pin` to `level` (0 or 1).
    pub fn write(&self, pin: u32, level: u32) -> GpioResult<()> {
        self.pins.write(pin, level)
    }

    /// Levels of pins 0..=31.
    pub fn read_bank1(&self) -> u32 {
        self.pins.read_bank1()
    }

    /// Levels of pins 32..=53.
    pub fn read_bank2(&self) -> u32 {
        self.pins.read_bank2()
    }

    /// Drive bank 1 pins in `bits` high.
    pub fn set_bank1(&self, bits: u32) {
        self.pins.set_bank1(bits)
    }

    /// Drive bank 1 pins in `bits` low.
    pub fn clear_bank1(&self, bits: u32) {
        self.pins.clear_bank1(bits)
    }

    /// Drive bank 2 pins in `bits` high.
    pub fn set_bank2(&self, bits: u32) {
        self.pins.set_bank2(bits)
    }

    /// Drive bank 2 pins in `bits` low.
    pub fn clear_bank2(&self, bits: u32) {
        self.pins.clear_bank2(bits)
    }

    /// Emit a `pulse_len` µs pulse of `level` on `pin`.
    pub fn trigger(&self, pin: u32, pulse_len: u32, level: u32) -> GpioResult<()> {
        self.pins.trigger(pin, pulse_len, level)
    }

    /// Current tick.
    pub fn tick(&self) -> u32 {
        self.clock.tick()
    }

    /// Delay `micros` and return the microseconds that actually elapsed.
    pub fn delay(&self, micros: u32) -> u32 {
        clock::delay_micros(micros)
    }

    // ─── PWM / servo ────────────────────────────────────────────────

    /// Start PWM on `pin` with `duty` out of its range.
    pub fn pwm(&self, pin: u32, duty: u32) -> GpioResult<()> {
        self.pwm.set_duty(pin, duty)
    }

    /// Current duty of `pin`.
    pub fn get_pwm_dutycycle(&self, pin: u32) -> GpioResult<u32> {
        self.pwm.duty(pin)
    }

    /// Set the duty range of `pin`.
    pub fn set_pwm_range(&self, pin: u32, range: u32) -> GpioResult<u32> {
        self.pwm.set_range(pin, range)
    }

    /// Duty range of `pin`.
    pub fn get_pwm_range(&self, pin: u32) -> GpioResult<u32> {
        self.pwm.range(pin)
    }

    /// Set the PWM frequency of `pin`; returns the frequency applied.
    pub fn set_pwm_frequency(&self, pin: u32, hz: u32) -> GpioResult<u32> {
        self.pwm.set_frequency(pin, hz)
    }

    /// PWM frequency of `pin`.
    pub fn get_pwm_frequency(&self, pin: u32) -> GpioResult<u32> {
        self.pwm.frequency(pin)
    }

    /// Start servo pulses of `width` µs on `pin` (0 stops them).
    pub fn servo(&self, pin: u32, width: u32) -> GpioResult<()> {
        self.pwm.set_servo(pin, width)
    }

    /// Servo pulse width of `pin`.
    pub fn get_servo_pulsewidth(&self, pin: u32) -> GpioResult<u32> {
        self.pwm.servo(pin)
    }

    // ─── Waveforms ──────────────────────────────────────────────────

    /// Stop playback, delete every waveform and empty the pulse pool.
    pub fn wave_clear(&self) {
        self.waves.clear()
    }

    /// Merge `pulses` into the pool. Returns the pool size.
    pub fn wave_add_generic(&self, pulses: &[Pulse]) -> GpioResult<usize> {
        self.waves.add_pulses(pulses)
    }

    /// Merge pulses with capture flags into the pool.
    pub fn wave_add_raw(&self, pulses: &[RawPulse]) -> GpioResult<usize> {
        self.waves.add_raw(pulses)
    }

    /// Merge 8N1 serial framing of `data` into the pool.
    pub fn wave_add_serial(
        &self,
        pin: u32,
        baud: u32,
        offset_micros: u32,
        data: &[u8],
    ) -> GpioResult<usize> {
        self.waves.add_serial(pin, baud, offset_micros, data)
    }

    /// Compile the pool into a new waveform.
    pub fn wave_create(&self) -> GpioResult<u32> {
        self.waves.create()
    }

    /// Delete waveform `id` and every later one.
    pub fn wave_delete(&self, id: u32) -> GpioResult<()> {
        self.waves.delete(id)
    }

    /// Transmit waveform `id`; returns its descriptor count. The sync modes
    /// wait for the current waveform to reach its end.
    pub fn wave_send(&self, id: u32, mode: WaveMode) -> GpioResult<usize> {
        self.waves.send(id, mode)
    }

    /// Transmit waveform `id` once.
    pub fn wave_send_once(&self, id: u32) -> GpioResult<usize> {
        self.waves.send(id, WaveMode::OneShot)
    }

    /// Transmit waveform `id` until stopped.
    pub fn wave_send_repeat(&self, id: u32) -> GpioResult<usize> {
        self.waves.send(id, WaveMode::Repeat)
    }

    /// Play a chain program over stored waveforms, stopping any active
    /// session. See [`WaveChain`](crate::wave::WaveChain) for the format.
    pub fn wave_chain(&self, program: &[u8]) -> GpioResult<()> {
        self.waves.send_chain(program)
    }

    /// Waveform being transmitted right now, if any.
    pub fn wave_tx_at(&self) -> Option<u32> {
        self.waves.tx_at()
    }

    /// True while a waveform is transmitting.
    pub fn wave_busy(&self) -> bool {
        self.waves.busy()
    }

    /// Stop transmission at the next descriptor boundary.
    pub fn wave_stop(&self) {
        self.waves.stop()
    }

    /// Playback phase.
    pub fn wave_phase(&self) -> PlaybackPhase {
        self.waves.phase()
    }

    /// Wait until playback is idle.
    pub fn wave_wait_idle(&self, timeout: Duration) -> bool {
        self.waves.wait_idle(timeout)
    }

    /// Values captured by READ/TICK pulses of waveform `id`.
    pub fn wave_captures(&self, id: u32) -> GpioResult<Vec<Capture>> {
        self.waves.captures(id)
    }

    /// Duration of the pool after the latest add.
    pub fn wave_get_micros(&self) -> u64 {
        self.waves.stats().micros
    }

    /// Highest pool duration seen.
    pub fn wave_get_high_micros(&self) -> u64 {
        self.waves.stats().high_micros
    }

    /// Longest allowed waveform.
    pub fn wave_get_max_micros(&self) -> u64 {
        self.waves.max_micros()
    }

    /// Pulses in the pool after the latest add.
    pub fn wave_get_pulses(&self) -> usize {
        self.waves.stats().pulses
    }

    /// Highest pool size seen.
    pub fn wave_get_high_pulses(&self) -> usize {
        self.waves.stats().high_pulses
    }

    /// Pool bound.
    pub fn wave_get_max_pulses(&self) -> usize {
        self.waves.max_pulses()
    }

    /// Descriptors of the latest created waveform.
    pub fn wave_get_cbs(&self) -> usize {
        self.waves.stats().cbs
    }

    /// Highest descriptor count seen.
    pub fn wave_get_high_cbs(&self) -> usize {
        self.waves.stats().high_cbs
    }

    /// Descriptor arena size.
    pub fn wave_get_max_cbs(&self) -> usize {
        self.waves.max_cbs()
    }

    // ─── Callbacks ──────────────────────────────────────────────────

    /// Register (or with `None`, clear) an alert handler for `pin`.
    pub fn set_alert(
        &self,
        pin: u32,
        edge: Edge,
        handler: Option<Arc<dyn AlertHandler>>,
    ) -> GpioResult<()> {
        self.dispatch.set_alert(pin, edge, handler)
    }

    /// Arm the watchdog of `pin` (0 disarms).
    pub fn set_watchdog(&self, pin: u32, timeout_millis: u32) -> GpioResult<()> {
        self.dispatch
            .set_watchdog(pin, timeout_millis, self.clock.tick())
    }

    /// Report changes on `pin` only once the new level has held for
    /// `steady` µs (0 removes the filter).
    pub fn set_glitch_filter(&self, pin: u32, steady: u32) -> GpioResult<()> {
        self.dispatch.set_glitch_filter(pin, steady)
    }

    /// Ignore changes on `pin` until it has been quiet for `steady` µs, then
    /// report them for `active` µs (`steady` 0 removes the filter).
    pub fn set_noise_filter(&self, pin: u32, steady: u32, active: u32) -> GpioResult<()> {
        self.dispatch.set_noise_filter(pin, steady, active)
    }

    /// Register (or with `None`, clear) the samples handler.
    pub fn set_samples_handler(
        &self,
        handler: Option<Arc<dyn SamplesHandler>>,
        bits: u64,
    ) -> GpioResult<()> {
        self.dispatch.set_samples_handler(handler, bits)
    }

    /// Run `handler` every `millis` on timer `timer` (`None` cancels).
    pub fn set_timer(
        &self,
        timer: u32,
        millis: u32,
        handler: Option<Arc<dyn TimerHandler>>,
    ) -> GpioResult<()> {
        self.timers.set_timer(timer, millis, handler)
    }

    /// Dispatch counters, including handler events dropped on full queues.
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatch.stats()
    }

    /// Samples lost because dispatch fell behind.
    pub fn sample_overruns(&self) -> u64 {
        self.ring.overwritten()
    }

    // ─── Notifications ──────────────────────────────────────────────

    /// Open a notification handle.
    pub fn notify_open(&self) -> GpioResult<u32> {
        self.notify.open()
    }

    /// Start reporting changes on `mask`.
    pub fn notify_begin(&self, handle: u32, mask: u32) -> GpioResult<()> {
        self.notify.begin(handle, mask)
    }

    /// Suspend reporting.
    pub fn notify_pause(&self, handle: u32) -> GpioResult<()> {
        self.notify.pause(handle)
    }

    /// Release `handle`.
    pub fn notify_close(&self, handle: u32) -> GpioResult<()> {
        self.notify.close(handle)
    }

    /// Byte-stream reader of `handle`.
    pub fn notify_reader(&self, handle: u32) -> GpioResult<NotifyReader> {
        self.notify.reader(handle)
    }

    /// State of `handle`.
    pub fn notify_state(&self, handle: u32) -> GpioResult<HandleState> {
        self.notify.state(handle)
    }

    // ─── Scripts ────────────────────────────────────────────────────

    /// Validate and store a script.
    pub fn store_script(&self, text: &str) -> GpioResult<u32> {
        self.scripts.store(text)
    }

    /// Run script `id` with up to ten parameters.
    pub fn run_script(&self, id: u32, params: &[i32]) -> GpioResult<()> {
        self.scripts.run(id, params)
    }

    /// Run state and parameters of script `id`.
    pub fn script_status(&self, id: u32) -> GpioResult<(ScriptStatus, [i32; MAX_SCRIPT_PARAMS])> {
        self.scripts.status(id)
    }

    /// Stop script `id`.
    pub fn stop_script(&self, id: u32) -> GpioResult<()> {
        self.scripts.stop(id)
    }

    /// Delete script `id`.
    pub fn delete_script(&self, id: u32) -> GpioResult<()> {
        self.scripts.delete(id)
    }

    // ─── Threads ────────────────────────────────────────────────────

    /// Start a supervised thread running `body`.
    pub fn start_thread<F>(&self, name: &str, body: F) -> GpioResult<TaskHandle>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        TaskHandle::spawn(name, body)
    }

    /// Stop a thread started with [`start_thread`](Self::start_thread) and
    /// wait for it.
    pub fn stop_thread(&self, task: TaskHandle) {
        debug!("Stopping thread '{}'", task.name());
        task.stop();
    }
}

impl Drop for Gpio {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulationBackend;
    use dmagpio_common::error::GpioError;

    fn gpio() -> (Arc<SimulationBackend>, Gpio) {
        let sim = Arc::new(SimulationBackend::new());
        let gpio = Gpio::with_backend(GpioConfig::default(), sim.clone()).unwrap();
        (sim, gpio)
    }

    #[test]
    fn initialise_rejects_unknown_backend() {
        let mut config = GpioConfig::default();
        config.backend.name = "nope".into();
        assert!(matches!(
            Gpio::initialise(config),
            Err(GpioError::BackendNotFound(_))
        ));
    }

    #[test]
    fn initialise_rejects_invalid_config() {
        let mut config = GpioConfig::default();
        config.sampling.sample_micros = 3;
        assert!(matches!(Gpio::initialise(config), Err(GpioError::Config(_))));
    }

    #[test]
    fn script_drives_pins_through_facade() {
        let (sim, gpio) = gpio();
        let id = gpio.store_script("W 5 1 R 5 STA p0 HALT").unwrap();
        gpio.run_script(id, &[]).unwrap();
        for _ in 0..200 {
            if gpio.script_status(id).unwrap().0 == ScriptStatus::Halted {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let (status, params) = gpio.script_status(id).unwrap();
        assert_eq!(status, ScriptStatus::Halted);
        assert_eq!(params[0], 1);
        assert_ne!(sim.latch() & (1 << 5), 0);
    }

    #[test]
    fn terminate_is_idempotent() {
        let (_sim, gpio) = gpio();
        gpio.terminate();
        gpio.terminate();
    }

    #[test]
    fn threads_are_supervised() {
        let (_sim, gpio) = gpio();
        let task = gpio
            .start_thread("test-loop", |token| while !token.wait_timeout(Duration::from_millis(5)) {})
            .unwrap();
        assert!(!task.is_finished());
        gpio.stop_thread(task);
    }
}
