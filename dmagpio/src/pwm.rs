//! Software PWM and servo pulses.
//!
//! One worker thread owns the edges of every active pin. Each pin's phase
//! is derived from a shared epoch, so changing one pin never shifts
//! another. Configuration changes wake the worker through a condvar.
//!
//! Pins with a constant output (duty 0, duty == range, servo off) are not
//! scheduled at all: the setter drives them once.

use crate::task::TaskHandle;
use dmagpio_common::consts::{
    DEFAULT_DUTY_RANGE, DEFAULT_PWM_FREQUENCY, MAX_DUTY_RANGE, MAX_PWM_FREQUENCY,
    MAX_SERVO_PULSEWIDTH, MIN_DUTY_RANGE, MIN_PWM_FREQUENCY, MIN_SERVO_PULSEWIDTH,
    SERVO_FRAME_MICROS, USER_GPIO_COUNT,
};
use dmagpio_common::error::{GpioError, GpioResult};
use dmagpio_common::hal::GpioBackend;
use dmagpio_common::types::{PinMode, pin_bit, user_gpio_index};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const IDLE_WAIT: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Off,
    Pwm,
    Servo,
}

#[derive(Debug, Clone, Copy)]
struct PinPwm {
    range: u32,
    frequency: u32,
    duty: u32,
    pulsewidth: u32,
    output: Output,
}

impl Default for PinPwm {
    fn default() -> Self {
        Self {
            range: DEFAULT_DUTY_RANGE,
            frequency: DEFAULT_PWM_FREQUENCY,
            duty: 0,
            pulsewidth: 0,
            output: Output::Off,
        }
    }
}

impl PinPwm {
    /// `(period, high)` in microseconds when the pin needs toggling.
    fn schedule(&self) -> Option<(u64, u64)> {
        match self.output {
            Output::Off => None,
            Output::Pwm => {
                if self.duty == 0 || self.duty >= self.range {
                    return None;
                }
                let period = 1_000_000 / u64::from(self.frequency);
                let high = period * u64::from(self.duty) / u64::from(self.range);
                Some((period, high))
            }
            Output::Servo => Some((
                u64::from(SERVO_FRAME_MICROS),
                u64::from(self.pulsewidth),
            )),
        }
    }
}

struct PwmTable {
    pins: [PinPwm; USER_GPIO_COUNT],
    scheduled: u32,
    closed: bool,
}

struct PwmShared {
    table: Mutex<PwmTable>,
    wake: Condvar,
    backend: Arc<dyn GpioBackend>,
    epoch: Instant,
}

impl PwmShared {
    fn now_micros(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Re-evaluate `pin` after a configuration change. Called with the
    /// table locked.
    fn apply(&self, table: &mut PwmTable, pin: u8) {
        let bit = pin_bit(pin);
        let state = table.pins[usize::from(pin)];
        match state.schedule() {
            Some(_) => {
                table.scheduled |= bit as u32;
                self.backend.set_mode(pin, PinMode::Output);
            }
            None => {
                table.scheduled &= !(bit as u32);
                let high =
                    state.output == Output::Pwm && state.duty > 0 && state.duty >= state.range;
                if state.output != Output::Off || high {
                    self.backend.set_mode(pin, PinMode::Output);
                }
                if high {
                    self.backend.set_levels(bit);
                } else {
                    self.backend.clear_levels(bit);
                }
            }
        }
        self.wake.notify_all();
    }
}

/// PWM and servo outputs on the user pins.
pub struct PwmEngine {
    shared: Arc<PwmShared>,
    task: Mutex<Option<TaskHandle>>,
}

impl PwmEngine {
    /// Start the PWM worker.
    ///
    /// # Errors
    /// `InitFailed` if the thread cannot be spawned.
    pub fn start(backend: Arc<dyn GpioBackend>) -> GpioResult<Self> {
        let shared = Arc::new(PwmShared {
            table: Mutex::new(PwmTable {
                pins: [PinPwm::default(); USER_GPIO_COUNT],
                scheduled: 0,
                closed: false,
            }),
            wake: Condvar::new(),
            backend,
            epoch: Instant::now(),
        });
        let worker = Arc::clone(&shared);
        let task = TaskHandle::spawn("dmagpio-pwm", move |token| {
            run_worker(&worker, || token.is_stopped())
        })?;
        info!("PWM worker started");
        Ok(Self {
            shared,
            task: Mutex::new(Some(task)),
        })
    }

    fn with_pin<R>(
        &self,
        pin: u32,
        f: impl FnOnce(&PwmShared, &mut PwmTable, u8) -> GpioResult<R>,
    ) -> GpioResult<R> {
        let index = user_gpio_index(pin)?;
        let mut table = self.shared.table.lock();
        f(&*self.shared, &mut *table, index)
    }

    /// Set the duty range of `pin`. The current duty is clamped to it.
    ///
    /// # Errors
    /// `BadUserGpio`, or `BadDutyRange` outside 25..=40000.
    pub fn set_range(&self, pin: u32, range: u32) -> GpioResult<u32> {
        if !(MIN_DUTY_RANGE..=MAX_DUTY_RANGE).contains(&range) {
            user_gpio_index(pin)?;
            return Err(GpioError::BadDutyRange(range));
        }
        self.with_pin(pin, |shared, table, index| {
            let state = &mut table.pins[usize::from(index)];
            state.range = range;
            state.duty = state.duty.min(range);
            if state.output == Output::Pwm {
                shared.apply(table, index);
            }
            Ok(range)
        })
    }

    /// Duty range of `pin`.
    pub fn range(&self, pin: u32) -> GpioResult<u32> {
        self.with_pin(pin, |_, table, index| Ok(table.pins[usize::from(index)].range))
    }

    /// Set the PWM frequency of `pin`, clamped to 5..=40000 Hz. Returns the
    /// frequency applied.
    ///
    /// # Errors
    /// `BadUserGpio`.
    pub fn set_frequency(&self, pin: u32, hz: u32) -> GpioResult<u32> {
        let applied = hz.clamp(MIN_PWM_FREQUENCY, MAX_PWM_FREQUENCY);
        self.with_pin(pin, |shared, table, index| {
            table.pins[usize::from(index)].frequency = applied;
            shared.wake.notify_all();
            Ok(applied)
        })
    }

    /// PWM frequency of `pin`.
    pub fn frequency(&self, pin: u32) -> GpioResult<u32> {
        self.with_pin(pin, |_, table, index| Ok(table.pins[usize::from(index)].frequency))
    }

    /// Start PWM on `pin` with `duty` out of its range. 0 stops it.
    ///
    /// # Errors
    /// `BadUserGpio`, or `BadDutycycle` above the range.
    pub fn set_duty(&self, pin: u32, duty: u32) -> GpioResult<()> {
        self.with_pin(pin, |shared, table, index| {
            let state = &mut table.pins[usize::from(index)];
            if duty > state.range {
                return Err(GpioError::BadDutycycle(duty));
            }
            state.duty = duty;
            state.pulsewidth = 0;
            state.output = if duty == 0 { Output::Off } else { Output::Pwm };
            shared.apply(table, index);
            debug!("PWM pin {} duty {}", index, duty);
            Ok(())
        })
    }

    /// Duty of `pin` (0 when not running PWM).
    pub fn duty(&self, pin: u32) -> GpioResult<u32> {
        self.with_pin(pin, |_, table, index| {
            let state = table.pins[usize::from(index)];
            Ok(if state.output == Output::Pwm { state.duty } else { 0 })
        })
    }

    /// Start servo pulses of `width` µs on `pin`. 0 stops them.
    ///
    /// # Errors
    /// `BadUserGpio`, or `BadPulsewidth` outside 500..=2500 (except 0).
    pub fn set_servo(&self, pin: u32, width: u32) -> GpioResult<()> {
        if width != 0 && !(MIN_SERVO_PULSEWIDTH..=MAX_SERVO_PULSEWIDTH).contains(&width) {
            user_gpio_index(pin)?;
            return Err(GpioError::BadPulsewidth(width));
        }
        self.with_pin(pin, |shared, table, index| {
            let state = &mut table.pins[usize::from(index)];
            state.pulsewidth = width;
            state.duty = 0;
            state.output = if width == 0 { Output::Off } else { Output::Servo };
            shared.apply(table, index);
            debug!("Servo pin {} width {}", index, width);
            Ok(())
        })
    }

    /// Servo pulse width of `pin` (0 when off).
    pub fn servo(&self, pin: u32) -> GpioResult<u32> {
        self.with_pin(pin, |_, table, index| {
            let state = table.pins[usize::from(index)];
            Ok(if state.output == Output::Servo { state.pulsewidth } else { 0 })
        })
    }

    /// Stop any PWM or servo output on `pin` without touching its level.
    /// Pins above 31 are ignored.
    pub fn cancel(&self, pin: u8) {
        if usize::from(pin) >= USER_GPIO_COUNT {
            return;
        }
        let mut table = self.shared.table.lock();
        let state = &mut table.pins[usize::from(pin)];
        if state.output == Output::Off {
            return;
        }
        state.output = Output::Off;
        state.duty = 0;
        state.pulsewidth = 0;
        table.scheduled &= !(pin_bit(pin) as u32);
        self.shared.wake.notify_all();
    }

    /// Pins currently toggled by the worker.
    pub fn scheduled(&self) -> u32 {
        self.shared.table.lock().scheduled
    }

    /// Stop every output and the worker.
    pub fn shutdown(&self) {
        {
            let mut table = self.shared.table.lock();
            table.closed = true;
            self.shared.wake.notify_all();
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop();
        }
    }
}

impl Drop for PwmEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(shared: &PwmShared, stopped: impl Fn() -> bool) {
    let mut driven: u64 = 0;
    let mut table = shared.table.lock();
    while !table.closed && !stopped() {
        let now = shared.now_micros();
        let mut next_edge = None::<u64>;
        let mut set = 0u64;
        let mut clear = 0u64;

        let mut pins = table.scheduled;
        while pins != 0 {
            let pin = pins.trailing_zeros() as u8;
            pins &= pins - 1;
            let Some((period, high)) = table.pins[usize::from(pin)].schedule() else {
                continue;
            };
            let phase = now % period;
            let (level, until) = if phase < high {
                (true, high - phase)
            } else {
                (false, period - phase)
            };
            let bit = pin_bit(pin);
            if level && driven & bit == 0 {
                set |= bit;
            } else if !level && driven & bit != 0 {
                clear |= bit;
            }
            next_edge = Some(next_edge.map_or(until, |e| e.min(until)));
        }

        if set != 0 {
            shared.backend.set_levels(set);
        }
        if clear != 0 {
            shared.backend.clear_levels(clear);
        }
        driven = (driven | set) & !clear;
        // Forget pins that left the schedule so a restart drives them again.
        driven &= u64::from(table.scheduled);

        let wait = next_edge.map_or(IDLE_WAIT, |micros| Duration::from_micros(micros.max(1)));
        shared.wake.wait_for(&mut table, wait.min(IDLE_WAIT));
    }
    info!("PWM worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::simulation::SimulationBackend;

    fn engine() -> (Arc<SimulationBackend>, PwmEngine) {
        let sim = Arc::new(SimulationBackend::new());
        let engine = PwmEngine::start(sim.clone()).unwrap();
        (sim, engine)
    }

    #[test]
    fn validates_ranges() {
        let (_sim, pwm) = engine();
        assert_eq!(pwm.set_range(4, 24), Err(GpioError::BadDutyRange(24)));
        assert_eq!(pwm.set_range(32, 100), Err(GpioError::BadUserGpio(32)));
        assert_eq!(pwm.set_duty(4, 256), Err(GpioError::BadDutycycle(256)));
        assert_eq!(pwm.set_servo(4, 499), Err(GpioError::BadPulsewidth(499)));
        assert_eq!(pwm.set_servo(4, 2_501), Err(GpioError::BadPulsewidth(2_501)));
        assert_eq!(pwm.set_frequency(4, 1).unwrap(), MIN_PWM_FREQUENCY);
        assert_eq!(pwm.set_frequency(4, 1_000_000).unwrap(), MAX_PWM_FREQUENCY);
        assert_eq!(pwm.frequency(4).unwrap(), MAX_PWM_FREQUENCY);
    }

    #[test]
    fn range_change_clamps_duty() {
        let (_sim, pwm) = engine();
        pwm.set_range(2, 1_000).unwrap();
        pwm.set_duty(2, 800).unwrap();
        pwm.set_range(2, 500).unwrap();
        assert_eq!(pwm.duty(2).unwrap(), 500);
    }

    #[test]
    fn constant_duties_are_not_scheduled() {
        let (sim, pwm) = engine();
        pwm.set_duty(5, 255).unwrap();
        assert_eq!(pwm.scheduled(), 0);
        assert_ne!(sim.read_levels() & (1 << 5), 0);
        pwm.set_duty(5, 0).unwrap();
        assert_eq!(sim.read_levels() & (1 << 5), 0);
        assert_eq!(pwm.duty(5).unwrap(), 0);
    }

    #[test]
    fn pwm_toggles_pin() {
        let (sim, pwm) = engine();
        pwm.set_frequency(6, 50).unwrap();
        pwm.set_duty(6, 128).unwrap();
        assert_eq!(pwm.scheduled(), 1 << 6);
        let mut seen_high = false;
        let mut seen_low = false;
        for _ in 0..200 {
            if sim.latch() & (1 << 6) != 0 {
                seen_high = true;
            } else {
                seen_low = true;
            }
            if seen_high && seen_low {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(seen_high && seen_low);
    }

    #[test]
    fn servo_and_cancel() {
        let (_sim, pwm) = engine();
        pwm.set_servo(7, 1_500).unwrap();
        assert_eq!(pwm.servo(7).unwrap(), 1_500);
        assert_eq!(pwm.duty(7).unwrap(), 0);
        pwm.cancel(7);
        assert_eq!(pwm.servo(7).unwrap(), 0);
        assert_eq!(pwm.scheduled(), 0);
    }
}
