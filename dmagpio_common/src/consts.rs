//! Pin ranges and global limits.
//!
//! Every bound checked by the engine lives here so the protocol front end,
//! the engine and the tests agree on the same numbers.

// ─── Pins ───────────────────────────────────────────────────────────

/// Highest pin index addressable by level/mode operations.
pub const MAX_GPIO: u32 = 53;

/// Highest "user" pin (PWM, servo, waveforms, alerts, notifications).
pub const MAX_USER_GPIO: u32 = 31;

/// Number of user pins.
pub const USER_GPIO_COUNT: usize = MAX_USER_GPIO as usize + 1;

/// Number of addressable pins.
pub const GPIO_COUNT: usize = MAX_GPIO as usize + 1;

/// Mask of the user pins within a 64-bit level vector.
pub const USER_GPIO_MASK: u64 = 0xFFFF_FFFF;

/// Mask of bank 2 (pins 32..=53) after shifting down by 32.
pub const BANK2_MASK: u32 = 0x003F_FFFF;

// ─── Waveforms ──────────────────────────────────────────────────────

/// Maximum number of pulses held by the pulse pool.
pub const WAVE_MAX_PULSES: usize = 12_000;

/// Maximum number of characters accepted by one serial add.
pub const WAVE_MAX_CHARS: usize = 1_024;

/// Lowest accepted serial baud rate.
pub const WAVE_MIN_BAUD: u32 = 100;

/// Highest accepted serial baud rate.
pub const WAVE_MAX_BAUD: u32 = 250_000;

/// Maximum duration of one waveform (30 minutes).
pub const WAVE_MAX_MICROS: u64 = 30 * 60 * 1_000_000;

/// Maximum number of registered waveforms.
pub const MAX_WAVES: usize = 512;

/// Default size of the descriptor arena.
pub const WAVE_MAX_DESCRIPTORS: usize = 36_000;

/// Default size of the out-of-line data arena.
pub const WAVE_MAX_OOL: usize = 24_000;

/// Default cap on the duration of a single delay descriptor.
pub const DESCRIPTOR_MAX_DELAY_MICROS: u32 = 10_000;

/// Longest accepted wave chain program in bytes.
pub const MAX_CHAIN_BYTES: usize = 600;

/// Deepest loop nesting in a wave chain.
pub const MAX_CHAIN_NESTING: usize = 20;

/// Most counted loops in one wave chain.
pub const MAX_CHAIN_LOOPS: usize = 20;

/// Highest waveform id a chain can name; 255 introduces a command.
pub const MAX_CHAIN_WAVE_ID: u32 = 254;

// ─── Sampling & dispatch ────────────────────────────────────────────

/// Sample periods accepted by the sampler.
pub const SAMPLE_MICROS_CHOICES: [u32; 6] = [1, 2, 4, 5, 8, 10];

/// Default sample period.
pub const DEFAULT_SAMPLE_MICROS: u32 = 5;

/// Sample buffer span bounds and default, in milliseconds.
pub const MIN_BUFFER_MILLIS: u32 = 100;
pub const MAX_BUFFER_MILLIS: u32 = 10_000;
pub const DEFAULT_BUFFER_MILLIS: u32 = 120;

/// Dispatch period bounds and default, in microseconds.
pub const MIN_DISPATCH_MICROS: u32 = 100;
pub const MAX_DISPATCH_MICROS: u32 = 100_000;
pub const DEFAULT_DISPATCH_MICROS: u32 = 1_000;

/// Depth of each handler worker's event channel.
pub const HANDLER_QUEUE_DEPTH: usize = 1_024;

/// Watchdog timeout bounds in milliseconds (0 disables).
pub const MAX_WATCHDOG_MILLIS: u32 = 60_000;

/// Longest steady period of a glitch or noise filter.
pub const MAX_FILTER_STEADY_MICROS: u32 = 300_000;

/// Longest active period of a noise filter.
pub const MAX_FILTER_ACTIVE_MICROS: u32 = 1_000_000;

// ─── Notifications ──────────────────────────────────────────────────

/// Number of notification handle slots.
pub const NOTIFY_SLOTS: usize = 32;

/// Default per-handle report queue depth.
pub const DEFAULT_NOTIFY_QUEUE_DEPTH: usize = 4_096;

/// Size of one encoded notification report.
pub const REPORT_SIZE: usize = 12;

// ─── Timers ─────────────────────────────────────────────────────────

/// Number of timer slots.
pub const TIMER_COUNT: usize = 10;

/// Timer period bounds in milliseconds.
pub const MIN_TIMER_MILLIS: u32 = 10;
pub const MAX_TIMER_MILLIS: u32 = 60_000;

// ─── PWM / servo ────────────────────────────────────────────────────

/// PWM range bounds and default.
pub const MIN_DUTY_RANGE: u32 = 25;
pub const MAX_DUTY_RANGE: u32 = 40_000;
pub const DEFAULT_DUTY_RANGE: u32 = 255;

/// PWM frequency clamp and default, in hertz.
pub const MIN_PWM_FREQUENCY: u32 = 5;
pub const MAX_PWM_FREQUENCY: u32 = 40_000;
pub const DEFAULT_PWM_FREQUENCY: u32 = 800;

/// Servo pulse width bounds, in microseconds.
pub const MIN_SERVO_PULSEWIDTH: u32 = 500;
pub const MAX_SERVO_PULSEWIDTH: u32 = 2_500;

/// Servo frame period (50 Hz).
pub const SERVO_FRAME_MICROS: u32 = 20_000;

/// Longest trigger pulse, in microseconds.
pub const MAX_TRIGGER_PULSE: u32 = 50;

// ─── Scripts ────────────────────────────────────────────────────────

/// Number of script slots.
pub const MAX_SCRIPTS: usize = 32;

/// Maximum number of TAG labels in one script.
pub const MAX_SCRIPT_TAGS: usize = 50;

/// Size of each script's variable file.
pub const MAX_SCRIPT_VARS: usize = 150;

/// Number of parameters (aliasing the first variables).
pub const MAX_SCRIPT_PARAMS: usize = 10;

/// Depth of the script value stack.
pub const SCRIPT_STACK_DEPTH: usize = 256;

/// Depth of the script call stack.
pub const SCRIPT_CALL_DEPTH: usize = 32;

/// Longest MICS delay.
pub const MAX_MICS_DELAY: u32 = 1_000_000;

/// Longest MILS delay.
pub const MAX_MILS_DELAY: u32 = 60_000;

// ─── Service ────────────────────────────────────────────────────────

/// Default service name used in logs.
pub const SERVICE_NAME: &str = "dmagpio";

/// Default configuration path for the daemon.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dmagpio/dmagpio.toml";
