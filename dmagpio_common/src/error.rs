//! Error taxonomy for every engine operation.
//!
//! Each variant carries the negative integer code of the remote-control
//! protocol through [`GpioError::code`], so a front end can translate a
//! failure without knowing the engine's types.
//!
//! Categories:
//! - validation (bad pin, mode, level, baud, timeout, parameter count)
//! - capacity (too many pulses, descriptors, out-of-line words, tags, scripts)
//! - identity (unknown waveform, script or handle)
//! - state (script not halted, engine not running)
//! - chain programs (loop structure, nesting, length)

use crate::config::ConfigError;
use thiserror::Error;

/// Result alias used across the workspace.
pub type GpioResult<T> = Result<T, GpioError>;

/// Errors returned by dmagpio operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GpioError {
    // ─── Lifecycle ──────────────────────────────────────────────────
    /// Engine start-up failed.
    #[error("initialisation failed: {0}")]
    InitFailed(String),

    /// Backend name not present in the registry.
    #[error("backend not found: {0}")]
    BackendNotFound(String),

    /// Configuration rejected.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    // ─── Pin validation ─────────────────────────────────────────────
    /// Pin outside 0..=31.
    #[error("gpio {0} is not a user gpio (0-31)")]
    BadUserGpio(u32),

    /// Pin outside 0..=53.
    #[error("gpio {0} out of range (0-53)")]
    BadGpio(u32),

    /// Unknown pin mode.
    #[error("bad mode {0}")]
    BadMode(u32),

    /// Level other than 0 or 1.
    #[error("bad level {0}")]
    BadLevel(u32),

    /// Unknown pull-up/down setting.
    #[error("bad pull-up/down {0}")]
    BadPud(u32),

    /// Servo pulse width outside 0 or 500..=2500.
    #[error("bad servo pulse width {0}")]
    BadPulsewidth(u32),

    /// Duty cycle above the pin's range.
    #[error("bad duty cycle {0}")]
    BadDutycycle(u32),

    /// Timer index outside 0..=9.
    #[error("bad timer {0}")]
    BadTimer(u32),

    /// Timer period outside 10..=60000 ms.
    #[error("bad timer period {0} ms")]
    BadMs(u32),

    /// Watchdog timeout above 60000 ms.
    #[error("bad watchdog timeout {0} ms")]
    BadWatchdogTimeout(u32),

    /// PWM range outside 25..=40000.
    #[error("bad duty range {0}")]
    BadDutyRange(u32),

    /// Trigger pulse length outside 1..=50 µs.
    #[error("bad trigger pulse length {0}")]
    BadPulseLen(u32),

    // ─── Notifications ──────────────────────────────────────────────
    /// Every notification slot is in use.
    #[error("no free notification handle")]
    NoHandle,

    /// Handle not open.
    #[error("bad notification handle {0}")]
    BadHandle(u32),

    // ─── Waveforms ──────────────────────────────────────────────────
    /// Wave mode other than one-shot or repeat.
    #[error("bad wave mode {0}")]
    BadWaveMode(u32),

    /// Serial baud outside 100..=250000.
    #[error("bad serial baud {0}")]
    BadWaveBaud(u32),

    /// Pulse pool would exceed its bound.
    #[error("too many pulses")]
    TooManyPulses,

    /// Serial payload too long.
    #[error("too many characters")]
    TooManyChars,

    /// Serial offset beyond the waveform time limit.
    #[error("bad serial offset {0}")]
    BadSerialOffset(u32),

    /// Waveform id not registered.
    #[error("bad wave id {0}")]
    BadWaveId(u32),

    /// Descriptor arena exhausted.
    #[error("too many descriptors")]
    TooManyDescriptors,

    /// Out-of-line arena exhausted.
    #[error("too many out-of-line words")]
    TooManyOutOfLine,

    /// Pool holds no pulses.
    #[error("empty waveform")]
    EmptyWaveform,

    /// Every waveform id is in use.
    #[error("no waveform id available")]
    NoWaveformId,

    /// Merged waveform longer than 30 minutes.
    #[error("waveform too long")]
    TooManyMicros,

    /// Chain loop count of zero.
    #[error("bad chain loop count {0}")]
    ChainLoopCnt(u32),

    /// Unbalanced or empty loop in a chain.
    #[error("bad chain loop")]
    BadChainLoop,

    /// Too many counted loops in a chain.
    #[error("too many chain counters")]
    ChainCounter,

    /// Unknown or truncated chain command.
    #[error("bad chain command")]
    BadChainCmd,

    /// Chain loops nested too deeply.
    #[error("chain nesting too deep")]
    ChainNesting,

    /// Chain program longer than 600 bytes.
    #[error("chain too long")]
    ChainTooBig,

    // ─── Filters ────────────────────────────────────────────────────
    /// Filter period out of range.
    #[error("bad filter period {0}")]
    BadFilter(u32),

    // ─── Scripts ────────────────────────────────────────────────────
    /// Script text could not be parsed.
    #[error("bad script: {0}")]
    BadScript(String),

    /// Script id not stored.
    #[error("bad script id {0}")]
    BadScriptId(u32),

    /// Parameter index outside 0..=9.
    #[error("bad parameter number {0}")]
    BadParamNum(u32),

    /// Tag defined twice.
    #[error("duplicate tag {0}")]
    DuplicateTag(i32),

    /// More than 50 tags.
    #[error("too many tags")]
    TooManyTags,

    /// Unknown script mnemonic.
    #[error("bad script command {0}")]
    BadScriptCmd(String),

    /// Variable index outside 0..=149.
    #[error("bad variable number {0}")]
    BadVarNum(u32),

    /// Every script slot is in use.
    #[error("no room for another script")]
    NoScriptRoom,

    /// More than 10 run parameters.
    #[error("too many parameters ({0})")]
    TooManyParams(usize),

    /// Script is running or waiting.
    #[error("script {0} is not halted")]
    NotHalted(u32),

    /// Jump or call to an undefined tag.
    #[error("undefined tag {0}")]
    BadTag(i32),

    /// MICS delay out of range.
    #[error("bad MICS delay {0}")]
    BadMicsDelay(i64),

    /// MILS delay out of range.
    #[error("bad MILS delay {0}")]
    BadMilsDelay(i64),
}

impl GpioError {
    /// Protocol error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            Self::InitFailed(_) | Self::BackendNotFound(_) | Self::Config(_) => -1,
            Self::BadUserGpio(_) => -2,
            Self::BadGpio(_) => -3,
            Self::BadMode(_) => -4,
            Self::BadLevel(_) => -5,
            Self::BadPud(_) => -6,
            Self::BadPulsewidth(_) => -7,
            Self::BadDutycycle(_) => -8,
            Self::BadTimer(_) => -9,
            Self::BadMs(_) => -10,
            Self::BadWatchdogTimeout(_) => -15,
            Self::BadDutyRange(_) => -21,
            Self::NoHandle => -24,
            Self::BadHandle(_) => -25,
            Self::BadWaveMode(_) => -33,
            Self::BadWaveBaud(_) => -35,
            Self::TooManyPulses => -36,
            Self::TooManyChars => -37,
            Self::BadPulseLen(_) => -46,
            Self::BadScript(_) => -47,
            Self::BadScriptId(_) => -48,
            Self::BadSerialOffset(_) => -49,
            Self::BadParamNum(_) => -52,
            Self::DuplicateTag(_) => -53,
            Self::TooManyTags => -54,
            Self::BadScriptCmd(_) => -55,
            Self::BadVarNum(_) => -56,
            Self::NoScriptRoom => -57,
            Self::TooManyParams(_) => -61,
            Self::NotHalted(_) => -62,
            Self::BadTag(_) => -63,
            Self::BadMicsDelay(_) => -64,
            Self::BadMilsDelay(_) => -65,
            Self::BadWaveId(_) => -66,
            Self::TooManyDescriptors => -67,
            Self::TooManyOutOfLine => -68,
            Self::EmptyWaveform => -69,
            Self::NoWaveformId => -70,
            Self::TooManyMicros => -91,
            Self::ChainLoopCnt(_) => -114,
            Self::BadChainLoop => -115,
            Self::ChainCounter => -116,
            Self::BadChainCmd => -117,
            Self::ChainNesting => -119,
            Self::ChainTooBig => -120,
            Self::BadFilter(_) => -125,
        }
    }

    /// True for errors raised because a bounded pool or arena is full.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            Self::TooManyPulses
                | Self::TooManyChars
                | Self::TooManyDescriptors
                | Self::TooManyOutOfLine
                | Self::TooManyMicros
                | Self::TooManyTags
                | Self::NoHandle
                | Self::NoScriptRoom
                | Self::NoWaveformId
                | Self::ChainTooBig
                | Self::ChainCounter
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_protocol_table() {
        assert_eq!(GpioError::BadUserGpio(40).code(), -2);
        assert_eq!(GpioError::BadGpio(60).code(), -3);
        assert_eq!(GpioError::NoHandle.code(), -24);
        assert_eq!(GpioError::BadWaveId(3).code(), -66);
        assert_eq!(GpioError::EmptyWaveform.code(), -69);
        assert_eq!(GpioError::NoWaveformId.code(), -70);
        assert_eq!(GpioError::DuplicateTag(1).code(), -53);
        assert_eq!(GpioError::BadTag(9).code(), -63);
        assert_eq!(GpioError::NotHalted(0).code(), -62);
        assert_eq!(GpioError::BadChainLoop.code(), -115);
        assert_eq!(GpioError::ChainTooBig.code(), -120);
        assert_eq!(GpioError::BadFilter(0).code(), -125);
    }

    #[test]
    fn config_errors_convert() {
        let err: GpioError = ConfigError::ValidationError("x".to_string()).into();
        assert!(matches!(err, GpioError::Config(_)));
        assert_eq!(err.code(), -1);
    }

    #[test]
    fn capacity_classification() {
        assert!(GpioError::TooManyDescriptors.is_capacity());
        assert!(GpioError::NoScriptRoom.is_capacity());
        assert!(!GpioError::BadWaveId(0).is_capacity());
        assert!(!GpioError::BadTag(0).is_capacity());
    }

    #[test]
    fn messages_carry_context() {
        assert_eq!(
            GpioError::BadGpio(99).to_string(),
            "gpio 99 out of range (0-53)"
        );
        assert_eq!(GpioError::NotHalted(4).to_string(), "script 4 is not halted");
    }
}
