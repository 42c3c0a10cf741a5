//! Configuration loading traits and types.
//!
//! Every field has a default, so an empty TOML file yields a working
//! engine configuration.
//!
//! # Usage
//!
//! ```rust,no_run
//! use dmagpio_common::config::{ConfigLoader, GpioConfig, ConfigError};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = GpioConfig::load(Path::new("dmagpio.toml"))?;
//!     config.validate()?;
//!     println!("Sampling every {} us", config.sampling.sample_micros);
//!     Ok(())
//! }
//! ```

use crate::consts::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Why a configuration could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No file at the given path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// Unreadable file, bad TOML or a field of the wrong type.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// A value outside its allowed range.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Daemon log verbosity, written in lowercase in TOML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-operation detail.
    Trace,
    /// Registry changes and thread lifecycle.
    Debug,
    /// Start-up, shutdown and script results.
    #[default]
    Info,
    /// Dropped samples or reports, failed real-time requests.
    Warn,
    /// Script faults and fatal errors only.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Common service fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "dmagpio-bench-01"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance identifier used in logs.
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

fn default_service_name() -> String {
    SERVICE_NAME.to_string()
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: default_service_name(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Engine sections ────────────────────────────────────────────────

/// Sampler and dispatch timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Nominal sample period in microseconds.
    pub sample_micros: u32,
    /// Span of samples the ring buffer holds.
    pub buffer_millis: u32,
    /// Period of the dispatch batch loop.
    pub dispatch_micros: u32,
    /// Request SCHED_FIFO for the sampler thread.
    pub realtime: bool,
    /// SCHED_FIFO priority when `realtime` is set.
    pub realtime_priority: i32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            sample_micros: DEFAULT_SAMPLE_MICROS,
            buffer_millis: DEFAULT_BUFFER_MILLIS,
            dispatch_micros: DEFAULT_DISPATCH_MICROS,
            realtime: false,
            realtime_priority: 50,
        }
    }
}

impl SamplingConfig {
    /// Number of samples the ring holds.
    pub fn ring_capacity(&self) -> usize {
        (self.buffer_millis as usize * 1_000) / self.sample_micros.max(1) as usize
    }
}

/// Waveform pool and arena sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveConfig {
    /// Pulse pool bound.
    pub max_pulses: usize,
    /// Descriptor arena size.
    pub max_descriptors: usize,
    /// Out-of-line arena size.
    pub max_ool: usize,
    /// Longest single delay descriptor.
    pub max_delay_micros: u32,
}

impl Default for WaveConfig {
    fn default() -> Self {
        Self {
            max_pulses: WAVE_MAX_PULSES,
            max_descriptors: WAVE_MAX_DESCRIPTORS,
            max_ool: WAVE_MAX_OOL,
            max_delay_micros: DESCRIPTOR_MAX_DELAY_MICROS,
        }
    }
}

/// Notification queue sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Reports buffered per handle before the oldest is dropped.
    pub queue_depth: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_NOTIFY_QUEUE_DEPTH,
        }
    }
}

/// Hardware backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Registered backend name.
    pub name: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: "simulation".to_string(),
        }
    }
}

/// Complete engine configuration.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "info"
///
/// [sampling]
/// sample_micros = 5
/// buffer_millis = 120
///
/// [waves]
/// max_pulses = 12000
///
/// [notify]
/// queue_depth = 4096
///
/// [backend]
/// name = "simulation"
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    /// Service fields.
    pub shared: SharedConfig,
    /// Sampler and dispatch timing.
    pub sampling: SamplingConfig,
    /// Waveform sizing.
    pub waves: WaveConfig,
    /// Notification sizing.
    pub notify: NotifyConfig,
    /// Backend selection.
    pub backend: BackendConfig,
}

impl GpioConfig {
    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        let s = &self.sampling;
        if !SAMPLE_MICROS_CHOICES.contains(&s.sample_micros) {
            return Err(invalid(format!(
                "sampling.sample_micros must be one of {:?}, got {}",
                SAMPLE_MICROS_CHOICES, s.sample_micros
            )));
        }
        if !(MIN_BUFFER_MILLIS..=MAX_BUFFER_MILLIS).contains(&s.buffer_millis) {
            return Err(invalid(format!(
                "sampling.buffer_millis must be {MIN_BUFFER_MILLIS}..={MAX_BUFFER_MILLIS}, got {}",
                s.buffer_millis
            )));
        }
        if !(MIN_DISPATCH_MICROS..=MAX_DISPATCH_MICROS).contains(&s.dispatch_micros) {
            return Err(invalid(format!(
                "sampling.dispatch_micros must be {MIN_DISPATCH_MICROS}..={MAX_DISPATCH_MICROS}, got {}",
                s.dispatch_micros
            )));
        }
        if !(1..=99).contains(&s.realtime_priority) {
            return Err(invalid(format!(
                "sampling.realtime_priority must be 1..=99, got {}",
                s.realtime_priority
            )));
        }

        let w = &self.waves;
        if w.max_pulses == 0 || w.max_pulses > WAVE_MAX_PULSES {
            return Err(invalid(format!(
                "waves.max_pulses must be 1..={WAVE_MAX_PULSES}, got {}",
                w.max_pulses
            )));
        }
        if w.max_descriptors == 0 {
            return Err(invalid("waves.max_descriptors must be positive".to_string()));
        }
        if w.max_ool == 0 {
            return Err(invalid("waves.max_ool must be positive".to_string()));
        }
        if !(1..=1_000_000).contains(&w.max_delay_micros) {
            return Err(invalid(format!(
                "waves.max_delay_micros must be 1..=1000000, got {}",
                w.max_delay_micros
            )));
        }

        if self.notify.queue_depth == 0 {
            return Err(invalid("notify.queue_depth must be positive".to_string()));
        }
        if self.backend.name.is_empty() {
            return Err(invalid("backend.name cannot be empty".to_string()));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> ConfigError {
    ConfigError::ValidationError(msg)
}

/// TOML loading for any deserializable configuration type.
///
/// A missing file is `FileNotFound` (the daemon falls back to defaults);
/// anything else that prevents deserialization is `ParseError`.
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Read and parse `path`.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}
