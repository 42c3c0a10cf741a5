//! Configuration file tests.
//!
//! Full and partial TOML files on disk, range validation and conversion of
//! configuration failures into engine errors.

use dmagpio_common::config::{ConfigError, ConfigLoader, GpioConfig, LogLevel};
use dmagpio_common::error::GpioError;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn write_config(dir: &Path, body: &str) -> std::path::PathBuf {
    let path = dir.join("dmagpio.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn full_file_overrides_every_section() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        dir.path(),
        r#"
[shared]
log_level = "warn"
service_name = "bench-rig"

[sampling]
sample_micros = 2
buffer_millis = 500
dispatch_micros = 2000
realtime = true
realtime_priority = 80

[waves]
max_pulses = 6000
max_descriptors = 10000
max_ool = 8000
max_delay_micros = 5000

[notify]
queue_depth = 64

[backend]
name = "simulation"
"#,
    );

    let config = GpioConfig::load(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.shared.log_level, LogLevel::Warn);
    assert_eq!(config.shared.service_name, "bench-rig");
    assert_eq!(config.sampling.sample_micros, 2);
    assert_eq!(config.sampling.ring_capacity(), 250_000);
    assert!(config.sampling.realtime);
    assert_eq!(config.sampling.realtime_priority, 80);
    assert_eq!(config.waves.max_pulses, 6000);
    assert_eq!(config.waves.max_descriptors, 10_000);
    assert_eq!(config.waves.max_ool, 8000);
    assert_eq!(config.waves.max_delay_micros, 5000);
    assert_eq!(config.notify.queue_depth, 64);
}

#[test]
fn out_of_range_values_fail_validation() {
    let dir = TempDir::new().unwrap();
    for body in [
        "[sampling]\nsample_micros = 3\n",
        "[sampling]\ndispatch_micros = 50\n",
        "[sampling]\nrealtime_priority = 0\n",
        "[waves]\nmax_pulses = 12001\n",
        "[waves]\nmax_delay_micros = 0\n",
        "[notify]\nqueue_depth = 0\n",
        "[backend]\nname = \"\"\n",
    ] {
        let path = write_config(dir.path(), body);
        let config = GpioConfig::load(&path).unwrap();
        let err = config.validate().unwrap_err();
        assert!(
            matches!(err, ConfigError::ValidationError(_)),
            "{body:?} gave {err:?}"
        );
    }
}

#[test]
fn wrong_types_are_parse_errors() {
    let dir = TempDir::new().unwrap();
    let path = write_config(dir.path(), "[sampling]\nsample_micros = \"fast\"\n");
    assert!(matches!(
        GpioConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));

    let path = write_config(dir.path(), "[shared]\nlog_level = \"loud\"\n");
    assert!(matches!(
        GpioConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn config_failures_become_engine_errors() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");
    let err: GpioError = GpioConfig::load(&missing).unwrap_err().into();
    assert_eq!(err, GpioError::Config(ConfigError::FileNotFound));
    assert_eq!(err.code(), -1);
    assert!(err.to_string().contains("not found"));
}
