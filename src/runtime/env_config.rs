//! Environment variable and config file support for [`LoopConfig`].
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `DISPATCHKIT_MAX_WAIT_MS` | `u64` | `max_wait` |
//! | `DISPATCHKIT_MAX_FRAME_RATE` | `f64` | `maximum_frame_rate` |
//! | `DISPATCHKIT_QUEUE_CAPACITY` | `usize` | `closure_queue_capacity` |
//! | `DISPATCHKIT_TIMER_THREAD_NAME` | `String` | `timer_thread_name` |
//! | `DISPATCHKIT_DETECT_DEAD_LOCKS` | `bool` | `detect_dead_locks` |
//! | `DISPATCHKIT_CONFIG_FILE` | path | TOML file (`config-file` feature) |

use super::config::LoopConfig;
use crate::error::{Error, Result};
use std::time::Duration;

/// Environment variable name for the longest blocking wait, in milliseconds.
pub const ENV_MAX_WAIT_MS: &str = "DISPATCHKIT_MAX_WAIT_MS";
/// Environment variable name for the render frame rate.
pub const ENV_MAX_FRAME_RATE: &str = "DISPATCHKIT_MAX_FRAME_RATE";
/// Environment variable name for the initial closure queue capacity.
pub const ENV_QUEUE_CAPACITY: &str = "DISPATCHKIT_QUEUE_CAPACITY";
/// Environment variable name for the timer thread name.
pub const ENV_TIMER_THREAD_NAME: &str = "DISPATCHKIT_TIMER_THREAD_NAME";
/// Environment variable name for the lock-order verifier toggle.
pub const ENV_DETECT_DEAD_LOCKS: &str = "DISPATCHKIT_DETECT_DEAD_LOCKS";
/// Environment variable naming a TOML configuration file.
pub const ENV_CONFIG_FILE: &str = "DISPATCHKIT_CONFIG_FILE";

/// Apply environment variable overrides to a [`LoopConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut LoopConfig) -> Result<()> {
    if let Some(val) = read_env(ENV_MAX_WAIT_MS) {
        config.max_wait = Duration::from_millis(parse_u64(ENV_MAX_WAIT_MS, &val)?);
    }
    if let Some(val) = read_env(ENV_MAX_FRAME_RATE) {
        config.maximum_frame_rate = parse_f64(ENV_MAX_FRAME_RATE, &val)?;
    }
    if let Some(val) = read_env(ENV_QUEUE_CAPACITY) {
        config.closure_queue_capacity = parse_usize(ENV_QUEUE_CAPACITY, &val)?;
    }
    if let Some(val) = read_env(ENV_TIMER_THREAD_NAME) {
        config.timer_thread_name = val;
    }
    if let Some(val) = read_env(ENV_DETECT_DEAD_LOCKS) {
        config.detect_dead_locks = parse_bool(ENV_DETECT_DEAD_LOCKS, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize> {
    val.trim().parse::<usize>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64> {
    val.trim().parse::<u64>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: expected u64, got {val:?} ({e})"
        ))
    })
}

fn parse_f64(var_name: &str, val: &str) -> Result<f64> {
    match val.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        Ok(_) => Err(Error::invalid_config(format!(
            "invalid value for {var_name}: expected a positive number, got {val:?}"
        ))),
        Err(e) => Err(Error::invalid_config(format!(
            "invalid value for {var_name}: expected a number, got {val:?} ({e})"
        ))),
    }
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::invalid_config(format!(
            "invalid value for {var_name}: expected bool (true/false/1/0/yes/no), got {val:?}"
        ))),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable loop configuration.
///
/// ```toml
/// [loop]
/// max_wait_ms = 50
/// maximum_frame_rate = 60.0
/// closure_queue_capacity = 256
/// timer_thread_name = "app-timer"
/// detect_dead_locks = false
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct LoopTomlConfig {
    /// Loop settings.
    #[serde(default, rename = "loop")]
    pub event_loop: LoopToml,
}

/// `[loop]` section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct LoopToml {
    /// Longest blocking wait in milliseconds.
    pub max_wait_ms: Option<u64>,
    /// Render frame rate.
    pub maximum_frame_rate: Option<f64>,
    /// Initial closure queue capacity.
    pub closure_queue_capacity: Option<usize>,
    /// Timer thread name.
    pub timer_thread_name: Option<String>,
    /// Lock-order verifier toggle.
    pub detect_dead_locks: Option<bool>,
}

/// Apply a parsed TOML config to a [`LoopConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut LoopConfig, toml: &LoopTomlConfig) {
    let section = &toml.event_loop;
    if let Some(v) = section.max_wait_ms {
        config.max_wait = Duration::from_millis(v);
    }
    if let Some(v) = section.maximum_frame_rate {
        config.maximum_frame_rate = v;
    }
    if let Some(v) = section.closure_queue_capacity {
        config.closure_queue_capacity = v;
    }
    if let Some(ref v) = section.timer_thread_name {
        config.timer_thread_name.clone_from(v);
    }
    if let Some(v) = section.detect_dead_locks {
        config.detect_dead_locks = v;
    }
}

/// Parse a TOML string into a [`LoopTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<LoopTomlConfig> {
    toml::from_str(toml_str)
        .map_err(|e| Error::invalid_config(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into a [`LoopTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<LoopTomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::invalid_config(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    parse_toml_str(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        clean_env_locked();
        for (k, v) in vars {
            std::env::set_var(k, v);
        }
        let result = f();
        clean_env_locked();
        result
    }

    fn clean_env_locked() {
        for var in &[
            ENV_MAX_WAIT_MS,
            ENV_MAX_FRAME_RATE,
            ENV_QUEUE_CAPACITY,
            ENV_TIMER_THREAD_NAME,
            ENV_DETECT_DEAD_LOCKS,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn bad_variable_keeps_lower_layers() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("bad_variable_keeps_lower_layers");
        let from_file = LoopConfig {
            max_wait: Duration::from_millis(250),
            timer_thread_name: "file-timer".to_string(),
            ..LoopConfig::default()
        };
        let config = with_envs(
            &[(ENV_MAX_WAIT_MS, "soon"), (ENV_QUEUE_CAPACITY, "8")],
            || LoopConfig::with_env_layer(from_file.clone()),
        );
        crate::assert_with_log!(config == from_file, "file layer kept", from_file, config);

        let config = with_envs(&[(ENV_QUEUE_CAPACITY, "8")], || {
            LoopConfig::with_env_layer(from_file.clone())
        });
        crate::assert_with_log!(
            config.closure_queue_capacity == 8 && config.timer_thread_name == "file-timer",
            "env over file",
            (8, "file-timer"),
            (config.closure_queue_capacity, &config.timer_thread_name)
        );
        crate::test_complete!("bad_variable_keeps_lower_layers");
    }

    #[test]
    fn parse_usize_valid_and_invalid() {
        assert_eq!(super::parse_usize("TEST", " 100 ").unwrap(), 100);
        assert!(super::parse_usize("TEST", "-1").is_err());
        assert!(super::parse_usize("TEST", "").is_err());
    }

    #[test]
    fn parse_f64_rejects_non_positive() {
        assert!((super::parse_f64("TEST", "60").unwrap() - 60.0).abs() < f64::EPSILON);
        assert!(super::parse_f64("TEST", "0").is_err());
        assert!(super::parse_f64("TEST", "inf").is_err());
        assert!(super::parse_f64("TEST", "fast").is_err());
    }

    #[test]
    fn parse_bool_forms() {
        for val in &["true", "1", "yes", "on", "TRUE", "On"] {
            assert!(super::parse_bool("TEST", val).unwrap(), "expected true for {val}");
        }
        for val in &["false", "0", "no", "off", "FALSE"] {
            assert!(!super::parse_bool("TEST", val).unwrap(), "expected false for {val}");
        }
        let err = super::parse_bool("TEST", "maybe").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn env_overrides_apply() {
        with_envs(
            &[
                (ENV_MAX_WAIT_MS, "25"),
                (ENV_MAX_FRAME_RATE, "120"),
                (ENV_QUEUE_CAPACITY, "8"),
                (ENV_TIMER_THREAD_NAME, "ticker"),
                (ENV_DETECT_DEAD_LOCKS, "on"),
            ],
            || {
                let mut config = LoopConfig::default();
                apply_env_overrides(&mut config).unwrap();
                assert_eq!(config.max_wait, Duration::from_millis(25));
                assert!((config.maximum_frame_rate - 120.0).abs() < f64::EPSILON);
                assert_eq!(config.closure_queue_capacity, 8);
                assert_eq!(config.timer_thread_name, "ticker");
                assert!(config.detect_dead_locks);
            },
        );
    }

    #[test]
    fn env_override_error_names_the_variable() {
        with_envs(&[(ENV_QUEUE_CAPACITY, "lots")], || {
            let mut config = LoopConfig::default();
            let err = apply_env_overrides(&mut config).unwrap_err();
            assert!(err.to_string().contains(ENV_QUEUE_CAPACITY));
            assert_eq!(config.closure_queue_capacity, 64);
        });
    }

    #[test]
    fn unset_env_leaves_defaults() {
        with_envs(&[], || {
            let mut config = LoopConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config, LoopConfig::default());
        });
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_loop_section_overrides_present_keys() {
        let parsed = parse_toml_str(
            r#"
            [loop]
            max_wait_ms = 10
            timer_thread_name = "tick"
            "#,
        )
        .unwrap();
        let mut config = LoopConfig::default();
        apply_toml_config(&mut config, &parsed);
        assert_eq!(config.max_wait, Duration::from_millis(10));
        assert_eq!(config.timer_thread_name, "tick");
        assert_eq!(config.closure_queue_capacity, 64);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn toml_parse_error_is_invalid_config() {
        let err = parse_toml_str("[loop\nmax_wait_ms = ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }
}
