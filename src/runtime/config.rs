//! Event loop configuration.
//!
//! [`LoopConfig`] holds the values that shape every loop created after it is
//! installed. Loops read the process-wide configuration once, at creation.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `max_wait` | 100 ms |
//! | `maximum_frame_rate` | 30.0 |
//! | `closure_queue_capacity` | 64 |
//! | `timer_thread_name` | `"timer"` |
//! | `detect_dead_locks` | on in debug builds |
//!
//! # Precedence
//!
//! Programmatic values passed to [`LoopConfig::install`] win. Otherwise the
//! first call to [`LoopConfig::current`] builds the defaults, applies a TOML
//! file named by `DISPATCHKIT_CONFIG_FILE` (with the `config-file` feature),
//! and then applies the `DISPATCHKIT_*` environment overrides.

use super::env_config;
use crate::error::Result;
use crate::sync::DeadLockDetector;
use crate::tracing_compat::{debug, warn};
use parking_lot::RwLock;
use std::time::Duration;

/// Upper bound on the frame rate accepted by [`LoopConfig::normalize`].
pub const MAX_FRAME_RATE: f64 = 1000.0;

/// Configuration shared by all event loops.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Longest single blocking wait of a loop (default: 100 ms).
    pub max_wait: Duration,
    /// Render ticks per second delivered to render subscribers.
    pub maximum_frame_rate: f64,
    /// Initial slot count of each loop's closure ring buffer.
    pub closure_queue_capacity: usize,
    /// Name of the thread spawned for [`Loop::timer`](super::Loop::timer).
    pub timer_thread_name: String,
    /// Whether instrumented mutexes consult the lock-order verifier.
    pub detect_dead_locks: bool,
}

impl LoopConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.max_wait.is_zero() {
            self.max_wait = Duration::from_millis(1);
        }
        if !self.maximum_frame_rate.is_finite() || self.maximum_frame_rate <= 0.0 {
            self.maximum_frame_rate = 30.0;
        }
        if self.maximum_frame_rate > MAX_FRAME_RATE {
            self.maximum_frame_rate = MAX_FRAME_RATE;
        }
        if self.closure_queue_capacity == 0 {
            self.closure_queue_capacity = 1;
        }
        if self.timer_thread_name.is_empty() {
            self.timer_thread_name = "timer".to_string();
        }
    }

    /// Defaults with the environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        env_config::apply_env_overrides(&mut config)?;
        config.normalize();
        Ok(config)
    }

    /// Makes `config` the configuration for loops created from now on.
    pub fn install(mut config: Self) {
        config.normalize();
        DeadLockDetector::set_enabled(config.detect_dead_locks);
        debug!(?config, "loop configuration installed");
        *CURRENT.write() = Some(config);
    }

    /// Returns the installed configuration, building it on first use.
    #[must_use]
    pub fn current() -> Self {
        if let Some(config) = CURRENT.read().as_ref() {
            return config.clone();
        }
        let mut slot = CURRENT.write();
        if let Some(config) = slot.as_ref() {
            return config.clone();
        }
        let config = Self::resolve();
        DeadLockDetector::set_enabled(config.detect_dead_locks);
        *slot = Some(config.clone());
        config
    }

    /// Interval between render ticks.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.maximum_frame_rate)
    }

    fn resolve() -> Self {
        #[allow(unused_mut)]
        let mut config = Self::default();
        #[cfg(feature = "config-file")]
        if let Some(path) = std::env::var_os(env_config::ENV_CONFIG_FILE) {
            match env_config::parse_toml_file(std::path::Path::new(&path)) {
                Ok(file) => env_config::apply_toml_config(&mut config, &file),
                Err(err) => warn!(%err, "ignoring loop configuration file"),
            }
        }
        Self::with_env_layer(config)
    }

    /// Applies the environment on top of `base`. An unparsable variable
    /// discards the environment layer only; `base` is kept as is.
    pub(crate) fn with_env_layer(base: Self) -> Self {
        let mut layered = base.clone();
        let mut config = match env_config::apply_env_overrides(&mut layered) {
            Ok(()) => layered,
            Err(err) => {
                warn!(%err, "ignoring loop configuration from the environment");
                base
            }
        };
        config.normalize();
        config
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_millis(100),
            maximum_frame_rate: 30.0,
            closure_queue_capacity: 64,
            timer_thread_name: "timer".to_string(),
            detect_dead_locks: cfg!(debug_assertions),
        }
    }
}

static CURRENT: RwLock<Option<LoopConfig>> = parking_lot::const_rwlock(None);
