//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Every section and every field is optional: a missing value takes the
//! default shown below, and an empty file yields [`Config::default`].
//!
//! ```toml
//! [emulation]
//! port = 1
//! seed_buttons = 0
//! design = "handler"
//! analog_sampling = true
//!
//! [translation]
//! policy = "asymmetric"
//! center = 128
//! # margin and margin_offset default per policy:
//! # 37 + 23 for "asymmetric", 64 + 0 for "symmetric"
//! margin = 37
//! margin_offset = 23
//!
//! [lifecycle]
//! thread_name = "EmulatedControllerMainThread"
//! thread_priority = 17
//! stack_size = 2048
//! stop_timeout_ms = 1000
//! timer_period_ms = 10
//! abort_on_setup_failure = false
//!
//! [logging]
//! level = "info"
//! log_dir = ""
//! file_prefix = "pad-emulator.log"
//!
//! [simulation]
//! poll_interval_ms = 16
//! run_duration_ms = 0
//! ```

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub use crate::controller::input_source::EmulationDesign;
use crate::controller::sample::{Buttons, Port};
use crate::controller::translation::{PolicyKind, Thresholds};
use crate::error::{PadEmulatorError, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub emulation: EmulationConfig,

    #[serde(default)]
    pub translation: TranslationConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Emulated port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EmulationConfig {
    #[serde(default = "default_port")]
    pub port: u8,

    #[serde(default)]
    pub seed_buttons: u32,

    #[serde(default)]
    pub design: EmulationDesign,

    #[serde(default = "default_analog_sampling")]
    pub analog_sampling: bool,
}

/// Stick translation configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TranslationConfig {
    #[serde(default)]
    pub policy: PolicyKind,

    #[serde(default = "default_center")]
    pub center: u8,

    /// Unset takes the selected policy's default.
    #[serde(default)]
    pub margin: Option<u8>,

    #[serde(default)]
    pub margin_offset: Option<u8>,
}

/// Owning thread configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LifecycleConfig {
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    #[serde(default = "default_thread_priority")]
    pub thread_priority: u32,

    #[serde(default = "default_stack_size")]
    pub stack_size: usize,

    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    #[serde(default = "default_timer_period_ms")]
    pub timer_period_ms: u64,

    #[serde(default)]
    pub abort_on_setup_failure: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for the rolling log file. Empty logs to the console only.
    #[serde(default)]
    pub log_dir: String,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

/// Simulated host configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SimulationConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Demo run time. Zero runs until Ctrl+C.
    #[serde(default)]
    pub run_duration_ms: u64,
}

// Default value functions
fn default_port() -> u8 { 1 }
fn default_analog_sampling() -> bool { true }

fn default_center() -> u8 { 128 }

fn default_thread_name() -> String { "EmulatedControllerMainThread".to_string() }
fn default_thread_priority() -> u32 { 0x11 }
fn default_stack_size() -> usize { 0x800 }
fn default_stop_timeout_ms() -> u64 { 1000 }
fn default_timer_period_ms() -> u64 { 10 }

fn default_log_level() -> String { "info".to_string() }
fn default_file_prefix() -> String { "pad-emulator.log".to_string() }

fn default_poll_interval_ms() -> u64 { 16 }

impl Default for EmulationConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            seed_buttons: 0,
            design: EmulationDesign::default(),
            analog_sampling: default_analog_sampling(),
        }
    }
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::default(),
            center: default_center(),
            margin: None,
            margin_offset: None,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            thread_name: default_thread_name(),
            thread_priority: default_thread_priority(),
            stack_size: default_stack_size(),
            stop_timeout_ms: default_stop_timeout_ms(),
            timer_period_ms: default_timer_period_ms(),
            abort_on_setup_failure: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: String::new(),
            file_prefix: default_file_prefix(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            run_duration_ms: 0,
        }
    }
}

impl EmulationConfig {
    /// The emulated port.
    #[must_use]
    pub fn port(&self) -> Port {
        Port(self.port)
    }

    /// Buttons reported on every poll.
    #[must_use]
    pub fn seed(&self) -> Buttons {
        Buttons::from_bits_retain(self.seed_buttons)
    }
}

impl TranslationConfig {
    /// Thresholds for the selected policy.
    ///
    /// A margin left unset takes the policy's own default.
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        let (margin, margin_offset) = self.policy.default_margins();
        Thresholds::new(
            self.center,
            self.margin.unwrap_or(margin),
            self.margin_offset.unwrap_or(margin_offset),
        )
    }
}

impl LifecycleConfig {
    /// Bounded wait for the owning thread to exit.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    /// Virtual timer period of the timer-driven design.
    #[must_use]
    pub fn timer_period(&self) -> Duration {
        Duration::from_millis(self.timer_period_ms)
    }
}

fn invalid(message: impl std::fmt::Display) -> PadEmulatorError {
    PadEmulatorError::Config(toml::de::Error::custom(message))
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pad_emulator::config::Config;
    ///
    /// let config = Config::load("config/default.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        // Emulated port must be an external one
        if !self.emulation.port().is_external() {
            return Err(invalid("port must be 1 or 2"));
        }

        // Threshold must leave both sides of the center reachable
        let threshold = self.translation.thresholds().threshold();
        if !(1..=127).contains(&threshold) {
            return Err(invalid(format!(
                "margin + margin_offset must be between 1 and 127 (got {})",
                threshold
            )));
        }

        if self.lifecycle.thread_name.is_empty() {
            return Err(invalid("thread_name cannot be empty"));
        }

        if self.lifecycle.thread_priority == 0 || self.lifecycle.thread_priority > 127 {
            return Err(invalid("thread_priority must be between 1 and 127"));
        }

        if self.lifecycle.stack_size < 512 {
            return Err(invalid("stack_size must be at least 512"));
        }

        // Validate timing fields
        if self.lifecycle.stop_timeout_ms == 0 || self.lifecycle.stop_timeout_ms > 60000 {
            return Err(invalid("stop_timeout_ms must be between 1 and 60000"));
        }

        if self.lifecycle.timer_period_ms == 0 || self.lifecycle.timer_period_ms > 1000 {
            return Err(invalid("timer_period_ms must be between 1 and 1000"));
        }

        if self.simulation.poll_interval_ms == 0 || self.simulation.poll_interval_ms > 1000 {
            return Err(invalid("poll_interval_ms must be between 1 and 1000"));
        }

        // Validate logging
        if !["error", "warn", "info", "debug", "trace"].contains(&self.logging.level.as_str()) {
            return Err(invalid(
                "log level must be one of: error, warn, info, debug, trace",
            ));
        }

        if !self.logging.log_dir.is_empty() && self.logging.file_prefix.is_empty() {
            return Err(invalid("file_prefix cannot be empty when log_dir is set"));
        }

        Ok(())
    }
}
