//! # Runtime Configuration
//!
//! Loaded once at startup from TOML. A [`NetworkPreset`] other than
//! `Custom` overwrites the network section with values tuned for the
//! targeted conditions, whatever the file says.
//!
//! ```toml
//! preset = "regular"
//! tick_rate_hz = 60
//! position_tolerance_sq = 0.01
//! smoothing_curve = "smooth_step"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::constants::{DEFAULT_TICK_RATE, MAX_INPUTS_PER_BATCH};

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for this schema.
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Target network conditions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPreset {
    /// Local network, no latency, ideal conditions.
    #[default]
    Lan,
    /// Wired, ping below 60 ms, minimal jitter, no loss.
    Competitive,
    /// Stable, ping below 100 ms, little jitter, loss below 2%.
    Regular,
    /// Unstable, ping up to 200 ms, noticeable jitter, loss up to 5%.
    LowEnd,
    /// Everything as written in the file.
    Custom,
}

/// Blend curve used to hide corrections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmoothingCurve {
    /// No blending, jump straight to the target.
    HardSnap,
    /// Constant rate.
    Linear,
    /// Fast start, slow end: `1 - (1 - t)^2`.
    #[default]
    EaseOut,
    /// S-curve: `3t^2 - 2t^3`.
    SmoothStep,
}

impl SmoothingCurve {
    /// Blend weight for progress `t` in `[0, 1]`.
    #[inline]
    #[must_use]
    pub fn weight(self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::HardSnap => 1.0,
            Self::Linear => t,
            Self::EaseOut => {
                let inv = 1.0 - t;
                1.0 - inv * inv
            }
            Self::SmoothStep => t * t * (3.0 - 2.0 * t),
        }
    }
}

/// Configuration of the prediction / synchronization stack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GaitConfig {
    /// Network preset; anything but `Custom` overwrites the network values.
    pub preset: NetworkPreset,
    /// Fixed simulation rate.
    pub tick_rate_hz: u32,
    /// Prediction history per actor, in ticks.
    pub buffer_capacity: usize,
    /// Accepted squared position error.
    pub position_tolerance_sq: f32,
    /// Accepted squared velocity error.
    pub velocity_tolerance_sq: f32,
    /// Datagrams are sent every this many ticks.
    pub send_interval_ticks: u32,
    /// Most unacknowledged inputs repeated in one datagram.
    pub max_redundant_inputs: usize,
    /// Duration of the correction blend.
    pub smoothing_window_ms: f32,
    /// Blend curve.
    pub smoothing_curve: SmoothingCurve,
    /// Corrections longer than this snap instead of blending.
    pub max_smoothing_distance: f32,
    /// Send input axes as 16-bit fixed point.
    pub input_quantization: bool,
    /// Remote actors are rendered this far in the past.
    pub render_delay_ms: f32,
    /// Longest extrapolation for remote actors when updates stop.
    pub max_extrapolation_ms: f32,
    /// Capacity of the datagram inbox between I/O and simulation.
    pub inbox_capacity: usize,
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self::from_preset(NetworkPreset::Lan)
    }
}

impl GaitConfig {
    /// Configuration tuned for a preset. `Custom` yields the LAN values.
    #[must_use]
    pub fn from_preset(preset: NetworkPreset) -> Self {
        let mut config = Self {
            preset,
            tick_rate_hz: DEFAULT_TICK_RATE,
            buffer_capacity: 64,
            position_tolerance_sq: 0.01,
            velocity_tolerance_sq: 0.25,
            send_interval_ticks: 1,
            max_redundant_inputs: 4,
            smoothing_window_ms: 100.0,
            smoothing_curve: SmoothingCurve::EaseOut,
            max_smoothing_distance: 3.0,
            input_quantization: false,
            render_delay_ms: 50.0,
            max_extrapolation_ms: 100.0,
            inbox_capacity: 256,
        };
        config.apply_preset();
        config
    }

    /// Overwrites the network values with those of `self.preset`.
    pub fn apply_preset(&mut self) {
        let (capacity, interval, redundant, window, delay, extrapolation, quantize) = match self.preset {
            NetworkPreset::Custom => return,
            NetworkPreset::Lan => (64, 1, 4, 50.0, 50.0, 100.0, false),
            NetworkPreset::Competitive => (64, 1, 8, 100.0, 80.0, 150.0, true),
            NetworkPreset::Regular => (128, 2, 16, 150.0, 120.0, 250.0, true),
            NetworkPreset::LowEnd => (256, 3, 32, 200.0, 200.0, 400.0, true),
        };
        self.buffer_capacity = capacity;
        self.send_interval_ticks = interval;
        self.max_redundant_inputs = redundant;
        self.smoothing_window_ms = window;
        self.render_delay_ms = delay;
        self.max_extrapolation_ms = extrapolation;
        self.input_quantization = quantize;
    }

    /// Parses TOML text, applies the preset and validates.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed input, [`ConfigError::Invalid`]
    /// for out-of-range values.
    pub fn from_toml_str(text: &str) -> ConfigResult<Self> {
        let mut config: Self = toml::from_str(text)?;
        config.apply_preset();
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] when the file cannot be read, otherwise as
    /// [`GaitConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Rejects values the stack cannot run with.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        fn non_negative(name: &str, value: f32) -> ConfigResult<()> {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!("{name} must be a finite, non-negative number, got {value}")))
            }
        }

        if !(1..=1000).contains(&self.tick_rate_hz) {
            return Err(ConfigError::Invalid(format!(
                "tick_rate_hz must be within 1..=1000, got {}",
                self.tick_rate_hz
            )));
        }
        if self.buffer_capacity < 2 {
            return Err(ConfigError::Invalid(format!(
                "buffer_capacity must be at least 2, got {}",
                self.buffer_capacity
            )));
        }
        if self.send_interval_ticks == 0 {
            return Err(ConfigError::Invalid("send_interval_ticks must be at least 1".into()));
        }
        if !(1..=MAX_INPUTS_PER_BATCH).contains(&self.max_redundant_inputs) {
            return Err(ConfigError::Invalid(format!(
                "max_redundant_inputs must be within 1..={MAX_INPUTS_PER_BATCH}, got {}",
                self.max_redundant_inputs
            )));
        }
        if self.inbox_capacity == 0 {
            return Err(ConfigError::Invalid("inbox_capacity must be at least 1".into()));
        }
        non_negative("position_tolerance_sq", self.position_tolerance_sq)?;
        non_negative("velocity_tolerance_sq", self.velocity_tolerance_sq)?;
        non_negative("smoothing_window_ms", self.smoothing_window_ms)?;
        non_negative("max_smoothing_distance", self.max_smoothing_distance)?;
        non_negative("render_delay_ms", self.render_delay_ms)?;
        non_negative("max_extrapolation_ms", self.max_extrapolation_ms)?;
        Ok(())
    }

    /// Fixed simulation step in seconds.
    #[inline]
    #[must_use]
    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_rate_hz.max(1) as f32
    }

    /// Fixed simulation step in milliseconds.
    #[inline]
    #[must_use]
    pub fn tick_millis(&self) -> f32 {
        1000.0 / self.tick_rate_hz.max(1) as f32
    }
}
