//! Battery configuration
//!
//! Every tunable threshold lives here as a `pub const` default, grouped into
//! serde-loadable sections so a host can override any subset from JSON.

use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

/// Default duration of each layer in seconds
pub const DEFAULT_LAYER_DURATION_SEC: f64 = 60.0;

/// Countdown before layer 0 starts
pub const DEFAULT_COUNTDOWN_SEC: f64 = 3.0;

/// Fixed pause between layers, shown on the "ready" screen
pub const INTER_LAYER_COOLDOWN_SEC: u32 = 10;

/// A tick gap above `frame interval * multiplier` is a stall
pub const STALL_MULTIPLIER: f64 = 3.0;

/// Minimum spacing between two audio cues
pub const MIN_AUDIO_INTERVAL_SEC: f64 = 1.5;

/// Minimum spacing between an audio cue and a peripheral flash (either order)
pub const MIN_AUDIO_FLASH_SEPARATION_SEC: f64 = 1.0;

/// Minimum spacing between a cooldown-ready event and a following audio cue
pub const MIN_COOLDOWN_AUDIO_SEPARATION_SEC: f64 = 0.75;

/// Delay applied to an emission that would violate a spacing constraint
pub const SPACING_DEFER_SEC: f64 = 0.25;

/// Default event buffer capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 200_000;

/// Key used to answer audio cues
pub const AUDIO_RESPONSE_KEY: &str = " ";

/// Key used to spend the cooldown resource
pub const COOLDOWN_KEY: &str = "e";

/// Key that aborts the test
pub const ABORT_KEY: &str = "Escape";

/// Difficulty preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Standard,
    Hard,
}

/// Interval ranges and motion parameters of a difficulty preset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifficultyProfile {
    /// Layer 0 stimulus spacing (seconds, uniform)
    pub stimulus_interval: (f64, f64),
    /// Audio cue spacing (seconds, uniform)
    pub audio_interval: (f64, f64),
    /// Peripheral flash spacing (seconds, uniform)
    pub flash_interval: (f64, f64),
    /// Target speed in pixels per second
    pub target_speed: f64,
    /// Expected steering direction changes per second
    pub direction_change_rate: f64,
    /// Seconds for the cooldown bar to fill
    pub cooldown_cycle_sec: f64,
}

impl Difficulty {
    pub fn profile(&self) -> DifficultyProfile {
        match self {
            Difficulty::Easy => DifficultyProfile {
                stimulus_interval: (2.5, 5.0),
                audio_interval: (4.0, 7.0),
                flash_interval: (5.0, 9.0),
                target_speed: 120.0,
                direction_change_rate: 0.3,
                cooldown_cycle_sec: 10.0,
            },
            Difficulty::Standard => DifficultyProfile {
                stimulus_interval: (2.0, 4.0),
                audio_interval: (3.0, 6.0),
                flash_interval: (4.0, 8.0),
                target_speed: 180.0,
                direction_change_rate: 0.5,
                cooldown_cycle_sec: 8.0,
            },
            Difficulty::Hard => DifficultyProfile {
                stimulus_interval: (1.5, 3.0),
                audio_interval: (2.0, 4.0),
                flash_interval: (3.0, 6.0),
                target_speed: 260.0,
                direction_change_rate: 0.8,
                cooldown_cycle_sec: 6.0,
            },
        }
    }
}

/// Display parameters sizing stimulus bounds and stall thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: f64,
    pub height: f64,
    pub refresh_hz: f64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
            refresh_hz: 60.0,
        }
    }
}

impl DisplayConfig {
    /// Expected interval between frames in microseconds
    pub fn frame_interval_us(&self) -> f64 {
        1_000_000.0 / self.refresh_hz.max(1.0)
    }
}

/// Stimulus scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub display: DisplayConfig,
    pub layer_duration_sec: f64,
    pub countdown_sec: f64,
    pub inter_layer_cooldown_sec: u32,
    /// Unanswered layer 0 stimuli are withdrawn after this long
    pub stimulus_timeout_ms: f64,
    /// Time a peripheral flash stays on screen
    pub flash_visible_ms: f64,
    /// Unspent cooldown resets after this long
    pub cooldown_ready_timeout_sec: f64,
    pub distractor_probability: f64,
    pub stimulus_margin_px: f64,
    pub target_radius_px: f64,
    /// Steering turn rate in radians per second
    pub turn_rate: f64,
    pub stall_multiplier: f64,
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            display: DisplayConfig::default(),
            layer_duration_sec: DEFAULT_LAYER_DURATION_SEC,
            countdown_sec: DEFAULT_COUNTDOWN_SEC,
            inter_layer_cooldown_sec: INTER_LAYER_COOLDOWN_SEC,
            stimulus_timeout_ms: 1_500.0,
            flash_visible_ms: 500.0,
            cooldown_ready_timeout_sec: 5.0,
            distractor_probability: 0.3,
            stimulus_margin_px: 60.0,
            target_radius_px: 40.0,
            turn_rate: 2.5,
            stall_multiplier: STALL_MULTIPLIER,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<(), ComputeError> {
        if !(self.layer_duration_sec.is_finite() && self.layer_duration_sec > 0.0) {
            return Err(ComputeError::Configuration(
                "layer_duration_sec must be positive".to_string(),
            ));
        }
        if !(self.countdown_sec.is_finite() && self.countdown_sec >= 0.0) {
            return Err(ComputeError::Configuration(
                "countdown_sec must not be negative".to_string(),
            ));
        }
        let d = &self.display;
        if !(d.refresh_hz.is_finite() && d.refresh_hz > 0.0) {
            return Err(ComputeError::Configuration(
                "refresh_hz must be positive".to_string(),
            ));
        }
        if self.stimulus_margin_px.is_nan()
            || self.stimulus_margin_px < 0.0
            || d.width <= 2.0 * self.stimulus_margin_px
            || d.height <= 2.0 * self.stimulus_margin_px
        {
            return Err(ComputeError::Configuration(
                "display is smaller than the stimulus margins".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.distractor_probability) {
            return Err(ComputeError::Configuration(format!(
                "distractor_probability must be within [0, 1], got {}",
                self.distractor_probability
            )));
        }
        if self.event_capacity == 0 {
            return Err(ComputeError::Configuration(
                "event_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Metrics extraction thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub anticipation_ms: f64,
    pub lapse_ms: f64,
    /// Canonical resampling rate for jerk
    pub resample_hz: f64,
    pub target_radius_px: f64,
    pub audio_response_window_ms: f64,
    pub audio_anticipation_ms: f64,
    pub prp_baseline_window_ms: f64,
    pub prp_recovery_multiplier: f64,
    pub prp_bucket_ms: f64,
    pub prp_max_ms: f64,
    pub peripheral_timeout_ms: f64,
    /// Taken from `SchedulerConfig::display` when loaded through `BatteryConfig`
    #[serde(skip)]
    pub expected_frame_hz: f64,
    #[serde(skip)]
    pub stall_multiplier: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            anticipation_ms: 100.0,
            lapse_ms: 1_500.0,
            resample_hz: 60.0,
            target_radius_px: 40.0,
            audio_response_window_ms: 1_500.0,
            audio_anticipation_ms: 100.0,
            prp_baseline_window_ms: 1_000.0,
            prp_recovery_multiplier: 1.25,
            prp_bucket_ms: 100.0,
            prp_max_ms: 3_000.0,
            peripheral_timeout_ms: 2_000.0,
            expected_frame_hz: 60.0,
            stall_multiplier: STALL_MULTIPLIER,
        }
    }
}

impl MetricsConfig {
    /// Cursor gaps above this (microseconds) count as stalls
    pub fn stall_threshold_us(&self) -> f64 {
        1_000_000.0 / self.expected_frame_hz.max(1.0) * self.stall_multiplier
    }
}

/// Scoring thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Below this many sessions a baseline is used for min/max scaling only
    pub min_baseline_samples: usize,
    /// LPI(0) below this leaves the degradation coefficient undefined
    pub dc_validity_floor: f64,
    pub alert_warning_z: f64,
    pub alert_critical_z: f64,
    /// CRS baseline size needed before alerts are raised
    pub alert_min_window: usize,
    /// Sessions whose composite outputs are withheld
    pub calibration_sessions: u32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_baseline_samples: 5,
            dc_validity_floor: 15.0,
            alert_warning_z: -2.0,
            alert_critical_z: -3.0,
            alert_min_window: 5,
            calibration_sessions: 5,
        }
    }
}

/// Complete battery configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatteryConfig {
    pub scheduler: SchedulerConfig,
    pub metrics: MetricsConfig,
    pub scoring: ScoringConfig,
}

impl BatteryConfig {
    /// Parse a configuration, falling back to defaults for absent fields
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let mut config: BatteryConfig = serde_json::from_str(json)?;
        config.sync_frame_timing();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler or scorer cannot run with
    pub fn validate(&self) -> Result<(), ComputeError> {
        self.scheduler.validate()?;
        if self.metrics.resample_hz <= 0.0 {
            return Err(ComputeError::Configuration(
                "resample_hz must be positive".to_string(),
            ));
        }
        if self.metrics.expected_frame_hz != self.scheduler.display.refresh_hz
            || self.metrics.stall_multiplier != self.scheduler.stall_multiplier
        {
            return Err(ComputeError::Configuration(format!(
                "metrics frame timing ({} Hz x{}) differs from the display ({} Hz x{})",
                self.metrics.expected_frame_hz,
                self.metrics.stall_multiplier,
                self.scheduler.display.refresh_hz,
                self.scheduler.stall_multiplier
            )));
        }
        let dc_floor = self.scoring.dc_validity_floor;
        if !(dc_floor.is_finite() && dc_floor > 0.0) {
            return Err(ComputeError::Configuration(format!(
                "dc_validity_floor must be positive, got {dc_floor}"
            )));
        }
        if self.scoring.alert_critical_z > self.scoring.alert_warning_z {
            return Err(ComputeError::Configuration(
                "alert_critical_z must not exceed alert_warning_z".to_string(),
            ));
        }
        Ok(())
    }

    /// Stall detection in metrics follows the display the session ran on
    fn sync_frame_timing(&mut self) {
        self.metrics.expected_frame_hz = self.scheduler.display.refresh_hz;
        self.metrics.stall_multiplier = self.scheduler.stall_multiplier;
    }
}
