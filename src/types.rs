//! Battery data types
//!
//! This module defines the events, session artifacts, metrics and score types
//! that flow from the stimulus scheduler through metrics extraction and scoring.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::Difficulty;

/// Monotonic timestamp in microseconds
pub type Micros = u64;

/// Number of layers in the battery
pub const LAYER_COUNT: usize = 4;

/// Index of the last layer (full load)
pub const FINAL_LAYER: u8 = 3;

/// Panics on a layer index outside the battery. Callers passing a bad layer
/// have a bug; this is not an expected-data outcome.
pub(crate) fn assert_layer(layer: u8) {
    assert!(
        (layer as usize) < LAYER_COUNT,
        "layer index {layer} out of range (0..={FINAL_LAYER})"
    );
}

/// Convert microseconds to milliseconds
pub fn us_to_ms(us: Micros) -> f64 {
    us as f64 / 1_000.0
}

/// Convert seconds to microseconds
pub fn secs_to_us(secs: f64) -> Micros {
    (secs * 1_000_000.0).round().max(0.0) as Micros
}

// ============================================================================
// Raw events
// ============================================================================

/// Screen edge a peripheral flash appears on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashDirection {
    Left,
    Right,
    Top,
    Bottom,
}

impl FlashDirection {
    pub const ALL: [FlashDirection; 4] = [
        FlashDirection::Left,
        FlashDirection::Right,
        FlashDirection::Top,
        FlashDirection::Bottom,
    ];
}

/// Event payload, one variant per event kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventKind {
    /// Layer 0 reaction stimulus appeared
    StimulusOnset { stimulus_id: u32, x: f64, y: f64 },
    /// Pointer press
    Click { x: f64, y: f64 },
    /// Key press (key name as reported by the host, e.g. " ", "e", "7")
    Keypress { key: String },
    /// Pointer position, with the target position at the same instant
    /// while a target is being tracked
    CursorPos {
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_x: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_y: Option<f64>,
    },
    /// Audio cue played; distractors must not be answered
    AudioCue { cue_id: u32, distractor: bool },
    /// Cooldown resource became available
    CooldownReady { cycle: u32 },
    /// Peripheral digit flash
    PeripheralFlash {
        flash_id: u32,
        digit: u8,
        direction: FlashDirection,
    },
}

impl EventKind {
    /// Snake-case name of the event kind
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::StimulusOnset { .. } => "stimulus_onset",
            EventKind::Click { .. } => "click",
            EventKind::Keypress { .. } => "keypress",
            EventKind::CursorPos { .. } => "cursor_pos",
            EventKind::AudioCue { .. } => "audio_cue",
            EventKind::CooldownReady { .. } => "cooldown_ready",
            EventKind::PeripheralFlash { .. } => "peripheral_flash",
        }
    }
}

/// A single recorded event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Session the event belongs to
    pub session_id: Uuid,
    /// Layer active when the event was recorded
    pub layer: u8,
    /// Monotonic capture time in microseconds
    pub timestamp_us: Micros,
    /// Event payload
    #[serde(flatten)]
    pub kind: EventKind,
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    Aborted,
}

/// The ordered event log of one session, as handed to persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLog {
    /// Session identifier
    pub session_id: Uuid,
    /// Wall-clock start of the session
    pub started_at: DateTime<Utc>,
    /// Difficulty preset the session ran with
    pub difficulty: Difficulty,
    /// Completed or aborted
    pub outcome: SessionOutcome,
    /// Tick stalls observed by the scheduler
    #[serde(default)]
    pub stall_count: u32,
    /// Events rejected because the buffer was full
    #[serde(default)]
    pub dropped_events: u64,
    /// Running time of each layer the test reached
    #[serde(default)]
    pub layer_spans: Vec<LayerSpan>,
    /// Events in non-decreasing timestamp order
    pub events: Vec<RawEvent>,
}

/// Monotonic start and end of one layer's running phase, pauses excluded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerSpan {
    pub layer: u8,
    pub started_us: Micros,
    pub ended_us: Micros,
}

impl LayerSpan {
    pub fn duration_sec(&self) -> f64 {
        self.ended_us.saturating_sub(self.started_us) as f64 / 1_000_000.0
    }
}

impl SessionLog {
    /// Recorded span of `layer`, if the scheduler closed it
    pub fn layer_span(&self, layer: u8) -> Option<&LayerSpan> {
        self.layer_spans.iter().find(|s| s.layer == layer)
    }
}

// ============================================================================
// Scheduler state
// ============================================================================

/// Scheduler lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Countdown,
    Running,
    InterLayer,
    Complete,
}

impl Phase {
    /// Whether a test is in progress (an abort would be reported)
    pub fn in_progress(&self) -> bool {
        matches!(self, Phase::Countdown | Phase::Running | Phase::InterLayer)
    }
}

/// Layer 0 reaction stimulus
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimpleStimulus {
    pub visible: bool,
    pub x: f64,
    pub y: f64,
    pub onset_us: Option<Micros>,
}

/// Tracked target snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub x: f64,
    pub y: f64,
    pub vx: f64,
    pub vy: f64,
    /// Current heading in radians
    pub heading: f64,
    /// Heading being steered toward, if any
    pub goal_heading: Option<f64>,
}

/// Last audio cue played
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioCueState {
    pub cue_id: u32,
    pub distractor: bool,
    pub emitted_us: Micros,
}

/// Cooldown resource bar
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CooldownState {
    /// Fill progress 0..=1
    pub progress: f64,
    pub ready: bool,
}

/// Peripheral flash currently on screen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlashState {
    pub digit: u8,
    pub direction: FlashDirection,
    pub onset_us: Micros,
}

/// Per-tick snapshot of everything the renderer needs. Reset at layer start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StimulusState {
    pub layer: u8,
    pub stimulus: SimpleStimulus,
    pub target: Option<TargetSnapshot>,
    pub last_audio_cue: Option<AudioCueState>,
    pub cooldown: Option<CooldownState>,
    pub flash: Option<FlashState>,
}

// ============================================================================
// Layer metrics
// ============================================================================

/// Reaction-time statistics (layer 0)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReactionMetrics {
    /// Stimuli presented
    pub stimulus_count: u32,
    /// Clicks classified as valid responses
    pub valid_count: u32,
    /// Clicks faster than the anticipation threshold
    pub anticipation_count: u32,
    /// Clicks slower than the lapse threshold
    pub lapse_count: u32,
    /// Clicks with no unclaimed preceding stimulus
    pub unmatched_clicks: u32,
    pub mean_ms: Option<f64>,
    pub median_ms: Option<f64>,
    pub variance_ms2: Option<f64>,
    pub std_ms: Option<f64>,
}

/// Tracking statistics (layer >= 1)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingMetrics {
    /// Cursor samples carrying a target snapshot
    pub sample_count: u32,
    /// Mean cursor-target distance in pixels
    pub mean_error_px: Option<f64>,
    pub error_variance: Option<f64>,
    /// Fraction of samples within the target radius
    pub time_on_target: Option<f64>,
    /// Mean cursor jerk magnitude (px/s^3) on the 60 Hz grid
    pub jerk_mean: Option<f64>,
    pub overshoot_count: u32,
    pub overshoots_per_min: f64,
}

/// Audio discrimination statistics (layer >= 2)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioMetrics {
    /// Non-distractor cues played
    pub signal_cues: u32,
    pub distractor_cues: u32,
    pub hits: u32,
    /// hits / signal_cues
    pub accuracy: Option<f64>,
    /// Distractor cues answered inside the response window
    pub false_positives: u32,
    pub mean_rt_ms: Option<f64>,
}

/// Psychological refractory period after audio responses (layer >= 2)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrpMetrics {
    /// Cue/response pairs with a usable tracking baseline
    pub pairs: u32,
    /// Pairs that never recovered inside the max window
    pub censored: u32,
    pub mean_ms: Option<f64>,
}

/// Cooldown resource usage (layer 3)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CooldownMetrics {
    pub ready_events: u32,
    pub misses: u32,
    pub mean_delay_ms: Option<f64>,
}

/// Peripheral detection (layer 3)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeripheralMetrics {
    pub flashes: u32,
    pub hits: u32,
    pub misses: u32,
    pub mean_rt_ms: Option<f64>,
    pub miss_rate: Option<f64>,
}

/// Metrics for one (session, layer). Sections populate only for the layers
/// they apply to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMetrics {
    pub session_id: Uuid,
    pub layer: u8,
    /// Span between the first and last event of the layer
    pub duration_sec: f64,
    /// Cursor sample gaps exceeding the stall threshold
    pub stall_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reaction: Option<ReactionMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking: Option<TrackingMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prp: Option<PrpMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown: Option<CooldownMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peripheral: Option<PeripheralMetrics>,
}

impl LayerMetrics {
    /// Look up a scoring metric, `None` when the layer did not produce it
    pub fn value(&self, metric: MetricName) -> Option<f64> {
        match metric {
            MetricName::ReactionTimeMean => self.reaction.as_ref()?.mean_ms,
            MetricName::ReactionTimeStd => self.reaction.as_ref()?.std_ms,
            MetricName::LapseRate => {
                let r = self.reaction.as_ref()?;
                (r.stimulus_count > 0).then(|| r.lapse_count as f64 / r.stimulus_count as f64)
            }
            MetricName::TrackingErrorMean => self.tracking.as_ref()?.mean_error_px,
            MetricName::JerkMean => self.tracking.as_ref()?.jerk_mean,
            MetricName::OvershootRate => {
                let t = self.tracking.as_ref()?;
                (t.sample_count > 0).then_some(t.overshoots_per_min)
            }
            MetricName::TimeOnTarget => self.tracking.as_ref()?.time_on_target,
            MetricName::AudioAccuracy => self.audio.as_ref()?.accuracy,
            MetricName::AudioFalsePositives => {
                let a = self.audio.as_ref()?;
                (a.signal_cues + a.distractor_cues > 0).then_some(a.false_positives as f64)
            }
            MetricName::PrpMean => self.prp.as_ref()?.mean_ms,
            MetricName::CooldownDelayMean => self.cooldown.as_ref()?.mean_delay_ms,
            MetricName::CooldownMisses => {
                let c = self.cooldown.as_ref()?;
                (c.ready_events > 0).then_some(c.misses as f64)
            }
            MetricName::PeripheralRtMean => self.peripheral.as_ref()?.mean_rt_ms,
            MetricName::PeripheralMissRate => self.peripheral.as_ref()?.miss_rate,
        }
    }
}

// ============================================================================
// Scoring inputs and outputs
// ============================================================================

/// Whether a larger metric value is better
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    HigherIsBetter,
    LowerIsBetter,
}

/// Scoring metric catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    ReactionTimeMean,
    ReactionTimeStd,
    LapseRate,
    TrackingErrorMean,
    JerkMean,
    OvershootRate,
    TimeOnTarget,
    AudioAccuracy,
    AudioFalsePositives,
    PrpMean,
    CooldownDelayMean,
    CooldownMisses,
    PeripheralRtMean,
    PeripheralMissRate,
}

impl MetricName {
    pub const ALL: [MetricName; 14] = [
        MetricName::ReactionTimeMean,
        MetricName::ReactionTimeStd,
        MetricName::LapseRate,
        MetricName::TrackingErrorMean,
        MetricName::JerkMean,
        MetricName::OvershootRate,
        MetricName::TimeOnTarget,
        MetricName::AudioAccuracy,
        MetricName::AudioFalsePositives,
        MetricName::PrpMean,
        MetricName::CooldownDelayMean,
        MetricName::CooldownMisses,
        MetricName::PeripheralRtMean,
        MetricName::PeripheralMissRate,
    ];

    pub fn direction(&self) -> MetricDirection {
        match self {
            MetricName::TimeOnTarget | MetricName::AudioAccuracy => MetricDirection::HigherIsBetter,
            _ => MetricDirection::LowerIsBetter,
        }
    }

    /// Whether the layer produces this metric
    pub fn applies_to(&self, layer: u8) -> bool {
        match self {
            MetricName::ReactionTimeMean | MetricName::ReactionTimeStd | MetricName::LapseRate => {
                layer == 0
            }
            MetricName::TrackingErrorMean
            | MetricName::JerkMean
            | MetricName::OvershootRate
            | MetricName::TimeOnTarget => (1..=3).contains(&layer),
            MetricName::AudioAccuracy | MetricName::AudioFalsePositives | MetricName::PrpMean => {
                (2..=3).contains(&layer)
            }
            MetricName::CooldownDelayMean
            | MetricName::CooldownMisses
            | MetricName::PeripheralRtMean
            | MetricName::PeripheralMissRate => layer == 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::ReactionTimeMean => "reaction_time_mean",
            MetricName::ReactionTimeStd => "reaction_time_std",
            MetricName::LapseRate => "lapse_rate",
            MetricName::TrackingErrorMean => "tracking_error_mean",
            MetricName::JerkMean => "jerk_mean",
            MetricName::OvershootRate => "overshoot_rate",
            MetricName::TimeOnTarget => "time_on_target",
            MetricName::AudioAccuracy => "audio_accuracy",
            MetricName::AudioFalsePositives => "audio_false_positives",
            MetricName::PrpMean => "prp_mean",
            MetricName::CooldownDelayMean => "cooldown_delay_mean",
            MetricName::CooldownMisses => "cooldown_misses",
            MetricName::PeripheralRtMean => "peripheral_rt_mean",
            MetricName::PeripheralMissRate => "peripheral_miss_rate",
        }
    }
}

/// Which history a baseline was computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineScope {
    /// The user's own past sessions
    User,
    /// A reference population
    Population,
}

/// What a baseline describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum BaselineMetric {
    Layer(MetricName),
    /// Composite readiness score (layer-independent)
    Crs,
}

/// Baseline identity: (scope, metric, layer)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BaselineKey {
    pub scope: BaselineScope,
    pub metric: BaselineMetric,
    /// `None` for layer-independent metrics
    pub layer: Option<u8>,
}

impl BaselineKey {
    pub fn layer_metric(scope: BaselineScope, metric: MetricName, layer: u8) -> Self {
        Self {
            scope,
            metric: BaselineMetric::Layer(metric),
            layer: Some(layer),
        }
    }

    pub fn crs(scope: BaselineScope) -> Self {
        Self {
            scope,
            metric: BaselineMetric::Crs,
            layer: None,
        }
    }
}

/// Robust summary of a rolling baseline window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaselineStats {
    pub median: f64,
    pub mad_scaled: f64,
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub min_val: f64,
    pub max_val: f64,
    /// Number of sessions in the window
    pub window_size: usize,
}

/// Baseline snapshot handed to scoring
pub type BaselineMap = BTreeMap<BaselineKey, BaselineStats>;

/// Alert level derived from the CRS z-score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    #[default]
    None,
    Warning,
    Critical,
}

/// Composite outputs for one session; `None` means "not yet meaningful"
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    /// Layer performance index per layer (0-100)
    pub lpi: [Option<f64>; LAYER_COUNT],
    /// LPI(3) / LPI(0), clamped to 0-1
    pub degradation_coefficient: Option<f64>,
    /// Composite readiness score (0-100)
    pub crs: Option<f64>,
    pub alert: AlertLevel,
    /// True while the session falls inside the calibration window
    #[serde(default)]
    pub withheld: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_serialization() {
        let event = RawEvent {
            session_id: Uuid::nil(),
            layer: 3,
            timestamp_us: 1_000_000,
            kind: EventKind::PeripheralFlash {
                flash_id: 2,
                digit: 7,
                direction: FlashDirection::Left,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "peripheral_flash");
        assert_eq!(json["digit"], 7);
        assert_eq!(json["direction"], "left");

        let parsed: RawEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_cursor_event_without_target() {
        let json = r#"{
            "session_id": "00000000-0000-0000-0000-000000000000",
            "layer": 0,
            "timestamp_us": 42,
            "event_type": "cursor_pos",
            "x": 10.0,
            "y": 20.0
        }"#;
        let event: RawEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event.kind,
            EventKind::CursorPos {
                x: 10.0,
                y: 20.0,
                target_x: None,
                target_y: None
            }
        );
    }

    #[test]
    fn test_metric_applicability() {
        assert!(MetricName::ReactionTimeMean.applies_to(0));
        assert!(!MetricName::ReactionTimeMean.applies_to(1));
        assert!(MetricName::TrackingErrorMean.applies_to(3));
        assert!(!MetricName::AudioAccuracy.applies_to(1));
        assert!(MetricName::PeripheralMissRate.applies_to(3));
        assert_eq!(
            MetricName::AudioAccuracy.direction(),
            MetricDirection::HigherIsBetter
        );
    }

    #[test]
    fn test_metric_name_as_str_matches_serde() {
        for metric in MetricName::ALL {
            let json = serde_json::to_string(&metric).unwrap();
            assert_eq!(json, format!("\"{}\"", metric.as_str()));
        }
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_assert_layer_rejects_out_of_range() {
        assert_layer(4);
    }
}
