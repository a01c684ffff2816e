//! Metrics extraction
//!
//! Turns a finished `SessionLog` into one `LayerMetrics` per layer that has
//! events. Extraction is a pure function of the log: events are stably
//! sorted by timestamp, partitioned per layer, and every matcher walks them
//! in ascending order, so identical logs give bit-identical output.

mod audio;
mod reaction;
mod secondary;
mod tracking;

pub use audio::{audio_metrics, prp_metrics, AudioMatch};
pub use reaction::reaction_metrics;
pub use secondary::{cooldown_metrics, peripheral_metrics};
pub use tracking::{count_overshoots, count_stalls, jerk_mean, resample, tracking_metrics};

use uuid::Uuid;

use crate::config::MetricsConfig;
use crate::types::{EventKind, LayerMetrics, Micros, RawEvent, SessionLog, LAYER_COUNT};

/// Cursor position, with the target position when one was tracked
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorSample {
    pub t: Micros,
    pub x: f64,
    pub y: f64,
    pub target: Option<(f64, f64)>,
}

impl CursorSample {
    /// Cursor-to-target distance, when a target was present
    pub fn error(&self) -> Option<f64> {
        self.target
            .map(|(tx, ty)| (self.x - tx).hypot(self.y - ty))
    }
}

/// Audio cue as seen by the matchers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CueEvent {
    pub t: Micros,
    pub distractor: bool,
}

/// One layer's events split by kind, each list in ascending time
#[derive(Debug, Default, Clone)]
pub struct LayerEvents<'a> {
    pub first_us: Option<Micros>,
    pub last_us: Option<Micros>,
    pub onsets: Vec<Micros>,
    pub clicks: Vec<Micros>,
    pub keys: Vec<(Micros, &'a str)>,
    pub cursor: Vec<CursorSample>,
    pub cues: Vec<CueEvent>,
    pub cooldown_ready: Vec<Micros>,
    pub flashes: Vec<(Micros, u8)>,
}

impl<'a> LayerEvents<'a> {
    /// Partition already-sorted events
    pub fn from_sorted(events: &[&'a RawEvent]) -> Self {
        let mut out = LayerEvents {
            first_us: events.first().map(|e| e.timestamp_us),
            last_us: events.last().map(|e| e.timestamp_us),
            ..LayerEvents::default()
        };
        for event in events {
            let t = event.timestamp_us;
            match &event.kind {
                EventKind::StimulusOnset { .. } => out.onsets.push(t),
                EventKind::Click { .. } => out.clicks.push(t),
                EventKind::Keypress { key } => out.keys.push((t, key.as_str())),
                EventKind::CursorPos {
                    x,
                    y,
                    target_x,
                    target_y,
                } => out.cursor.push(CursorSample {
                    t,
                    x: *x,
                    y: *y,
                    target: target_x.zip(*target_y),
                }),
                EventKind::AudioCue { distractor, .. } => out.cues.push(CueEvent {
                    t,
                    distractor: *distractor,
                }),
                EventKind::CooldownReady { .. } => out.cooldown_ready.push(t),
                EventKind::PeripheralFlash { digit, .. } => out.flashes.push((t, *digit)),
            }
        }
        out
    }

    /// Key presses matching `key`, in time order
    pub fn presses_of(&self, key: &str) -> Vec<Micros> {
        self.keys
            .iter()
            .filter(|(_, k)| *k == key)
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn duration_sec(&self) -> f64 {
        match (self.first_us, self.last_us) {
            (Some(first), Some(last)) => last.saturating_sub(first) as f64 / 1_000_000.0,
            _ => 0.0,
        }
    }
}

/// Per-layer metrics extractor
#[derive(Debug, Clone, Default)]
pub struct MetricsExtractor {
    config: MetricsConfig,
}

impl MetricsExtractor {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Metrics for every layer that has at least one event, in layer order
    pub fn extract(&self, log: &SessionLog) -> Vec<LayerMetrics> {
        let mut sorted: Vec<&RawEvent> = log.events.iter().collect();
        // Stable: equal timestamps keep recording order
        sorted.sort_by_key(|e| e.timestamp_us);

        (0..LAYER_COUNT as u8)
            .filter_map(|layer| {
                let events: Vec<&RawEvent> =
                    sorted.iter().copied().filter(|e| e.layer == layer).collect();
                if events.is_empty() {
                    return None;
                }
                let duration_sec = log.layer_span(layer).map(|span| span.duration_sec());
                Some(self.extract_layer(log.session_id, layer, &events, duration_sec))
            })
            .collect()
    }

    /// Metrics for one layer from its time-sorted events. Without a recorded
    /// running time the layer lasts from its first event to its last.
    pub fn extract_layer(
        &self,
        session_id: Uuid,
        layer: u8,
        events: &[&RawEvent],
        duration_sec: Option<f64>,
    ) -> LayerMetrics {
        let split = LayerEvents::from_sorted(events);
        let duration_sec = duration_sec.unwrap_or_else(|| split.duration_sec());
        let cursor_times: Vec<Micros> = split.cursor.iter().map(|s| s.t).collect();

        let mut metrics = LayerMetrics {
            session_id,
            layer,
            duration_sec,
            stall_count: count_stalls(&cursor_times, self.config.stall_threshold_us()),
            reaction: None,
            tracking: None,
            audio: None,
            prp: None,
            cooldown: None,
            peripheral: None,
        };

        if layer == 0 {
            metrics.reaction = Some(reaction_metrics(&split.onsets, &split.clicks, &self.config));
        }
        if layer >= 1 {
            metrics.tracking = Some(tracking_metrics(&split.cursor, duration_sec, &self.config));
        }
        if layer >= 2 {
            let (audio, matches) = audio_metrics(&split, &self.config);
            metrics.prp = Some(prp_metrics(&matches, &split.cursor, &self.config));
            metrics.audio = Some(audio);
        }
        if layer == 3 {
            metrics.cooldown = Some(cooldown_metrics(&split, &self.config));
            metrics.peripheral = Some(peripheral_metrics(&split, &self.config));
        }

        log::debug!(
            "layer {layer}: {} events over {:.1}s, {} stalls",
            events.len(),
            duration_sec,
            metrics.stall_count
        );
        metrics
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use crate::config::Difficulty;
    use crate::types::{EventKind, Micros, RawEvent, SessionLog, SessionOutcome};

    pub fn event(layer: u8, t: Micros, kind: EventKind) -> RawEvent {
        RawEvent {
            session_id: Uuid::nil(),
            layer,
            timestamp_us: t,
            kind,
        }
    }

    pub fn key(layer: u8, t: Micros, key: &str) -> RawEvent {
        event(layer, t, EventKind::Keypress { key: key.to_string() })
    }

    pub fn cursor(layer: u8, t: Micros, x: f64, y: f64, target: (f64, f64)) -> RawEvent {
        event(
            layer,
            t,
            EventKind::CursorPos {
                x,
                y,
                target_x: Some(target.0),
                target_y: Some(target.1),
            },
        )
    }

    pub fn log(events: Vec<RawEvent>) -> SessionLog {
        SessionLog {
            session_id: Uuid::nil(),
            started_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            difficulty: Difficulty::Standard,
            outcome: SessionOutcome::Completed,
            stall_count: 0,
            dropped_events: 0,
            layer_spans: Vec::new(),
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::types::{FlashDirection, LayerSpan};
    use pretty_assertions::assert_eq;

    fn mixed_log() -> SessionLog {
        let mut events = vec![
            event(0, 1_000_000, EventKind::StimulusOnset { stimulus_id: 1, x: 1.0, y: 1.0 }),
            event(0, 1_250_000, EventKind::Click { x: 1.0, y: 1.0 }),
        ];
        for i in 0..300u64 {
            let t = 10_000_000 + i * 16_667;
            let wobble = (i as f64 * 0.3).sin() * 20.0;
            events.push(cursor(3, t, 400.0 + wobble, 300.0, (400.0, 300.0 + wobble)));
        }
        events.push(event(3, 11_000_000, EventKind::AudioCue { cue_id: 1, distractor: false }));
        events.push(key(3, 11_400_000, " "));
        events.push(event(
            3,
            12_000_000,
            EventKind::PeripheralFlash {
                flash_id: 1,
                digit: 4,
                direction: FlashDirection::Top,
            },
        ));
        events.push(key(3, 12_500_000, "4"));
        events.push(event(3, 13_000_000, EventKind::CooldownReady { cycle: 1 }));
        events.push(key(3, 13_800_000, "e"));
        events.sort_by_key(|e| e.timestamp_us);
        log(events)
    }

    #[test]
    fn test_extract_produces_layers_with_events_only() {
        let metrics = MetricsExtractor::default().extract(&mixed_log());
        let layers: Vec<u8> = metrics.iter().map(|m| m.layer).collect();
        assert_eq!(layers, vec![0, 3]);
        assert!(metrics[0].reaction.is_some());
        assert!(metrics[0].tracking.is_none());
        assert!(metrics[1].reaction.is_none());
        assert!(metrics[1].tracking.is_some());
        assert!(metrics[1].audio.is_some());
        assert!(metrics[1].peripheral.is_some());
    }

    #[test]
    fn test_overshoot_rate_uses_layer_running_time() {
        // One overshoot inside a four second burst of a one minute layer
        let events: Vec<RawEvent> = [100.0, 60.0, 30.0, 20.0, 35.0]
            .iter()
            .enumerate()
            .map(|(i, x)| cursor(1, i as Micros * 1_000_000, *x, 0.0, (0.0, 0.0)))
            .collect();
        let mut session = log(events);
        let extractor = MetricsExtractor::default();

        let sparse = extractor.extract(&session);
        assert_eq!(sparse[0].duration_sec, 4.0);

        session.layer_spans.push(LayerSpan {
            layer: 1,
            started_us: 0,
            ended_us: 60_000_000,
        });
        let metrics = extractor.extract(&session);
        assert_eq!(metrics[0].duration_sec, 60.0);
        let tracking = metrics[0].tracking.as_ref().unwrap();
        assert_eq!(tracking.overshoot_count, 1);
        assert!((tracking.overshoots_per_min - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let extractor = MetricsExtractor::default();
        let log = mixed_log();
        let a = serde_json::to_string(&extractor.extract(&log)).unwrap();
        let b = serde_json::to_string(&extractor.extract(&log)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unsorted_input_is_sorted_first() {
        let extractor = MetricsExtractor::default();
        let sorted = mixed_log();
        let mut shuffled = sorted.clone();
        shuffled.events.reverse();
        assert_eq!(extractor.extract(&sorted), extractor.extract(&shuffled));
    }

    #[test]
    fn test_peripheral_digit_response_matched() {
        let metrics = MetricsExtractor::default().extract(&mixed_log());
        let peripheral = metrics[1].peripheral.clone().unwrap();
        assert_eq!(peripheral.hits, 1);
        assert_eq!(peripheral.misses, 0);
        assert_eq!(peripheral.mean_rt_ms, Some(500.0));
    }
}
