//! Session report encoding
//!
//! This module bundles a session's metrics and composite score into the
//! `SessionReport` handed to persistence, with producer and provenance
//! metadata and quality flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Difficulty;
use crate::error::ComputeError;
use crate::types::{CompositeScore, LayerMetrics, SessionLog, SessionOutcome, LAYER_COUNT};
use crate::{BATTERY_VERSION, PRODUCER_NAME};

/// Current report schema version
pub const REPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportProvenance {
    pub session_id: Uuid,
    pub started_at_utc: String,
    pub computed_at_utc: String,
    pub difficulty: Difficulty,
    pub outcome: SessionOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportQuality {
    pub event_count: usize,
    pub stall_count: u32,
    pub dropped_events: u64,
    /// Layers with metrics, out of four
    pub layers_recorded: usize,
    pub flags: Vec<String>,
}

/// Everything produced for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub report_version: String,
    pub producer: ReportProducer,
    pub provenance: ReportProvenance,
    pub quality: ReportQuality,
    /// 1-based position of the session in the user's history
    pub session_number: u32,
    pub layers: Vec<LayerMetrics>,
    pub score: CompositeScore,
}

impl SessionReport {
    pub fn to_json(&self) -> Result<String, ComputeError> {
        serde_json::to_string_pretty(self).map_err(ComputeError::JsonError)
    }

    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Report encoder carrying a stable producer instance id
#[derive(Debug, Clone)]
pub struct ReportEncoder {
    instance_id: String,
}

impl Default for ReportEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    pub fn encode(
        &self,
        log: &SessionLog,
        layers: Vec<LayerMetrics>,
        score: CompositeScore,
        session_number: u32,
    ) -> Result<SessionReport, ComputeError> {
        self.encode_at(log, layers, score, session_number, Utc::now())
    }

    /// Encode with an explicit computation time
    pub fn encode_at(
        &self,
        log: &SessionLog,
        layers: Vec<LayerMetrics>,
        score: CompositeScore,
        session_number: u32,
        computed_at: DateTime<Utc>,
    ) -> Result<SessionReport, ComputeError> {
        if let Some(stray) = layers.iter().find(|m| m.session_id != log.session_id) {
            return Err(ComputeError::EncodingError(format!(
                "layer {} metrics belong to session {}, not {}",
                stray.layer, stray.session_id, log.session_id
            )));
        }

        let quality = Self::build_quality(log, &layers, &score);
        Ok(SessionReport {
            report_version: REPORT_VERSION.to_string(),
            producer: ReportProducer {
                name: PRODUCER_NAME.to_string(),
                version: BATTERY_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            provenance: ReportProvenance {
                session_id: log.session_id,
                started_at_utc: log.started_at.to_rfc3339(),
                computed_at_utc: computed_at.to_rfc3339(),
                difficulty: log.difficulty,
                outcome: log.outcome,
            },
            quality,
            session_number,
            layers,
            score,
        })
    }

    pub fn encode_to_json(
        &self,
        log: &SessionLog,
        layers: Vec<LayerMetrics>,
        score: CompositeScore,
        session_number: u32,
    ) -> Result<String, ComputeError> {
        self.encode(log, layers, score, session_number)?.to_json()
    }

    fn build_quality(log: &SessionLog, layers: &[LayerMetrics], score: &CompositeScore) -> ReportQuality {
        let metric_stalls: u32 = layers.iter().map(|m| m.stall_count).sum();
        let mut flags = Vec::new();
        if log.outcome == SessionOutcome::Aborted {
            flags.push("aborted".to_string());
        }
        if layers.len() < LAYER_COUNT {
            flags.push("incomplete_layers".to_string());
        }
        if log.stall_count > 0 || metric_stalls > 0 {
            flags.push("stalls_detected".to_string());
        }
        if log.dropped_events > 0 {
            flags.push("events_dropped".to_string());
        }
        if score.withheld {
            flags.push("calibration".to_string());
        }

        ReportQuality {
            event_count: log.events.len(),
            stall_count: log.stall_count,
            dropped_events: log.dropped_events,
            layers_recorded: layers.len(),
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn log() -> SessionLog {
        SessionLog {
            session_id: Uuid::nil(),
            started_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
            difficulty: Difficulty::Standard,
            outcome: SessionOutcome::Completed,
            stall_count: 2,
            dropped_events: 0,
            layer_spans: Vec::new(),
            events: Vec::new(),
        }
    }

    fn layer(session_id: Uuid, layer: u8) -> LayerMetrics {
        LayerMetrics {
            session_id,
            layer,
            duration_sec: 60.0,
            stall_count: 0,
            reaction: None,
            tracking: None,
            audio: None,
            prp: None,
            cooldown: None,
            peripheral: None,
        }
    }

    #[test]
    fn test_encode_metadata_and_flags() {
        let encoder = ReportEncoder::with_instance_id("test-instance".to_string());
        let score = CompositeScore {
            withheld: true,
            ..CompositeScore::default()
        };
        let report = encoder
            .encode(&log(), vec![layer(Uuid::nil(), 0)], score, 1)
            .unwrap();

        assert_eq!(report.report_version, REPORT_VERSION);
        assert_eq!(report.producer.name, PRODUCER_NAME);
        assert_eq!(report.producer.instance_id, "test-instance");
        assert_eq!(report.provenance.started_at_utc, "2024-03-01T09:00:00+00:00");
        assert_eq!(
            report.quality.flags,
            vec!["incomplete_layers", "stalls_detected", "calibration"]
        );
    }

    #[test]
    fn test_foreign_metrics_rejected() {
        let encoder = ReportEncoder::new();
        let result = encoder.encode(
            &log(),
            vec![layer(Uuid::new_v4(), 0)],
            CompositeScore::default(),
            1,
        );
        assert!(matches!(result, Err(ComputeError::EncodingError(_))));
    }

    #[test]
    fn test_json_roundtrip() {
        let encoder = ReportEncoder::new();
        let layers = (0..4).map(|l| layer(Uuid::nil(), l)).collect();
        let report = encoder.encode(&log(), layers, CompositeScore::default(), 7).unwrap();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"session_number\": 7"));
        let parsed = SessionReport::from_json(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
