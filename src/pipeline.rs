//! Pipeline orchestration
//!
//! This module provides the public processing API: a finished `SessionLog`
//! goes through metrics extraction, scoring against the current baseline
//! snapshot, report encoding and finally the baseline update.

use serde::{Deserialize, Serialize};

use crate::analysis::{self, HistoryReport};
use crate::baseline::BaselineStore;
use crate::config::{BatteryConfig, MetricsConfig};
use crate::encoder::{ReportEncoder, SessionReport};
use crate::error::ComputeError;
use crate::metrics::MetricsExtractor;
use crate::scoring::ScoringEngine;
use crate::types::{BaselineKey, LayerMetrics, SessionLog, SessionOutcome};
use crate::weights::WeightProfile;

/// Parse a session log from JSON
pub fn parse_session_log(raw_json: &str) -> Result<SessionLog, ComputeError> {
    serde_json::from_str(raw_json).map_err(|e| ComputeError::ParseError(e.to_string()))
}

/// Extract per-layer metrics from a session log JSON.
///
/// # Example
/// ```ignore
/// let metrics = session_metrics(&log_json, &MetricsConfig::default())?;
/// ```
pub fn session_metrics(
    raw_json: &str,
    config: &MetricsConfig,
) -> Result<Vec<LayerMetrics>, ComputeError> {
    let log = parse_session_log(raw_json)?;
    Ok(MetricsExtractor::new(config.clone()).extract(&log))
}

/// Score a single session log against an empty history.
///
/// Without prior sessions the report is always inside the calibration
/// window; use `BatteryProcessor` to keep baselines across sessions.
pub fn session_to_report(raw_json: &str, config: BatteryConfig) -> Result<String, ComputeError> {
    let mut processor = BatteryProcessor::new(config, WeightProfile::default())?;
    processor.process_json(raw_json)
}

/// Persisted processor state
#[derive(Serialize, Deserialize)]
struct ProcessorState {
    session_count: u32,
    baselines: serde_json::Value,
}

/// Stateful processor for a single user's session history.
///
/// Use this when you need baselines, calibration and alerts to carry across
/// sessions.
pub struct BatteryProcessor {
    extractor: MetricsExtractor,
    engine: ScoringEngine,
    baseline_store: BaselineStore,
    encoder: ReportEncoder,
    /// Completed sessions processed so far
    session_count: u32,
}

impl BatteryProcessor {
    /// Create a processor; fails when the config or profile is invalid
    pub fn new(config: BatteryConfig, profile: WeightProfile) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            extractor: MetricsExtractor::new(config.metrics),
            engine: ScoringEngine::new(config.scoring, profile)?,
            baseline_store: BaselineStore::default(),
            encoder: ReportEncoder::new(),
            session_count: 0,
        })
    }

    /// Create a processor with a specific baseline window size
    pub fn with_baseline_window(
        config: BatteryConfig,
        profile: WeightProfile,
        window_sessions: usize,
    ) -> Result<Self, ComputeError> {
        let mut processor = Self::new(config, profile)?;
        processor.baseline_store = BaselineStore::new(window_sessions);
        Ok(processor)
    }

    /// Use a fixed encoder instance id (reproducible reports)
    pub fn with_encoder(mut self, encoder: ReportEncoder) -> Self {
        self.encoder = encoder;
        self
    }

    pub fn session_count(&self) -> u32 {
        self.session_count
    }

    pub fn engine(&self) -> &ScoringEngine {
        &self.engine
    }

    pub fn baselines(&self) -> &BaselineStore {
        &self.baseline_store
    }

    pub fn baselines_mut(&mut self) -> &mut BaselineStore {
        &mut self.baseline_store
    }

    /// Process a session log JSON and return the report JSON
    pub fn process_json(&mut self, raw_json: &str) -> Result<String, ComputeError> {
        let log = parse_session_log(raw_json)?;
        self.process(&log)?.to_json()
    }

    /// Extract metrics from a completed session, score it and fold it into
    /// the baselines. Aborted sessions are rejected and leave every baseline
    /// untouched.
    pub fn process(&mut self, log: &SessionLog) -> Result<SessionReport, ComputeError> {
        if log.outcome == SessionOutcome::Aborted {
            log::warn!("session {} was aborted, baselines not updated", log.session_id);
            return Err(ComputeError::SessionAborted(log.session_id));
        }
        let metrics = self.extractor.extract(log);
        self.process_metrics(log, metrics)
    }

    /// Same as `process`, for metrics already extracted from `log`
    pub fn process_metrics(
        &mut self,
        log: &SessionLog,
        metrics: Vec<LayerMetrics>,
    ) -> Result<SessionReport, ComputeError> {
        if log.outcome == SessionOutcome::Aborted {
            return Err(ComputeError::SessionAborted(log.session_id));
        }

        let session_number = self.session_count + 1;
        let snapshot = self.baseline_store.snapshot();
        let score = self.engine.score(&metrics, snapshot, session_number);

        // Calibration sessions still seed the CRS baseline
        let crs_for_baseline = if score.withheld {
            self.engine.compute(&metrics, snapshot).crs
        } else {
            score.crs
        };

        let report = self.encoder.encode(log, metrics, score, session_number)?;

        self.baseline_store.update(&report.layers, crs_for_baseline);
        self.session_count = session_number;
        log::info!(
            "session {} processed as #{session_number}: crs {:?}, alert {:?}{}",
            log.session_id,
            report.score.crs,
            report.score.alert,
            if report.score.withheld { " (calibration)" } else { "" }
        );
        Ok(report)
    }

    /// Trend, shift and shape of one baseline history
    pub fn trend(&self, key: &BaselineKey) -> Option<HistoryReport> {
        analysis::analyze(*key, &self.baseline_store.history(key))
    }

    /// History reports for every tracked key with enough sessions
    pub fn trends(&self) -> Vec<HistoryReport> {
        self.baseline_store
            .tracked_keys()
            .iter()
            .filter_map(|key| self.trend(key))
            .collect()
    }

    /// Load processor state (session count and baselines) from JSON
    pub fn load_baselines(&mut self, json: &str) -> Result<(), ComputeError> {
        let state: ProcessorState =
            serde_json::from_str(json).map_err(|e| ComputeError::ParseError(e.to_string()))?;
        self.baseline_store = BaselineStore::from_json(&state.baselines.to_string())
            .map_err(|e| ComputeError::ParseError(e.to_string()))?;
        self.session_count = state.session_count;
        Ok(())
    }

    /// Save processor state (session count and baselines) to JSON
    pub fn save_baselines(&self) -> Result<String, ComputeError> {
        let baselines: serde_json::Value = serde_json::from_str(&self.baseline_store.to_json()?)
            .map_err(|e| ComputeError::EncodingError(e.to_string()))?;
        let state = ProcessorState {
            session_count: self.session_count,
            baselines,
        };
        serde_json::to_string(&state).map_err(|e| ComputeError::EncodingError(e.to_string()))
    }

    /// Forget all history, restarting calibration
    pub fn clear_baselines(&mut self) {
        self.baseline_store.clear();
        self.session_count = 0;
    }
}
