//! Baseline management
//!
//! This module keeps rolling per-user windows of every scoring metric and of
//! the composite readiness score, and summarizes them into `BaselineStats`.
//! The summary map is rebuilt and swapped in whole after each qualifying
//! session, so scoring always sees one consistent snapshot.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::error::ComputeError;
use crate::stats;
use crate::types::{
    BaselineKey, BaselineMap, BaselineScope, BaselineStats, LayerMetrics, MetricName,
};

/// Default baseline window in sessions
pub const DEFAULT_BASELINE_WINDOW: usize = 20;

/// Robust summary of a window; `None` when it holds no finite values
pub fn summarize(values: &[f64]) -> Option<BaselineStats> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    let q = stats::quartiles(&finite);
    Some(BaselineStats {
        median: q.median,
        mad_scaled: stats::mad_scaled(&finite),
        q1: q.q1,
        q3: q.q3,
        iqr: q.iqr(),
        min_val: finite.iter().copied().fold(f64::INFINITY, f64::min),
        max_val: finite.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        window_size: finite.len(),
    })
}

#[derive(Serialize, Deserialize)]
struct WindowEntry {
    key: BaselineKey,
    values: Vec<f64>,
}

#[derive(Serialize, Deserialize)]
struct PopulationEntry {
    key: BaselineKey,
    stats: BaselineStats,
}

/// Persisted form: JSON maps need string keys, so windows are listed
#[derive(Serialize, Deserialize)]
struct StoredBaselines {
    window_size: usize,
    #[serde(default)]
    windows: Vec<WindowEntry>,
    #[serde(default)]
    population: Vec<PopulationEntry>,
}

/// Rolling baseline windows and their current snapshot
#[derive(Debug, Clone)]
pub struct BaselineStore {
    /// Rolling user values per key
    windows: BTreeMap<BaselineKey, VecDeque<f64>>,
    /// Externally supplied population baselines
    population: BaselineMap,
    /// Summaries handed to scoring, replaced after every update
    snapshot: BaselineMap,
    /// Maximum window size
    window_size: usize,
}

impl Default for BaselineStore {
    fn default() -> Self {
        Self::new(DEFAULT_BASELINE_WINDOW)
    }
}

impl BaselineStore {
    /// Create a new baseline store with specified window size
    pub fn new(window_size: usize) -> Self {
        Self {
            windows: BTreeMap::new(),
            population: BaselineMap::new(),
            snapshot: BaselineMap::new(),
            window_size: window_size.max(1),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Current baseline snapshot
    pub fn snapshot(&self) -> &BaselineMap {
        &self.snapshot
    }

    /// Values currently in a key's window, oldest first
    pub fn history(&self, key: &BaselineKey) -> Vec<f64> {
        self.windows
            .get(key)
            .map(|w| w.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Keys with user history, in key order
    pub fn tracked_keys(&self) -> Vec<BaselineKey> {
        self.windows.keys().copied().collect()
    }

    /// Install a reference-population baseline for a metric
    pub fn set_population(&mut self, metric: MetricName, layer: u8, stats: BaselineStats) {
        self.population.insert(
            BaselineKey::layer_metric(BaselineScope::Population, metric, layer),
            stats,
        );
        self.snapshot = self.build_snapshot();
    }

    /// Add a completed session's metrics and CRS, then replace the snapshot
    pub fn update(&mut self, metrics: &[LayerMetrics], crs: Option<f64>) {
        for m in metrics {
            for metric in MetricName::ALL {
                if !metric.applies_to(m.layer) {
                    continue;
                }
                if let Some(value) = m.value(metric).filter(|v| v.is_finite()) {
                    self.push(BaselineKey::layer_metric(BaselineScope::User, metric, m.layer), value);
                }
            }
        }
        if let Some(crs) = crs.filter(|v| v.is_finite()) {
            self.push(BaselineKey::crs(BaselineScope::User), crs);
        }
        self.snapshot = self.build_snapshot();
    }

    fn push(&mut self, key: BaselineKey, value: f64) {
        let window = self
            .windows
            .entry(key)
            .or_insert_with(|| VecDeque::with_capacity(self.window_size));
        window.push_back(value);
        while window.len() > self.window_size {
            window.pop_front();
        }
    }

    fn build_snapshot(&self) -> BaselineMap {
        let mut snapshot = self.population.clone();
        for (key, window) in &self.windows {
            let values: Vec<f64> = window.iter().copied().collect();
            if let Some(stats) = summarize(&values) {
                snapshot.insert(*key, stats);
            }
        }
        snapshot
    }

    /// Drop all user history; population baselines are kept
    pub fn clear(&mut self) {
        self.windows.clear();
        self.snapshot = self.build_snapshot();
    }

    /// Load baseline store from JSON
    pub fn from_json(json: &str) -> Result<Self, ComputeError> {
        let stored: StoredBaselines = serde_json::from_str(json)?;
        let mut store = Self::new(stored.window_size);
        for entry in stored.windows {
            let mut window: VecDeque<f64> = entry.values.into_iter().collect();
            while window.len() > store.window_size {
                window.pop_front();
            }
            store.windows.insert(entry.key, window);
        }
        for entry in stored.population {
            store.population.insert(entry.key, entry.stats);
        }
        store.snapshot = store.build_snapshot();
        Ok(store)
    }

    /// Serialize baseline store to JSON
    pub fn to_json(&self) -> Result<String, ComputeError> {
        let stored = StoredBaselines {
            window_size: self.window_size,
            windows: self
                .windows
                .iter()
                .map(|(key, values)| WindowEntry {
                    key: *key,
                    values: values.iter().copied().collect(),
                })
                .collect(),
            population: self
                .population
                .iter()
                .map(|(key, stats)| PopulationEntry {
                    key: *key,
                    stats: *stats,
                })
                .collect(),
        };
        Ok(serde_json::to_string(&stored)?)
    }
}
