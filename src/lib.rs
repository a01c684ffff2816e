//! Readiness Battery - layered human-performance test with robust scoring
//!
//! A timed battery of four layers, each adding load to the last: simple
//! reaction, continuous tracking, audio discrimination, and finally cooldown
//! management with peripheral detection. The crate schedules stimuli
//! deterministically, records every event, extracts per-layer metrics from
//! the event log and scores them against rolling personal baselines:
//! scheduler → recorder → metrics → scoring → baseline update.
//!
//! ## Modules
//!
//! - **Runtime**: `scheduler`, `kinematics`, `recorder`, `session`
//! - **Analysis**: `metrics`, `stats`, `scoring`, `weights`, `baseline`, `analysis`
//! - **Output**: `encoder`, `pipeline`
//! - **Tooling**: `simulate` (synthetic participant on a fake clock)

pub mod analysis;
pub mod baseline;
pub mod config;
pub mod encoder;
pub mod error;
pub mod kinematics;
pub mod metrics;
pub mod pipeline;
pub mod recorder;
pub mod scheduler;
pub mod scoring;
pub mod session;
pub mod simulate;
pub mod stats;
pub mod types;
pub mod weights;

pub use baseline::BaselineStore;
pub use config::{BatteryConfig, Difficulty};
pub use encoder::{ReportEncoder, SessionReport};
pub use error::ComputeError;
pub use metrics::MetricsExtractor;
pub use pipeline::{session_metrics, session_to_report, BatteryProcessor};
pub use recorder::EventRecorder;
pub use scheduler::{SchedulerAction, SchedulerListener, StimulusScheduler};
pub use scoring::ScoringEngine;
pub use session::{FinishedSession, Session};
pub use simulate::{simulate_session, SimulationConfig};
pub use types::{CompositeScore, LayerMetrics, RawEvent, SessionLog};
pub use weights::WeightProfile;

/// Battery version embedded in every session report
pub const BATTERY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for session reports
pub const PRODUCER_NAME: &str = "readiness-battery";
