//! Session ownership
//!
//! A `Session` owns one scheduler and the recorder it writes to. Hosts feed it
//! clock ticks and input; when the test ends, `finish` closes the recorder
//! into the `SessionLog` and derives the per-layer metrics from it.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::{Difficulty, MetricsConfig, SchedulerConfig};
use crate::error::ComputeError;
use crate::metrics::MetricsExtractor;
use crate::recorder::EventRecorder;
use crate::scheduler::{SchedulerAction, SchedulerListener, StimulusScheduler};
use crate::types::{LayerMetrics, Micros, Phase, RawEvent, SessionLog, SessionOutcome};

/// A finished session: the persisted log and the metrics derived from it
#[derive(Debug, Clone)]
pub struct FinishedSession {
    pub log: SessionLog,
    pub metrics: Vec<LayerMetrics>,
}

/// One run of the battery
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    started_at: DateTime<Utc>,
    difficulty: Difficulty,
    scheduler: StimulusScheduler,
    recorder: EventRecorder,
}

impl Session {
    pub fn new(
        config: SchedulerConfig,
        difficulty: Difficulty,
        seed: u64,
        listener: Box<dyn SchedulerListener>,
    ) -> Result<Self, ComputeError> {
        let id = Uuid::new_v4();
        let recorder = EventRecorder::new(id, config.event_capacity);
        Ok(Self {
            id,
            started_at: Utc::now(),
            difficulty,
            scheduler: StimulusScheduler::new(config, difficulty, seed, listener)?,
            recorder,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scheduler(&self) -> &StimulusScheduler {
        &self.scheduler
    }

    pub fn phase(&self) -> Phase {
        self.scheduler.phase()
    }

    pub fn events(&self) -> &[RawEvent] {
        self.recorder.events()
    }

    /// Events lost to a full recorder
    pub fn dropped_events(&self) -> u64 {
        self.recorder.dropped()
    }

    pub fn start(&mut self, now: Micros) -> Result<(), ComputeError> {
        self.started_at = Utc::now();
        self.scheduler.start(now)
    }

    pub fn start_at_layer(&mut self, now: Micros, layer: u8) -> Result<(), ComputeError> {
        self.started_at = Utc::now();
        self.scheduler.start_at_layer(now, layer)
    }

    pub fn tick(&mut self, now: Micros) -> Vec<SchedulerAction> {
        self.scheduler.tick(now, &mut self.recorder)
    }

    pub fn advance_to_next_layer(&mut self, now: Micros) -> Result<SchedulerAction, ComputeError> {
        self.scheduler.advance_to_next_layer(now)
    }

    pub fn click(&mut self, now: Micros, x: f64, y: f64) -> bool {
        self.scheduler.handle_click(now, x, y, &mut self.recorder)
    }

    pub fn key_press(&mut self, now: Micros, key: &str) -> bool {
        self.scheduler.handle_key_press(now, key, &mut self.recorder)
    }

    pub fn cursor(&mut self, now: Micros, x: f64, y: f64) -> bool {
        self.scheduler.handle_cursor_position(now, x, y, &mut self.recorder)
    }

    pub fn pause(&mut self, now: Micros) {
        self.scheduler.pause(now);
    }

    pub fn resume(&mut self, now: Micros) {
        self.scheduler.resume(now);
    }

    pub fn abort(&mut self, now: Micros) {
        self.scheduler.stop(now);
    }

    /// Whether the test has completed or been aborted
    pub fn is_over(&self) -> bool {
        self.scheduler.phase() == Phase::Complete || self.scheduler.was_aborted()
    }

    /// Close the session. A test still in progress is aborted first, so an
    /// unfinished run is never reported as completed.
    pub fn finish(mut self, now: Micros, metrics: &MetricsConfig) -> FinishedSession {
        if self.scheduler.phase().in_progress() {
            self.scheduler.stop(now);
        }
        let outcome = if self.scheduler.phase() == Phase::Complete {
            SessionOutcome::Completed
        } else {
            SessionOutcome::Aborted
        };
        let log = self.recorder.into_log(
            self.started_at,
            self.difficulty,
            outcome,
            self.scheduler.stall_count(),
            self.scheduler.layer_spans().to_vec(),
        );
        let metrics = MetricsExtractor::new(metrics.clone()).extract(&log);
        FinishedSession { log, metrics }
    }
}
