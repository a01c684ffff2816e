//! Append-only session event log
//!
//! The recorder is the only writer of a session's events. It pre-allocates its
//! full capacity, appends in O(1) and never reorders: timestamps stay
//! non-decreasing because an out-of-order capture time is clamped to the last
//! recorded one.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Difficulty;
use crate::error::ComputeError;
use crate::types::{EventKind, LayerSpan, Micros, RawEvent, SessionLog, SessionOutcome};

/// Fixed-capacity event recorder for one session
#[derive(Debug)]
pub struct EventRecorder {
    session_id: Uuid,
    events: Vec<RawEvent>,
    capacity: usize,
    dropped: u64,
}

impl EventRecorder {
    /// Create a recorder with room for `capacity` events
    pub fn new(session_id: Uuid, capacity: usize) -> Self {
        Self {
            session_id,
            events: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Append an event. When the buffer is full the event is dropped and
    /// `CapacityExceeded` returned; recorded events stay valid.
    pub fn record(
        &mut self,
        layer: u8,
        timestamp_us: Micros,
        kind: EventKind,
    ) -> Result<&RawEvent, ComputeError> {
        if self.events.len() >= self.capacity {
            if self.dropped == 0 {
                log::warn!(
                    "event buffer for session {} reached capacity {}; dropping further events",
                    self.session_id,
                    self.capacity
                );
            }
            self.dropped += 1;
            return Err(ComputeError::CapacityExceeded {
                capacity: self.capacity,
            });
        }

        let timestamp_us = match self.events.last() {
            Some(last) if timestamp_us < last.timestamp_us => last.timestamp_us,
            _ => timestamp_us,
        };

        self.events.push(RawEvent {
            session_id: self.session_id,
            layer,
            timestamp_us,
            kind,
        });
        let idx = self.events.len() - 1;
        Ok(&self.events[idx])
    }

    /// Recorded events in order
    pub fn events(&self) -> &[RawEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events rejected because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn is_full(&self) -> bool {
        self.events.len() >= self.capacity
    }

    /// Timestamp of the last recorded event
    pub fn last_timestamp(&self) -> Option<Micros> {
        self.events.last().map(|e| e.timestamp_us)
    }

    /// Close the recorder into the persisted session artifact
    pub fn into_log(
        self,
        started_at: DateTime<Utc>,
        difficulty: Difficulty,
        outcome: SessionOutcome,
        stall_count: u32,
        layer_spans: Vec<LayerSpan>,
    ) -> SessionLog {
        SessionLog {
            session_id: self.session_id,
            started_at,
            difficulty,
            outcome,
            stall_count,
            dropped_events: self.dropped,
            layer_spans,
            events: self.events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(k: &str) -> EventKind {
        EventKind::Keypress { key: k.to_string() }
    }

    #[test]
    fn test_append_in_order() {
        let mut recorder = EventRecorder::new(Uuid::nil(), 4);
        recorder.record(0, 10, key("a")).unwrap();
        recorder.record(0, 20, key("b")).unwrap();

        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.events()[1].timestamp_us, 20);
        assert_eq!(recorder.last_timestamp(), Some(20));
    }

    #[test]
    fn test_out_of_order_timestamp_is_clamped() {
        let mut recorder = EventRecorder::new(Uuid::nil(), 4);
        recorder.record(0, 100, key("a")).unwrap();
        let event = recorder.record(0, 90, key("b")).unwrap();
        assert_eq!(event.timestamp_us, 100);
    }

    #[test]
    fn test_capacity_exceeded_keeps_existing_events() {
        let mut recorder = EventRecorder::new(Uuid::nil(), 2);
        recorder.record(0, 1, key("a")).unwrap();
        recorder.record(0, 2, key("b")).unwrap();

        let result = recorder.record(0, 3, key("c"));
        assert!(matches!(
            result,
            Err(ComputeError::CapacityExceeded { capacity: 2 })
        ));
        assert!(recorder.record(0, 4, key("d")).is_err());

        assert!(recorder.is_full());
        assert_eq!(recorder.dropped(), 2);
        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.events()[1].kind, key("b"));
    }

    #[test]
    fn test_into_log() {
        let mut recorder = EventRecorder::new(Uuid::nil(), 1);
        recorder.record(2, 5, key("x")).unwrap();
        let _ = recorder.record(2, 6, key("y"));

        let log = recorder.into_log(
            Utc::now(),
            Difficulty::Hard,
            SessionOutcome::Completed,
            3,
            Vec::new(),
        );
        assert_eq!(log.events.len(), 1);
        assert_eq!(log.dropped_events, 1);
        assert_eq!(log.stall_count, 3);
        assert_eq!(log.difficulty, Difficulty::Hard);
    }
}
