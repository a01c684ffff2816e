//! Audio discrimination and psychological refractory period (layers 2-3)

use crate::config::{MetricsConfig, AUDIO_RESPONSE_KEY};
use crate::stats;
use crate::types::{us_to_ms, AudioMetrics, Micros, PrpMetrics};

use super::{CursorSample, LayerEvents};

/// A signal cue and the response that answered it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioMatch {
    pub cue_us: Micros,
    pub response_us: Micros,
}

/// Match cues to response-key presses. Each cue takes the first unclaimed
/// press at least the anticipation floor after it and inside the response
/// window. Signal matches are hits; distractor matches are false positives.
pub fn audio_metrics(events: &LayerEvents<'_>, config: &MetricsConfig) -> (AudioMetrics, Vec<AudioMatch>) {
    let responses = events.presses_of(AUDIO_RESPONSE_KEY);
    let floor = (config.audio_anticipation_ms * 1_000.0) as Micros;
    let window = (config.audio_response_window_ms * 1_000.0) as Micros;

    let mut metrics = AudioMetrics::default();
    let mut hits = Vec::new();
    let mut next = 0;
    for cue in &events.cues {
        if cue.distractor {
            metrics.distractor_cues += 1;
        } else {
            metrics.signal_cues += 1;
        }

        // Presses too early for this cue are too early for every later cue
        while next < responses.len() && responses[next] < cue.t + floor {
            next += 1;
        }
        let Some(&response) = responses.get(next) else {
            continue;
        };
        if response > cue.t + window {
            continue;
        }
        next += 1;
        if cue.distractor {
            metrics.false_positives += 1;
        } else {
            hits.push(AudioMatch {
                cue_us: cue.t,
                response_us: response,
            });
        }
    }

    let rts: Vec<f64> = hits
        .iter()
        .map(|m| us_to_ms(m.response_us - m.cue_us))
        .collect();
    metrics.hits = hits.len() as u32;
    metrics.accuracy =
        (metrics.signal_cues > 0).then(|| metrics.hits as f64 / metrics.signal_cues as f64);
    metrics.mean_rt_ms = (!rts.is_empty()).then(|| stats::mean(&rts));
    (metrics, hits)
}

/// Recovery time of tracking error after each answered cue.
///
/// Baseline is the mean error over the pre-cue window. Buckets after the
/// response are scanned until one averages at or below baseline times the
/// recovery multiplier; a pair that never recovers is censored at the max.
pub fn prp_metrics(matches: &[AudioMatch], cursor: &[CursorSample], config: &MetricsConfig) -> PrpMetrics {
    let series: Vec<(Micros, f64)> = cursor
        .iter()
        .filter_map(|s| s.error().map(|e| (s.t, e)))
        .collect();
    let window = (config.prp_baseline_window_ms * 1_000.0) as Micros;
    let bucket = ((config.prp_bucket_ms * 1_000.0) as Micros).max(1);
    let max = (config.prp_max_ms * 1_000.0) as Micros;

    let mean_between = |from: Micros, to: Micros| -> Option<f64> {
        let start = series.partition_point(|(t, _)| *t < from);
        let end = series.partition_point(|(t, _)| *t < to);
        let slice: Vec<f64> = series[start..end.max(start)].iter().map(|(_, e)| *e).collect();
        (!slice.is_empty()).then(|| stats::mean(&slice))
    };

    let mut durations = Vec::new();
    let mut censored = 0;
    for m in matches {
        let Some(baseline) = mean_between(m.cue_us.saturating_sub(window), m.cue_us) else {
            continue;
        };
        let threshold = baseline * config.prp_recovery_multiplier;

        let mut recovered = None;
        let mut offset = 0;
        while offset < max {
            let end = offset + bucket;
            if let Some(err) = mean_between(m.response_us + offset, m.response_us + end) {
                if err <= threshold {
                    recovered = Some(end.min(max));
                    break;
                }
            }
            offset = end;
        }
        match recovered {
            Some(us) => durations.push(us_to_ms(us)),
            None => {
                censored += 1;
                durations.push(config.prp_max_ms);
            }
        }
    }

    PrpMetrics {
        pairs: durations.len() as u32,
        censored,
        mean_ms: (!durations.is_empty()).then(|| stats::mean(&durations)),
    }
}
