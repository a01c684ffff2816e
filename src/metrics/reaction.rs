//! Simple reaction time (layer 0)

use crate::config::MetricsConfig;
use crate::stats;
use crate::types::{us_to_ms, Micros, ReactionMetrics};

/// Match each click to its nearest preceding stimulus onset and classify the
/// latency. Matching is one-to-one: a stimulus claimed by a valid or lapsed
/// click is not reused, anticipations claim nothing, and a click whose
/// nearest onset is already claimed (or absent) is unmatched.
pub fn reaction_metrics(onsets: &[Micros], clicks: &[Micros], config: &MetricsConfig) -> ReactionMetrics {
    let mut claimed = vec![false; onsets.len()];
    let mut latencies = Vec::new();
    let mut anticipation_count = 0;
    let mut lapse_count = 0;
    let mut unmatched_clicks = 0;

    // Index one past the last onset at or before the current click
    let mut next = 0;
    for &click in clicks {
        while next < onsets.len() && onsets[next] <= click {
            next += 1;
        }
        let Some(idx) = next.checked_sub(1) else {
            unmatched_clicks += 1;
            continue;
        };
        if claimed[idx] {
            unmatched_clicks += 1;
            continue;
        }

        let latency_ms = us_to_ms(click - onsets[idx]);
        if latency_ms < config.anticipation_ms {
            anticipation_count += 1;
        } else if latency_ms > config.lapse_ms {
            lapse_count += 1;
            claimed[idx] = true;
        } else {
            latencies.push(latency_ms);
            claimed[idx] = true;
        }
    }

    let has_valid = !latencies.is_empty();
    ReactionMetrics {
        stimulus_count: onsets.len() as u32,
        valid_count: latencies.len() as u32,
        anticipation_count,
        lapse_count,
        unmatched_clicks,
        mean_ms: has_valid.then(|| stats::mean(&latencies)),
        median_ms: has_valid.then(|| stats::median(&latencies)),
        variance_ms2: has_valid.then(|| stats::variance(&latencies)),
        std_ms: has_valid.then(|| stats::std_dev(&latencies)),
    }
}
