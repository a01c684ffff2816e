//! Layer 3 secondary tasks: cooldown resource and peripheral flashes

use crate::config::{MetricsConfig, COOLDOWN_KEY};
use crate::stats;
use crate::types::{us_to_ms, CooldownMetrics, Micros, PeripheralMetrics};

use super::LayerEvents;

/// Match each ready event to the first cooldown-key press at or after it and
/// strictly before the following ready event
pub fn cooldown_metrics(events: &LayerEvents<'_>, _config: &MetricsConfig) -> CooldownMetrics {
    let presses = events.presses_of(COOLDOWN_KEY);
    let ready = &events.cooldown_ready;

    let mut delays = Vec::new();
    let mut misses = 0;
    let mut next = 0;
    for (i, &at) in ready.iter().enumerate() {
        let until = ready.get(i + 1).copied().unwrap_or(Micros::MAX);
        while next < presses.len() && presses[next] < at {
            next += 1;
        }
        match presses.get(next) {
            Some(&press) if press < until => {
                delays.push(us_to_ms(press - at));
                next += 1;
            }
            _ => misses += 1,
        }
    }

    CooldownMetrics {
        ready_events: ready.len() as u32,
        misses,
        mean_delay_ms: (!delays.is_empty()).then(|| stats::mean(&delays)),
    }
}

/// Match each flash to the first unclaimed press of its digit within the
/// timeout
pub fn peripheral_metrics(events: &LayerEvents<'_>, config: &MetricsConfig) -> PeripheralMetrics {
    let timeout = (config.peripheral_timeout_ms * 1_000.0) as Micros;
    let keys = &events.keys;
    let mut claimed = vec![false; keys.len()];
    let mut rts = Vec::new();

    for &(at, digit) in &events.flashes {
        let digit = digit.to_string();
        let start = keys.partition_point(|(t, _)| *t < at);
        let found = keys[start..]
            .iter()
            .enumerate()
            .take_while(|(_, (t, _))| *t <= at + timeout)
            .find(|(i, (_, k))| !claimed[start + i] && *k == digit)
            .map(|(i, (t, _))| (start + i, *t));
        if let Some((idx, t)) = found {
            claimed[idx] = true;
            rts.push(us_to_ms(t - at));
        }
    }

    let flashes = events.flashes.len() as u32;
    let hits = rts.len() as u32;
    PeripheralMetrics {
        flashes,
        hits,
        misses: flashes - hits,
        mean_rt_ms: (!rts.is_empty()).then(|| stats::mean(&rts)),
        miss_rate: (flashes > 0).then(|| (flashes - hits) as f64 / flashes as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::test_support::*;
    use crate::types::{EventKind, FlashDirection, RawEvent};

    fn split(events: &[RawEvent]) -> LayerEvents<'_> {
        let refs: Vec<&RawEvent> = events.iter().collect();
        LayerEvents::from_sorted(&refs)
    }

    fn flash(t: Micros, digit: u8) -> RawEvent {
        event(
            3,
            t,
            EventKind::PeripheralFlash {
                flash_id: 0,
                digit,
                direction: FlashDirection::Right,
            },
        )
    }

    fn ready(t: Micros) -> RawEvent {
        event(3, t, EventKind::CooldownReady { cycle: 0 })
    }

    #[test]
    fn test_flash_answered_with_matching_digit() {
        let t = 4_000_000;
        let events = vec![flash(t, 7), key(3, t + 300_000, "7")];
        let m = peripheral_metrics(&split(&events), &MetricsConfig::default());
        assert_eq!(m.hits, 1);
        assert_eq!(m.misses, 0);
        assert_eq!(m.mean_rt_ms, Some(300.0));
        assert_eq!(m.miss_rate, Some(0.0));
    }

    #[test]
    fn test_wrong_digit_or_late_press_is_a_miss() {
        let events = vec![
            flash(1_000_000, 3),
            key(3, 1_200_000, "4"),
            flash(5_000_000, 2),
            key(3, 7_500_000, "2"),
        ];
        let m = peripheral_metrics(&split(&events), &MetricsConfig::default());
        assert_eq!(m.flashes, 2);
        assert_eq!(m.hits, 0);
        assert_eq!(m.miss_rate, Some(1.0));
        assert_eq!(m.mean_rt_ms, None);
    }

    #[test]
    fn test_one_press_answers_one_flash() {
        let events = vec![flash(1_000_000, 5), flash(1_500_000, 5), key(3, 1_800_000, "5")];
        let m = peripheral_metrics(&split(&events), &MetricsConfig::default());
        assert_eq!(m.hits, 1);
        assert_eq!(m.misses, 1);
    }

    #[test]
    fn test_cooldown_delay_and_misses() {
        let events = vec![
            ready(1_000_000),
            key(3, 1_600_000, "e"),
            ready(10_000_000),
            ready(20_000_000),
            key(3, 20_200_000, "e"),
        ];
        let m = cooldown_metrics(&split(&events), &MetricsConfig::default());
        assert_eq!(m.ready_events, 3);
        assert_eq!(m.misses, 1);
        assert_eq!(m.mean_delay_ms, Some(400.0));
    }

    #[test]
    fn test_press_after_next_ready_does_not_count_for_previous() {
        let events = vec![ready(1_000_000), ready(2_000_000), key(3, 2_500_000, "e")];
        let m = cooldown_metrics(&split(&events), &MetricsConfig::default());
        assert_eq!(m.misses, 1);
        assert_eq!(m.mean_delay_ms, Some(500.0));
    }
}
