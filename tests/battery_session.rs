use pretty_assertions::assert_eq;

use readiness_battery::config::MIN_AUDIO_INTERVAL_SEC;
use readiness_battery::encoder::ReportEncoder;
use readiness_battery::pipeline::session_metrics;
use readiness_battery::simulate::{simulate_history, simulate_session, SimulationRun};
use readiness_battery::types::{secs_to_us, AlertLevel, Micros, SessionOutcome};
use readiness_battery::{
    BatteryConfig, BatteryProcessor, ComputeError, Difficulty, SchedulerAction, SimulationConfig,
    WeightProfile,
};

const LAYER_SEC: f64 = 20.0;

fn config() -> BatteryConfig {
    let mut config = BatteryConfig::default();
    config.scheduler.countdown_sec = 1.0;
    config.scheduler.layer_duration_sec = LAYER_SEC;
    config
}

fn processor() -> BatteryProcessor {
    BatteryProcessor::new(config(), WeightProfile::default())
        .unwrap()
        .with_encoder(ReportEncoder::with_instance_id("integration".to_string()))
}

/// (kind, layer, offset from layer start) of every timed emission, dropping
/// the last half second of each layer where tick granularity decides
/// whether an emission lands before the layer closes
fn timed_emissions(run: &SimulationRun) -> Vec<(&'static str, u8, Micros)> {
    let cutoff = secs_to_us(LAYER_SEC - 0.5);
    let mut layer = 0;
    let mut start = 0;
    let mut out = Vec::new();
    for action in &run.actions {
        let (kind, at) = match action {
            SchedulerAction::LayerStarted { layer: l, at } => {
                layer = *l;
                start = *at;
                continue;
            }
            SchedulerAction::AudioCue { scheduled_at, .. } => ("audio", *scheduled_at),
            SchedulerAction::PeripheralFlash { scheduled_at, .. } => ("flash", *scheduled_at),
            SchedulerAction::CooldownReady { scheduled_at, .. } => ("cooldown", *scheduled_at),
            _ => continue,
        };
        let offset = at - start;
        if offset < cutoff {
            out.push((kind, layer, offset));
        }
    }
    out
}

#[test]
fn test_simulated_session_end_to_end() {
    let run = simulate_session(&config(), &SimulationConfig::default()).unwrap();
    assert_eq!(run.finished.log.outcome, SessionOutcome::Completed);

    let mut processor = processor();
    let report = processor.process(&run.finished.log).unwrap();

    assert_eq!(report.session_number, 1);
    assert_eq!(report.producer.instance_id, "integration");
    assert_eq!(report.layers.len(), 4);
    assert_eq!(report.layers, run.finished.metrics);
    assert!(report.score.withheld);
    assert!(report.quality.flags.contains(&"calibration".to_string()));

    let l2 = &report.layers[2];
    let audio = l2.audio.as_ref().unwrap();
    assert!(audio.signal_cues + audio.distractor_cues > 0);
    let l3 = &report.layers[3];
    assert!(l3.peripheral.as_ref().unwrap().flashes > 0);
    assert!(l3.cooldown.as_ref().unwrap().ready_events > 0);
}

#[test]
fn test_calibration_window_then_scores() {
    let sessions = simulate_history(&config(), &SimulationConfig::default(), 7).unwrap();
    let mut processor = processor();

    for (i, session) in sessions.iter().enumerate() {
        let report = processor.process(&session.log).unwrap();
        let number = i as u32 + 1;
        assert_eq!(report.session_number, number);
        if number <= 5 {
            assert!(report.score.withheld, "session {number} should be withheld");
            assert_eq!(report.score.crs, None);
            assert_eq!(report.score.alert, AlertLevel::None);
        } else {
            assert!(!report.score.withheld);
            let crs = report.score.crs.unwrap();
            assert!((0.0..=100.0).contains(&crs));
            for lpi in report.score.lpi.iter().flatten() {
                assert!((0.0..=100.0).contains(lpi));
            }
            if let Some(dc) = report.score.degradation_coefficient {
                assert!((0.0..=1.0).contains(&dc));
            }
        }
    }
    assert_eq!(processor.session_count(), 7);
}

#[test]
fn test_emission_schedule_independent_of_tick_rate() {
    let at = |hz: f64| {
        let sim = SimulationConfig {
            difficulty: Difficulty::Hard,
            seed: 42,
            tick_hz: hz,
            ..SimulationConfig::default()
        };
        simulate_session(&config(), &sim).unwrap()
    };
    let slow = at(60.0);
    let fast = at(240.0);

    let slow_emissions = timed_emissions(&slow);
    assert!(slow_emissions.iter().any(|(kind, _, _)| *kind == "audio"));
    assert!(slow_emissions.iter().any(|(kind, _, _)| *kind == "flash"));
    assert_eq!(slow_emissions, timed_emissions(&fast));
}

#[test]
fn test_pause_does_not_release_a_backlog() {
    // Layer 2 starts around 45s; pause inside it for half a minute
    let sim = SimulationConfig {
        seed: 9,
        pause: Some((50.0, 30.0)),
        ..SimulationConfig::default()
    };
    let run = simulate_session(&config(), &sim).unwrap();
    assert_eq!(run.finished.log.outcome, SessionOutcome::Completed);

    let emitted: Vec<Micros> = run
        .actions
        .iter()
        .filter_map(|a| match a {
            SchedulerAction::AudioCue { emitted_at, .. } => Some(*emitted_at),
            _ => None,
        })
        .collect();
    assert!(emitted.len() > 2);

    // Consecutive cues within a layer keep their spacing, up to one tick
    let min_gap = secs_to_us(MIN_AUDIO_INTERVAL_SEC) - secs_to_us(1.0 / sim.tick_hz);
    for pair in emitted.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(gap >= min_gap, "cues {}us apart after pause", gap);
    }
}

#[test]
fn test_aborted_session_is_not_scored() {
    let sim = SimulationConfig {
        abort_after_sec: Some(30.0),
        ..SimulationConfig::default()
    };
    let run = simulate_session(&config(), &sim).unwrap();
    assert_eq!(run.finished.log.outcome, SessionOutcome::Aborted);

    let mut processor = processor();
    let result = processor.process(&run.finished.log);
    assert!(matches!(result, Err(ComputeError::SessionAborted(_))));
    assert_eq!(processor.session_count(), 0);
    assert!(processor.baselines().snapshot().is_empty());
}

#[test]
fn test_metrics_reproducible_from_persisted_log() {
    let run = simulate_session(&config(), &SimulationConfig::default()).unwrap();
    let json = serde_json::to_string(&run.finished.log).unwrap();

    let first = session_metrics(&json, &config().metrics).unwrap();
    let second = session_metrics(&json, &config().metrics).unwrap();
    assert_eq!(first, second);
    assert_eq!(first, run.finished.metrics);
}
