//! Synthetic participant
//!
//! Drives a `Session` on a fake clock at a chosen tick rate: the cursor
//! chases the target with noise, stimuli get clicked, signal tones get the
//! space bar, the cooldown gets spent and flashed digits get typed. Used by
//! the `battery simulate` command and by cadence tests.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::{BatteryConfig, Difficulty, AUDIO_RESPONSE_KEY, COOLDOWN_KEY};
use crate::error::ComputeError;
use crate::scheduler::{NoopListener, SchedulerAction};
use crate::session::{FinishedSession, Session};
use crate::types::{secs_to_us, Micros, Phase, FINAL_LAYER};

/// Seed offsets keeping participant streams apart from the scheduler's
const RESPONSE_STREAM: u64 = 0x5eed_0001;
const CURSOR_STREAM: u64 = 0x5eed_0002;

/// Slack after the nominal battery length before the run is abandoned
const OVERRUN_SEC: f64 = 30.0;

/// How the synthetic participant behaves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticipantProfile {
    /// Simple reaction time mean and standard deviation (ms)
    pub reaction_ms: (f64, f64),
    /// Fraction of the remaining cursor-target gap closed per second
    pub tracking_gain: f64,
    /// Cursor jitter standard deviation (px)
    pub cursor_noise_px: f64,
    pub audio_hit_probability: f64,
    pub audio_false_alarm_probability: f64,
    pub audio_rt_ms: (f64, f64),
    pub cooldown_delay_ms: (f64, f64),
    pub peripheral_hit_probability: f64,
    pub peripheral_rt_ms: (f64, f64),
    /// Relative slowdown of every response per layer of added load
    pub load_slowdown: f64,
}

impl Default for ParticipantProfile {
    fn default() -> Self {
        Self {
            reaction_ms: (280.0, 40.0),
            tracking_gain: 8.0,
            cursor_noise_px: 3.0,
            audio_hit_probability: 0.9,
            audio_false_alarm_probability: 0.1,
            audio_rt_ms: (450.0, 80.0),
            cooldown_delay_ms: (600.0, 150.0),
            peripheral_hit_probability: 0.8,
            peripheral_rt_ms: (650.0, 120.0),
            load_slowdown: 0.1,
        }
    }
}

/// One simulated run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub difficulty: Difficulty,
    /// Scheduler seed; participant streams derive from it
    pub seed: u64,
    /// Host tick rate
    pub tick_hz: f64,
    /// Time spent on each "ready" screen before advancing
    pub inter_layer_pause_sec: f64,
    /// Press Escape this many seconds into the run
    pub abort_after_sec: Option<f64>,
    /// Suspend the session at `.0` seconds for `.1` seconds
    pub pause: Option<(f64, f64)>,
    pub participant: ParticipantProfile,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Standard,
            seed: 1,
            tick_hz: 60.0,
            inter_layer_pause_sec: 2.0,
            abort_after_sec: None,
            pause: None,
            participant: ParticipantProfile::default(),
        }
    }
}

/// A finished simulated session plus everything the scheduler announced
#[derive(Debug, Clone)]
pub struct SimulationRun {
    pub finished: FinishedSession,
    pub actions: Vec<SchedulerAction>,
}

#[derive(Debug, Clone)]
enum Response {
    Click { x: f64, y: f64 },
    Key(String),
}

/// Responses waiting for their time, kept sorted by due time
#[derive(Debug, Default)]
struct Pending {
    queue: Vec<(Micros, Response)>,
}

impl Pending {
    fn push(&mut self, due: Micros, response: Response) {
        let idx = self.queue.partition_point(|(t, _)| *t <= due);
        self.queue.insert(idx, (due, response));
    }

    fn take_due(&mut self, now: Micros) -> Vec<(Micros, Response)> {
        let n = self.queue.partition_point(|(t, _)| *t <= now);
        self.queue.drain(..n).collect()
    }

    fn shift(&mut self, span: Micros) {
        for (t, _) in &mut self.queue {
            *t += span;
        }
    }

    fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Standard normal draw (Box-Muller)
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

struct Participant {
    profile: ParticipantProfile,
    seed: u64,
    layer: u8,
    response_rng: StdRng,
    cursor_rng: StdRng,
    cursor: (f64, f64),
}

impl Participant {
    fn new(profile: ParticipantProfile, seed: u64, cursor: (f64, f64)) -> Self {
        Self {
            profile,
            seed,
            layer: 0,
            response_rng: StdRng::seed_from_u64(seed ^ RESPONSE_STREAM),
            cursor_rng: StdRng::seed_from_u64(seed ^ CURSOR_STREAM),
            cursor,
        }
    }

    /// Response draws restart per layer so earlier layers cannot shift them
    fn enter_layer(&mut self, layer: u8) {
        self.layer = layer;
        self.response_rng =
            StdRng::seed_from_u64((self.seed ^ RESPONSE_STREAM).wrapping_add(layer as u64 + 1));
    }

    fn latency_us(&mut self, (mean, sd): (f64, f64)) -> Micros {
        let slowdown = 1.0 + self.profile.load_slowdown * self.layer as f64;
        let ms = (mean + sd * standard_normal(&mut self.response_rng)) * slowdown;
        secs_to_us(ms.max(1.0) / 1_000.0)
    }

    fn react(&mut self, action: &SchedulerAction, now: Micros, pending: &mut Pending) {
        match action {
            SchedulerAction::StimulusShown { x, y, .. } => {
                let due = now + self.latency_us(self.profile.reaction_ms);
                pending.push(due, Response::Click { x: *x, y: *y });
            }
            SchedulerAction::AudioCue {
                distractor,
                emitted_at,
                ..
            } => {
                let p = if *distractor {
                    self.profile.audio_false_alarm_probability
                } else {
                    self.profile.audio_hit_probability
                };
                if self.response_rng.gen_bool(p.clamp(0.0, 1.0)) {
                    let due = emitted_at + self.latency_us(self.profile.audio_rt_ms);
                    pending.push(due, Response::Key(AUDIO_RESPONSE_KEY.to_string()));
                }
            }
            SchedulerAction::CooldownReady { scheduled_at, .. } => {
                let due = scheduled_at + self.latency_us(self.profile.cooldown_delay_ms);
                pending.push(due, Response::Key(COOLDOWN_KEY.to_string()));
            }
            SchedulerAction::PeripheralFlash {
                digit, emitted_at, ..
            } => {
                let p = self.profile.peripheral_hit_probability.clamp(0.0, 1.0);
                if self.response_rng.gen_bool(p) {
                    let due = emitted_at + self.latency_us(self.profile.peripheral_rt_ms);
                    pending.push(due, Response::Key(digit.to_string()));
                }
            }
            _ => {}
        }
    }

    /// Move the cursor toward `goal` over `dt_sec`
    fn track(&mut self, goal: (f64, f64), dt_sec: f64) -> (f64, f64) {
        let k = (self.profile.tracking_gain * dt_sec).min(1.0);
        let noise = self.profile.cursor_noise_px;
        self.cursor.0 += k * (goal.0 - self.cursor.0) + noise * standard_normal(&mut self.cursor_rng);
        self.cursor.1 += k * (goal.1 - self.cursor.1) + noise * standard_normal(&mut self.cursor_rng);
        self.cursor
    }
}

/// Nominal length of a full run, countdown, ready screens and pause included
fn nominal_length_sec(config: &BatteryConfig, sim: &SimulationConfig) -> f64 {
    let s = &config.scheduler;
    let layers = (FINAL_LAYER as f64 + 1.0) * s.layer_duration_sec;
    let paused = sim.pause.map_or(0.0, |(_, len)| len);
    s.countdown_sec + layers + FINAL_LAYER as f64 * sim.inter_layer_pause_sec + paused
}

/// Run one session to completion (or abort) under a synthetic participant
pub fn simulate_session(
    config: &BatteryConfig,
    sim: &SimulationConfig,
) -> Result<SimulationRun, ComputeError> {
    config.validate()?;
    if !(sim.tick_hz.is_finite() && sim.tick_hz > 0.0) {
        return Err(ComputeError::Configuration(format!(
            "tick_hz must be positive, got {}",
            sim.tick_hz
        )));
    }

    let display = config.scheduler.display;
    let mut session = Session::new(
        config.scheduler.clone(),
        sim.difficulty,
        sim.seed,
        Box::new(NoopListener),
    )?;
    let mut participant = Participant::new(
        sim.participant.clone(),
        sim.seed,
        (display.width / 2.0, display.height / 2.0),
    );
    let mut pending = Pending::default();
    let mut actions = Vec::new();

    let tick_us = secs_to_us(1.0 / sim.tick_hz).max(1);
    let dt_sec = tick_us as f64 / 1_000_000.0;
    let deadline = secs_to_us(nominal_length_sec(config, sim) + OVERRUN_SEC);
    let abort_at = sim.abort_after_sec.map(secs_to_us);
    let mut pause = sim.pause.map(|(at, len)| (secs_to_us(at), secs_to_us(len)));
    let mut advance_at: Option<Micros> = None;

    log::debug!(
        "simulating {:?} session at {} Hz, seed {}",
        sim.difficulty,
        sim.tick_hz,
        sim.seed
    );

    let mut now: Micros = 0;
    session.start(now)?;

    while !session.is_over() && now <= deadline {
        if abort_at.map_or(false, |t| now >= t) {
            session.abort(now);
            break;
        }
        if let Some((at, len)) = pause {
            if now >= at && session.phase() == Phase::Running {
                session.pause(now);
                now += len;
                session.resume(now);
                pending.shift(len);
                pause = None;
            }
        }
        if let Some(at) = advance_at {
            if now >= at {
                advance_at = None;
                actions.push(session.advance_to_next_layer(now)?);
                participant.enter_layer(session.scheduler().layer());
            }
        }

        for (due, response) in pending.take_due(now) {
            match response {
                Response::Click { x, y } => session.click(due, x, y),
                Response::Key(key) => session.key_press(due, &key),
            };
        }

        for action in session.tick(now) {
            match &action {
                SchedulerAction::LayerStarted { layer, .. } => participant.enter_layer(*layer),
                SchedulerAction::LayerComplete(_) => {
                    pending.clear();
                    advance_at = Some(now + secs_to_us(sim.inter_layer_pause_sec));
                }
                other => participant.react(other, now, &mut pending),
            }
            actions.push(action);
        }

        if session.phase() == Phase::Running {
            let goal = match session.scheduler().state().target {
                Some(target) => (target.x, target.y),
                None => participant.cursor,
            };
            let (x, y) = participant.track(goal, dt_sec);
            session.cursor(now, x, y);
        }

        now += tick_us;
    }

    let finished = session.finish(now, &config.metrics);
    log::info!(
        "simulated session {} finished: {:?}, {} events",
        finished.log.session_id,
        finished.log.outcome,
        finished.log.events.len()
    );
    Ok(SimulationRun { finished, actions })
}

/// Run `sessions` consecutive sessions with seeds `sim.seed`, `sim.seed + 1`, ...
pub fn simulate_history(
    config: &BatteryConfig,
    sim: &SimulationConfig,
    sessions: usize,
) -> Result<Vec<FinishedSession>, ComputeError> {
    (0..sessions as u64)
        .map(|i| {
            let run = SimulationConfig {
                seed: sim.seed.wrapping_add(i),
                ..sim.clone()
            };
            simulate_session(config, &run).map(|r| r.finished)
        })
        .collect()
}
