//! Layered stimulus scheduler
//!
//! A tick-driven state machine that walks Idle → Countdown → Running(0..=3) ⇄
//! InterLayer → Complete. Every recurring stimulus has its next absolute
//! emission time committed when the previous one resolves (or at layer
//! start), so per-tick code only compares `now` against committed times and
//! the real-time cadence does not depend on how often `tick` is called.
//!
//! Each stream draws from its own RNG, reseeded per layer, so neither the
//! target motion nor the interleaving of other streams can shift a schedule.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{
    Difficulty, DifficultyProfile, SchedulerConfig, ABORT_KEY, COOLDOWN_KEY,
    MIN_AUDIO_FLASH_SEPARATION_SEC, MIN_AUDIO_INTERVAL_SEC, MIN_COOLDOWN_AUDIO_SEPARATION_SEC,
    SPACING_DEFER_SEC,
};
use crate::error::ComputeError;
use crate::kinematics::{Bounds, TargetKinematics};
use crate::recorder::EventRecorder;
use crate::types::{
    assert_layer, secs_to_us, AudioCueState, CooldownState, EventKind, FlashDirection, FlashState,
    LayerSpan, Micros, Phase, RawEvent, SimpleStimulus, StimulusState, FINAL_LAYER,
    LAYER_COUNT,
};

/// Upper bound on stream resolutions handled within one tick
const MAX_DUE_PER_TICK: usize = 32;

/// Offsets separating the per-layer seeds of each RNG stream
const STREAM_STIMULUS: u64 = 1;
const STREAM_AUDIO: u64 = 2;
const STREAM_FLASH: u64 = 3;
const STREAM_MOTION: u64 = 4;

/// Descriptor handed to the "ready" screen between layers
#[derive(Debug, Clone, PartialEq)]
pub struct LayerTransition {
    pub completed_layer: u8,
    pub next_layer: u8,
    pub description: String,
    pub new_elements: Vec<String>,
    pub controls: Vec<String>,
    /// Fixed pause before the next layer may start
    pub cooldown_seconds: u32,
}

/// What a tick (or an advance) produced, for hosts that poll instead of
/// listening
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerAction {
    LayerStarted {
        layer: u8,
        at: Micros,
    },
    StimulusShown {
        stimulus_id: u32,
        x: f64,
        y: f64,
        scheduled_at: Micros,
        emitted_at: Micros,
    },
    StimulusExpired {
        stimulus_id: u32,
    },
    AudioCue {
        cue_id: u32,
        distractor: bool,
        scheduled_at: Micros,
        emitted_at: Micros,
    },
    PeripheralFlash {
        flash_id: u32,
        digit: u8,
        direction: FlashDirection,
        scheduled_at: Micros,
        emitted_at: Micros,
    },
    CooldownReady {
        cycle: u32,
        scheduled_at: Micros,
    },
    LayerComplete(LayerTransition),
    TestComplete,
}

/// Scheduler callbacks. Every method defaults to a no-op so hosts only
/// implement what they render or log.
pub trait SchedulerListener {
    fn on_event_recorded(&mut self, _event: &RawEvent) {}
    fn on_stimulus_state(&mut self, _state: &StimulusState) {}
    fn on_layer_complete(&mut self, _transition: &LayerTransition) {}
    fn on_test_complete(&mut self) {}
    fn on_abort(&mut self) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl SchedulerListener for NoopListener {}

/// Streams resolved in committed-time order within a tick. The derive order
/// breaks ties between streams due at the same instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Due {
    CooldownExpire,
    CooldownReady,
    Flash,
    Audio,
}

/// Layer 3 cooldown resource
#[derive(Debug, Clone, Default)]
struct Cooldown {
    /// When the current fill started
    fill_started: Micros,
    /// Committed ready time while filling
    ready_at: Option<Micros>,
    /// Committed reset time while ready and unspent
    expires_at: Option<Micros>,
    /// Committed time of the last ready event
    last_ready: Option<Micros>,
    cycle: u32,
}

/// Pre-committed emission times and stream state for the running layer
#[derive(Debug, Clone, Default)]
struct Schedule {
    next_stimulus_at: Option<Micros>,
    stimulus_expires_at: Option<Micros>,
    next_audio_at: Option<Micros>,
    last_audio_at: Option<Micros>,
    next_flash_at: Option<Micros>,
    last_flash_at: Option<Micros>,
    flash_hide_at: Option<Micros>,
    cooldown: Option<Cooldown>,
}

impl Schedule {
    /// Move every committed time forward by `span`
    fn shift(&mut self, span: Micros) {
        let shift = |t: &mut Option<Micros>| {
            if let Some(v) = t.as_mut() {
                *v += span;
            }
        };
        shift(&mut self.next_stimulus_at);
        shift(&mut self.stimulus_expires_at);
        shift(&mut self.next_audio_at);
        shift(&mut self.last_audio_at);
        shift(&mut self.next_flash_at);
        shift(&mut self.last_flash_at);
        shift(&mut self.flash_hide_at);
        if let Some(cd) = self.cooldown.as_mut() {
            cd.fill_started += span;
            shift(&mut cd.ready_at);
            shift(&mut cd.expires_at);
            shift(&mut cd.last_ready);
        }
    }
}

/// Layered state machine emitting stimuli at pre-committed times
pub struct StimulusScheduler {
    config: SchedulerConfig,
    difficulty: Difficulty,
    profile: DifficultyProfile,
    seed: u64,
    listener: Box<dyn SchedulerListener>,

    phase: Phase,
    layer: u8,
    start_layer: u8,
    countdown_ends_at: Micros,
    layer_start: Micros,
    spans: Vec<LayerSpan>,
    paused_at: Option<Micros>,
    last_tick: Option<Micros>,
    stall_count: u32,
    aborted: bool,

    stimulus_rng: StdRng,
    audio_rng: StdRng,
    flash_rng: StdRng,
    target: Option<TargetKinematics>,
    schedule: Schedule,
    state: StimulusState,

    stimulus_seq: u32,
    cue_seq: u32,
    flash_seq: u32,
}

impl std::fmt::Debug for StimulusScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StimulusScheduler")
            .field("difficulty", &self.difficulty)
            .field("phase", &self.phase)
            .field("layer", &self.layer)
            .field("paused", &self.paused_at.is_some())
            .field("stall_count", &self.stall_count)
            .finish()
    }
}

fn stream_rng(seed: u64, layer: u8, stream: u64) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_mul(31).wrapping_add(layer as u64 * 16 + stream))
}

fn draw_interval(rng: &mut StdRng, (lo, hi): (f64, f64)) -> Micros {
    let secs = if hi > lo { rng.gen_range(lo..=hi) } else { lo };
    secs_to_us(secs)
}

fn layer_transition(completed_layer: u8, cooldown_seconds: u32) -> LayerTransition {
    let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let next_layer = completed_layer + 1;
    let (description, new_elements, controls) = match next_layer {
        1 => (
            "Keep the cursor on the moving target",
            strings(&["moving target"]),
            strings(&["mouse: follow the target"]),
        ),
        2 => (
            "Keep tracking while listening for tones",
            strings(&["audio cues"]),
            strings(&[
                "mouse: follow the target",
                "space: answer high tones, ignore low tones",
            ]),
        ),
        _ => (
            "Full load: tracking, tones, cooldown and edge flashes",
            strings(&["cooldown bar", "peripheral digit flashes"]),
            strings(&[
                "mouse: follow the target",
                "space: answer high tones, ignore low tones",
                "e: spend the cooldown when the bar is full",
                "1-9: type the digit flashed at the screen edge",
            ]),
        ),
    };
    LayerTransition {
        completed_layer,
        next_layer,
        description: description.to_string(),
        new_elements,
        controls,
        cooldown_seconds,
    }
}

impl StimulusScheduler {
    pub fn new(
        config: SchedulerConfig,
        difficulty: Difficulty,
        seed: u64,
        listener: Box<dyn SchedulerListener>,
    ) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            profile: difficulty.profile(),
            difficulty,
            seed,
            listener,
            phase: Phase::Idle,
            layer: 0,
            start_layer: 0,
            countdown_ends_at: 0,
            layer_start: 0,
            spans: Vec::new(),
            paused_at: None,
            last_tick: None,
            stall_count: 0,
            aborted: false,
            stimulus_rng: stream_rng(seed, 0, STREAM_STIMULUS),
            audio_rng: stream_rng(seed, 0, STREAM_AUDIO),
            flash_rng: stream_rng(seed, 0, STREAM_FLASH),
            target: None,
            schedule: Schedule::default(),
            state: StimulusState::default(),
            stimulus_seq: 0,
            cue_seq: 0,
            flash_seq: 0,
            config,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn layer(&self) -> u8 {
        self.layer
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    /// Whether the last `stop` ended a test in progress
    pub fn was_aborted(&self) -> bool {
        self.aborted
    }

    /// Tick gaps that exceeded the stall threshold
    pub fn stall_count(&self) -> u32 {
        self.stall_count
    }

    pub fn state(&self) -> &StimulusState {
        &self.state
    }

    pub fn layer_start(&self) -> Micros {
        self.layer_start
    }

    /// Layers closed so far, by completion or abort
    pub fn layer_spans(&self) -> &[LayerSpan] {
        &self.spans
    }

    fn close_span(&mut self, now: Micros) {
        self.spans.push(LayerSpan {
            layer: self.layer,
            started_us: self.layer_start,
            ended_us: now.max(self.layer_start),
        });
    }

    /// Committed time of the next audio cue, if one is pending
    pub fn next_audio_at(&self) -> Option<Micros> {
        self.schedule.next_audio_at
    }

    /// Committed time of the next peripheral flash, if one is pending
    pub fn next_flash_at(&self) -> Option<Micros> {
        self.schedule.next_flash_at
    }

    /// Begin the test at layer 0 after the countdown
    pub fn start(&mut self, now: Micros) -> Result<(), ComputeError> {
        self.start_at_layer(now, 0)
    }

    /// Begin the test at `layer` after the countdown (practice entry point)
    pub fn start_at_layer(&mut self, now: Micros, layer: u8) -> Result<(), ComputeError> {
        if usize::from(layer) >= LAYER_COUNT {
            return Err(ComputeError::InvalidTransition(format!(
                "no layer {layer} to start at"
            )));
        }
        if self.phase != Phase::Idle {
            return Err(ComputeError::InvalidTransition(format!(
                "cannot start from {:?}",
                self.phase
            )));
        }
        self.aborted = false;
        self.spans.clear();
        self.start_layer = layer;
        self.paused_at = None;
        self.last_tick = None;
        self.countdown_ends_at = now + secs_to_us(self.config.countdown_sec);
        self.phase = Phase::Countdown;
        log::info!(
            "battery starting at layer {layer} ({:?}), countdown {}s",
            self.difficulty,
            self.config.countdown_sec
        );
        Ok(())
    }

    /// Advance the scheduler to `now`, emitting whatever is due
    pub fn tick(&mut self, now: Micros, recorder: &mut EventRecorder) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();
        if self.paused_at.is_some() {
            return actions;
        }
        match self.phase {
            Phase::Countdown if now >= self.countdown_ends_at => {
                let at = self.countdown_ends_at;
                self.begin_layer(self.start_layer, at, &mut actions);
            }
            Phase::Running => {}
            _ => return actions,
        }

        if let Some(prev) = self.last_tick {
            let gap = now.saturating_sub(prev) as f64;
            let threshold = self.config.display.frame_interval_us() * self.config.stall_multiplier;
            if gap > threshold {
                self.stall_count += 1;
                log::debug!(
                    "tick stall: {:.1}ms gap (threshold {:.1}ms), layer {}",
                    gap / 1_000.0,
                    threshold / 1_000.0,
                    self.layer
                );
            }
        }
        let dt_sec = self
            .last_tick
            .map(|prev| now.saturating_sub(prev) as f64 / 1_000_000.0)
            .unwrap_or(0.0);
        self.last_tick = Some(now);

        if now.saturating_sub(self.layer_start) >= secs_to_us(self.config.layer_duration_sec) {
            self.complete_layer_into(now, &mut actions);
            return actions;
        }

        if self.layer == 0 {
            self.update_simple_stimulus(now, recorder, &mut actions);
        }
        if let Some(target) = self.target.as_mut() {
            target.update(dt_sec);
            self.state.target = Some(target.snapshot());
        }
        if self.layer >= 2 {
            self.update_timed_streams(now, recorder, &mut actions);
        }
        if let (Some(cd), Some(view)) = (self.schedule.cooldown.as_ref(), self.state.cooldown.as_mut())
        {
            let cycle = secs_to_us(self.profile.cooldown_cycle_sec).max(1);
            view.ready = cd.expires_at.is_some();
            view.progress = if view.ready {
                1.0
            } else {
                (now.saturating_sub(cd.fill_started) as f64 / cycle as f64).min(1.0)
            };
        }

        self.listener.on_stimulus_state(&self.state);
        actions
    }

    /// End the running layer. Layers 0-2 move to InterLayer with a transition
    /// descriptor; layer 3 completes the test.
    pub fn complete_layer(&mut self, now: Micros) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();
        if self.phase == Phase::Running {
            self.complete_layer_into(now, &mut actions);
        }
        actions
    }

    fn complete_layer_into(&mut self, now: Micros, actions: &mut Vec<SchedulerAction>) {
        self.close_span(now);
        self.schedule = Schedule::default();
        self.target = None;
        if self.layer < FINAL_LAYER {
            let transition = layer_transition(self.layer, self.config.inter_layer_cooldown_sec);
            self.phase = Phase::InterLayer;
            log::info!(
                "layer {} complete at {}us, next layer {}",
                self.layer,
                now,
                transition.next_layer
            );
            self.listener.on_layer_complete(&transition);
            actions.push(SchedulerAction::LayerComplete(transition));
        } else {
            self.phase = Phase::Complete;
            log::info!("battery complete at {now}us");
            self.listener.on_test_complete();
            actions.push(SchedulerAction::TestComplete);
        }
    }

    /// Start the next layer; valid only between layers
    pub fn advance_to_next_layer(&mut self, now: Micros) -> Result<SchedulerAction, ComputeError> {
        if self.phase != Phase::InterLayer {
            return Err(ComputeError::InvalidTransition(format!(
                "cannot advance from {:?}",
                self.phase
            )));
        }
        let mut actions = Vec::with_capacity(1);
        self.paused_at = None;
        self.last_tick = None;
        self.begin_layer(self.layer + 1, now, &mut actions);
        self.listener.on_stimulus_state(&self.state);
        Ok(SchedulerAction::LayerStarted {
            layer: self.layer,
            at: now,
        })
    }

    /// Return to Idle. The abort callback fires once, and only when a test
    /// was in progress.
    pub fn stop(&mut self, now: Micros) {
        let in_progress = self.phase.in_progress();
        if self.phase == Phase::Running {
            // A paused layer ends where the pause began
            let end = self.paused_at.unwrap_or(now);
            self.close_span(end);
        }
        self.phase = Phase::Idle;
        self.paused_at = None;
        self.last_tick = None;
        self.schedule = Schedule::default();
        self.target = None;
        if in_progress {
            self.aborted = true;
            log::warn!("battery aborted at {now}us during layer {}", self.layer);
            self.listener.on_abort();
        }
    }

    /// Suspend tick delivery; committed times are kept
    pub fn pause(&mut self, now: Micros) {
        if self.paused_at.is_none() && matches!(self.phase, Phase::Countdown | Phase::Running) {
            self.paused_at = Some(now);
        }
    }

    /// Resume after a pause, shifting every committed time by the paused
    /// span so nothing overdue fires on the next tick
    pub fn resume(&mut self, now: Micros) {
        let Some(paused_at) = self.paused_at.take() else {
            return;
        };
        let span = now.saturating_sub(paused_at);
        self.countdown_ends_at += span;
        self.layer_start += span;
        self.schedule.shift(span);
        if let Some(onset) = self.state.stimulus.onset_us.as_mut() {
            *onset += span;
        }
        if let Some(flash) = self.state.flash.as_mut() {
            flash.onset_us += span;
        }
        self.last_tick = self.last_tick.map(|t| t + span);
        log::debug!("resumed after {span}us pause");
    }

    /// Pointer press. Resolves a visible layer 0 stimulus.
    pub fn handle_click(&mut self, now: Micros, x: f64, y: f64, recorder: &mut EventRecorder) -> bool {
        if !self.accepting_input() {
            return false;
        }
        self.record(recorder, now, EventKind::Click { x, y });
        if self.layer == 0 && self.state.stimulus.visible {
            self.state.stimulus.visible = false;
            self.schedule.stimulus_expires_at = None;
            self.schedule.next_stimulus_at =
                Some(now + draw_interval(&mut self.stimulus_rng, self.profile.stimulus_interval));
        }
        true
    }

    /// Key press. The abort key stops the test; the cooldown key spends a
    /// ready cooldown.
    pub fn handle_key_press(&mut self, now: Micros, key: &str, recorder: &mut EventRecorder) -> bool {
        if key == ABORT_KEY {
            if self.phase.in_progress() {
                self.stop(now);
                return true;
            }
            return false;
        }
        if !self.accepting_input() {
            return false;
        }
        self.record(recorder, now, EventKind::Keypress { key: key.to_string() });

        if key == COOLDOWN_KEY {
            let cycle = secs_to_us(self.profile.cooldown_cycle_sec);
            if let Some(cd) = self.schedule.cooldown.as_mut() {
                if cd.expires_at.take().is_some() {
                    cd.fill_started = now;
                    cd.ready_at = Some(now + cycle);
                    if let Some(view) = self.state.cooldown.as_mut() {
                        view.ready = false;
                        view.progress = 0.0;
                    }
                }
            }
        }
        true
    }

    /// Pointer position; carries the target snapshot while tracking
    pub fn handle_cursor_position(
        &mut self,
        now: Micros,
        x: f64,
        y: f64,
        recorder: &mut EventRecorder,
    ) -> bool {
        if !self.accepting_input() {
            return false;
        }
        let (target_x, target_y) = match self.target.as_ref() {
            Some(target) => {
                let (tx, ty) = target.position();
                (Some(tx), Some(ty))
            }
            None => (None, None),
        };
        self.record(
            recorder,
            now,
            EventKind::CursorPos {
                x,
                y,
                target_x,
                target_y,
            },
        );
        true
    }

    fn accepting_input(&self) -> bool {
        self.phase == Phase::Running && self.paused_at.is_none()
    }

    fn record(&mut self, recorder: &mut EventRecorder, now: Micros, kind: EventKind) {
        // A full buffer is reported by the recorder; the test carries on
        if let Ok(event) = recorder.record(self.layer, now, kind) {
            self.listener.on_event_recorded(event);
        }
    }

    fn begin_layer(&mut self, layer: u8, at: Micros, actions: &mut Vec<SchedulerAction>) {
        assert_layer(layer);
        self.layer = layer;
        self.layer_start = at;
        self.phase = Phase::Running;

        self.stimulus_rng = stream_rng(self.seed, layer, STREAM_STIMULUS);
        self.audio_rng = stream_rng(self.seed, layer, STREAM_AUDIO);
        self.flash_rng = stream_rng(self.seed, layer, STREAM_FLASH);

        let display = self.config.display;
        self.target = (layer >= 1).then(|| {
            TargetKinematics::new(
                Bounds::inset(display.width, display.height, self.config.target_radius_px),
                self.profile.target_speed,
                self.config.turn_rate,
                self.profile.direction_change_rate,
                self.seed.wrapping_mul(31).wrapping_add(layer as u64 * 16 + STREAM_MOTION),
            )
        });

        let mut schedule = Schedule::default();
        if layer == 0 {
            schedule.next_stimulus_at =
                Some(at + draw_interval(&mut self.stimulus_rng, self.profile.stimulus_interval));
        }
        if layer >= 2 {
            schedule.next_audio_at =
                Some(at + draw_interval(&mut self.audio_rng, self.profile.audio_interval));
        }
        if layer == FINAL_LAYER {
            schedule.next_flash_at =
                Some(at + draw_interval(&mut self.flash_rng, self.profile.flash_interval));
            schedule.cooldown = Some(Cooldown {
                fill_started: at,
                ready_at: Some(at + secs_to_us(self.profile.cooldown_cycle_sec)),
                ..Cooldown::default()
            });
        }
        self.schedule = schedule;

        self.state = StimulusState {
            layer,
            target: self.target.as_ref().map(|t| t.snapshot()),
            cooldown: (layer == FINAL_LAYER).then(CooldownState::default),
            ..StimulusState::default()
        };

        log::info!("layer {layer} running from {at}us");
        actions.push(SchedulerAction::LayerStarted { layer, at });
    }

    fn update_simple_stimulus(
        &mut self,
        now: Micros,
        recorder: &mut EventRecorder,
        actions: &mut Vec<SchedulerAction>,
    ) {
        if let Some(expires_at) = self.schedule.stimulus_expires_at {
            if now >= expires_at {
                self.schedule.stimulus_expires_at = None;
                self.state.stimulus.visible = false;
                self.schedule.next_stimulus_at = Some(
                    expires_at + draw_interval(&mut self.stimulus_rng, self.profile.stimulus_interval),
                );
                actions.push(SchedulerAction::StimulusExpired {
                    stimulus_id: self.stimulus_seq,
                });
            }
        }

        match self.schedule.next_stimulus_at {
            Some(due) if now >= due && !self.state.stimulus.visible => {
                let display = self.config.display;
                let bounds = Bounds::inset(display.width, display.height, self.config.stimulus_margin_px);
                let x = self.stimulus_rng.gen_range(bounds.min_x..=bounds.max_x);
                let y = self.stimulus_rng.gen_range(bounds.min_y..=bounds.max_y);
                self.stimulus_seq += 1;
                self.schedule.next_stimulus_at = None;
                // Expiry runs from the committed onset so the chain ignores tick phase
                self.schedule.stimulus_expires_at =
                    Some(due + secs_to_us(self.config.stimulus_timeout_ms / 1_000.0));
                self.state.stimulus = SimpleStimulus {
                    visible: true,
                    x,
                    y,
                    onset_us: Some(now),
                };
                let stimulus_id = self.stimulus_seq;
                self.record(recorder, now, EventKind::StimulusOnset { stimulus_id, x, y });
                actions.push(SchedulerAction::StimulusShown {
                    stimulus_id,
                    x,
                    y,
                    scheduled_at: due,
                    emitted_at: now,
                });
            }
            _ => {}
        }
    }

    fn next_due(&self, now: Micros) -> Option<(Micros, Due)> {
        let s = &self.schedule;
        let cd = s.cooldown.as_ref();
        [
            (cd.and_then(|c| c.expires_at), Due::CooldownExpire),
            (cd.and_then(|c| c.ready_at), Due::CooldownReady),
            (s.next_flash_at, Due::Flash),
            (s.next_audio_at, Due::Audio),
        ]
        .into_iter()
        .filter_map(|(at, due)| at.filter(|t| *t <= now).map(|t| (t, due)))
        .min()
    }

    /// Resolve audio, flash and cooldown streams in committed-time order so
    /// spacing decisions depend only on committed times
    fn update_timed_streams(
        &mut self,
        now: Micros,
        recorder: &mut EventRecorder,
        actions: &mut Vec<SchedulerAction>,
    ) {
        if let Some(hide_at) = self.schedule.flash_hide_at {
            if now >= hide_at {
                self.schedule.flash_hide_at = None;
                self.state.flash = None;
            }
        }

        for _ in 0..MAX_DUE_PER_TICK {
            let Some((at, due)) = self.next_due(now) else {
                break;
            };
            match due {
                Due::CooldownExpire => self.expire_cooldown(at),
                Due::CooldownReady => self.emit_cooldown_ready(at, now, recorder, actions),
                Due::Flash => self.emit_flash(at, now, recorder, actions),
                Due::Audio => self.emit_audio(at, now, recorder, actions),
            }
        }
    }

    fn audio_blocked(&self, at: Micros) -> bool {
        let s = &self.schedule;
        let within = |last: Option<Micros>, sep: f64| last.map_or(false, |l| at < l + secs_to_us(sep));
        within(s.last_audio_at, MIN_AUDIO_INTERVAL_SEC)
            || within(s.last_flash_at, MIN_AUDIO_FLASH_SEPARATION_SEC)
            || within(
                s.cooldown.as_ref().and_then(|c| c.last_ready),
                MIN_COOLDOWN_AUDIO_SEPARATION_SEC,
            )
    }

    fn emit_audio(
        &mut self,
        at: Micros,
        now: Micros,
        recorder: &mut EventRecorder,
        actions: &mut Vec<SchedulerAction>,
    ) {
        if self.audio_blocked(at) {
            self.schedule.next_audio_at = Some(at + secs_to_us(SPACING_DEFER_SEC));
            return;
        }
        let distractor = self.audio_rng.gen_bool(self.config.distractor_probability);
        self.cue_seq += 1;
        let cue_id = self.cue_seq;
        self.schedule.last_audio_at = Some(at);
        self.schedule.next_audio_at =
            Some(at + draw_interval(&mut self.audio_rng, self.profile.audio_interval));
        self.state.last_audio_cue = Some(AudioCueState {
            cue_id,
            distractor,
            emitted_us: now,
        });
        self.record(recorder, now, EventKind::AudioCue { cue_id, distractor });
        actions.push(SchedulerAction::AudioCue {
            cue_id,
            distractor,
            scheduled_at: at,
            emitted_at: now,
        });
    }

    fn emit_flash(
        &mut self,
        at: Micros,
        now: Micros,
        recorder: &mut EventRecorder,
        actions: &mut Vec<SchedulerAction>,
    ) {
        let blocked = self
            .schedule
            .last_audio_at
            .map_or(false, |l| at < l + secs_to_us(MIN_AUDIO_FLASH_SEPARATION_SEC));
        if blocked {
            self.schedule.next_flash_at = Some(at + secs_to_us(SPACING_DEFER_SEC));
            return;
        }
        let digit = self.flash_rng.gen_range(1..=9u8);
        let direction = FlashDirection::ALL[self.flash_rng.gen_range(0..FlashDirection::ALL.len())];
        self.flash_seq += 1;
        let flash_id = self.flash_seq;
        self.schedule.last_flash_at = Some(at);
        self.schedule.next_flash_at =
            Some(at + draw_interval(&mut self.flash_rng, self.profile.flash_interval));
        self.schedule.flash_hide_at = Some(now + secs_to_us(self.config.flash_visible_ms / 1_000.0));
        self.state.flash = Some(FlashState {
            digit,
            direction,
            onset_us: now,
        });
        self.record(
            recorder,
            now,
            EventKind::PeripheralFlash {
                flash_id,
                digit,
                direction,
            },
        );
        actions.push(SchedulerAction::PeripheralFlash {
            flash_id,
            digit,
            direction,
            scheduled_at: at,
            emitted_at: now,
        });
    }

    fn emit_cooldown_ready(
        &mut self,
        at: Micros,
        now: Micros,
        recorder: &mut EventRecorder,
        actions: &mut Vec<SchedulerAction>,
    ) {
        let timeout = secs_to_us(self.config.cooldown_ready_timeout_sec);
        let Some(cd) = self.schedule.cooldown.as_mut() else {
            return;
        };
        cd.ready_at = None;
        cd.expires_at = Some(at + timeout);
        cd.last_ready = Some(at);
        cd.cycle += 1;
        let cycle = cd.cycle;
        self.record(recorder, now, EventKind::CooldownReady { cycle });
        actions.push(SchedulerAction::CooldownReady {
            cycle,
            scheduled_at: at,
        });
    }

    fn expire_cooldown(&mut self, at: Micros) {
        let cycle = secs_to_us(self.profile.cooldown_cycle_sec);
        if let Some(cd) = self.schedule.cooldown.as_mut() {
            cd.expires_at = None;
            cd.fill_started = at;
            cd.ready_at = Some(at + cycle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use uuid::Uuid;

    #[derive(Default)]
    struct Counts {
        recorded: usize,
        layer_complete: Vec<LayerTransition>,
        test_complete: usize,
        aborts: usize,
    }

    struct CountingListener(Rc<RefCell<Counts>>);

    impl SchedulerListener for CountingListener {
        fn on_event_recorded(&mut self, _event: &RawEvent) {
            self.0.borrow_mut().recorded += 1;
        }
        fn on_layer_complete(&mut self, transition: &LayerTransition) {
            self.0.borrow_mut().layer_complete.push(transition.clone());
        }
        fn on_test_complete(&mut self) {
            self.0.borrow_mut().test_complete += 1;
        }
        fn on_abort(&mut self) {
            self.0.borrow_mut().aborts += 1;
        }
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            countdown_sec: 0.0,
            layer_duration_sec: 20.0,
            ..SchedulerConfig::default()
        }
    }

    fn scheduler(counts: &Rc<RefCell<Counts>>) -> StimulusScheduler {
        StimulusScheduler::new(
            config(),
            Difficulty::Standard,
            11,
            Box::new(CountingListener(counts.clone())),
        ).unwrap()
    }

    fn recorder() -> EventRecorder {
        EventRecorder::new(Uuid::nil(), 10_000)
    }

    /// Tick at `hz` from `from` (exclusive) to `to` (inclusive)
    fn run(
        s: &mut StimulusScheduler,
        rec: &mut EventRecorder,
        hz: u64,
        from: Micros,
        to: Micros,
    ) -> Vec<(Micros, SchedulerAction)> {
        let mut out = Vec::new();
        let mut i = from * hz / 1_000_000 + 1;
        loop {
            let now = i * 1_000_000 / hz;
            if now > to {
                break;
            }
            for action in s.tick(now, rec) {
                out.push((now, action));
            }
            i += 1;
        }
        out
    }

    #[test]
    fn test_countdown_then_running() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = StimulusScheduler::new(
            SchedulerConfig::default(),
            Difficulty::Standard,
            1,
            Box::new(CountingListener(counts.clone())),
        ).unwrap();
        let mut rec = recorder();
        s.start(0).unwrap();
        assert_eq!(s.phase(), Phase::Countdown);
        assert!(s.tick(1_000_000, &mut rec).is_empty());
        let actions = s.tick(3_000_000, &mut rec);
        assert_eq!(
            actions,
            vec![SchedulerAction::LayerStarted {
                layer: 0,
                at: 3_000_000
            }]
        );
        assert_eq!(s.phase(), Phase::Running);
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        s.start(0).unwrap();
        assert!(matches!(s.start(1), Err(ComputeError::InvalidTransition(_))));
    }

    #[test]
    fn test_start_at_invalid_layer_is_rejected() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        assert!(matches!(
            s.start_at_layer(0, 4),
            Err(ComputeError::InvalidTransition(_))
        ));
        assert_eq!(s.phase(), Phase::Idle);
        s.start_at_layer(0, 3).unwrap();
    }

    #[test]
    fn test_invalid_distractor_probability_rejected_at_construction() {
        let result = StimulusScheduler::new(
            SchedulerConfig {
                distractor_probability: 1.5,
                ..config()
            },
            Difficulty::Standard,
            11,
            Box::new(NoopListener),
        );
        assert!(matches!(result, Err(ComputeError::Configuration(_))));
    }

    #[test]
    fn test_layer_zero_stimulus_click_and_expiry() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        let mut rec = recorder();
        s.start(0).unwrap();
        let actions = run(&mut s, &mut rec, 60, 0, 19_000_000);

        let shown: Vec<_> = actions
            .iter()
            .filter(|(_, a)| matches!(a, SchedulerAction::StimulusShown { .. }))
            .collect();
        let expired = actions
            .iter()
            .filter(|(_, a)| matches!(a, SchedulerAction::StimulusExpired { .. }))
            .count();
        // Unanswered stimuli all expire; intervals are 2-4 s plus 1.5 s visible
        assert!(shown.len() >= 3);
        assert!(expired + 1 >= shown.len());

        let onsets = rec
            .events()
            .iter()
            .filter(|e| matches!(e.kind, EventKind::StimulusOnset { .. }))
            .count();
        assert_eq!(onsets, shown.len());
    }

    #[test]
    fn test_click_resolves_visible_stimulus() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        let mut rec = recorder();
        s.start(0).unwrap();
        s.tick(0, &mut rec);
        let mut now = 0;
        while !s.state().stimulus.visible {
            now += 16_667;
            s.tick(now, &mut rec);
        }
        assert!(s.handle_click(now + 250_000, 10.0, 10.0, &mut rec));
        assert!(!s.state().stimulus.visible);
        assert_eq!(rec.events().last().map(|e| e.kind.name()), Some("click"));
    }

    #[test]
    fn test_layers_progress_and_complete() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        let mut rec = recorder();
        s.start(0).unwrap();
        let mut now = 0;
        for layer in 0..=FINAL_LAYER {
            assert_eq!(s.layer(), layer);
            let actions = run(&mut s, &mut rec, 60, now, now + 21_000_000);
            now += 21_000_000;
            if layer < FINAL_LAYER {
                assert_eq!(s.phase(), Phase::InterLayer);
                assert!(actions
                    .iter()
                    .any(|(_, a)| matches!(a, SchedulerAction::LayerComplete(_))));
                s.advance_to_next_layer(now).unwrap();
            }
        }
        assert_eq!(s.phase(), Phase::Complete);

        let counts = counts.borrow();
        assert_eq!(counts.layer_complete.len(), 3);
        assert_eq!(counts.layer_complete[0].completed_layer, 0);
        assert_eq!(counts.layer_complete[2].next_layer, 3);
        assert_eq!(counts.layer_complete[1].cooldown_seconds, 10);
        assert_eq!(counts.test_complete, 1);
        assert_eq!(counts.aborts, 0);
        assert_eq!(counts.recorded, rec.len());
    }

    #[test]
    fn test_layer_spans_close_on_completion_and_abort() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        let mut rec = recorder();
        s.start(0).unwrap();
        run(&mut s, &mut rec, 60, 0, 21_000_000);
        s.advance_to_next_layer(22_000_000).unwrap();
        run(&mut s, &mut rec, 60, 22_000_000, 25_000_000);
        s.pause(25_000_000);
        s.stop(40_000_000);

        let spans = s.layer_spans();
        assert_eq!(spans.len(), 2);
        assert_eq!((spans[0].layer, spans[0].started_us), (0, 0));
        assert!(spans[0].ended_us >= 20_000_000 && spans[0].ended_us < 20_020_000);
        assert_eq!(
            spans[1],
            LayerSpan {
                layer: 1,
                started_us: 22_000_000,
                ended_us: 25_000_000,
            }
        );
    }

    #[test]
    fn test_advance_outside_inter_layer_is_invalid() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        assert!(matches!(
            s.advance_to_next_layer(0),
            Err(ComputeError::InvalidTransition(_))
        ));
        s.start(0).unwrap();
        s.tick(0, &mut recorder());
        assert!(s.advance_to_next_layer(10).is_err());
    }

    #[test]
    fn test_abort_fires_once_only_when_in_progress() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        let mut rec = recorder();
        s.stop(0);
        assert_eq!(counts.borrow().aborts, 0);

        s.start(0).unwrap();
        s.tick(0, &mut rec);
        assert!(s.handle_key_press(100, ABORT_KEY, &mut rec));
        s.stop(200);
        assert_eq!(counts.borrow().aborts, 1);
        assert_eq!(s.phase(), Phase::Idle);
        assert!(s.was_aborted());
        // Escape is not recorded as a response
        assert!(rec.is_empty());
    }

    #[test]
    fn test_input_ignored_unless_running() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        let mut rec = recorder();
        assert!(!s.handle_click(0, 1.0, 1.0, &mut rec));
        s.start(0).unwrap();
        s.tick(0, &mut rec);
        s.pause(10);
        assert!(!s.handle_key_press(20, " ", &mut rec));
        s.resume(30);
        assert!(s.handle_key_press(40, " ", &mut rec));
        assert_eq!(rec.len(), 1);
    }

    #[test]
    fn test_cursor_carries_target_from_layer_one() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        let mut rec = recorder();
        s.start_at_layer(0, 1).unwrap();
        s.tick(0, &mut rec);
        s.tick(16_667, &mut rec);
        s.handle_cursor_position(20_000, 5.0, 6.0, &mut rec);
        match &rec.events()[0].kind {
            EventKind::CursorPos {
                target_x, target_y, ..
            } => {
                assert!(target_x.is_some());
                assert!(target_y.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_audio_cadence_independent_of_tick_rate() {
        let schedule = |hz: u64| {
            let counts = Rc::new(RefCell::new(Counts::default()));
            let mut s = scheduler(&counts);
            let mut rec = recorder();
            s.start_at_layer(0, 2).unwrap();
            s.tick(0, &mut rec);
            run(&mut s, &mut rec, hz, 0, 19_000_000)
                .into_iter()
                .filter_map(|(_, a)| match a {
                    SchedulerAction::AudioCue {
                        cue_id,
                        distractor,
                        scheduled_at,
                        emitted_at,
                    } => {
                        assert!(emitted_at - scheduled_at <= 1_000_000 / hz);
                        Some((cue_id, distractor, scheduled_at))
                    }
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        let slow = schedule(60);
        let fast = schedule(240);
        assert!(slow.len() >= 3);
        assert_eq!(slow, fast);
    }

    #[test]
    fn test_stimulus_and_flash_schedule_independent_of_tick_rate() {
        let stimuli = |hz: u64| {
            let counts = Rc::new(RefCell::new(Counts::default()));
            let mut s = scheduler(&counts);
            let mut rec = recorder();
            s.start_at_layer(0, 0).unwrap();
            s.tick(0, &mut rec);
            run(&mut s, &mut rec, hz, 0, 19_000_000)
                .into_iter()
                .filter_map(|(_, a)| match a {
                    SchedulerAction::StimulusShown {
                        stimulus_id,
                        x,
                        y,
                        scheduled_at,
                        emitted_at,
                    } => {
                        assert!(emitted_at - scheduled_at <= 1_000_000 / hz);
                        Some((stimulus_id, x, y, scheduled_at))
                    }
                    _ => None,
                })
                .collect::<Vec<_>>()
        };
        let slow = stimuli(60);
        assert!(slow.len() >= 3);
        assert_eq!(slow, stimuli(240));

        let full_load = |hz: u64| {
            let counts = Rc::new(RefCell::new(Counts::default()));
            let mut s = scheduler(&counts);
            let mut rec = recorder();
            s.start_at_layer(0, 3).unwrap();
            s.tick(0, &mut rec);
            let mut flashes = Vec::new();
            let mut ready = Vec::new();
            for (_, action) in run(&mut s, &mut rec, hz, 0, 19_000_000) {
                match action {
                    SchedulerAction::PeripheralFlash {
                        flash_id,
                        digit,
                        direction,
                        scheduled_at,
                        ..
                    } => flashes.push((flash_id, digit, direction, scheduled_at)),
                    SchedulerAction::CooldownReady {
                        cycle,
                        scheduled_at,
                    } => ready.push((cycle, scheduled_at)),
                    _ => {}
                }
            }
            (flashes, ready)
        };
        let (slow_flashes, slow_ready) = full_load(60);
        let (fast_flashes, fast_ready) = full_load(240);
        assert!(!slow_flashes.is_empty());
        assert!(!slow_ready.is_empty());
        assert_eq!(slow_flashes, fast_flashes);
        assert_eq!(slow_ready, fast_ready);
    }

    #[test]
    fn test_full_load_spacing_constraints() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = StimulusScheduler::new(
            SchedulerConfig {
                countdown_sec: 0.0,
                layer_duration_sec: 120.0,
                ..SchedulerConfig::default()
            },
            Difficulty::Hard,
            5,
            Box::new(CountingListener(counts.clone())),
        ).unwrap();
        let mut rec = recorder();
        s.start_at_layer(0, 3).unwrap();
        s.tick(0, &mut rec);
        let actions = run(&mut s, &mut rec, 120, 0, 119_000_000);

        let mut audio = Vec::new();
        let mut flashes = Vec::new();
        let mut ready = Vec::new();
        for (_, action) in &actions {
            match action {
                SchedulerAction::AudioCue { scheduled_at, .. } => audio.push(*scheduled_at),
                SchedulerAction::PeripheralFlash { scheduled_at, .. } => flashes.push(*scheduled_at),
                SchedulerAction::CooldownReady { scheduled_at, .. } => ready.push(*scheduled_at),
                _ => {}
            }
        }
        assert!(!audio.is_empty() && !flashes.is_empty() && !ready.is_empty());

        for pair in audio.windows(2) {
            assert!(pair[1] - pair[0] >= 1_500_000);
        }
        for &a in &audio {
            for &f in &flashes {
                assert!(a.abs_diff(f) >= 1_000_000, "audio {a} flash {f}");
            }
            for &r in &ready {
                assert!(a < r || a - r >= 750_000, "audio {a} ready {r}");
            }
        }
    }

    #[test]
    fn test_pause_resume_has_no_backlog() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        let mut rec = recorder();
        s.start_at_layer(0, 2).unwrap();
        s.tick(0, &mut rec);
        run(&mut s, &mut rec, 60, 0, 1_000_000);
        let pending = s.next_audio_at().unwrap();

        s.pause(1_000_000);
        // Ticks while paused do nothing
        assert!(s.tick(30_000_000, &mut rec).is_empty());
        s.resume(31_000_000);

        assert_eq!(s.next_audio_at(), Some(pending + 30_000_000));
        assert_eq!(s.layer_start(), 30_000_000);
        let actions = s.tick(31_016_667, &mut rec);
        assert!(actions
            .iter()
            .all(|a| !matches!(a, SchedulerAction::AudioCue { .. })));
        assert_eq!(s.phase(), Phase::Running);
        assert_eq!(s.stall_count(), 0);
    }

    #[test]
    fn test_stall_is_counted_without_moving_schedule() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        let mut rec = recorder();
        s.start_at_layer(0, 2).unwrap();
        s.tick(0, &mut rec);
        let pending = s.next_audio_at().unwrap();
        s.tick(16_667, &mut rec);
        s.tick(216_667, &mut rec);
        assert_eq!(s.stall_count(), 1);
        assert_eq!(s.next_audio_at(), Some(pending));
    }

    #[test]
    fn test_cooldown_key_restarts_cycle() {
        let counts = Rc::new(RefCell::new(Counts::default()));
        let mut s = scheduler(&counts);
        let mut rec = recorder();
        s.start_at_layer(0, 3).unwrap();
        s.tick(0, &mut rec);
        // Standard cooldown fills in 8 s
        run(&mut s, &mut rec, 60, 0, 8_100_000);
        assert_eq!(s.state().cooldown.map(|c| c.ready), Some(true));

        s.handle_key_press(8_200_000, COOLDOWN_KEY, &mut rec);
        let view = s.state().cooldown.unwrap_or_default();
        assert!(!view.ready);
        assert_eq!(view.progress, 0.0);
    }
}
