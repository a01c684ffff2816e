//! Target motion model
//!
//! The tracked target moves at constant speed along a heading. Occasionally it
//! picks a new goal heading and turns toward it at a bounded angular rate, so
//! its path stays smooth. Boundary contact reflects the velocity and cancels
//! any steering in progress: a reflection already changes direction, and
//! steering on top of it would add a velocity discontinuity that shows up as a
//! jerk artifact in the tracking metrics.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::{PI, TAU};

use crate::types::TargetSnapshot;

/// Heading error below which steering snaps to the goal
pub const SNAP_TOLERANCE_RAD: f64 = 0.02;

/// Smallest and largest turn away from the current heading for a new goal
const GOAL_OFFSET_RANGE: (f64, f64) = (PI / 6.0, 2.0 * PI / 3.0);

/// Rectangle the target centre must stay inside
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    /// Screen rectangle shrunk by `margin` on every side
    pub fn inset(width: f64, height: f64, margin: f64) -> Self {
        Self {
            min_x: margin,
            min_y: margin,
            max_x: (width - margin).max(margin),
            max_y: (height - margin).max(margin),
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Probability of starting a direction change during a tick of `dt_sec`.
///
/// `1 - (1 - rate)^dt` composes across ticks, so the expected number of
/// changes per second does not depend on how often `update` runs.
pub fn change_probability(rate_per_sec: f64, dt_sec: f64) -> f64 {
    let rate = rate_per_sec.clamp(0.0, 0.999_999);
    if dt_sec <= 0.0 {
        return 0.0;
    }
    1.0 - (1.0 - rate).powf(dt_sec)
}

/// Signed shortest angular distance from `from` to `to`, in (-PI, PI]
fn angle_delta(from: f64, to: f64) -> f64 {
    let mut d = (to - from).rem_euclid(TAU);
    if d > PI {
        d -= TAU;
    }
    d
}

/// Smooth steering and bouncing motion for the tracked target
#[derive(Debug, Clone)]
pub struct TargetKinematics {
    x: f64,
    y: f64,
    vx: f64,
    vy: f64,
    heading: f64,
    goal_heading: Option<f64>,
    speed: f64,
    turn_rate: f64,
    direction_change_rate: f64,
    bounds: Bounds,
    rng: StdRng,
}

impl TargetKinematics {
    /// Start at the centre of `bounds` with a random heading
    pub fn new(
        bounds: Bounds,
        speed: f64,
        turn_rate: f64,
        direction_change_rate: f64,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let heading = rng.gen_range(0.0..TAU);
        let (x, y) = bounds.center();
        Self {
            x,
            y,
            vx: heading.cos() * speed,
            vy: heading.sin() * speed,
            heading,
            goal_heading: None,
            speed,
            turn_rate,
            direction_change_rate,
            bounds,
            rng,
        }
    }

    /// Advance the model by `dt_sec` seconds
    pub fn update(&mut self, dt_sec: f64) {
        if dt_sec <= 0.0 {
            return;
        }

        if self.goal_heading.is_none()
            && self.rng.gen::<f64>() < change_probability(self.direction_change_rate, dt_sec)
        {
            let offset = self.rng.gen_range(GOAL_OFFSET_RANGE.0..=GOAL_OFFSET_RANGE.1);
            let sign = if self.rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            self.goal_heading = Some((self.heading + sign * offset).rem_euclid(TAU));
        }

        if let Some(goal) = self.goal_heading {
            let delta = angle_delta(self.heading, goal);
            let max_step = self.turn_rate * dt_sec;
            if delta.abs() <= SNAP_TOLERANCE_RAD || delta.abs() <= max_step {
                self.heading = goal;
                self.goal_heading = None;
            } else {
                self.heading = (self.heading + max_step * delta.signum()).rem_euclid(TAU);
            }
        }

        self.vx = self.heading.cos() * self.speed;
        self.vy = self.heading.sin() * self.speed;
        self.x += self.vx * dt_sec;
        self.y += self.vy * dt_sec;

        self.reflect();
    }

    fn reflect(&mut self) {
        let b = self.bounds;
        let mut reflected = false;
        if self.x < b.min_x {
            self.x = b.min_x;
            self.vx = self.vx.abs();
            reflected = true;
        } else if self.x > b.max_x {
            self.x = b.max_x;
            self.vx = -self.vx.abs();
            reflected = true;
        }
        if self.y < b.min_y {
            self.y = b.min_y;
            self.vy = self.vy.abs();
            reflected = true;
        } else if self.y > b.max_y {
            self.y = b.max_y;
            self.vy = -self.vy.abs();
            reflected = true;
        }
        if reflected {
            self.heading = self.vy.atan2(self.vx).rem_euclid(TAU);
            self.goal_heading = None;
        }
    }

    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn is_steering(&self) -> bool {
        self.goal_heading.is_some()
    }

    /// Steer toward `goal` (radians) starting with the next update
    pub fn steer_toward(&mut self, goal: f64) {
        self.goal_heading = Some(goal.rem_euclid(TAU));
    }

    /// Place the target and point it along `heading`, cancelling steering
    pub fn place(&mut self, x: f64, y: f64, heading: f64) {
        self.x = x;
        self.y = y;
        self.heading = heading.rem_euclid(TAU);
        self.goal_heading = None;
        self.vx = self.heading.cos() * self.speed;
        self.vy = self.heading.sin() * self.speed;
    }

    pub fn snapshot(&self) -> TargetSnapshot {
        TargetSnapshot {
            x: self.x,
            y: self.y,
            vx: self.vx,
            vy: self.vy,
            heading: self.heading,
            goal_heading: self.goal_heading,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> Bounds {
        Bounds::inset(800.0, 600.0, 50.0)
    }

    #[test]
    fn test_change_probability_composes_across_tick_rates() {
        let rate = 0.5;
        let coarse = change_probability(rate, 1.0 / 60.0);
        let fine = change_probability(rate, 1.0 / 240.0);
        // Four fine ticks without a change equal one coarse tick without a change
        let composed = 1.0 - (1.0 - fine).powi(4);
        assert!((coarse - composed).abs() < 1e-12);
        assert_eq!(change_probability(rate, 0.0), 0.0);
        assert!((change_probability(rate, 1.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_steering_turns_at_bounded_rate_then_snaps() {
        let mut target = TargetKinematics::new(bounds(), 100.0, 2.0, 0.0, 1);
        target.place(400.0, 300.0, 0.0);
        target.steer_toward(PI / 2.0);

        target.update(0.1);
        assert!((target.heading() - 0.2).abs() < 1e-9);
        assert!(target.is_steering());

        for _ in 0..20 {
            target.update(0.1);
        }
        assert!((target.heading() - PI / 2.0).abs() < 1e-9);
        assert!(!target.is_steering());
    }

    #[test]
    fn test_steering_takes_shortest_direction() {
        let mut target = TargetKinematics::new(bounds(), 100.0, 1.0, 0.0, 1);
        target.place(400.0, 300.0, 0.1);
        target.steer_toward(TAU - 0.5);
        target.update(0.1);
        // Turning clockwise through zero is shorter
        assert!((target.heading() - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_reflection_flips_velocity_and_cancels_steering() {
        let mut target = TargetKinematics::new(bounds(), 100.0, 1.0, 0.0, 3);
        target.place(749.0, 300.0, 0.0);
        target.steer_toward(1.0);
        target.update(0.05);

        let snap = target.snapshot();
        assert_eq!(snap.x, 750.0);
        assert!(snap.vx < 0.0);
        assert!(snap.goal_heading.is_none());
        assert!((snap.heading - snap.vy.atan2(snap.vx).rem_euclid(TAU)).abs() < 1e-12);
    }

    #[test]
    fn test_target_stays_in_bounds() {
        let b = bounds();
        let mut target = TargetKinematics::new(b, 400.0, 3.0, 0.9, 42);
        for _ in 0..10_000 {
            target.update(1.0 / 60.0);
            let (x, y) = target.position();
            assert!(b.contains(x, y));
        }
    }

    #[test]
    fn test_same_seed_same_path() {
        let mut a = TargetKinematics::new(bounds(), 180.0, 2.5, 0.5, 7);
        let mut b = TargetKinematics::new(bounds(), 180.0, 2.5, 0.5, 7);
        for _ in 0..600 {
            a.update(1.0 / 60.0);
            b.update(1.0 / 60.0);
        }
        assert_eq!(a.snapshot(), b.snapshot());
    }
}
