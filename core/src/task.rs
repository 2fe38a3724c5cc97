//! Resumable anchor loops.
//!
//! Each loop is a plain state machine advanced once per anchor tick. `step`
//! reports whether the loop wants another tick; cancelling a loop is just
//! dropping it.

use std::time::{Duration, Instant};

use crate::binding::CompositeBinding;
use crate::error::{AnchorError, ErrorCategory};
use crate::frame::Pose;

/// Outcome of advancing a loop by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Run again on a later tick.
    Continue,
    Succeeded,
    /// Stopped without success; the loop must be dropped.
    Aborted,
}

/// Retry loop that keeps resolving a stored binding until one of its frames
/// is recognized.
#[derive(Debug, Clone)]
pub struct RestoreTask {
    binding: Option<CompositeBinding>,
    interval: Duration,
    next_attempt: Instant,
    attempts: u32,
}

impl RestoreTask {
    /// First attempt is due immediately.
    pub fn new(binding: Option<CompositeBinding>, interval: Duration, now: Instant) -> Self {
        Self {
            binding,
            interval,
            next_attempt: now,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Advance the loop.
    ///
    /// `moved` aborts before any resolve attempt. `attempt` performs one
    /// restore; an `InvalidStoredBinding` error means there is nothing to
    /// restore and ends the loop, any other error schedules a retry.
    pub fn step<F>(&mut self, now: Instant, moved: bool, attempt: F) -> Step
    where
        F: FnOnce(Option<&CompositeBinding>) -> Result<(), AnchorError>,
    {
        if moved {
            return Step::Aborted;
        }
        if now < self.next_attempt {
            return Step::Continue;
        }

        self.attempts += 1;
        match attempt(self.binding.as_ref()) {
            Ok(()) => Step::Succeeded,
            Err(err) if err.category() == ErrorCategory::InvalidStoredBinding => Step::Aborted,
            Err(_) => {
                self.next_attempt = now + self.interval;
                Step::Continue
            }
        }
    }
}

/// Anchor-driven move from one pose to another over a fixed duration.
#[derive(Debug, Clone)]
pub struct MoveTask {
    from: Pose,
    to: Pose,
    started: Instant,
    duration: Duration,
}

impl MoveTask {
    pub fn new(from: Pose, to: Pose, duration: Duration, now: Instant) -> Self {
        Self {
            from,
            to,
            started: now,
            duration,
        }
    }

    pub fn target(&self) -> &Pose {
        &self.to
    }

    /// Pose at `now`; a zero duration jumps straight to the target.
    pub fn pose_at(&self, now: Instant) -> Pose {
        if self.duration.is_zero() {
            return self.to;
        }
        let t = now.saturating_duration_since(self.started).as_secs_f32()
            / self.duration.as_secs_f32();
        if t >= 1.0 {
            self.to
        } else {
            self.from.interpolate(&self.to, t)
        }
    }

    /// Advance the move, handing the pose for this tick to `apply`.
    pub fn step<F>(&mut self, now: Instant, moved: bool, apply: F) -> Step
    where
        F: FnOnce(Pose),
    {
        if moved {
            return Step::Aborted;
        }
        apply(self.pose_at(now));
        if now.saturating_duration_since(self.started) >= self.duration {
            Step::Succeeded
        } else {
            Step::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use pretty_assertions::assert_eq;

    #[test]
    fn restore_retries_on_interval_until_success() {
        let t0 = Instant::now();
        let interval = Duration::from_secs(1);
        let mut task = RestoreTask::new(None, interval, t0);

        let fail = |_: Option<&CompositeBinding>| {
            Err(AnchorError::NoRecognizedCandidate { candidates: 2 })
        };
        assert_eq!(task.step(t0, false, fail), Step::Continue);
        assert_eq!(task.attempts(), 1);

        // Not due yet: the attempt closure must not run.
        let step = task.step(t0 + Duration::from_millis(500), false, |_| {
            panic!("attempted before the retry interval elapsed")
        });
        assert_eq!(step, Step::Continue);
        assert_eq!(task.attempts(), 1);

        assert_eq!(task.step(t0 + interval, false, |_| Ok(())), Step::Succeeded);
        assert_eq!(task.attempts(), 2);
    }

    #[test]
    fn restore_aborts_on_movement_without_attempting() {
        let t0 = Instant::now();
        let mut task = RestoreTask::new(None, Duration::ZERO, t0);
        let step = task.step(t0, true, |_| panic!("resolve after movement"));
        assert_eq!(step, Step::Aborted);
        assert_eq!(task.attempts(), 0);
    }

    #[test]
    fn restore_ends_when_nothing_is_stored() {
        let t0 = Instant::now();
        let mut task = RestoreTask::new(None, Duration::ZERO, t0);
        let step = task.step(t0, false, |_| {
            Err(AnchorError::InvalidStoredBinding {
                id: "lamp".to_string(),
            })
        });
        assert_eq!(step, Step::Aborted);
    }

    #[test]
    fn zero_interval_retries_every_tick() {
        let t0 = Instant::now();
        let mut task = RestoreTask::new(None, Duration::ZERO, t0);
        for _ in 0..3 {
            let step = task.step(t0, false, |_| {
                Err(AnchorError::NoRecognizedCandidate { candidates: 1 })
            });
            assert_eq!(step, Step::Continue);
        }
        assert_eq!(task.attempts(), 3);
    }

    #[test]
    fn move_interpolates_and_finishes_on_target() {
        let t0 = Instant::now();
        let target = Pose::from_position(Vec3::new(4.0, 0.0, 0.0));
        let mut task = MoveTask::new(Pose::IDENTITY, target, Duration::from_secs(2), t0);

        let mut applied = Vec::new();
        assert_eq!(
            task.step(t0 + Duration::from_secs(1), false, |p| applied.push(p.position)),
            Step::Continue
        );
        assert_eq!(
            task.step(t0 + Duration::from_secs(3), false, |p| applied.push(p.position)),
            Step::Succeeded
        );
        assert_eq!(applied, vec![Vec3::new(2.0, 0.0, 0.0), Vec3::new(4.0, 0.0, 0.0)]);
        assert_eq!(task.target(), &target);
    }

    #[test]
    fn move_aborts_on_external_movement() {
        let t0 = Instant::now();
        let mut task = MoveTask::new(Pose::IDENTITY, Pose::IDENTITY, Duration::from_secs(1), t0);
        assert_eq!(task.step(t0, true, |_| panic!("applied after movement")), Step::Aborted);
    }
}
