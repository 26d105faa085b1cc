use log::{debug, info};
use std::time::{Duration, Instant};

/// Snapshot of the alarm counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmState {
    pub motion_count: u32,
    pub last_reset_time: Instant,
    pub triggered: bool,
}

/// Coarse phase of the alarm, derived from [`AlarmState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmPhase {
    /// No motion counted in the current window.
    Idle,
    /// Motion counted but the threshold has not been exceeded.
    Accumulating,
    /// The alarm fired in the current window; further motion is suppressed.
    Triggered,
}

/// Debounces per-frame motion into alarm triggers.
///
/// Motion detections are counted inside a rolling window. Once the count
/// strictly exceeds `motion_threshold` the alarm fires, and it stays quiet
/// until the window is reset.
#[derive(Debug)]
pub struct AlarmStateMachine {
    state: AlarmState,
    motion_threshold: u32,
    reset_interval: Duration,
}

impl AlarmStateMachine {
    pub fn new(motion_threshold: u32, reset_interval: Duration) -> Self {
        Self::starting_at(motion_threshold, reset_interval, Instant::now())
    }

    /// Create a machine whose first window starts at `start`.
    pub fn starting_at(motion_threshold: u32, reset_interval: Duration, start: Instant) -> Self {
        Self {
            state: AlarmState {
                motion_count: 0,
                last_reset_time: start,
                triggered: false,
            },
            motion_threshold,
            reset_interval,
        }
    }

    /// Feed one frame's motion result. Returns `true` only when the alarm fires.
    ///
    /// The window reset is checked before counting, so a burst right after
    /// a reset starts from zero.
    pub fn update(&mut self, motion_detected: bool, now: Instant) -> bool {
        if now.saturating_duration_since(self.state.last_reset_time) > self.reset_interval {
            if self.state.motion_count > 0 || self.state.triggered {
                debug!(
                    "Alarm window reset after {} motion event(s)",
                    self.state.motion_count
                );
            }
            self.state.motion_count = 0;
            self.state.triggered = false;
            self.state.last_reset_time = now;
        }

        if motion_detected {
            self.state.motion_count += 1;
        }

        if self.state.motion_count > self.motion_threshold && !self.state.triggered {
            self.state.triggered = true;
            info!(
                "Alarm fired: {} motion event(s) within {:?}",
                self.state.motion_count, self.reset_interval
            );
            return true;
        }

        false
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn phase(&self) -> AlarmPhase {
        if self.state.triggered {
            AlarmPhase::Triggered
        } else if self.state.motion_count > 0 {
            AlarmPhase::Accumulating
        } else {
            AlarmPhase::Idle
        }
    }

    pub fn motion_threshold(&self) -> u32 {
        self.motion_threshold
    }

    pub fn reset_interval(&self) -> Duration {
        self.reset_interval
    }
}
