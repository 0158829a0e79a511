//! Annealing schedules for exploration and importance sampling
//!
//! Epsilon-greedy exploration decays exponentially with the step count;
//! the replay importance-sampling exponent anneals linearly toward 1.

/// Exponential decay from `start` toward `end` with time constant `decay`.
///
/// ```text
/// value(t) = end + (start - end) * exp(-t / decay)
/// ```
#[derive(Debug, Clone, Copy)]
pub struct ExponentialDecay {
    start: f64,
    end: f64,
    decay: f64,
}

impl ExponentialDecay {
    /// Create a new schedule. `decay` is the step count at which the gap
    /// to `end` has shrunk to 1/e of its initial size.
    pub fn new(start: f64, end: f64, decay: f64) -> Self {
        debug_assert!(decay > 0.0, "decay must be positive");
        Self { start, end, decay }
    }

    /// Value of the schedule at step `t`.
    pub fn value(&self, t: u64) -> f64 {
        self.end + (self.start - self.end) * (-(t as f64) / self.decay).exp()
    }
}

/// Linear annealing from `start` to `end` over `frames` steps, then constant.
#[derive(Debug, Clone, Copy)]
pub struct LinearAnneal {
    start: f64,
    end: f64,
    frames: u64,
}

impl LinearAnneal {
    /// Create a new schedule reaching `end` after `frames` steps.
    pub fn new(start: f64, end: f64, frames: u64) -> Self {
        debug_assert!(frames > 0, "frames must be positive");
        Self { start, end, frames }
    }

    /// Value of the schedule at step `t`.
    pub fn value(&self, t: u64) -> f64 {
        let frac = (t as f64 / self.frames as f64).min(1.0);
        self.start + (self.end - self.start) * frac
    }
}
