//! Countdown pacing utility.
//!
//! A [`Delay`] captures a deadline at construction. Work happens, then
//! `wait()` sleeps only for whatever part of the interval is left. Used to
//! pace API request loops without sleeping for the full interval when the
//! work itself was slow.

use std::time::{Duration, Instant};

/// A deadline captured at construction time.
#[derive(Debug, Clone, Copy)]
pub struct Delay {
    end: Instant,
}

impl Delay {
    /// Start a countdown of `duration` from now.
    pub fn new(duration: Duration) -> Self {
        Self {
            end: Instant::now() + duration,
        }
    }

    /// Time left until the deadline; zero once passed.
    pub fn remaining(&self) -> Duration {
        self.end.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Sleep until the deadline. Returns immediately if it already passed.
    pub fn wait(&self) {
        let remaining = self.remaining();
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
    }
}
