use std::time::{Duration, Instant};

/// Admits at most one action per `window`.
///
/// Leading-edge: the first call in a quiet period passes and opens the
/// window; calls inside the window are rejected, not queued.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn try_acquire(&mut self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    /// Clock-injected variant of [`try_acquire`](Self::try_acquire).
    pub fn try_acquire_at(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
