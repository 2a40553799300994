use std::time::Duration;

use tokio::time::Instant;

/// Accumulates time spent connected; paused spans are excluded.
#[derive(Debug, Clone, Default)]
pub struct DurationClock {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl DurationClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    pub fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map(|s| s.elapsed()).unwrap_or_default()
    }

    pub fn whole_seconds(&self) -> u64 {
        self.elapsed().as_secs()
    }

    /// Stops the clock and returns the total, leaving it zeroed.
    pub fn take(&mut self) -> Duration {
        self.pause();
        std::mem::take(&mut self.accumulated)
    }
}
