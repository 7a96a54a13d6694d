use std::time::{Duration, Instant};

use starsync_cache::SessionStats;
use tracing::info;

/// Periodic throughput line while a dump is being read.
pub struct Progress {
    label: String,
    interval: u64,
    read: u64,
    started: Instant,
}

impl Progress {
    pub fn new(label: impl Into<String>, interval: u64) -> Self {
        Self {
            label: label.into(),
            interval: interval.max(1),
            read: 0,
            started: Instant::now(),
        }
    }

    pub fn read(&self) -> u64 {
        self.read
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Count one record; logs every `interval` records.
    pub fn tick(&mut self, stats: &SessionStats) {
        self.read += 1;
        if self.read % self.interval == 0 {
            info!(
                "{}: {} records read ({:.0}/s), {} changed so far",
                self.label,
                self.read,
                self.rate(),
                stats.changed()
            );
        }
    }

    pub fn rate(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.read as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_every_tick() {
        let mut progress = Progress::new("systems", 0);
        let stats = SessionStats::default();
        for _ in 0..5 {
            progress.tick(&stats);
        }
        assert_eq!(progress.read(), 5);
        assert!(progress.rate() >= 0.0);
    }
}
