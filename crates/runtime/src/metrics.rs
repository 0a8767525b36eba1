// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Control loop timing.
//!
//! [`LoopMetrics`] records how long each tick's read-update-write sequence
//! took and how many tick indices the loop skipped after falling behind.

use std::time::Duration;

/// Aggregate timing for one control session.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct LoopMetrics {
    /// Ticks that ran the agent.
    pub ticks: usize,
    /// Tick indices skipped because the loop fell behind.
    pub skipped: usize,
    /// Time spent inside ticks.
    pub busy_duration: Duration,
    /// Longest single tick.
    pub max_tick_duration: Duration,
    /// Wall-clock time from the first tick to the end of the loop.
    pub total_duration: Duration,
    #[serde(skip)]
    last_index: Option<usize>,
}

impl LoopMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one tick at loop `index` that took `elapsed`.
    pub fn record_tick(&mut self, index: usize, elapsed: Duration) {
        let expected = self.last_index.map_or(0, |last| last + 1);
        self.skipped += index.saturating_sub(expected);
        self.last_index = Some(index);
        self.ticks += 1;
        self.busy_duration += elapsed;
        self.max_tick_duration = self.max_tick_duration.max(elapsed);
    }

    pub fn finalise(&mut self, total: Duration) {
        self.total_duration = total;
    }

    /// Mean tick duration, zero before the first tick.
    pub fn mean_tick_duration(&self) -> Duration {
        match u32::try_from(self.ticks) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.busy_duration / n,
        }
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        format!(
            "Control loop: {} ticks ({} skipped) over {:.3}s, \
             mean tick {:.3}ms, max tick {:.3}ms",
            self.ticks,
            self.skipped,
            self.total_duration.as_secs_f64(),
            self.mean_tick_duration().as_secs_f64() * 1000.0,
            self.max_tick_duration.as_secs_f64() * 1000.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_metrics() {
        let m = LoopMetrics::new();
        assert_eq!(m.ticks, 0);
        assert_eq!(m.mean_tick_duration(), Duration::ZERO);
    }

    #[test]
    fn test_record_and_finalise() {
        let mut m = LoopMetrics::new();
        m.record_tick(0, Duration::from_millis(2));
        m.record_tick(1, Duration::from_millis(4));
        m.finalise(Duration::from_millis(100));

        assert_eq!(m.ticks, 2);
        assert_eq!(m.skipped, 0);
        assert_eq!(m.busy_duration, Duration::from_millis(6));
        assert_eq!(m.max_tick_duration, Duration::from_millis(4));
        assert_eq!(m.mean_tick_duration(), Duration::from_millis(3));
    }

    #[test]
    fn test_skipped_indices() {
        let mut m = LoopMetrics::new();
        m.record_tick(0, Duration::ZERO);
        m.record_tick(4, Duration::ZERO);
        m.record_tick(5, Duration::ZERO);
        assert_eq!(m.skipped, 3);
    }

    #[test]
    fn test_summary_format() {
        let mut m = LoopMetrics::new();
        m.record_tick(0, Duration::from_millis(1));
        m.finalise(Duration::from_millis(10));

        let s = m.summary();
        assert!(s.contains("Control loop:"));
        assert!(s.contains("1 ticks"));
        assert!(s.contains("0 skipped"));
    }
}
