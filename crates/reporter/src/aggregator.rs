// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-bucket temporal aggregation of pushed signals.
//!
//! The [`SampleAggregator`] pushes signals onto a [`PlatformIO`] batch and,
//! on every [`update`](SampleAggregator::update), splits the interval since
//! the previous update into three buckets:
//!
//! - the whole application;
//! - the epoch, once `EPOCH_COUNT` has become positive;
//! - the region that was active when the interval began, as reported by
//!   `REGION_HASH`. Intervals outside any marked region go to
//!   [`UNMARKED_HASH`].
//!
//! `TIME` must be readable on every update. Any other signal that fails
//! to read is dropped for the rest of the run and summarises as NaN.

use crate::accumulator::{Interval, SampleAccumulator, Statistic};
use crate::ReporterError;
use platform_io::{PlatformIO, PlatformIOError};
use platform_topo::Domain;
use std::collections::BTreeMap;

/// Hash of the implicit region covering unmarked application code.
pub const UNMARKED_HASH: u64 = 0x725e_8066;

/// Signal carrying the hash of the active region.
pub const REGION_HASH_SIGNAL: &str = "REGION_HASH";

/// Signal counting completed epochs.
pub const EPOCH_COUNT_SIGNAL: &str = "EPOCH_COUNT";

/// Maps a sampled region hash to its bucket key.
pub fn region_key(sample: f64) -> u64 {
    if sample.is_nan() || sample < 0.0 {
        UNMARKED_HASH
    } else {
        sample as u64
    }
}

#[derive(Debug, Clone)]
struct Tracked {
    name: String,
    handle: usize,
    statistic: Statistic,
    application: SampleAccumulator,
    epoch: SampleAccumulator,
    regions: BTreeMap<u64, SampleAccumulator>,
    previous: Option<f64>,
    /// Set once a read of this signal has failed.
    missing: bool,
}

impl Tracked {
    fn region_mut(&mut self, key: u64) -> &mut SampleAccumulator {
        let statistic = self.statistic;
        self.regions
            .entry(key)
            .or_insert_with(|| SampleAccumulator::new(statistic))
    }
}

/// Sample of an optional signal; a failed read becomes `None`.
fn optional_sample(pio: &PlatformIO, handle: usize) -> Result<Option<f64>, ReporterError> {
    match pio.sample(handle) {
        Ok(value) => Ok(Some(value)),
        Err(PlatformIOError::SampleFailed { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Accumulates pushed signals per application, epoch and region.
#[derive(Debug, Clone, Default)]
pub struct SampleAggregator {
    tracked: Vec<Tracked>,
    /// Aggregator index of `TIME`, pushed on first use.
    time: Option<usize>,
    region_handle: Option<usize>,
    epoch_handle: Option<usize>,
    previous_time: Option<f64>,
    previous_region: u64,
    previous_epoch: f64,
    region_counts: BTreeMap<u64, usize>,
    num_update: usize,
}

impl SampleAggregator {
    pub fn new() -> Self {
        Self {
            previous_region: UNMARKED_HASH,
            ..Self::default()
        }
    }

    /// Pushes a signal and returns its aggregator index.
    ///
    /// The temporal statistic follows from the signal's behavior; constant
    /// and label signals are rejected. `TIME` is pushed implicitly the first
    /// time any signal is pushed.
    pub fn push_signal(
        &mut self,
        pio: &mut PlatformIO,
        name: &str,
        domain: Domain,
        index: usize,
    ) -> Result<usize, ReporterError> {
        let info = pio.signal_info(name)?;
        let statistic = Statistic::for_signal(info.behavior, info.aggregation).ok_or_else(|| {
            ReporterError::UnsupportedBehavior {
                name: name.to_string(),
                behavior: info.behavior,
            }
        })?;
        self.push_with(pio, name, domain, index, statistic)
    }

    /// Pushes a signal with an explicit temporal statistic.
    pub fn push_with(
        &mut self,
        pio: &mut PlatformIO,
        name: &str,
        domain: Domain,
        index: usize,
        statistic: Statistic,
    ) -> Result<usize, ReporterError> {
        if self.time.is_none() && name != "TIME" {
            self.push_signal(pio, "TIME", Domain::Board, 0)?;
        }
        let handle = pio.push_signal(name, domain, index)?;
        if let Some(existing) = self
            .tracked
            .iter()
            .position(|t| t.handle == handle && t.statistic == statistic)
        {
            return Ok(existing);
        }
        let idx = self.tracked.len();
        self.tracked.push(Tracked {
            name: name.to_string(),
            handle,
            statistic,
            application: SampleAccumulator::new(statistic),
            epoch: SampleAccumulator::new(statistic),
            regions: BTreeMap::new(),
            previous: None,
            missing: false,
        });
        if name == "TIME" && domain == Domain::Board && self.time.is_none() {
            self.time = Some(idx);
        }
        Ok(idx)
    }

    /// Enables region bucketing if `REGION_HASH` is available.
    pub fn track_regions(&mut self, pio: &mut PlatformIO) -> Result<bool, ReporterError> {
        if !pio.signal_names().contains(REGION_HASH_SIGNAL) {
            return Ok(false);
        }
        self.region_handle = Some(pio.push_signal(REGION_HASH_SIGNAL, Domain::Board, 0)?);
        Ok(true)
    }

    /// Enables the epoch bucket if `EPOCH_COUNT` is available.
    pub fn track_epochs(&mut self, pio: &mut PlatformIO) -> Result<bool, ReporterError> {
        if !pio.signal_names().contains(EPOCH_COUNT_SIGNAL) {
            return Ok(false);
        }
        self.epoch_handle = Some(pio.push_signal(EPOCH_COUNT_SIGNAL, Domain::Board, 0)?);
        Ok(true)
    }

    pub fn is_tracking_regions(&self) -> bool {
        self.region_handle.is_some()
    }

    pub fn is_tracking_epochs(&self) -> bool {
        self.epoch_handle.is_some()
    }

    /// Folds the most recent batch. Must follow a `read_batch()`.
    pub fn update(&mut self, pio: &PlatformIO) -> Result<(), ReporterError> {
        let time_idx = self.time.ok_or(ReporterError::NotInitialized)?;
        let now = pio.sample(self.tracked[time_idx].handle)?;
        let region = match self.region_handle {
            Some(h) => region_key(optional_sample(pio, h)?.unwrap_or(f64::NAN)),
            None => UNMARKED_HASH,
        };
        let epoch_count = match self.epoch_handle {
            Some(h) => optional_sample(pio, h)?.unwrap_or(self.previous_epoch),
            None => 0.0,
        };

        let dt = self.previous_time.map(|t| now - t);
        let bucket = self.previous_region;
        let in_epoch = self.previous_epoch > 0.0;

        for tracked in &mut self.tracked {
            if tracked.missing {
                continue;
            }
            let Some(value) = optional_sample(pio, tracked.handle)? else {
                tracing::warn!(signal = %tracked.name, "report signal could not be read, reporting it as missing");
                tracked.missing = true;
                continue;
            };
            let was_mismatched = tracked.application.is_mismatched();
            let was_clamped = tracked.application.is_clamped();
            let interval = match (dt, tracked.previous) {
                (Some(dt), Some(previous)) => Interval {
                    dt,
                    value,
                    increment: value - previous,
                },
                _ => Interval::first(value),
            };
            tracked.application.update(interval);
            if dt.is_some() {
                tracked.region_mut(bucket).update(interval);
                if in_epoch {
                    tracked.epoch.update(interval);
                }
            }
            tracked.previous = Some(value);

            if !was_mismatched && tracked.application.is_mismatched() {
                tracing::warn!(signal = %tracked.name, value, "expect-same signal changed value");
            }
            if !was_clamped && tracked.application.is_clamped() {
                tracing::warn!(signal = %tracked.name, value, "monotone signal decreased, delta clamped");
            }
        }

        if region != UNMARKED_HASH && (self.num_update == 0 || region != self.previous_region) {
            *self.region_counts.entry(region).or_insert(0) += 1;
        }
        self.previous_time = Some(now);
        self.previous_region = region;
        self.previous_epoch = epoch_count;
        self.num_update += 1;
        Ok(())
    }

    /// Number of updates folded so far.
    pub fn num_update(&self) -> usize {
        self.num_update
    }

    fn tracked(&self, idx: usize) -> Result<&Tracked, ReporterError> {
        self.tracked.get(idx).ok_or(ReporterError::InvalidIndex(idx))
    }

    /// Aggregator index of `TIME`, if any signal has been pushed.
    pub fn time_index(&self) -> Option<usize> {
        self.time
    }

    pub fn sample_application(&self, idx: usize) -> Result<f64, ReporterError> {
        let tracked = self.tracked(idx)?;
        Ok(if tracked.missing {
            f64::NAN
        } else {
            tracked.application.value()
        })
    }

    pub fn sample_epoch(&self, idx: usize) -> Result<f64, ReporterError> {
        let tracked = self.tracked(idx)?;
        Ok(if tracked.missing {
            f64::NAN
        } else {
            tracked.epoch.value()
        })
    }

    /// True once a read of the signal has failed.
    pub fn is_missing(&self, idx: usize) -> Result<bool, ReporterError> {
        Ok(self.tracked(idx)?.missing)
    }

    /// Summary for one region bucket; a region never entered yields the
    /// empty-accumulator value.
    pub fn sample_region(&self, idx: usize, hash: u64) -> Result<f64, ReporterError> {
        let tracked = self.tracked(idx)?;
        if tracked.missing {
            return Ok(f64::NAN);
        }
        Ok(match tracked.regions.get(&hash) {
            Some(acc) => acc.value(),
            None => SampleAccumulator::new(tracked.statistic).value(),
        })
    }

    /// Warning attached to the application summary of a signal, if any.
    pub fn warning(&self, idx: usize) -> Result<Option<&'static str>, ReporterError> {
        let tracked = self.tracked(idx)?;
        let acc = &tracked.application;
        Ok(if tracked.missing {
            Some("read failed")
        } else if acc.is_mismatched() {
            Some("expect-same mismatch")
        } else if acc.is_clamped() {
            Some("counter decreased, delta clamped")
        } else {
            None
        })
    }

    /// Number of times each marked region was entered.
    pub fn region_counts(&self) -> &BTreeMap<u64, usize> {
        &self.region_counts
    }

    /// Most recent `EPOCH_COUNT` sample.
    pub fn epoch_count(&self) -> f64 {
        self.previous_epoch
    }
}
