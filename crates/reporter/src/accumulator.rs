// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Summaries of one signal over time.
//!
//! A [`SampleAccumulator`] folds a stream of [`Interval`]s into a single
//! value. Each interval carries the sample taken at the end of the
//! interval, the time elapsed since the previous sample and the change in
//! value since the previous sample. The first sample of a stream has
//! `dt == 0` and `increment == 0`, so it contributes no weight and no
//! delta.
//!
//! Accumulators are plain values: updating one never touches anything
//! but its own state.

use platform_io::{Aggregation, Behavior};
use std::fmt;

/// How a stream of samples is summarised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Statistic {
    Sum,
    Average,
    Min,
    Max,
    First,
    Last,
    /// First value; later disagreement is flagged, not fatal.
    ExpectSame,
    TimeWeightedMean,
    TimeWeightedStdev,
    /// Sum of non-negative increments.
    MonotoneDelta,
}

impl Statistic {
    pub fn name(self) -> &'static str {
        match self {
            Statistic::Sum => "sum",
            Statistic::Average => "average",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::First => "first",
            Statistic::Last => "last",
            Statistic::ExpectSame => "expect-same",
            Statistic::TimeWeightedMean => "time-weighted-mean",
            Statistic::TimeWeightedStdev => "time-weighted-stdev",
            Statistic::MonotoneDelta => "monotone-delta",
        }
    }

    /// Picks the temporal summary for a signal.
    ///
    /// Monotone signals report their delta and everything else its
    /// time-weighted mean, unless the signal's aggregation asks for an
    /// expect-same check. Constant and label signals have no temporal
    /// summary and yield `None`.
    pub fn for_signal(behavior: Behavior, aggregation: Option<Aggregation>) -> Option<Self> {
        match behavior {
            Behavior::Monotone => Some(Statistic::MonotoneDelta),
            Behavior::Variable => match aggregation {
                Some(Aggregation::ExpectSame) => Some(Statistic::ExpectSame),
                Some(Aggregation::TimeWeightedStdev) => Some(Statistic::TimeWeightedStdev),
                _ => Some(Statistic::TimeWeightedMean),
            },
            Behavior::Constant | Behavior::Label => None,
        }
    }
}

impl From<Aggregation> for Statistic {
    fn from(aggregation: Aggregation) -> Self {
        match aggregation {
            Aggregation::Sum => Statistic::Sum,
            Aggregation::Average => Statistic::Average,
            Aggregation::Min => Statistic::Min,
            Aggregation::Max => Statistic::Max,
            Aggregation::SelectFirst => Statistic::First,
            Aggregation::ExpectSame => Statistic::ExpectSame,
            Aggregation::TimeWeightedMean => Statistic::TimeWeightedMean,
            Aggregation::TimeWeightedStdev => Statistic::TimeWeightedStdev,
            Aggregation::MonotoneDelta => Statistic::MonotoneDelta,
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One step of a sample stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    /// Seconds since the previous sample.
    pub dt: f64,
    /// Sample taken at the end of the interval.
    pub value: f64,
    /// `value` minus the previous sample.
    pub increment: f64,
}

impl Interval {
    /// The opening sample of a stream.
    pub fn first(value: f64) -> Self {
        Self {
            dt: 0.0,
            value,
            increment: 0.0,
        }
    }
}

/// Running summary of one signal.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleAccumulator {
    statistic: Statistic,
    count: usize,
    first: f64,
    last: f64,
    min: f64,
    max: f64,
    sum: f64,
    weight: f64,
    weighted_sum: f64,
    weighted_sq_sum: f64,
    delta: f64,
    mismatched: bool,
    clamped: bool,
}

impl SampleAccumulator {
    pub fn new(statistic: Statistic) -> Self {
        Self {
            statistic,
            count: 0,
            first: f64::NAN,
            last: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            sum: 0.0,
            weight: 0.0,
            weighted_sum: 0.0,
            weighted_sq_sum: 0.0,
            delta: 0.0,
            mismatched: false,
            clamped: false,
        }
    }

    pub fn statistic(&self) -> Statistic {
        self.statistic
    }

    /// Number of samples folded so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn update(&mut self, interval: Interval) {
        let value = interval.value;
        if self.count == 0 {
            self.first = value;
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
            if !same_value(self.first, value) {
                self.mismatched = true;
            }
        }
        self.count += 1;
        self.last = value;
        self.sum += value;

        if interval.dt > 0.0 && !value.is_nan() {
            self.weight += interval.dt;
            self.weighted_sum += value * interval.dt;
            self.weighted_sq_sum += value * value * interval.dt;
        }

        if !interval.increment.is_nan() {
            self.delta += interval.increment;
        }
        if interval.increment < 0.0 {
            self.clamped = true;
        }
    }

    /// The summary value. Empty accumulators yield `0.0` for the additive
    /// statistics and NaN otherwise.
    pub fn value(&self) -> f64 {
        match self.statistic {
            Statistic::Sum => self.sum,
            Statistic::MonotoneDelta => self.delta.max(0.0),
            _ if self.count == 0 => f64::NAN,
            Statistic::Average => self.sum / self.count as f64,
            Statistic::Min => self.min,
            Statistic::Max => self.max,
            Statistic::First | Statistic::ExpectSame => self.first,
            Statistic::Last => self.last,
            Statistic::TimeWeightedMean => self.weighted_mean(),
            Statistic::TimeWeightedStdev => {
                let mean = self.weighted_mean();
                let variance = self.weighted_sq_sum / self.weight - mean * mean;
                variance.max(0.0).sqrt()
            }
        }
    }

    fn weighted_mean(&self) -> f64 {
        if self.weight > 0.0 {
            self.weighted_sum / self.weight
        } else {
            f64::NAN
        }
    }

    /// True when an expect-same stream saw disagreeing samples.
    pub fn is_mismatched(&self) -> bool {
        self.statistic == Statistic::ExpectSame && self.mismatched
    }

    /// True when a monotone stream went backwards at least once. The
    /// reported delta is never negative.
    pub fn is_clamped(&self) -> bool {
        self.statistic == Statistic::MonotoneDelta && self.clamped
    }
}

fn same_value(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feeds `(time, value)` pairs the way the aggregator does.
    fn feed(statistic: Statistic, samples: &[(f64, f64)]) -> SampleAccumulator {
        let mut acc = SampleAccumulator::new(statistic);
        let mut prev: Option<(f64, f64)> = None;
        for &(t, v) in samples {
            let interval = match prev {
                None => Interval::first(v),
                Some((pt, pv)) => Interval {
                    dt: t - pt,
                    value: v,
                    increment: v - pv,
                },
            };
            acc.update(interval);
            prev = Some((t, v));
        }
        acc
    }

    #[test]
    fn test_time_weighted_mean_ignores_first_sample() {
        // First sample (100) has zero weight.
        let acc = feed(
            Statistic::TimeWeightedMean,
            &[(0.0, 100.0), (1.0, 10.0), (4.0, 20.0)],
        );
        // (10 * 1 + 20 * 3) / 4
        assert!((acc.value() - 17.5).abs() < 1e-12);
    }

    #[test]
    fn test_time_weighted_mean_of_constant() {
        let samples: Vec<(f64, f64)> = (0..20).map(|i| (i as f64 * 0.1, 2.0e9)).collect();
        let acc = feed(Statistic::TimeWeightedMean, &samples);
        assert!((acc.value() - 2.0e9).abs() < 1e-3);
    }

    #[test]
    fn test_time_weighted_stdev() {
        let acc = feed(
            Statistic::TimeWeightedStdev,
            &[(0.0, 0.0), (1.0, 1.0), (2.0, 3.0)],
        );
        // mean 2, E[x^2] = 5, variance 1
        assert!((acc.value() - 1.0).abs() < 1e-12);
        let single = feed(Statistic::TimeWeightedStdev, &[(0.0, 5.0)]);
        assert!(single.value().is_nan());
    }

    #[test]
    fn test_monotone_delta_is_last_minus_first() {
        let acc = feed(
            Statistic::MonotoneDelta,
            &[(0.0, 1000.0), (1.0, 1010.0), (2.0, 1025.5)],
        );
        assert_eq!(acc.value(), 25.5);
        assert!(!acc.is_clamped());
    }

    #[test]
    fn test_monotone_delta_clamps_backwards_jumps() {
        let acc = feed(
            Statistic::MonotoneDelta,
            &[(0.0, 50.0), (1.0, 60.0), (2.0, 5.0), (3.0, 15.0)],
        );
        // 15 - 50 clamps to zero.
        assert_eq!(acc.value(), 0.0);
        assert!(acc.is_clamped());

        let recovered = feed(
            Statistic::MonotoneDelta,
            &[(0.0, 50.0), (1.0, 40.0), (2.0, 75.0)],
        );
        assert_eq!(recovered.value(), 25.0);
        assert!(recovered.is_clamped());
    }

    #[test]
    fn test_expect_same_flags_mismatch() {
        let same = feed(Statistic::ExpectSame, &[(0.0, 3.0), (1.0, 3.0)]);
        assert_eq!(same.value(), 3.0);
        assert!(!same.is_mismatched());

        let differ = feed(Statistic::ExpectSame, &[(0.0, 3.0), (1.0, 4.0), (2.0, 3.0)]);
        assert_eq!(differ.value(), 3.0);
        assert!(differ.is_mismatched());
    }

    #[test]
    fn test_simple_statistics() {
        let samples = [(0.0, 4.0), (1.0, 1.0), (2.0, 7.0)];
        assert_eq!(feed(Statistic::Sum, &samples).value(), 12.0);
        assert_eq!(feed(Statistic::Average, &samples).value(), 4.0);
        assert_eq!(feed(Statistic::Min, &samples).value(), 1.0);
        assert_eq!(feed(Statistic::Max, &samples).value(), 7.0);
        assert_eq!(feed(Statistic::First, &samples).value(), 4.0);
        assert_eq!(feed(Statistic::Last, &samples).value(), 7.0);
        assert_eq!(feed(Statistic::Sum, &samples).count(), 3);
    }

    #[test]
    fn test_empty() {
        assert_eq!(SampleAccumulator::new(Statistic::Sum).value(), 0.0);
        assert_eq!(SampleAccumulator::new(Statistic::MonotoneDelta).value(), 0.0);
        assert!(SampleAccumulator::new(Statistic::Average).value().is_nan());
        assert!(SampleAccumulator::new(Statistic::TimeWeightedMean).value().is_nan());
    }

    #[test]
    fn test_for_signal() {
        assert_eq!(
            Statistic::for_signal(Behavior::Monotone, Some(Aggregation::Sum)),
            Some(Statistic::MonotoneDelta)
        );
        assert_eq!(
            Statistic::for_signal(Behavior::Variable, Some(Aggregation::Average)),
            Some(Statistic::TimeWeightedMean)
        );
        assert_eq!(
            Statistic::for_signal(Behavior::Variable, Some(Aggregation::ExpectSame)),
            Some(Statistic::ExpectSame)
        );
        assert_eq!(Statistic::for_signal(Behavior::Constant, None), None);
        assert_eq!(Statistic::for_signal(Behavior::Label, None), None);
        assert_eq!(Statistic::from(Aggregation::SelectFirst), Statistic::First);
    }
}
