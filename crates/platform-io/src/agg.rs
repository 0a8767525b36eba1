// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Aggregation functions.
//!
//! Each signal declares how instances at a fine domain combine into one
//! value at a coarser domain. The same tag tells the reporter how to
//! summarise the signal over time; the time-weighted and delta tags are
//! only meaningful there, and reduce spatially to their natural
//! instantaneous counterpart (mean, standard deviation and sum).
//!
//! All functions are pure. Empty input yields `0.0` for [`sum`] and NaN
//! for everything else.

use std::fmt;

/// How values of one signal combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Aggregation {
    Sum,
    Average,
    Min,
    Max,
    SelectFirst,
    /// All values should agree; disagreement yields NaN.
    ExpectSame,
    TimeWeightedMean,
    TimeWeightedStdev,
    /// For monotone counters: `last - first` over time.
    MonotoneDelta,
}

impl Aggregation {
    pub const ALL: [Aggregation; 9] = [
        Aggregation::Sum,
        Aggregation::Average,
        Aggregation::Min,
        Aggregation::Max,
        Aggregation::SelectFirst,
        Aggregation::ExpectSame,
        Aggregation::TimeWeightedMean,
        Aggregation::TimeWeightedStdev,
        Aggregation::MonotoneDelta,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Average => "average",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::SelectFirst => "select-first",
            Aggregation::ExpectSame => "expect-same",
            Aggregation::TimeWeightedMean => "time-weighted-mean",
            Aggregation::TimeWeightedStdev => "time-weighted-stdev",
            Aggregation::MonotoneDelta => "monotone-delta",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL.iter().copied().find(|a| a.name() == name)
    }

    /// Combines simultaneous values from several domain instances.
    pub fn reduce(self, values: &[f64]) -> f64 {
        match self {
            Aggregation::Sum | Aggregation::MonotoneDelta => sum(values),
            Aggregation::Average | Aggregation::TimeWeightedMean => average(values),
            Aggregation::Min => min(values),
            Aggregation::Max => max(values),
            Aggregation::SelectFirst => select_first(values),
            Aggregation::ExpectSame => expect_same(values),
            Aggregation::TimeWeightedStdev => stddev(values),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    sum(values) / values.len() as f64
}

pub fn min(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or(f64::NAN)
}

pub fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(f64::NAN)
}

pub fn select_first(values: &[f64]) -> f64 {
    values.first().copied().unwrap_or(f64::NAN)
}

/// The common value, or NaN if the values disagree.
pub fn expect_same(values: &[f64]) -> f64 {
    match values.first() {
        Some(first) if is_uniform(values) => *first,
        _ => f64::NAN,
    }
}

/// True if every value equals the first (NaN never equals anything).
pub fn is_uniform(values: &[f64]) -> bool {
    match values.first() {
        Some(first) => values.iter().all(|v| v == first),
        None => true,
    }
}

/// Sample standard deviation (n - 1 denominator). Fewer than two values
/// give `0.0`.
pub fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    if values.len() < 2 {
        return 0.0;
    }
    let mean = average(values);
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_reductions() {
        let v = [4.0, 1.0, 3.0];
        assert_eq!(Aggregation::Sum.reduce(&v), 8.0);
        assert!((Aggregation::Average.reduce(&v) - 8.0 / 3.0).abs() < 1e-12);
        assert_eq!(Aggregation::Min.reduce(&v), 1.0);
        assert_eq!(Aggregation::Max.reduce(&v), 4.0);
        assert_eq!(Aggregation::SelectFirst.reduce(&v), 4.0);
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(sum(&[]), 0.0);
        assert!(average(&[]).is_nan());
        assert!(min(&[]).is_nan());
        assert!(max(&[]).is_nan());
        assert!(select_first(&[]).is_nan());
        assert!(stddev(&[]).is_nan());
    }

    #[test]
    fn test_expect_same() {
        assert_eq!(expect_same(&[2.5, 2.5, 2.5]), 2.5);
        assert!(expect_same(&[2.5, 2.6]).is_nan());
        assert!(is_uniform(&[]));
        assert!(!is_uniform(&[f64::NAN]));
    }

    #[test]
    fn test_stddev() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((stddev(&v) - 2.138_089_935).abs() < 1e-6);
        assert_eq!(stddev(&[3.0]), 0.0);
    }

    #[test]
    fn test_time_tags_reduce_spatially() {
        let v = [1.0, 3.0];
        assert_eq!(Aggregation::TimeWeightedMean.reduce(&v), 2.0);
        assert_eq!(Aggregation::MonotoneDelta.reduce(&v), 4.0);
    }

    #[test]
    fn test_names() {
        for agg in Aggregation::ALL {
            assert_eq!(Aggregation::from_name(agg.name()), Some(agg));
        }
        assert_eq!(Aggregation::from_name("select_first"), Some(Aggregation::SelectFirst));
        assert_eq!(Aggregation::from_name("median"), None);
    }
}
