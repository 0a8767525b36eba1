// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # reporter
//!
//! Summarises platform signals over the life of a run and renders the
//! end-of-run report.
//!
//! - [`SampleAccumulator`] folds one sample stream into a sum, mean,
//!   time-weighted mean or monotone delta.
//! - [`SampleAggregator`] keeps accumulators per application, epoch and
//!   region.
//! - [`Reporter`] owns the built-in report fields and emits the
//!   YAML-shaped document.

pub mod accumulator;
pub mod aggregator;
pub mod error;
pub mod reporter;

pub use accumulator::{Interval, SampleAccumulator, Statistic};
pub use aggregator::{SampleAggregator, UNMARKED_HASH};
pub use error::ReporterError;
pub use reporter::{ErrorSection, ReportExtras, Reporter};
