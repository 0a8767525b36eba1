// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the reporter.

use geopm_error::{Classify, ErrorKind};
use platform_io::{Behavior, PlatformIOError};
use platform_topo::TopoError;

/// Errors that can occur while collecting or emitting a report.
#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    /// Pushing or sampling through platform I/O failed.
    #[error(transparent)]
    PlatformIO(#[from] PlatformIOError),

    /// A report signal named an unknown domain.
    #[error(transparent)]
    Topo(#[from] TopoError),

    /// A report signal contained more than one `@`.
    #[error("report signal \"{0}\" contains multiple \"@\" characters")]
    MultipleAt(String),

    /// Constant and label signals cannot be summarised over time.
    #[error("signal \"{name}\" has {behavior:?} behavior and cannot be aggregated over time")]
    UnsupportedBehavior { name: String, behavior: Behavior },

    /// The aggregator index was never returned by a push.
    #[error("invalid aggregated signal index {0}")]
    InvalidIndex(usize),

    /// `update()` was called before `init()`.
    #[error("reporter used before init()")]
    NotInitialized,

    /// `init()` was called twice.
    #[error("reporter already initialized")]
    AlreadyInitialized,
}

impl Classify for ReporterError {
    fn kind(&self) -> ErrorKind {
        match self {
            ReporterError::PlatformIO(e) => e.kind(),
            ReporterError::Topo(e) => e.kind(),
            ReporterError::MultipleAt(_)
            | ReporterError::UnsupportedBehavior { .. }
            | ReporterError::InvalidIndex(_) => ErrorKind::Invalid,
            ReporterError::NotInitialized | ReporterError::AlreadyInitialized => ErrorKind::Logic,
        }
    }
}
