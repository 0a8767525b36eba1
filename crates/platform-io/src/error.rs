// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the signal/control surface.

use geopm_error::{Classify, ErrorKind};
use platform_topo::{Domain, TopoError};

/// Errors that can occur in [`PlatformIO`](crate::PlatformIO) and its
/// backends.
#[derive(Debug, thiserror::Error)]
pub enum PlatformIOError {
    /// No registered backend provides the signal.
    #[error("no support for signal name \"{0}\"")]
    UnknownSignal(String),

    /// No registered backend provides the control.
    #[error("no support for control name \"{0}\"")]
    UnknownControl(String),

    /// The request domain is unrelated to the native domain.
    #[error("\"{name}\" is native to {native} and cannot be accessed at {requested}")]
    UnsupportedDomain {
        name: String,
        requested: Domain,
        native: Domain,
    },

    /// A coarser-than-native request needs an aggregation function.
    #[error("signal \"{name}\" has no aggregation function and cannot be read at {domain}")]
    NoAggregation { name: String, domain: Domain },

    /// Topology query failed (typically an out-of-range domain index).
    #[error(transparent)]
    Topo(#[from] TopoError),

    /// The handle was never returned by a push in this session.
    #[error("invalid {kind} handle {handle}")]
    InvalidHandle { kind: &'static str, handle: usize },

    /// Pushes are closed once batching has started.
    #[error("cannot push \"{0}\" after read_batch() or adjust() has been called")]
    PushAfterBatch(String),

    /// The setting is NaN or otherwise unusable.
    #[error("invalid setting {value} for control \"{name}\"")]
    InvalidSetting { name: String, value: f64 },

    /// `sample()` was called before the first `read_batch()`.
    #[error("sample() called before read_batch()")]
    NotRead,

    /// Backends are fixed once a session has started.
    #[error("cannot register backend \"{0}\" while a control session is open")]
    RegisterAfterSave(String),

    /// A session is already open.
    #[error("save_control() called while a control session is already open")]
    SessionOpen,

    /// Reading from a hardware interface failed.
    #[error("failed to read {target}: {detail}")]
    ReadFailed { target: String, detail: String },

    /// A pushed signal could not be read in the last batch.
    #[error("signal {signal} was not read in the last batch: {detail}")]
    SampleFailed { signal: String, detail: String },

    /// Writing to a hardware interface failed.
    #[error("failed to write {target}: {detail}")]
    WriteFailed { target: String, detail: String },

    /// The backend's hardware interface does not exist on this node.
    #[error("interface not found: {path}")]
    NotAvailable { path: String },

    /// The operation is not supported for this signal or control.
    #[error("{0}")]
    NotImplemented(String),

    /// The process-wide instance is held by another session.
    #[error("the platform I/O instance is held by another session")]
    Busy,
}

impl Classify for PlatformIOError {
    fn kind(&self) -> ErrorKind {
        match self {
            PlatformIOError::UnknownSignal(_)
            | PlatformIOError::UnknownControl(_)
            | PlatformIOError::UnsupportedDomain { .. }
            | PlatformIOError::NoAggregation { .. }
            | PlatformIOError::InvalidHandle { .. }
            | PlatformIOError::PushAfterBatch(_)
            | PlatformIOError::InvalidSetting { .. } => ErrorKind::Invalid,
            PlatformIOError::Topo(e) => e.kind(),
            PlatformIOError::NotRead | PlatformIOError::Busy => ErrorKind::Runtime,
            PlatformIOError::RegisterAfterSave(_) | PlatformIOError::SessionOpen => {
                ErrorKind::Logic
            }
            PlatformIOError::ReadFailed { .. } | PlatformIOError::SampleFailed { .. } => {
                ErrorKind::MsrRead
            }
            PlatformIOError::WriteFailed { .. } => ErrorKind::MsrWrite,
            PlatformIOError::NotAvailable { .. } => ErrorKind::PlatformUnsupported,
            PlatformIOError::NotImplemented(_) => ErrorKind::NotImplemented,
        }
    }
}
