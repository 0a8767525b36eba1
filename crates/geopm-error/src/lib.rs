// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # geopm-error
//!
//! The closed error taxonomy shared by every crate in the runtime.
//!
//! Each crate declares its own `thiserror` enum, and every variant maps to
//! exactly one [`ErrorKind`] through the [`Classify`] trait. The kind
//! carries a stable negative integer code, so errors can be reported
//! uniformly (exit codes, report `Error:` sections) no matter which layer
//! raised them.
//!
//! | Kind | Code |
//! |---|---|
//! | `Runtime` | −1 |
//! | `Logic` | −2 |
//! | `Invalid` | −3 |
//! | `FileParse` | −4 |
//! | `LevelRange` | −5 |
//! | `NotImplemented` | −6 |
//! | `PlatformUnsupported` | −7 |
//! | `MsrOpen` | −8 |
//! | `MsrRead` | −9 |
//! | `MsrWrite` | −10 |
//! | `AgentUnsupported` | −11 |
//! | `Affinity` | −12 |
//! | `NoAgent` | −13 |
//!
//! # Example
//! ```
//! use geopm_error::{Error, ErrorKind};
//!
//! let err = Error::new(ErrorKind::Invalid, "unknown signal \"FOO\"");
//! assert_eq!(err.kind().code(), -3);
//! assert_eq!(ErrorKind::from_code(-3), Some(ErrorKind::Invalid));
//! ```

use std::fmt;

/// Category of a failure. Closed set; codes are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Catch-all for expected operational failures.
    Runtime,
    /// Contract violation by a caller.
    Logic,
    /// Malformed input: unknown name, bad domain, NaN setting.
    Invalid,
    /// Malformed report or configuration input.
    FileParse,
    /// Domain index out of range.
    LevelRange,
    /// Backend lacks the requested capability.
    NotImplemented,
    /// The running platform does not expose this knob.
    PlatformUnsupported,
    /// Hardware access failed while opening the device.
    MsrOpen,
    /// Hardware access failed while reading.
    MsrRead,
    /// Hardware access failed while writing.
    MsrWrite,
    /// Agent not recognised.
    AgentUnsupported,
    /// Failed to set process affinity.
    Affinity,
    /// No agent is attached to an endpoint expecting one.
    NoAgent,
}

impl ErrorKind {
    /// Every kind, in code order.
    pub const ALL: [ErrorKind; 13] = [
        ErrorKind::Runtime,
        ErrorKind::Logic,
        ErrorKind::Invalid,
        ErrorKind::FileParse,
        ErrorKind::LevelRange,
        ErrorKind::NotImplemented,
        ErrorKind::PlatformUnsupported,
        ErrorKind::MsrOpen,
        ErrorKind::MsrRead,
        ErrorKind::MsrWrite,
        ErrorKind::AgentUnsupported,
        ErrorKind::Affinity,
        ErrorKind::NoAgent,
    ];

    /// Returns the stable negative integer code for this kind.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::Runtime => -1,
            ErrorKind::Logic => -2,
            ErrorKind::Invalid => -3,
            ErrorKind::FileParse => -4,
            ErrorKind::LevelRange => -5,
            ErrorKind::NotImplemented => -6,
            ErrorKind::PlatformUnsupported => -7,
            ErrorKind::MsrOpen => -8,
            ErrorKind::MsrRead => -9,
            ErrorKind::MsrWrite => -10,
            ErrorKind::AgentUnsupported => -11,
            ErrorKind::Affinity => -12,
            ErrorKind::NoAgent => -13,
        }
    }

    /// Inverse of [`code`](Self::code).
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.code() == code)
    }

    /// Short kebab-case name, e.g. `"msr-write"`.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Runtime => "runtime",
            ErrorKind::Logic => "logic",
            ErrorKind::Invalid => "invalid",
            ErrorKind::FileParse => "file-parse",
            ErrorKind::LevelRange => "level-range",
            ErrorKind::NotImplemented => "not-implemented",
            ErrorKind::PlatformUnsupported => "platform-unsupported",
            ErrorKind::MsrOpen => "msr-open",
            ErrorKind::MsrRead => "msr-read",
            ErrorKind::MsrWrite => "msr-write",
            ErrorKind::AgentUnsupported => "agent-unsupported",
            ErrorKind::Affinity => "affinity",
            ErrorKind::NoAgent => "no-agent",
        }
    }

    /// Human-readable description of the category.
    pub fn message(self) -> &'static str {
        match self {
            ErrorKind::Runtime => "<geopm> Runtime error",
            ErrorKind::Logic => "<geopm> Logic error",
            ErrorKind::Invalid => "<geopm> Invalid argument",
            ErrorKind::FileParse => "<geopm> Unable to parse input file",
            ErrorKind::LevelRange => "<geopm> Domain index is out of range",
            ErrorKind::NotImplemented => "<geopm> Feature not yet implemented",
            ErrorKind::PlatformUnsupported => {
                "<geopm> Current platform not supported or unrecognized"
            }
            ErrorKind::MsrOpen => "<geopm> Could not open hardware device",
            ErrorKind::MsrRead => "<geopm> Could not read from hardware device",
            ErrorKind::MsrWrite => "<geopm> Could not write to hardware device",
            ErrorKind::AgentUnsupported => "<geopm> Specified agent not supported or unrecognized",
            ErrorKind::Affinity => "<geopm> Unable to set process affinity",
            ErrorKind::NoAgent => "<geopm> Requested agent is unavailable or invalid",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Implemented by every error type in the workspace.
pub trait Classify {
    /// The taxonomy category of this error.
    fn kind(&self) -> ErrorKind;
}

/// General-purpose classified error, used where a layer has no richer
/// error type of its own (most notably by agent implementations).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {message}", kind.message())]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates an error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an [`ErrorKind::Runtime`] error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Runtime, message)
    }

    /// Shorthand for an [`ErrorKind::Invalid`] error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invalid, message)
    }

    /// Shorthand for an [`ErrorKind::Logic`] error.
    pub fn logic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Logic, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The detail message without the category prefix.
    pub fn detail(&self) -> &str {
        &self.message
    }
}

impl Classify for Error {
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Convenience alias for results carrying [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
