// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for topology discovery and queries.

use crate::Domain;
use geopm_error::{Classify, ErrorKind};

/// Errors that can occur when building or querying a [`PlatformTopo`](crate::PlatformTopo).
#[derive(Debug, thiserror::Error)]
pub enum TopoError {
    /// A domain name did not match any known domain.
    #[error("unrecognized domain name: \"{0}\"")]
    UnknownDomain(String),

    /// A domain index is outside `[0, num_domain)`.
    #[error("{domain} index {index} is out of range (num_domain = {count})")]
    IndexOutOfRange {
        domain: Domain,
        index: usize,
        count: usize,
    },

    /// The inner domain is not contained within the outer domain.
    #[error("domain {inner} is not contained within domain {outer}")]
    NotNested { inner: Domain, outer: Domain },

    /// The query is not supported for this domain type.
    #[error("{op}() has no support for domain {domain}")]
    NotImplemented { op: &'static str, domain: Domain },

    /// The requested counts do not describe a usable platform.
    #[error("invalid topology: {0}")]
    InvalidCounts(String),

    /// Failed to read a sysfs file.
    #[error("failed to read {path}: {source}")]
    ReadError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to parse a value from a sysfs file.
    #[error("failed to parse value from {path}: {detail}")]
    ParseError { path: String, detail: String },

    /// The expected sysfs path does not exist.
    #[error("sysfs path not found: {path}")]
    NotAvailable { path: String },
}

impl Classify for TopoError {
    fn kind(&self) -> ErrorKind {
        match self {
            TopoError::UnknownDomain(_) | TopoError::NotNested { .. } => ErrorKind::Invalid,
            TopoError::InvalidCounts(_) => ErrorKind::Invalid,
            TopoError::IndexOutOfRange { .. } => ErrorKind::LevelRange,
            TopoError::NotImplemented { .. } => ErrorKind::NotImplemented,
            TopoError::ReadError { .. } | TopoError::ParseError { .. } => ErrorKind::Runtime,
            TopoError::NotAvailable { .. } => ErrorKind::PlatformUnsupported,
        }
    }
}
