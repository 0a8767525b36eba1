// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Hardware domain tags.

use crate::TopoError;
use std::fmt;
use std::str::FromStr;

/// A class of hardware location. Closed set.
///
/// The integer value of each tag is stable and matches its position in
/// [`Domain::ALL`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Board = 0,
    Package = 1,
    Core = 2,
    Cpu = 3,
    Memory = 4,
    PackageIntegratedMemory = 5,
    Nic = 6,
    PackageIntegratedNic = 7,
    Gpu = 8,
    PackageIntegratedGpu = 9,
    GpuChip = 10,
}

impl Domain {
    /// Every domain, in tag order.
    pub const ALL: [Domain; 11] = [
        Domain::Board,
        Domain::Package,
        Domain::Core,
        Domain::Cpu,
        Domain::Memory,
        Domain::PackageIntegratedMemory,
        Domain::Nic,
        Domain::PackageIntegratedNic,
        Domain::Gpu,
        Domain::PackageIntegratedGpu,
        Domain::GpuChip,
    ];

    /// Canonical lower-case name, e.g. `"package_integrated_memory"`.
    pub fn name(self) -> &'static str {
        match self {
            Domain::Board => "board",
            Domain::Package => "package",
            Domain::Core => "core",
            Domain::Cpu => "cpu",
            Domain::Memory => "memory",
            Domain::PackageIntegratedMemory => "package_integrated_memory",
            Domain::Nic => "nic",
            Domain::PackageIntegratedNic => "package_integrated_nic",
            Domain::Gpu => "gpu",
            Domain::PackageIntegratedGpu => "package_integrated_gpu",
            Domain::GpuChip => "gpu_chip",
        }
    }

    /// Integer tag.
    pub fn tag(self) -> usize {
        self as usize
    }

    /// Inverse of [`tag`](Self::tag).
    pub fn from_tag(tag: usize) -> Option<Self> {
        Self::ALL.get(tag).copied()
    }

    /// Looks a domain up by name.
    ///
    /// Both `snake_case` and `kebab-case` spellings are accepted, so
    /// `"gpu_chip"` and `"gpu-chip"` name the same domain.
    pub fn from_name(name: &str) -> Result<Self, TopoError> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|d| d.name() == normalized)
            .ok_or_else(|| TopoError::UnknownDomain(name.to_string()))
    }

    /// True for domains whose instances are made of CPUs.
    pub fn is_cpu_domain(self) -> bool {
        matches!(
            self,
            Domain::Board | Domain::Package | Domain::Core | Domain::Cpu
        )
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Domain {
    type Err = TopoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}
