// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! CPU frequency signals and controls via the cpufreq sysfs interface.
//!
//! Reads `<root>/cpuN/cpufreq/*`. The kernel reports kHz; every value
//! crossing this backend is in Hz.

use crate::iogroup::sysfs::{read_sysfs_u64, write_sysfs_u64};
use crate::iogroup::IOGroup;
use crate::{Aggregation, Behavior, PlatformIOError, SignalInfo};
use platform_topo::Domain;
use std::path::{Path, PathBuf};

/// Base sysfs path for CPU information.
pub const CPU_BASE: &str = "/sys/devices/system/cpu";

struct Entry {
    name: &'static str,
    alias: &'static str,
    file: &'static str,
    aggregation: Aggregation,
    behavior: Behavior,
    writable: bool,
    description: &'static str,
}

const ENTRIES: [Entry; 4] = [
    Entry {
        name: "CPUFREQ::SCALING_CUR_FREQ",
        alias: "CPU_FREQUENCY_STATUS",
        file: "scaling_cur_freq",
        aggregation: Aggregation::Average,
        behavior: Behavior::Variable,
        writable: false,
        description: "Current operating frequency of the CPU",
    },
    Entry {
        name: "CPUFREQ::CPUINFO_MAX_FREQ",
        alias: "CPU_FREQUENCY_MAX_AVAIL",
        file: "cpuinfo_max_freq",
        aggregation: Aggregation::ExpectSame,
        behavior: Behavior::Constant,
        writable: false,
        description: "Maximum operating frequency of the CPU",
    },
    Entry {
        name: "CPUFREQ::CPUINFO_MIN_FREQ",
        alias: "CPU_FREQUENCY_MIN_AVAIL",
        file: "cpuinfo_min_freq",
        aggregation: Aggregation::ExpectSame,
        behavior: Behavior::Constant,
        writable: false,
        description: "Minimum operating frequency of the CPU",
    },
    Entry {
        name: "CPUFREQ::SCALING_MAX_FREQ",
        alias: "CPU_FREQUENCY_MAX_CONTROL",
        file: "scaling_max_freq",
        aggregation: Aggregation::Average,
        behavior: Behavior::Variable,
        writable: true,
        description: "Upper bound on the frequency chosen by the cpufreq governor",
    },
];

fn lookup(name: &str) -> Option<&'static Entry> {
    ENTRIES.iter().find(|e| e.name == name || e.alias == name)
}

/// Per-CPU frequency backend.
pub struct CpufreqIOGroup {
    root: PathBuf,
    num_cpu: usize,
}

impl CpufreqIOGroup {
    /// Creates the backend over `root`, which must contain
    /// `cpu0/cpufreq`.
    pub fn new(root: &Path, num_cpu: usize) -> Result<Self, PlatformIOError> {
        let probe = root.join("cpu0").join("cpufreq");
        if !probe.is_dir() {
            return Err(PlatformIOError::NotAvailable {
                path: probe.display().to_string(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
            num_cpu,
        })
    }

    fn path(&self, entry: &Entry, cpu: usize) -> Result<PathBuf, PlatformIOError> {
        if cpu >= self.num_cpu {
            return Err(PlatformIOError::ReadFailed {
                target: entry.name.to_string(),
                detail: format!("cpu {cpu} is out of range ({} cpus)", self.num_cpu),
            });
        }
        Ok(self
            .root
            .join(format!("cpu{cpu}"))
            .join("cpufreq")
            .join(entry.file))
    }

    fn writable(name: &str) -> Option<&'static Entry> {
        lookup(name).filter(|e| e.writable)
    }
}

impl IOGroup for CpufreqIOGroup {
    fn name(&self) -> &str {
        "cpufreq"
    }

    fn signal_names(&self) -> Vec<String> {
        ENTRIES
            .iter()
            .flat_map(|e| [e.name.to_string(), e.alias.to_string()])
            .collect()
    }

    fn control_names(&self) -> Vec<String> {
        ENTRIES
            .iter()
            .filter(|e| e.writable)
            .flat_map(|e| [e.name.to_string(), e.alias.to_string()])
            .collect()
    }

    fn signal_domain_type(&self, name: &str) -> Option<Domain> {
        lookup(name).map(|_| Domain::Cpu)
    }

    fn control_domain_type(&self, name: &str) -> Option<Domain> {
        Self::writable(name).map(|_| Domain::Cpu)
    }

    fn signal_info(&self, name: &str) -> Option<SignalInfo> {
        lookup(name).map(|e| {
            SignalInfo::new(e.aggregation, e.behavior, "hertz").with_description(e.description)
        })
    }

    fn read_signal(&mut self, name: &str, domain_idx: usize) -> Result<f64, PlatformIOError> {
        let entry = lookup(name).ok_or_else(|| PlatformIOError::UnknownSignal(name.to_string()))?;
        let khz = read_sysfs_u64(&self.path(entry, domain_idx)?)?;
        Ok(khz as f64 * 1e3)
    }

    fn write_control(
        &mut self,
        name: &str,
        domain_idx: usize,
        setting: f64,
    ) -> Result<(), PlatformIOError> {
        let entry =
            Self::writable(name).ok_or_else(|| PlatformIOError::UnknownControl(name.to_string()))?;
        if !setting.is_finite() || setting < 0.0 {
            return Err(PlatformIOError::InvalidSetting {
                name: name.to_string(),
                value: setting,
            });
        }
        let khz = (setting / 1e3).round() as u64;
        write_sysfs_u64(&self.path(entry, domain_idx)?, khz)
    }

    fn read_control(&mut self, name: &str, domain_idx: usize) -> Result<f64, PlatformIOError> {
        let entry =
            Self::writable(name).ok_or_else(|| PlatformIOError::UnknownControl(name.to_string()))?;
        let khz = read_sysfs_u64(&self.path(entry, domain_idx)?)?;
        Ok(khz as f64 * 1e3)
    }
}
