// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Board temperature via `/sys/class/thermal/`.
//!
//! Thermal zone 0 reports the temperature in millidegrees Celsius
//! (e.g. `54321` means 54.321 °C).

use crate::iogroup::sysfs::{read_sysfs_file, read_sysfs_i64};
use crate::iogroup::IOGroup;
use crate::{Aggregation, Behavior, PlatformIOError, SignalInfo};
use platform_topo::Domain;
use std::path::{Path, PathBuf};

/// Default sysfs path for the board thermal zone.
pub const THERMAL_ZONE_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

const NAMES: [&str; 2] = ["THERMAL::ZONE_TEMPERATURE", "BOARD_TEMPERATURE"];

pub struct ThermalIOGroup {
    path: PathBuf,
}

impl ThermalIOGroup {
    /// Creates the backend over a zone's `temp` file.
    pub fn new(path: &Path) -> Result<Self, PlatformIOError> {
        read_sysfs_file(path)?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl IOGroup for ThermalIOGroup {
    fn name(&self) -> &str {
        "thermal"
    }

    fn signal_names(&self) -> Vec<String> {
        NAMES.iter().map(|s| s.to_string()).collect()
    }

    fn control_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn signal_domain_type(&self, name: &str) -> Option<Domain> {
        NAMES.contains(&name).then_some(Domain::Board)
    }

    fn control_domain_type(&self, _name: &str) -> Option<Domain> {
        None
    }

    fn signal_info(&self, name: &str) -> Option<SignalInfo> {
        NAMES.contains(&name).then(|| {
            SignalInfo::new(Aggregation::Average, Behavior::Variable, "celsius")
                .with_description("Temperature reported by thermal zone 0")
        })
    }

    fn read_signal(&mut self, name: &str, _domain_idx: usize) -> Result<f64, PlatformIOError> {
        if !NAMES.contains(&name) {
            return Err(PlatformIOError::UnknownSignal(name.to_string()));
        }
        let millidegrees = read_sysfs_i64(&self.path)?;
        Ok(millidegrees as f64 / 1000.0)
    }

    fn write_control(
        &mut self,
        name: &str,
        _domain_idx: usize,
        _setting: f64,
    ) -> Result<(), PlatformIOError> {
        Err(PlatformIOError::UnknownControl(name.to_string()))
    }

    fn read_control(&mut self, name: &str, _domain_idx: usize) -> Result<f64, PlatformIOError> {
        Err(PlatformIOError::UnknownControl(name.to_string()))
    }
}
