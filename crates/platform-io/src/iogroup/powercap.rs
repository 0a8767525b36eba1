// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Package and DRAM energy counters and package power limits via the
//! powercap sysfs interface.
//!
//! Layout under `<root>` (normally `/sys/class/powercap`):
//! - `intel-rapl:N/name`: `package-N`
//! - `intel-rapl:N/energy_uj`, `max_energy_range_uj`
//! - `intel-rapl:N/constraint_0_power_limit_uw`
//! - `intel-rapl:N/intel-rapl:N:M/name`: `dram`, with its own `energy_uj`
//!
//! The kernel counters wrap at `max_energy_range_uj`; this backend
//! accumulates across wraps so the exported energy never decreases.

use crate::iogroup::sysfs::{read_sysfs_file, read_sysfs_u64, write_sysfs_u64};
use crate::iogroup::IOGroup;
use crate::{Aggregation, Behavior, PlatformIOError, SignalInfo};
use platform_topo::Domain;
use std::path::{Path, PathBuf};

/// Default sysfs root for powercap zones.
pub const POWERCAP_BASE: &str = "/sys/class/powercap";

const ZONE_PREFIX: &str = "intel-rapl:";

const PACKAGE_ENERGY: [&str; 2] = ["POWERCAP::PACKAGE_ENERGY", "CPU_ENERGY"];
const DRAM_ENERGY: [&str; 2] = ["POWERCAP::DRAM_ENERGY", "DRAM_ENERGY"];
const POWER_LIMIT: [&str; 2] = ["POWERCAP::PACKAGE_POWER_LIMIT", "CPU_POWER_LIMIT_CONTROL"];

/// An energy counter that accumulates across wraps.
struct EnergyCounter {
    path: PathBuf,
    max_range_uj: u64,
    last_raw: Option<u64>,
    total_uj: u64,
}

impl EnergyCounter {
    fn open(zone: &Path) -> Result<Self, PlatformIOError> {
        let path = zone.join("energy_uj");
        read_sysfs_u64(&path)?;
        let max_range_uj = read_sysfs_u64(&zone.join("max_energy_range_uj")).unwrap_or(u64::MAX);
        Ok(Self {
            path,
            max_range_uj,
            last_raw: None,
            total_uj: 0,
        })
    }

    /// Total energy in joules.
    fn read(&mut self) -> Result<f64, PlatformIOError> {
        let raw = read_sysfs_u64(&self.path)?;
        self.total_uj = match self.last_raw {
            None => raw,
            Some(last) if raw >= last => self.total_uj + (raw - last),
            Some(last) => {
                tracing::debug!(path = %self.path.display(), "energy counter wrapped");
                self.total_uj + self.max_range_uj.saturating_sub(last) + raw
            }
        };
        self.last_raw = Some(raw);
        Ok(self.total_uj as f64 * 1e-6)
    }
}

struct PackageZone {
    dir: PathBuf,
    package: EnergyCounter,
    dram: Option<EnergyCounter>,
}

/// Per-package RAPL backend.
pub struct PowercapIOGroup {
    zones: Vec<PackageZone>,
}

impl PowercapIOGroup {
    /// Discovers package zones under `root`.
    pub fn new(root: &Path) -> Result<Self, PlatformIOError> {
        let not_available = || PlatformIOError::NotAvailable {
            path: root.display().to_string(),
        };
        let entries = std::fs::read_dir(root).map_err(|_| not_available())?;
        let mut found: Vec<(usize, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                let id = name.strip_prefix(ZONE_PREFIX)?.parse::<usize>().ok()?;
                Some((id, e.path()))
            })
            .collect();
        found.sort_by_key(|(id, _)| *id);

        let mut zones = Vec::new();
        for (_, dir) in found {
            let is_package = read_sysfs_file(&dir.join("name"))
                .map(|n| n.starts_with("package"))
                .unwrap_or(false);
            if !is_package {
                continue;
            }
            let package = EnergyCounter::open(&dir)?;
            let dram = find_dram(&dir).and_then(|d| EnergyCounter::open(&d).ok());
            zones.push(PackageZone { dir, package, dram });
        }
        if zones.is_empty() {
            return Err(not_available());
        }
        tracing::debug!(
            packages = zones.len(),
            dram = zones.iter().all(|z| z.dram.is_some()),
            "powercap zones discovered"
        );
        Ok(Self { zones })
    }

    fn has_dram(&self) -> bool {
        self.zones.iter().all(|z| z.dram.is_some())
    }

    fn zone(&mut self, name: &str, package: usize) -> Result<&mut PackageZone, PlatformIOError> {
        let count = self.zones.len();
        self.zones
            .get_mut(package)
            .ok_or_else(|| PlatformIOError::ReadFailed {
                target: name.to_string(),
                detail: format!("package {package} has no powercap zone ({count} zones)"),
            })
    }
}

fn find_dram(zone: &Path) -> Option<PathBuf> {
    std::fs::read_dir(zone)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(ZONE_PREFIX))
                .unwrap_or(false)
        })
        .find(|p| {
            read_sysfs_file(&p.join("name"))
                .map(|n| n == "dram")
                .unwrap_or(false)
        })
}

impl IOGroup for PowercapIOGroup {
    fn name(&self) -> &str {
        "powercap"
    }

    fn signal_names(&self) -> Vec<String> {
        let mut names: Vec<String> = PACKAGE_ENERGY
            .iter()
            .chain(POWER_LIMIT.iter())
            .map(|s| s.to_string())
            .collect();
        if self.has_dram() {
            names.extend(DRAM_ENERGY.iter().map(|s| s.to_string()));
        }
        names
    }

    fn control_names(&self) -> Vec<String> {
        POWER_LIMIT.iter().map(|s| s.to_string()).collect()
    }

    fn signal_domain_type(&self, name: &str) -> Option<Domain> {
        let known = PACKAGE_ENERGY.contains(&name)
            || POWER_LIMIT.contains(&name)
            || (self.has_dram() && DRAM_ENERGY.contains(&name));
        known.then_some(Domain::Package)
    }

    fn control_domain_type(&self, name: &str) -> Option<Domain> {
        POWER_LIMIT.contains(&name).then_some(Domain::Package)
    }

    fn signal_info(&self, name: &str) -> Option<SignalInfo> {
        self.signal_domain_type(name)?;
        let info = if POWER_LIMIT.contains(&name) {
            SignalInfo::new(Aggregation::Sum, Behavior::Variable, "watts")
                .with_description("Package power limit (constraint 0)")
        } else if DRAM_ENERGY.contains(&name) {
            SignalInfo::new(Aggregation::Sum, Behavior::Monotone, "joules")
                .with_description("Energy consumed by DRAM attached to the package")
        } else {
            SignalInfo::new(Aggregation::Sum, Behavior::Monotone, "joules")
                .with_description("Energy consumed by the package")
        };
        Some(info)
    }

    fn read_signal(&mut self, name: &str, domain_idx: usize) -> Result<f64, PlatformIOError> {
        if PACKAGE_ENERGY.contains(&name) {
            self.zone(name, domain_idx)?.package.read()
        } else if DRAM_ENERGY.contains(&name) {
            match self.zone(name, domain_idx)?.dram.as_mut() {
                Some(counter) => counter.read(),
                None => Err(PlatformIOError::UnknownSignal(name.to_string())),
            }
        } else if POWER_LIMIT.contains(&name) {
            self.read_control(name, domain_idx)
        } else {
            Err(PlatformIOError::UnknownSignal(name.to_string()))
        }
    }

    fn write_control(
        &mut self,
        name: &str,
        domain_idx: usize,
        setting: f64,
    ) -> Result<(), PlatformIOError> {
        if !POWER_LIMIT.contains(&name) {
            return Err(PlatformIOError::UnknownControl(name.to_string()));
        }
        if !setting.is_finite() || setting <= 0.0 {
            return Err(PlatformIOError::InvalidSetting {
                name: name.to_string(),
                value: setting,
            });
        }
        let zone = self.zone(name, domain_idx)?;
        let microwatts = (setting * 1e6).round() as u64;
        write_sysfs_u64(&zone.dir.join("constraint_0_power_limit_uw"), microwatts)
    }

    fn read_control(&mut self, name: &str, domain_idx: usize) -> Result<f64, PlatformIOError> {
        if !POWER_LIMIT.contains(&name) {
            return Err(PlatformIOError::UnknownControl(name.to_string()));
        }
        let zone = self.zone(name, domain_idx)?;
        let microwatts = read_sysfs_u64(&zone.dir.join("constraint_0_power_limit_uw"))?;
        Ok(microwatts as f64 * 1e-6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn zone(root: &Path, id: usize, energy: u64, dram: Option<u64>) {
        let dir = root.join(format!("intel-rapl:{id}"));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("name"), format!("package-{id}\n")).unwrap();
        fs::write(dir.join("energy_uj"), format!("{energy}\n")).unwrap();
        fs::write(dir.join("max_energy_range_uj"), "1000000\n").unwrap();
        fs::write(dir.join("constraint_0_power_limit_uw"), "150000000\n").unwrap();
        if let Some(dram) = dram {
            let sub = dir.join(format!("intel-rapl:{id}:0"));
            fs::create_dir_all(&sub).unwrap();
            fs::write(sub.join("name"), "dram\n").unwrap();
            fs::write(sub.join("energy_uj"), format!("{dram}\n")).unwrap();
        }
    }

    #[test]
    fn test_energy_accumulates_across_wrap() {
        let dir = tempfile::tempdir().unwrap();
        zone(dir.path(), 0, 900_000, None);
        let mut group = PowercapIOGroup::new(dir.path()).unwrap();
        assert!((group.read_signal("CPU_ENERGY", 0).unwrap() - 0.9).abs() < 1e-9);

        // Counter wraps at 1 J: 0.9 -> 0.05 means 0.15 J consumed.
        fs::write(dir.path().join("intel-rapl:0/energy_uj"), "50000\n").unwrap();
        let e = group.read_signal("POWERCAP::PACKAGE_ENERGY", 0).unwrap();
        assert!((e - 1.05).abs() < 1e-9);
    }

    #[test]
    fn test_dram_signal_requires_every_package() {
        let dir = tempfile::tempdir().unwrap();
        zone(dir.path(), 0, 0, Some(10));
        zone(dir.path(), 1, 0, None);
        let group = PowercapIOGroup::new(dir.path()).unwrap();
        assert!(group.signal_domain_type("DRAM_ENERGY").is_none());

        let dir = tempfile::tempdir().unwrap();
        zone(dir.path(), 0, 0, Some(2_000_000));
        zone(dir.path(), 1, 0, Some(3_000_000));
        let mut group = PowercapIOGroup::new(dir.path()).unwrap();
        assert_eq!(group.signal_domain_type("DRAM_ENERGY"), Some(Domain::Package));
        assert!((group.read_signal("DRAM_ENERGY", 1).unwrap() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_power_limit_control() {
        let dir = tempfile::tempdir().unwrap();
        zone(dir.path(), 0, 0, None);
        let mut group = PowercapIOGroup::new(dir.path()).unwrap();
        assert_eq!(group.read_control("CPU_POWER_LIMIT_CONTROL", 0).unwrap(), 150.0);
        group.write_control("CPU_POWER_LIMIT_CONTROL", 0, 125.5).unwrap();
        assert_eq!(group.read_signal("POWERCAP::PACKAGE_POWER_LIMIT", 0).unwrap(), 125.5);
        assert!(group.write_control("CPU_POWER_LIMIT_CONTROL", 0, f64::NAN).is_err());
        assert!(group.write_control("CPU_POWER_LIMIT_CONTROL", 3, 100.0).is_err());
    }

    #[test]
    fn test_non_package_zones_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let psys = dir.path().join("intel-rapl:1");
        fs::create_dir_all(&psys).unwrap();
        fs::write(psys.join("name"), "psys\n").unwrap();
        assert!(matches!(
            PowercapIOGroup::new(dir.path()),
            Err(PlatformIOError::NotAvailable { .. })
        ));
        zone(dir.path(), 0, 0, None);
        assert_eq!(PowercapIOGroup::new(dir.path()).unwrap().zones.len(), 1);
    }
}
