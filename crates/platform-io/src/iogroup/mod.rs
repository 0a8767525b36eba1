// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`IOGroup`] backend trait and the sysfs-based backends.

pub mod cpufreq;
pub mod powercap;
pub(crate) mod sysfs;
pub mod thermal;
pub mod time;

pub use cpufreq::CpufreqIOGroup;
pub use powercap::PowercapIOGroup;
pub use thermal::ThermalIOGroup;
pub use time::TimeIOGroup;

use crate::{PlatformIOError, SignalInfo};
use platform_topo::Domain;

/// A provider of named signals and controls.
///
/// Backends only ever see native domain indices; [`PlatformIO`](crate::PlatformIO)
/// takes care of domain conversion, batching and save/restore. A name may
/// be provided by several backends, in which case the one registered last
/// wins.
pub trait IOGroup: Send {
    /// Short identifier used in log messages.
    fn name(&self) -> &str;

    fn signal_names(&self) -> Vec<String>;

    fn control_names(&self) -> Vec<String>;

    /// Native domain of a signal, or `None` if this backend does not
    /// provide it.
    fn signal_domain_type(&self, name: &str) -> Option<Domain>;

    /// Native domain of a control, or `None` if this backend does not
    /// provide it.
    fn control_domain_type(&self, name: &str) -> Option<Domain>;

    fn signal_info(&self, name: &str) -> Option<SignalInfo>;

    /// Reads one native instance of a signal.
    fn read_signal(&mut self, name: &str, domain_idx: usize) -> Result<f64, PlatformIOError>;

    /// Writes one native instance of a control.
    fn write_control(
        &mut self,
        name: &str,
        domain_idx: usize,
        setting: f64,
    ) -> Result<(), PlatformIOError>;

    /// Reads the current setting of a control, used to save it before the
    /// first write of a session.
    fn read_control(&mut self, name: &str, domain_idx: usize) -> Result<f64, PlatformIOError>;
}
