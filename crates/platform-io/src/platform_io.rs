// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The uniform signal/control surface.
//!
//! [`PlatformIO`] fronts a set of registered [`IOGroup`] backends and adds:
//!
//! - **Domain conversion.** A request at a coarser domain than the
//!   signal's native one is decomposed at push time into native reads that
//!   are recombined with the signal's aggregation function. A request at a
//!   finer domain reads the enclosing native instance. Controls pushed at a
//!   coarser domain broadcast to every native instance.
//! - **Batching.** `push_*` returns dense handles. `read_batch()` reads
//!   every distinct native instance exactly once before any `sample()` can
//!   observe the result. `adjust()` records settings that `write_batch()`
//!   flushes; later settings for the same native instance overwrite
//!   earlier ones.
//! - **Save/restore.** Between `save_control()` and `restore_control()`,
//!   the current setting of each control is captured right before its
//!   first write. Restore re-writes exactly those settings.
//! - **Derived power.** `CPU_POWER` and `DRAM_POWER` are the least-squares
//!   slope of the matching energy signal over `TIME` across the last eight
//!   batches.

use crate::agg::Aggregation;
use crate::iogroup::cpufreq::CPU_BASE;
use crate::iogroup::powercap::POWERCAP_BASE;
use crate::iogroup::thermal::THERMAL_ZONE_PATH;
use crate::iogroup::{CpufreqIOGroup, IOGroup, PowercapIOGroup, ThermalIOGroup, TimeIOGroup};
use crate::{Behavior, PlatformIOError, SignalInfo};
use platform_topo::{Domain, PlatformTopo, TopoError};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const TIME: &str = "TIME";

/// Batches kept for the derived power slope.
const DERIVATIVE_WINDOW: usize = 8;

/// Sampling interval for one-shot reads of a derived power signal.
const DERIVED_READ_INTERVAL: Duration = Duration::from_millis(50);

/// Derived power signal and the energy signal it differentiates.
const DERIVED_POWER: [(&str, &str); 2] = [("CPU_POWER", "CPU_ENERGY"), ("DRAM_POWER", "DRAM_ENERGY")];

fn derived_energy(name: &str) -> Option<&'static str> {
    DERIVED_POWER
        .iter()
        .find(|(power, _)| *power == name)
        .map(|(_, energy)| *energy)
}

/// Slope of `energy` over `time` by ordinary least squares.
fn least_squares_slope(history: &VecDeque<(f64, f64)>) -> f64 {
    if history.len() < 2 {
        return f64::NAN;
    }
    let n = history.len() as f64;
    let mean_t = history.iter().map(|(t, _)| t).sum::<f64>() / n;
    let mean_e = history.iter().map(|(_, e)| e).sum::<f64>() / n;
    let (num, den) = history.iter().fold((0.0, 0.0), |(num, den), (t, e)| {
        let dt = t - mean_t;
        (num + dt * (e - mean_e), den + dt * dt)
    });
    if den == 0.0 {
        f64::NAN
    } else {
        num / den
    }
}

/// How a signal request is served.
enum Plan {
    Native {
        group: usize,
        native_idx: usize,
    },
    Combined {
        group: usize,
        agg: Aggregation,
        natives: Vec<usize>,
    },
    Derived {
        energy: &'static str,
    },
}

/// One native signal instance read per batch.
struct SignalSlot {
    group: usize,
    name: String,
    native_idx: usize,
}

enum PushedSignal {
    Native(usize),
    Combined {
        agg: Aggregation,
        slots: Vec<usize>,
    },
    Derivative {
        energy: usize,
        time: usize,
        history: VecDeque<(f64, f64)>,
    },
}

/// One native control instance written per batch.
struct ControlSlot {
    group: usize,
    name: String,
    native_idx: usize,
    pending: Option<f64>,
}

/// A control setting captured before the first write of a session.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SavedControl {
    pub name: String,
    pub domain: Domain,
    pub index: usize,
    pub value: f64,
}

/// A write that failed during the last `write_batch()`.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteFailure {
    pub name: String,
    pub index: usize,
    pub setting: f64,
    pub error: String,
}

/// Uniform named signal/control surface over the registered backends.
pub struct PlatformIO {
    topo: Arc<PlatformTopo>,
    groups: Vec<Box<dyn IOGroup>>,

    signal_slots: Vec<SignalSlot>,
    signal_slot_index: HashMap<(String, usize), usize>,
    slot_values: Vec<f64>,
    slot_errors: Vec<Option<String>>,
    pushed_signals: Vec<PushedSignal>,
    pushed_names: Vec<String>,
    signal_handles: HashMap<(String, Domain, usize), usize>,
    signal_values: Vec<f64>,
    signal_errors: Vec<Option<String>>,

    control_slots: Vec<ControlSlot>,
    control_slot_index: HashMap<(String, usize), usize>,
    pushed_controls: Vec<Vec<usize>>,
    control_handles: HashMap<(String, Domain, usize), usize>,

    batch_started: bool,
    has_read: bool,
    session_open: bool,
    saved: Vec<(usize, SavedControl)>,
    saved_index: HashSet<(String, usize)>,
    write_failures: Vec<WriteFailure>,
}

impl PlatformIO {
    /// Creates an instance with no backends.
    pub fn new(topo: Arc<PlatformTopo>) -> Self {
        Self {
            topo,
            groups: Vec::new(),
            signal_slots: Vec::new(),
            signal_slot_index: HashMap::new(),
            slot_values: Vec::new(),
            slot_errors: Vec::new(),
            pushed_signals: Vec::new(),
            pushed_names: Vec::new(),
            signal_handles: HashMap::new(),
            signal_values: Vec::new(),
            signal_errors: Vec::new(),
            control_slots: Vec::new(),
            control_slot_index: HashMap::new(),
            pushed_controls: Vec::new(),
            control_handles: HashMap::new(),
            batch_started: false,
            has_read: false,
            session_open: false,
            saved: Vec::new(),
            saved_index: HashSet::new(),
            write_failures: Vec::new(),
        }
    }

    /// Creates an instance with every sysfs backend available on this
    /// node. Missing interfaces are skipped.
    pub fn from_system(topo: Arc<PlatformTopo>) -> Self {
        let num_cpu = topo.num_domain(Domain::Cpu);
        let mut pio = Self::new(topo);
        let candidates: Vec<Result<Box<dyn IOGroup>, PlatformIOError>> = vec![
            Ok(Box::new(TimeIOGroup::new()) as Box<dyn IOGroup>),
            CpufreqIOGroup::new(Path::new(CPU_BASE), num_cpu)
                .map(|g| Box::new(g) as Box<dyn IOGroup>),
            PowercapIOGroup::new(Path::new(POWERCAP_BASE)).map(|g| Box::new(g) as Box<dyn IOGroup>),
            ThermalIOGroup::new(Path::new(THERMAL_ZONE_PATH))
                .map(|g| Box::new(g) as Box<dyn IOGroup>),
        ];
        for candidate in candidates {
            match candidate {
                Ok(group) => {
                    if let Err(e) = pio.register_iogroup(group) {
                        tracing::warn!("failed to register backend: {e}");
                    }
                }
                Err(e) => tracing::debug!("backend unavailable: {e}"),
            }
        }
        pio
    }

    pub fn topo(&self) -> &PlatformTopo {
        &self.topo
    }

    /// Adds a backend. Names it provides shadow those of earlier backends.
    pub fn register_iogroup(&mut self, group: Box<dyn IOGroup>) -> Result<(), PlatformIOError> {
        if self.session_open {
            return Err(PlatformIOError::RegisterAfterSave(group.name().to_string()));
        }
        tracing::debug!(
            signals = group.signal_names().len(),
            controls = group.control_names().len(),
            "registered backend {}",
            group.name()
        );
        self.groups.push(group);
        Ok(())
    }

    fn signal_group(&self, name: &str) -> Option<usize> {
        self.groups
            .iter()
            .rposition(|g| g.signal_domain_type(name).is_some())
    }

    fn control_group(&self, name: &str) -> Option<usize> {
        self.groups
            .iter()
            .rposition(|g| g.control_domain_type(name).is_some())
    }

    fn derived_available(&self, name: &str) -> Option<&'static str> {
        let energy = derived_energy(name)?;
        (self.signal_group(energy).is_some() && self.signal_group(TIME).is_some()).then_some(energy)
    }

    /// Every signal name available.
    pub fn signal_names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> =
            self.groups.iter().flat_map(|g| g.signal_names()).collect();
        for (power, _) in DERIVED_POWER {
            if self.derived_available(power).is_some() {
                names.insert(power.to_string());
            }
        }
        names
    }

    /// Every control name available.
    pub fn control_names(&self) -> BTreeSet<String> {
        self.groups.iter().flat_map(|g| g.control_names()).collect()
    }

    pub fn signal_domain_type(&self, name: &str) -> Result<Domain, PlatformIOError> {
        if let Some(group) = self.signal_group(name) {
            if let Some(domain) = self.groups[group].signal_domain_type(name) {
                return Ok(domain);
            }
        }
        match self.derived_available(name) {
            Some(energy) => self.signal_domain_type(energy),
            None => Err(PlatformIOError::UnknownSignal(name.to_string())),
        }
    }

    pub fn control_domain_type(&self, name: &str) -> Result<Domain, PlatformIOError> {
        self.control_group(name)
            .and_then(|group| self.groups[group].control_domain_type(name))
            .ok_or_else(|| PlatformIOError::UnknownControl(name.to_string()))
    }

    pub fn signal_info(&self, name: &str) -> Result<SignalInfo, PlatformIOError> {
        if let Some(group) = self.signal_group(name) {
            return self.groups[group]
                .signal_info(name)
                .ok_or_else(|| PlatformIOError::UnknownSignal(name.to_string()));
        }
        match self.derived_available(name) {
            Some(energy) => Ok(SignalInfo::new(Aggregation::Sum, Behavior::Variable, "watts")
                .with_description(&format!("Rate of change of {energy} over TIME"))),
            None => Err(PlatformIOError::UnknownSignal(name.to_string())),
        }
    }

    fn check_index(&self, domain: Domain, index: usize) -> Result<(), PlatformIOError> {
        let count = self.topo.num_domain(domain);
        if index >= count {
            return Err(TopoError::IndexOutOfRange {
                domain,
                index,
                count,
            }
            .into());
        }
        Ok(())
    }

    fn resolve_signal(&self, name: &str, domain: Domain, idx: usize) -> Result<Plan, PlatformIOError> {
        self.check_index(domain, idx)?;
        if let Some(group) = self.signal_group(name) {
            let native = self.groups[group]
                .signal_domain_type(name)
                .ok_or_else(|| PlatformIOError::UnknownSignal(name.to_string()))?;
            if domain == native {
                return Ok(Plan::Native {
                    group,
                    native_idx: idx,
                });
            }
            if self.topo.is_nested_domain(native, domain) {
                let agg = self.groups[group]
                    .signal_info(name)
                    .and_then(|info| info.aggregation)
                    .ok_or_else(|| PlatformIOError::NoAggregation {
                        name: name.to_string(),
                        domain,
                    })?;
                let natives = self.topo.domain_nested(native, domain, idx)?;
                if natives.is_empty() {
                    return Err(PlatformIOError::UnsupportedDomain {
                        name: name.to_string(),
                        requested: domain,
                        native,
                    });
                }
                return Ok(Plan::Combined {
                    group,
                    agg,
                    natives,
                });
            }
            if self.topo.is_nested_domain(domain, native) {
                let native_idx = self.topo.outer_domain_idx(domain, idx, native)?;
                return Ok(Plan::Native { group, native_idx });
            }
            return Err(PlatformIOError::UnsupportedDomain {
                name: name.to_string(),
                requested: domain,
                native,
            });
        }
        if let Some(energy) = self.derived_available(name) {
            self.resolve_signal(energy, domain, idx)?;
            return Ok(Plan::Derived { energy });
        }
        Err(PlatformIOError::UnknownSignal(name.to_string()))
    }

    fn resolve_control(
        &self,
        name: &str,
        domain: Domain,
        idx: usize,
    ) -> Result<(usize, Vec<usize>), PlatformIOError> {
        self.check_index(domain, idx)?;
        let group = self
            .control_group(name)
            .ok_or_else(|| PlatformIOError::UnknownControl(name.to_string()))?;
        let native = self.control_domain_type(name)?;
        let unsupported = || PlatformIOError::UnsupportedDomain {
            name: name.to_string(),
            requested: domain,
            native,
        };
        if domain == native {
            return Ok((group, vec![idx]));
        }
        if self.topo.is_nested_domain(native, domain) {
            let natives = self.topo.domain_nested(native, domain, idx)?;
            if natives.is_empty() {
                return Err(unsupported());
            }
            return Ok((group, natives));
        }
        Err(unsupported())
    }

    /// Reads a signal immediately, outside of any batch.
    pub fn read_signal(
        &mut self,
        name: &str,
        domain: Domain,
        idx: usize,
    ) -> Result<f64, PlatformIOError> {
        match self.resolve_signal(name, domain, idx)? {
            Plan::Native { group, native_idx } => self.groups[group].read_signal(name, native_idx),
            Plan::Combined {
                group,
                agg,
                natives,
            } => {
                let mut values = Vec::with_capacity(natives.len());
                for native_idx in natives {
                    values.push(self.groups[group].read_signal(name, native_idx)?);
                }
                Ok(agg.reduce(&values))
            }
            Plan::Derived { energy } => {
                let e0 = self.read_signal(energy, domain, idx)?;
                let t0 = self.read_signal(TIME, Domain::Board, 0)?;
                std::thread::sleep(DERIVED_READ_INTERVAL);
                let e1 = self.read_signal(energy, domain, idx)?;
                let t1 = self.read_signal(TIME, Domain::Board, 0)?;
                Ok((e1 - e0) / (t1 - t0))
            }
        }
    }

    /// Writes a control immediately, outside of any batch. Inside a
    /// session the prior setting is saved first.
    pub fn write_control(
        &mut self,
        name: &str,
        domain: Domain,
        idx: usize,
        setting: f64,
    ) -> Result<(), PlatformIOError> {
        if setting.is_nan() {
            return Err(PlatformIOError::InvalidSetting {
                name: name.to_string(),
                value: setting,
            });
        }
        let (group, natives) = self.resolve_control(name, domain, idx)?;
        let mut first_error = None;
        for native_idx in natives {
            let result = match self.ensure_saved(group, name, native_idx) {
                Ok(()) => self.groups[group].write_control(name, native_idx, setting),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn signal_slot(&mut self, group: usize, name: &str, native_idx: usize) -> usize {
        let key = (name.to_string(), native_idx);
        if let Some(slot) = self.signal_slot_index.get(&key) {
            return *slot;
        }
        let slot = self.signal_slots.len();
        self.signal_slots.push(SignalSlot {
            group,
            name: name.to_string(),
            native_idx,
        });
        self.slot_values.push(f64::NAN);
        self.signal_slot_index.insert(key, slot);
        slot
    }

    fn control_slot(&mut self, group: usize, name: &str, native_idx: usize) -> usize {
        let key = (name.to_string(), native_idx);
        if let Some(slot) = self.control_slot_index.get(&key) {
            return *slot;
        }
        let slot = self.control_slots.len();
        self.control_slots.push(ControlSlot {
            group,
            name: name.to_string(),
            native_idx,
            pending: None,
        });
        self.control_slot_index.insert(key, slot);
        slot
    }

    /// Adds a signal to the batch and returns its handle. Pushing the same
    /// request twice returns the same handle.
    pub fn push_signal(
        &mut self,
        name: &str,
        domain: Domain,
        idx: usize,
    ) -> Result<usize, PlatformIOError> {
        let key = (name.to_string(), domain, idx);
        if self.batch_started {
            return Err(PlatformIOError::PushAfterBatch(name.to_string()));
        }
        if let Some(handle) = self.signal_handles.get(&key) {
            return Ok(*handle);
        }
        let entry = match self.resolve_signal(name, domain, idx)? {
            Plan::Native { group, native_idx } => {
                PushedSignal::Native(self.signal_slot(group, name, native_idx))
            }
            Plan::Combined {
                group,
                agg,
                natives,
            } => PushedSignal::Combined {
                agg,
                slots: natives
                    .into_iter()
                    .map(|n| self.signal_slot(group, name, n))
                    .collect(),
            },
            Plan::Derived { energy } => {
                let energy = self.push_signal(energy, domain, idx)?;
                let time = self.push_signal(TIME, Domain::Board, 0)?;
                PushedSignal::Derivative {
                    energy,
                    time,
                    history: VecDeque::with_capacity(DERIVATIVE_WINDOW + 1),
                }
            }
        };
        let handle = self.pushed_signals.len();
        self.pushed_signals.push(entry);
        self.pushed_names.push(format!("{name}@{domain}:{idx}"));
        self.signal_values.push(f64::NAN);
        self.signal_errors.push(None);
        self.signal_handles.insert(key, handle);
        tracing::debug!(handle, "pushed signal {name}@{domain}:{idx}");
        Ok(handle)
    }

    /// Adds a control to the batch and returns its handle.
    pub fn push_control(
        &mut self,
        name: &str,
        domain: Domain,
        idx: usize,
    ) -> Result<usize, PlatformIOError> {
        let key = (name.to_string(), domain, idx);
        if self.batch_started {
            return Err(PlatformIOError::PushAfterBatch(name.to_string()));
        }
        if let Some(handle) = self.control_handles.get(&key) {
            return Ok(*handle);
        }
        let (group, natives) = self.resolve_control(name, domain, idx)?;
        let slots = natives
            .into_iter()
            .map(|n| self.control_slot(group, name, n))
            .collect();
        let handle = self.pushed_controls.len();
        self.pushed_controls.push(slots);
        self.control_handles.insert(key, handle);
        tracing::debug!(handle, "pushed control {name}@{domain}:{idx}");
        Ok(handle)
    }

    pub fn num_signal_pushed(&self) -> usize {
        self.pushed_signals.len()
    }

    pub fn num_control_pushed(&self) -> usize {
        self.pushed_controls.len()
    }

    /// Reads every pushed signal. All native reads complete before any
    /// value becomes visible to `sample()`.
    ///
    /// A backend failure does not stop the batch: the affected handles
    /// read as NaN and `sample()` reports the failure for them only.
    pub fn read_batch(&mut self) -> Result<(), PlatformIOError> {
        self.batch_started = true;
        let mut values = Vec::with_capacity(self.signal_slots.len());
        let mut errors = Vec::with_capacity(self.signal_slots.len());
        for slot in &self.signal_slots {
            match self.groups[slot.group].read_signal(&slot.name, slot.native_idx) {
                Ok(value) => {
                    values.push(value);
                    errors.push(None);
                }
                Err(e) => {
                    tracing::debug!("read of {}[{}] failed: {e}", slot.name, slot.native_idx);
                    values.push(f64::NAN);
                    errors.push(Some(e.to_string()));
                }
            }
        }
        self.slot_values = values;
        self.slot_errors = errors;

        for handle in 0..self.pushed_signals.len() {
            let (value, error) = match &mut self.pushed_signals[handle] {
                PushedSignal::Native(slot) => {
                    (self.slot_values[*slot], self.slot_errors[*slot].clone())
                }
                PushedSignal::Combined { agg, slots } => {
                    let values: Vec<f64> = slots.iter().map(|s| self.slot_values[*s]).collect();
                    let error = slots.iter().find_map(|s| self.slot_errors[*s].clone());
                    (agg.reduce(&values), error)
                }
                PushedSignal::Derivative {
                    energy,
                    time,
                    history,
                } => {
                    let error = self.signal_errors[*energy]
                        .clone()
                        .or_else(|| self.signal_errors[*time].clone());
                    if error.is_some() {
                        (f64::NAN, error)
                    } else {
                        history
                            .push_back((self.signal_values[*time], self.signal_values[*energy]));
                        if history.len() > DERIVATIVE_WINDOW {
                            history.pop_front();
                        }
                        (least_squares_slope(history), None)
                    }
                }
            };
            self.signal_values[handle] = value;
            self.signal_errors[handle] = error;
        }
        self.has_read = true;
        Ok(())
    }

    /// Value of a pushed signal as of the last `read_batch()`.
    pub fn sample(&self, handle: usize) -> Result<f64, PlatformIOError> {
        if handle >= self.pushed_signals.len() {
            return Err(PlatformIOError::InvalidHandle {
                kind: "signal",
                handle,
            });
        }
        if !self.has_read {
            return Err(PlatformIOError::NotRead);
        }
        if let Some(detail) = &self.signal_errors[handle] {
            return Err(PlatformIOError::SampleFailed {
                signal: self.pushed_names[handle].clone(),
                detail: detail.clone(),
            });
        }
        Ok(self.signal_values[handle])
    }

    /// Records a setting for a pushed control, applied by the next
    /// `write_batch()`.
    pub fn adjust(&mut self, handle: usize, setting: f64) -> Result<(), PlatformIOError> {
        let slots = self
            .pushed_controls
            .get(handle)
            .ok_or(PlatformIOError::InvalidHandle {
                kind: "control",
                handle,
            })?;
        if setting.is_nan() {
            let name = slots
                .first()
                .map(|s| self.control_slots[*s].name.clone())
                .unwrap_or_default();
            return Err(PlatformIOError::InvalidSetting {
                name,
                value: setting,
            });
        }
        self.batch_started = true;
        for slot in slots {
            self.control_slots[*slot].pending = Some(setting);
        }
        Ok(())
    }

    /// Writes every pending setting. All writes are attempted; the first
    /// failure is returned afterwards and every failure is kept in
    /// [`write_failures`](Self::write_failures).
    pub fn write_batch(&mut self) -> Result<(), PlatformIOError> {
        self.write_failures.clear();
        let mut first_error = None;
        for i in 0..self.control_slots.len() {
            let Some(setting) = self.control_slots[i].pending.take() else {
                continue;
            };
            let (group, name, native_idx) = {
                let slot = &self.control_slots[i];
                (slot.group, slot.name.clone(), slot.native_idx)
            };
            let result = match self.ensure_saved(group, &name, native_idx) {
                Ok(()) => self.groups[group].write_control(&name, native_idx, setting),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!("write of {name}[{native_idx}] = {setting} failed: {e}");
                self.write_failures.push(WriteFailure {
                    name,
                    index: native_idx,
                    setting,
                    error: e.to_string(),
                });
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Failures from the most recent `write_batch()`.
    pub fn write_failures(&self) -> &[WriteFailure] {
        &self.write_failures
    }

    fn ensure_saved(
        &mut self,
        group: usize,
        name: &str,
        native_idx: usize,
    ) -> Result<(), PlatformIOError> {
        if !self.session_open {
            return Ok(());
        }
        let key = (name.to_string(), native_idx);
        if self.saved_index.contains(&key) {
            return Ok(());
        }
        let value = self.groups[group].read_control(name, native_idx)?;
        let domain = self.groups[group]
            .control_domain_type(name)
            .unwrap_or(Domain::Board);
        tracing::debug!("saved {name}@{domain}:{native_idx} = {value}");
        self.saved.push((
            group,
            SavedControl {
                name: name.to_string(),
                domain,
                index: native_idx,
                value,
            },
        ));
        self.saved_index.insert(key);
        Ok(())
    }

    /// Opens a control session. Handles from any earlier session are
    /// discarded and pushing is allowed again.
    pub fn save_control(&mut self) -> Result<(), PlatformIOError> {
        if self.session_open {
            return Err(PlatformIOError::SessionOpen);
        }
        self.signal_slots.clear();
        self.signal_slot_index.clear();
        self.slot_values.clear();
        self.slot_errors.clear();
        self.pushed_signals.clear();
        self.pushed_names.clear();
        self.signal_handles.clear();
        self.signal_values.clear();
        self.signal_errors.clear();
        self.control_slots.clear();
        self.control_slot_index.clear();
        self.pushed_controls.clear();
        self.control_handles.clear();
        self.batch_started = false;
        self.has_read = false;
        self.saved.clear();
        self.saved_index.clear();
        self.write_failures.clear();
        self.session_open = true;
        tracing::debug!("control session opened");
        Ok(())
    }

    /// Re-writes every saved setting and closes the session. Every write
    /// is attempted; the first failure is returned. Calling it again
    /// re-applies the same settings.
    pub fn restore_control(&mut self) -> Result<(), PlatformIOError> {
        let mut first_error = None;
        for (group, saved) in &self.saved {
            if let Err(e) = self.groups[*group].write_control(&saved.name, saved.index, saved.value)
            {
                tracing::warn!(
                    "failed to restore {}@{}:{} to {}: {e}",
                    saved.name,
                    saved.domain,
                    saved.index,
                    saved.value
                );
                first_error.get_or_insert(e);
            }
        }
        if self.session_open {
            tracing::debug!(restored = self.saved.len(), "control session closed");
        }
        self.session_open = false;
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn is_session_open(&self) -> bool {
        self.session_open
    }

    /// Settings captured in the current (or last) session, in capture
    /// order.
    pub fn saved_controls(&self) -> Vec<SavedControl> {
        self.saved.iter().map(|(_, s)| s.clone()).collect()
    }
}

impl std::fmt::Debug for PlatformIO {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformIO")
            .field(
                "groups",
                &self.groups.iter().map(|g| g.name().to_string()).collect::<Vec<_>>(),
            )
            .field("signals_pushed", &self.pushed_signals.len())
            .field("controls_pushed", &self.pushed_controls.len())
            .field("session_open", &self.session_open)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geopm_error::{Classify, ErrorKind};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeState {
        time: f64,
        counter: Vec<f64>,
        energy: Vec<f64>,
        knob: Vec<f64>,
        writes: Vec<(usize, f64)>,
        deny_write: Option<usize>,
        deny_counter: Option<usize>,
        reads: usize,
    }

    struct FakeIOGroup {
        name: &'static str,
        state: Arc<Mutex<FakeState>>,
    }

    const FAKE_SIGNALS: [(&str, Domain); 5] = [
        ("TIME", Domain::Board),
        ("FAKE::COUNTER", Domain::Cpu),
        ("FAKE::HASH", Domain::Cpu),
        ("CPU_ENERGY", Domain::Package),
        ("FAKE::KNOB", Domain::Package),
    ];

    impl IOGroup for FakeIOGroup {
        fn name(&self) -> &str {
            self.name
        }

        fn signal_names(&self) -> Vec<String> {
            FAKE_SIGNALS.iter().map(|(n, _)| n.to_string()).collect()
        }

        fn control_names(&self) -> Vec<String> {
            vec!["FAKE::KNOB".to_string()]
        }

        fn signal_domain_type(&self, name: &str) -> Option<Domain> {
            FAKE_SIGNALS.iter().find(|(n, _)| *n == name).map(|(_, d)| *d)
        }

        fn control_domain_type(&self, name: &str) -> Option<Domain> {
            (name == "FAKE::KNOB").then_some(Domain::Package)
        }

        fn signal_info(&self, name: &str) -> Option<SignalInfo> {
            match name {
                "TIME" => Some(SignalInfo::new(Aggregation::SelectFirst, Behavior::Monotone, "s")),
                "FAKE::COUNTER" | "CPU_ENERGY" => {
                    Some(SignalInfo::new(Aggregation::Sum, Behavior::Monotone, ""))
                }
                "FAKE::KNOB" => Some(SignalInfo::new(Aggregation::Average, Behavior::Variable, "")),
                "FAKE::HASH" => Some(SignalInfo {
                    aggregation: None,
                    ..SignalInfo::new(Aggregation::SelectFirst, Behavior::Label, "")
                }),
                _ => None,
            }
        }

        fn read_signal(&mut self, name: &str, idx: usize) -> Result<f64, PlatformIOError> {
            let mut state = self.state.lock().unwrap();
            state.reads += 1;
            match name {
                "TIME" => Ok(state.time),
                "FAKE::COUNTER" if state.deny_counter == Some(idx) => {
                    Err(PlatformIOError::ReadFailed {
                        target: format!("counter {idx}"),
                        detail: "gone".to_string(),
                    })
                }
                "FAKE::COUNTER" => Ok(state.counter[idx]),
                "FAKE::HASH" => Ok(42.0),
                "CPU_ENERGY" => Ok(state.energy[idx]),
                "FAKE::KNOB" => Ok(state.knob[idx]),
                _ => Err(PlatformIOError::UnknownSignal(name.to_string())),
            }
        }

        fn write_control(&mut self, _: &str, idx: usize, setting: f64) -> Result<(), PlatformIOError> {
            let mut state = self.state.lock().unwrap();
            if state.deny_write == Some(idx) {
                return Err(PlatformIOError::WriteFailed {
                    target: format!("knob {idx}"),
                    detail: "permission denied".to_string(),
                });
            }
            state.knob[idx] = setting;
            state.writes.push((idx, setting));
            Ok(())
        }

        fn read_control(&mut self, _: &str, idx: usize) -> Result<f64, PlatformIOError> {
            Ok(self.state.lock().unwrap().knob[idx])
        }
    }

    /// Two packages of two single-threaded cores.
    fn fixture() -> (PlatformIO, Arc<Mutex<FakeState>>) {
        let topo = Arc::new(PlatformTopo::uniform(2, 2, 1).unwrap());
        let state = Arc::new(Mutex::new(FakeState {
            time: 0.0,
            counter: vec![1.0, 2.0, 3.0, 4.0],
            energy: vec![100.0, 200.0],
            knob: vec![1.0, 2.0],
            ..FakeState::default()
        }));
        let mut pio = PlatformIO::new(topo);
        pio.register_iogroup(Box::new(FakeIOGroup {
            name: "fake",
            state: state.clone(),
        }))
        .unwrap();
        (pio, state)
    }

    #[test]
    fn test_names_include_derived_power() {
        let (pio, _) = fixture();
        let names = pio.signal_names();
        assert!(names.contains("TIME"));
        assert!(names.contains("CPU_POWER"));
        assert!(!names.contains("DRAM_POWER"));
        assert_eq!(pio.signal_domain_type("CPU_POWER").unwrap(), Domain::Package);
        assert_eq!(pio.control_names().len(), 1);
    }

    #[test]
    fn test_last_registered_wins() {
        let (mut pio, _) = fixture();
        let shadow = Arc::new(Mutex::new(FakeState {
            counter: vec![10.0, 20.0, 30.0, 40.0],
            ..FakeState::default()
        }));
        pio.register_iogroup(Box::new(FakeIOGroup {
            name: "shadow",
            state: shadow,
        }))
        .unwrap();
        assert_eq!(pio.read_signal("FAKE::COUNTER", Domain::Cpu, 2).unwrap(), 30.0);
    }

    #[test]
    fn test_push_dedup_and_coarser_aggregation() {
        let (mut pio, _) = fixture();
        let a = pio.push_signal("FAKE::COUNTER", Domain::Cpu, 1).unwrap();
        let b = pio.push_signal("FAKE::COUNTER", Domain::Cpu, 1).unwrap();
        let pkg = pio.push_signal("FAKE::COUNTER", Domain::Package, 1).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, pkg);
        pio.read_batch().unwrap();
        assert_eq!(pio.sample(a).unwrap(), 2.0);
        assert_eq!(pio.sample(pkg).unwrap(), 7.0);
    }

    #[test]
    fn test_finer_request_reads_enclosing_instance() {
        let (mut pio, _) = fixture();
        let h = pio.push_signal("CPU_ENERGY", Domain::Cpu, 3).unwrap();
        pio.read_batch().unwrap();
        assert_eq!(pio.sample(h).unwrap(), 200.0);
        assert_eq!(pio.read_signal("CPU_ENERGY", Domain::Core, 1).unwrap(), 100.0);
    }

    #[test]
    fn test_read_batch_reads_each_native_once() {
        let (mut pio, state) = fixture();
        pio.push_signal("FAKE::COUNTER", Domain::Board, 0).unwrap();
        pio.push_signal("FAKE::COUNTER", Domain::Cpu, 0).unwrap();
        pio.push_signal("FAKE::COUNTER", Domain::Package, 0).unwrap();
        pio.read_batch().unwrap();
        assert_eq!(state.lock().unwrap().reads, 4);
    }

    #[test]
    fn test_push_errors() {
        let (mut pio, _) = fixture();
        let kind = |r: Result<usize, PlatformIOError>| r.unwrap_err().kind();
        assert_eq!(kind(pio.push_signal("NOPE", Domain::Board, 0)), ErrorKind::Invalid);
        assert_eq!(
            kind(pio.push_signal("FAKE::COUNTER", Domain::Cpu, 4)),
            ErrorKind::LevelRange
        );
        assert_eq!(
            kind(pio.push_signal("FAKE::COUNTER", Domain::Memory, 0)),
            ErrorKind::Invalid
        );
        assert!(matches!(
            pio.push_signal("FAKE::HASH", Domain::Package, 0),
            Err(PlatformIOError::NoAggregation { .. })
        ));
        assert!(matches!(
            pio.push_control("FAKE::KNOB", Domain::Cpu, 0),
            Err(PlatformIOError::UnsupportedDomain { .. })
        ));
        assert_eq!(kind(pio.push_control("TIME", Domain::Board, 0)), ErrorKind::Invalid);
    }

    #[test]
    fn test_push_after_batch_is_invalid() {
        let (mut pio, _) = fixture();
        let h = pio.push_signal("TIME", Domain::Board, 0).unwrap();
        let c = pio.push_control("FAKE::KNOB", Domain::Package, 0).unwrap();
        pio.read_batch().unwrap();
        assert!(matches!(
            pio.push_signal("CPU_ENERGY", Domain::Board, 0),
            Err(PlatformIOError::PushAfterBatch(_))
        ));
        pio.sample(h).unwrap();
        pio.adjust(c, 1.0).unwrap();
    }

    #[test]
    fn test_sample_errors() {
        let (mut pio, _) = fixture();
        let h = pio.push_signal("TIME", Domain::Board, 0).unwrap();
        assert_eq!(pio.sample(h).unwrap_err().kind(), ErrorKind::Runtime);
        pio.read_batch().unwrap();
        assert_eq!(pio.sample(h + 1).unwrap_err().kind(), ErrorKind::Invalid);
    }

    #[test]
    fn test_adjust_broadcasts_and_overwrites() {
        let (mut pio, state) = fixture();
        let h = pio.push_control("FAKE::KNOB", Domain::Board, 0).unwrap();
        pio.adjust(h, 5.0).unwrap();
        pio.adjust(h, 7.0).unwrap();
        pio.write_batch().unwrap();
        assert_eq!(state.lock().unwrap().writes, vec![(0, 7.0), (1, 7.0)]);

        pio.write_batch().unwrap();
        assert_eq!(state.lock().unwrap().writes.len(), 2);
    }

    #[test]
    fn test_adjust_rejects_nan_and_bad_handle() {
        let (mut pio, _) = fixture();
        let h = pio.push_control("FAKE::KNOB", Domain::Package, 1).unwrap();
        assert!(matches!(
            pio.adjust(h, f64::NAN),
            Err(PlatformIOError::InvalidSetting { .. })
        ));
        assert_eq!(pio.adjust(h + 1, 1.0).unwrap_err().kind(), ErrorKind::Invalid);
    }

    #[test]
    fn test_save_restore_touches_only_written_controls() {
        let (mut pio, state) = fixture();
        pio.save_control().unwrap();
        let h = pio.push_control("FAKE::KNOB", Domain::Package, 1).unwrap();
        pio.adjust(h, 9.0).unwrap();
        pio.write_batch().unwrap();
        assert_eq!(state.lock().unwrap().knob, vec![1.0, 9.0]);

        let saved = pio.saved_controls();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].value, 2.0);
        assert_eq!(saved[0].domain, Domain::Package);

        pio.restore_control().unwrap();
        assert!(!pio.is_session_open());
        let s = state.lock().unwrap();
        assert_eq!(s.knob, vec![1.0, 2.0]);
        assert_eq!(s.writes, vec![(1, 9.0), (1, 2.0)]);
    }

    #[test]
    fn test_restore_is_idempotent() {
        let (mut pio, state) = fixture();
        pio.save_control().unwrap();
        pio.write_control("FAKE::KNOB", Domain::Package, 0, 4.0).unwrap();
        pio.restore_control().unwrap();
        pio.restore_control().unwrap();
        assert_eq!(state.lock().unwrap().knob, vec![1.0, 2.0]);
    }

    #[test]
    fn test_write_failure_attempts_all_writes() {
        let (mut pio, state) = fixture();
        state.lock().unwrap().deny_write = Some(0);
        let h = pio.push_control("FAKE::KNOB", Domain::Board, 0).unwrap();
        pio.adjust(h, 3.0).unwrap();
        let err = pio.write_batch().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MsrWrite);
        assert_eq!(state.lock().unwrap().knob, vec![1.0, 3.0]);
        assert_eq!(pio.write_failures().len(), 1);
        assert_eq!(pio.write_failures()[0].index, 0);
    }

    #[test]
    fn test_session_ordering_errors() {
        let (mut pio, state) = fixture();
        pio.save_control().unwrap();
        assert_eq!(pio.save_control().unwrap_err().kind(), ErrorKind::Logic);
        let err = pio
            .register_iogroup(Box::new(FakeIOGroup {
                name: "late",
                state,
            }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Logic);
    }

    #[test]
    fn test_save_control_resets_handles() {
        let (mut pio, _) = fixture();
        pio.push_signal("TIME", Domain::Board, 0).unwrap();
        pio.read_batch().unwrap();
        pio.save_control().unwrap();
        assert_eq!(pio.num_signal_pushed(), 0);
        assert_eq!(pio.push_signal("CPU_ENERGY", Domain::Board, 0).unwrap(), 0);
    }

    #[test]
    fn test_derived_power_slope() {
        let (mut pio, state) = fixture();
        let power = pio.push_signal("CPU_POWER", Domain::Board, 0).unwrap();
        pio.read_batch().unwrap();
        assert!(pio.sample(power).unwrap().is_nan());
        for _ in 0..10 {
            {
                let mut s = state.lock().unwrap();
                s.time += 0.5;
                s.energy[0] += 10.0;
                s.energy[1] += 20.0;
            }
            pio.read_batch().unwrap();
            assert!((pio.sample(power).unwrap() - 60.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_read_signal_one_shot_combined() {
        let (mut pio, _) = fixture();
        assert_eq!(pio.read_signal("FAKE::COUNTER", Domain::Package, 1).unwrap(), 7.0);
        assert_eq!(pio.read_signal("FAKE::KNOB", Domain::Board, 0).unwrap(), 1.5);
    }

    #[test]
    fn test_write_control_rejects_nan() {
        let (mut pio, _) = fixture();
        assert_eq!(
            pio.write_control("FAKE::KNOB", Domain::Board, 0, f64::NAN)
                .unwrap_err()
                .kind(),
            ErrorKind::Invalid
        );
    }

    #[test]
    fn test_least_squares_slope() {
        let mut h = VecDeque::new();
        assert!(least_squares_slope(&h).is_nan());
        h.push_back((0.0, 1.0));
        h.push_back((1.0, 3.0));
        h.push_back((2.0, 5.0));
        assert!((least_squares_slope(&h) - 2.0).abs() < 1e-12);
        let flat: VecDeque<_> = [(1.0, 1.0), (1.0, 2.0)].into_iter().collect();
        assert!(least_squares_slope(&flat).is_nan());
    }

    #[test]
    fn test_failed_read_affects_only_its_handles() {
        let (mut pio, state) = fixture();
        let time = pio.push_signal("TIME", Domain::Board, 0).unwrap();
        let good = pio.push_signal("FAKE::COUNTER", Domain::Cpu, 0).unwrap();
        let bad = pio.push_signal("FAKE::COUNTER", Domain::Cpu, 3).unwrap();
        let pkg = pio.push_signal("FAKE::COUNTER", Domain::Package, 1).unwrap();
        let power = pio.push_signal("CPU_POWER", Domain::Package, 0).unwrap();
        state.lock().unwrap().deny_counter = Some(3);

        pio.read_batch().unwrap();
        assert_eq!(pio.sample(time).unwrap(), 0.0);
        assert_eq!(pio.sample(good).unwrap(), 1.0);
        let err = pio.sample(bad).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MsrRead);
        assert!(err.to_string().contains("FAKE::COUNTER@cpu:3"));
        assert!(pio.sample(pkg).is_err());
        assert!(pio.sample(power).unwrap().is_nan());

        state.lock().unwrap().deny_counter = None;
        pio.read_batch().unwrap();
        assert_eq!(pio.sample(bad).unwrap(), 4.0);
        assert_eq!(pio.sample(pkg).unwrap(), 7.0);
    }
}
