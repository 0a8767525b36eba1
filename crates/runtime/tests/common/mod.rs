// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shared fixtures for the controller tests: a simulated platform backend
//! and a scripted agent.

#![allow(dead_code)]

use platform_io::{
    Aggregation, Behavior, ControlRequest, IOGroup, PlatformIO, PlatformIOError, Request,
    SignalInfo, SignalRequest,
};
use platform_topo::{Domain, PlatformTopo};
use runtime::Agent;
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub const FREQ_CONTROL: &str = "CPU_FREQUENCY_MAX_CONTROL";
pub const CPU_ID: &str = "SIM::CPU_ID";
/// Constant package power drawn by the simulated node.
pub const SIM_POWER: f64 = 100.0;
pub const SAVED_FREQ: f64 = 1.5e9;

// ── Simulated backend ──────────────────────────────────────────

pub struct SimState {
    pub start: Instant,
    pub knob: Vec<f64>,
    pub writes: Vec<(usize, f64)>,
    pub time_reads: usize,
}

/// One package of two cores drawing a constant power. `TIME` and
/// `CPU_ENERGY` follow the wall clock.
pub struct SimIOGroup {
    state: Arc<Mutex<SimState>>,
}

const SIGNALS: [(&str, Domain); 4] = [
    ("TIME", Domain::Board),
    ("CPU_ENERGY", Domain::Package),
    (FREQ_CONTROL, Domain::Package),
    (CPU_ID, Domain::Cpu),
];

impl IOGroup for SimIOGroup {
    fn name(&self) -> &str {
        "sim"
    }

    fn signal_names(&self) -> Vec<String> {
        SIGNALS.iter().map(|(n, _)| n.to_string()).collect()
    }

    fn control_names(&self) -> Vec<String> {
        vec![FREQ_CONTROL.to_string()]
    }

    fn signal_domain_type(&self, name: &str) -> Option<Domain> {
        SIGNALS.iter().find(|(n, _)| *n == name).map(|(_, d)| *d)
    }

    fn control_domain_type(&self, name: &str) -> Option<Domain> {
        (name == FREQ_CONTROL).then_some(Domain::Package)
    }

    fn signal_info(&self, name: &str) -> Option<SignalInfo> {
        match name {
            "TIME" => Some(SignalInfo::new(Aggregation::SelectFirst, Behavior::Monotone, "seconds")),
            "CPU_ENERGY" => Some(SignalInfo::new(Aggregation::Sum, Behavior::Monotone, "joules")),
            FREQ_CONTROL => Some(SignalInfo::new(Aggregation::Average, Behavior::Variable, "hertz")),
            CPU_ID => Some(SignalInfo::new(Aggregation::Average, Behavior::Constant, "none")),
            _ => None,
        }
    }

    fn read_signal(&mut self, name: &str, idx: usize) -> Result<f64, PlatformIOError> {
        let mut state = self.state.lock().unwrap();
        let now = state.start.elapsed().as_secs_f64();
        match name {
            "TIME" => {
                state.time_reads += 1;
                Ok(now)
            }
            "CPU_ENERGY" => Ok(1000.0 + SIM_POWER * now),
            FREQ_CONTROL => Ok(state.knob[idx]),
            CPU_ID => Ok(idx as f64 + 1.0),
            _ => Err(PlatformIOError::UnknownSignal(name.to_string())),
        }
    }

    fn write_control(&mut self, _: &str, idx: usize, setting: f64) -> Result<(), PlatformIOError> {
        let mut state = self.state.lock().unwrap();
        state.knob[idx] = setting;
        state.writes.push((idx, setting));
        Ok(())
    }

    fn read_control(&mut self, _: &str, idx: usize) -> Result<f64, PlatformIOError> {
        Ok(self.state.lock().unwrap().knob[idx])
    }
}

pub fn sim_platform() -> (PlatformIO, Arc<Mutex<SimState>>) {
    let topo = Arc::new(PlatformTopo::uniform(1, 2, 1).unwrap());
    let state = Arc::new(Mutex::new(SimState {
        start: Instant::now(),
        knob: vec![SAVED_FREQ],
        writes: Vec::new(),
        time_reads: 0,
    }));
    let mut pio = PlatformIO::new(topo);
    pio.register_iogroup(Box::new(SimIOGroup {
        state: state.clone(),
    }))
    .unwrap();
    (pio, state)
}

pub const FLAKY: &str = "SIM::FLAKY";

/// Board signal that reads fine a fixed number of times and then fails
/// for good.
pub struct FlakyIOGroup {
    good_reads: usize,
    reads: usize,
}

impl IOGroup for FlakyIOGroup {
    fn name(&self) -> &str {
        "flaky"
    }

    fn signal_names(&self) -> Vec<String> {
        vec![FLAKY.to_string()]
    }

    fn control_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn signal_domain_type(&self, name: &str) -> Option<Domain> {
        (name == FLAKY).then_some(Domain::Board)
    }

    fn control_domain_type(&self, _: &str) -> Option<Domain> {
        None
    }

    fn signal_info(&self, name: &str) -> Option<SignalInfo> {
        (name == FLAKY)
            .then(|| SignalInfo::new(Aggregation::Average, Behavior::Variable, "none"))
    }

    fn read_signal(&mut self, name: &str, _: usize) -> Result<f64, PlatformIOError> {
        self.reads += 1;
        if self.reads > self.good_reads {
            return Err(PlatformIOError::ReadFailed {
                target: name.to_string(),
                detail: "gone".to_string(),
            });
        }
        Ok(1.0)
    }

    fn write_control(&mut self, name: &str, _: usize, _: f64) -> Result<(), PlatformIOError> {
        Err(PlatformIOError::UnknownControl(name.to_string()))
    }

    fn read_control(&mut self, name: &str, _: usize) -> Result<f64, PlatformIOError> {
        Err(PlatformIOError::UnknownControl(name.to_string()))
    }
}

/// Adds [`FLAKY`] to `pio`, failing after `good_reads` reads.
pub fn add_flaky_signal(pio: &mut PlatformIO, good_reads: usize) {
    pio.register_iogroup(Box::new(FlakyIOGroup {
        good_reads,
        reads: 0,
    }))
    .unwrap();
}

// ── Scripted agent ─────────────────────────────────────────────

/// Agent that returns a fixed setting for every control and records
/// every update.
pub struct ScriptedAgent {
    pub signals: Vec<SignalRequest>,
    pub controls: Vec<ControlRequest>,
    pub period: f64,
    pub setting: f64,
    /// Zero-based update at which `update()` fails.
    pub fail_on_update: Option<usize>,
    /// Return one setting too many.
    pub extra_setting: bool,
    pub updates: Vec<Vec<f64>>,
    pub begins: usize,
    pub ends: usize,
    pub profile: Option<String>,
}

impl ScriptedAgent {
    pub fn new(period: f64, signals: Vec<SignalRequest>) -> Self {
        Self {
            signals,
            controls: Vec::new(),
            period,
            setting: 2.0e9,
            fail_on_update: None,
            extra_setting: false,
            updates: Vec::new(),
            begins: 0,
            ends: 0,
            profile: None,
        }
    }

    pub fn with_controls(mut self, controls: Vec<ControlRequest>) -> Self {
        self.controls = controls;
        self
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    fn get_signals(&self) -> Vec<SignalRequest> {
        self.signals.clone()
    }

    fn get_controls(&self) -> Vec<ControlRequest> {
        self.controls.clone()
    }

    fn get_period(&self) -> f64 {
        self.period
    }

    fn run_begin(
        &mut self,
        _policy: Option<&serde_json::Value>,
        profile: &str,
    ) -> geopm_error::Result<()> {
        self.begins += 1;
        self.updates.clear();
        self.profile = Some(profile.to_string());
        Ok(())
    }

    fn update(&mut self, signals: &[f64]) -> geopm_error::Result<Vec<f64>> {
        if self.fail_on_update == Some(self.updates.len()) {
            self.updates.push(signals.to_vec());
            return Err(geopm_error::Error::runtime("scripted failure"));
        }
        self.updates.push(signals.to_vec());
        let count = self.controls.len() + usize::from(self.extra_setting);
        Ok(vec![self.setting; count])
    }

    fn run_end(&mut self) {
        self.ends += 1;
    }

    fn report_totals(&self) -> Vec<(String, String)> {
        vec![("updates".to_string(), self.updates.len().to_string())]
    }
}

// ── Helpers ────────────────────────────────────────────────────

pub fn argv(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

pub fn time() -> Request {
    Request::board("TIME")
}

pub fn freq_control() -> Request {
    Request::new(FREQ_CONTROL, Domain::Package, 0)
}

/// Value of the first `key: value` line in a report, ignoring any
/// trailing comment.
pub fn report_value(report: &str, key: &str) -> Option<f64> {
    let prefix = format!("{key}: ");
    report
        .lines()
        .map(str::trim_start)
        .find_map(|line| line.strip_prefix(&prefix))
        .and_then(|rest| rest.split("  #").next())
        .and_then(|value| value.trim().parse().ok())
}
