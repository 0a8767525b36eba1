// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Launch configuration loaded from TOML files or built from CLI flags.
//!
//! # TOML Format
//! ```toml
//! control-period = 0.5
//! timeout = 30.0
//! trace = "trace.psv"
//! append-trace = false
//! report = "stdout"
//! profile = "nightly"
//! initialize-control = ["CPU_FREQUENCY_MAX_CONTROL@package:0=2.0e9"]
//! geopm-report-signals = "CPU_ENERGY@package"
//! signals = ["CPU_ENERGY@package:0=incr", "CPU_FREQUENCY_STATUS"]
//! ```

use crate::RuntimeError;
use platform_io::{ControlRequest, Request};
use std::path::{Path, PathBuf};

/// Options for one controlled launch.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LaunchConfig {
    /// Seconds between control ticks.
    pub control_period: f64,
    /// Seconds before the loop stops controlling; `0` runs until the
    /// workload exits.
    pub timeout: f64,
    /// Trace destination: a path, `"stdout"` or `"-"`.
    pub trace: Option<String>,
    /// Append to an existing trace file instead of truncating it.
    pub append_trace: bool,
    /// Report destination: a path, `"stdout"` or `"-"`.
    pub report: Option<String>,
    /// Profile name for the report header.
    pub profile: Option<String>,
    /// Controls written at session start, `NAME[@DOMAIN[:INDEX]]=VALUE`.
    pub initialize_control: Vec<String>,
    /// Extra report signals, comma separated.
    pub geopm_report_signals: Option<String>,
    /// Signals watched by the monitor agent,
    /// `NAME[@DOMAIN[:INDEX]][=incr|avg]`.
    pub signals: Vec<String>,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            control_period: 1.0,
            timeout: 0.0,
            trace: None,
            append_trace: false,
            report: None,
            profile: None,
            initialize_control: Vec::new(),
            geopm_report_signals: None,
            signals: Vec::new(),
        }
    }
}

impl LaunchConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::ConfigError(format!("cannot read config '{}': {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, RuntimeError> {
        toml::from_str(toml_str)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML parse error: {e}")))
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, RuntimeError> {
        toml::to_string_pretty(self)
            .map_err(|e| RuntimeError::ConfigError(format!("TOML serialise error: {e}")))
    }

    /// Checks the period, the timeout and every initial control.
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if !self.control_period.is_finite() || self.control_period <= 0.0 {
            return Err(RuntimeError::InvalidPeriod(self.control_period));
        }
        if !self.timeout.is_finite() || self.timeout < 0.0 {
            return Err(RuntimeError::InvalidTimeout(self.timeout));
        }
        self.initial_controls().map(|_| ())
    }

    pub fn initial_controls(&self) -> Result<Vec<InitialControl>, RuntimeError> {
        self.initialize_control
            .iter()
            .map(|s| s.parse())
            .collect()
    }

    pub fn trace_target(&self) -> Option<OutputTarget> {
        self.trace.as_deref().map(OutputTarget::parse)
    }

    pub fn report_target(&self) -> Option<OutputTarget> {
        self.report.as_deref().map(OutputTarget::parse)
    }
}

/// A control value written once when the session opens.
#[derive(Debug, Clone, PartialEq)]
pub struct InitialControl {
    pub request: ControlRequest,
    pub value: f64,
}

impl std::str::FromStr for InitialControl {
    type Err = RuntimeError;

    /// Parses `NAME[@DOMAIN[:INDEX]]=VALUE`; the request defaults to
    /// board 0.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RuntimeError::InvalidInitialControl(s.to_string());
        let (name, value) = s.rsplit_once('=').ok_or_else(invalid)?;
        let value: f64 = value.trim().parse().map_err(|_| invalid())?;
        if value.is_nan() {
            return Err(invalid());
        }
        let request = Request::parse(name.trim()).map_err(|_| invalid())?;
        Ok(Self { request, value })
    }
}

/// Where a trace or report goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    Stdout,
    File(PathBuf),
}

impl OutputTarget {
    /// `""`, `"stdout"` and `"-"` mean standard output.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "" | "stdout" | "-" => OutputTarget::Stdout,
            path => OutputTarget::File(PathBuf::from(path)),
        }
    }
}
