// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The interface between the controller and a control algorithm.
//!
//! An agent declares which signals it reads and which controls it sets,
//! and at every tick maps the sampled signals to new control settings.
//! The controller drives it through one session at a time:
//!
//! ```text
//! run_begin → update* → run_end → get_report
//! ```

use platform_io::{ControlRequest, SignalRequest};
use reporter::{ReportExtras, Reporter};

/// A control algorithm driven by the [`Controller`](crate::Controller).
pub trait Agent {
    /// Short name shown in the report header.
    fn name(&self) -> &str;

    /// Signals passed to [`update`](Agent::update), in order.
    fn get_signals(&self) -> Vec<SignalRequest>;

    /// Controls set from the return value of [`update`](Agent::update), in
    /// order.
    fn get_controls(&self) -> Vec<ControlRequest>;

    /// Seconds between updates. Must be greater than zero.
    fn get_period(&self) -> f64;

    /// Called once per session after all pushes and before the first tick.
    fn run_begin(
        &mut self,
        policy: Option<&serde_json::Value>,
        profile: &str,
    ) -> geopm_error::Result<()>;

    /// Maps one sample per declared signal to one setting per declared
    /// control.
    fn update(&mut self, signals: &[f64]) -> geopm_error::Result<Vec<f64>>;

    /// Called once per session, on success and on failure, before controls
    /// are restored.
    fn run_end(&mut self);

    /// `key: value` lines added after the report header.
    fn report_header(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// `key: value` lines added to the application totals.
    fn report_totals(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// The end-of-run report. Must depend only on state recorded up to
    /// `run_end`.
    fn get_report(&self, profile: &str, reporter: &Reporter, mut extras: ReportExtras) -> String {
        extras.agent_header.extend(self.report_header());
        extras.agent_totals.extend(self.report_totals());
        reporter.generate_with(profile, self.name(), &extras)
    }
}
