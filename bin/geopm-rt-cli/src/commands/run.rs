// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `geopmrt run` command: launch a workload under the monitor agent.
//!
//! Settings are layered as:
//! ```text
//! LaunchConfig::default → --config TOML → command-line flags → validate
//! ```
//! The report goes to `--report`, then `GEOPM_REPORT`, then stdout.

use anyhow::Context;
use platform_io::PlatformIO;
use runtime::{
    Controller, Environment, LaunchConfig, MonitorAgent, MonitorKind, MonitoredSignal,
    OutputTarget, Tracer,
};
use std::path::PathBuf;

#[derive(clap::Args)]
pub struct RunArgs {
    /// Seconds between control ticks.
    #[arg(long)]
    control_period: Option<f64>,

    /// Stop controlling after this many seconds (0 = until the workload exits).
    #[arg(long)]
    timeout: Option<f64>,

    /// Write a per-tick trace to this path, or "stdout".
    #[arg(long)]
    trace: Option<String>,

    /// Append to an existing trace file instead of truncating it.
    #[arg(long)]
    append_trace: bool,

    /// Write the report to this path, or "stdout".
    #[arg(long)]
    report: Option<String>,

    /// Profile name recorded in the report header.
    #[arg(long)]
    profile: Option<String>,

    /// Control written at session start, NAME[@DOMAIN[:INDEX]]=VALUE (repeatable).
    #[arg(long = "initial-control", value_name = "NAME=VALUE")]
    initial_control: Vec<String>,

    /// Extra report signals, comma separated.
    #[arg(long = "report-signals")]
    report_signals: Option<String>,

    /// Signal to total in the report, NAME[@DOMAIN[:INDEX]][=incr|avg] (repeatable).
    #[arg(long = "signal", value_name = "SIGNAL")]
    signals: Vec<String>,

    /// Agent policy as a JSON object.
    #[arg(long)]
    policy: Option<String>,

    /// Workload command and its arguments.
    #[arg(last = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

impl RunArgs {
    /// Overlays the flags that were given onto `config`.
    fn apply(&self, config: &mut LaunchConfig) {
        if let Some(period) = self.control_period {
            config.control_period = period;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if self.trace.is_some() {
            config.trace = self.trace.clone();
        }
        config.append_trace |= self.append_trace;
        if self.report.is_some() {
            config.report = self.report.clone();
        }
        if self.profile.is_some() {
            config.profile = self.profile.clone();
        }
        config
            .initialize_control
            .extend(self.initial_control.iter().cloned());
        if self.report_signals.is_some() {
            config.geopm_report_signals = self.report_signals.clone();
        }
        config.signals.extend(self.signals.iter().cloned());
    }
}

/// Runs the workload and returns its exit status truncated to a byte.
pub fn execute(
    config_path: Option<PathBuf>,
    args: RunArgs,
    environment: Environment,
) -> anyhow::Result<u8> {
    // ── Configuration ──────────────────────────────────────────
    let mut config = match &config_path {
        Some(path) => LaunchConfig::from_file(path)?,
        None => LaunchConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    let initial_controls = config.initial_controls()?;
    let policy: Option<serde_json::Value> = args
        .policy
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .context("--policy is not valid JSON")?;

    let report_target = config
        .report_target()
        .or_else(|| environment.report.clone().map(OutputTarget::File))
        .unwrap_or(OutputTarget::Stdout);

    tracing::info!(
        command = %args.command.join(" "),
        period = config.control_period,
        timeout = config.timeout,
        "launching workload"
    );

    // ── Session ────────────────────────────────────────────────
    let mut pio = platform_io::acquire()?;
    let mut agent = MonitorAgent::new(
        config.control_period,
        monitored_signals(&pio, &config.signals)?,
    )?;
    let mut controller = Controller::new(&mut agent, config.timeout)?
        .with_environment(environment)
        .with_initial_controls(initial_controls);
    if let Some(profile) = &config.profile {
        controller = controller.with_profile(profile);
    }
    if let Some(signals) = &config.geopm_report_signals {
        controller = controller.with_report_signals(signals);
    }
    if let Some(target) = config.trace_target() {
        controller = controller.with_tracer(Tracer::open(&target, config.append_trace)?);
    }

    let result = controller.run_with(&mut pio, &args.command, policy.as_ref());
    drop(pio);

    // ── Report ─────────────────────────────────────────────────
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            if let Some(report) = err.report() {
                if let Err(write_err) = write_report(&report_target, report) {
                    tracing::warn!("cannot write report of failed run: {write_err:#}");
                }
            }
            return Err(err.into());
        }
    };
    write_report(&report_target, &report)?;
    tracing::info!("{}", controller.metrics().summary());

    let code = controller.wait()?;
    tracing::info!(code, "workload exited");
    Ok((code & 0xff) as u8)
}

/// Resolves the configured signal list. Signals without an explicit
/// `=incr|avg` are totalled according to their behaviour.
fn monitored_signals(pio: &PlatformIO, specs: &[String]) -> anyhow::Result<Vec<MonitoredSignal>> {
    specs
        .iter()
        .map(|spec| {
            let mut signal = MonitoredSignal::parse(spec, MonitorKind::Avg)?;
            if !spec.contains('=') {
                let info = pio.signal_info(&signal.request.name)?;
                signal.kind = MonitorKind::for_behavior(info.behavior);
            }
            Ok(signal)
        })
        .collect()
}

fn write_report(target: &OutputTarget, report: &str) -> anyhow::Result<()> {
    match target {
        OutputTarget::Stdout => {
            print!("{report}");
            Ok(())
        }
        OutputTarget::File(path) => std::fs::write(path, report)
            .with_context(|| format!("cannot write report '{}'", path.display())),
    }
}
