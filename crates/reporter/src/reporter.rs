// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! End-of-run report.
//!
//! The [`Reporter`] pushes a fixed set of board-level signals alongside
//! the agent's own, folds every batch into a [`SampleAggregator`] and
//! renders a YAML-shaped document:
//!
//! ```text
//! GEOPM Version: 0.1.0
//! Start Time: 2026-10-18T09:30:00+00:00
//! Profile: sleep
//! Agent: monitor
//! Policy: {}
//!
//! Hosts:
//!   node0:
//!     Application Totals:
//!       runtime (s): 2.001
//!       sync-runtime (s): 2.001
//!       package-energy (J): 61.2
//!       ...
//! ```

use crate::aggregator::{SampleAggregator, UNMARKED_HASH};
use crate::ReporterError;
use geopm_error::ErrorKind;
use platform_io::{Format, PlatformIO, SavedControl};
use platform_topo::Domain;

/// Board-level signals the report is built from.
const TIME: &str = "TIME";
const CPU_ENERGY: &str = "CPU_ENERGY";
const DRAM_ENERGY: &str = "DRAM_ENERGY";
const CPU_FREQUENCY: &str = "CPU_FREQUENCY_STATUS";

const TIME_HINTS: [(&str, &str); 9] = [
    ("time-hint-network (s)", "TIME_HINT_NETWORK"),
    ("time-hint-ignore (s)", "TIME_HINT_IGNORE"),
    ("time-hint-compute (s)", "TIME_HINT_COMPUTE"),
    ("time-hint-memory (s)", "TIME_HINT_MEMORY"),
    ("time-hint-io (s)", "TIME_HINT_IO"),
    ("time-hint-serial (s)", "TIME_HINT_SERIAL"),
    ("time-hint-parallel (s)", "TIME_HINT_PARALLEL"),
    ("time-hint-unknown (s)", "TIME_HINT_UNKNOWN"),
    ("time-hint-unset (s)", "TIME_HINT_UNSET"),
];

const INDENT_HOST: usize = 2;
const INDENT_SECTION: usize = 4;
const INDENT_FIELD: usize = 6;

/// How one report field is computed from aggregated signals. `None`
/// marks a signal that could not be pushed.
#[derive(Debug, Clone)]
enum Field {
    Sample(Option<usize>),
    Ratio(Option<usize>, Option<usize>),
}

/// Failure details appended to the report of a terminated run.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ErrorSection {
    pub kind: ErrorKind,
    pub message: String,
    /// Controls that were saved when the run failed.
    pub saved_controls: Vec<SavedControl>,
}

/// Caller-provided report content.
#[derive(Debug, Clone, Default)]
pub struct ReportExtras {
    pub policy: Option<serde_json::Value>,
    /// Extra `key: value` lines after the header.
    pub agent_header: Vec<(String, String)>,
    /// Extra `key: value` lines at the top of the host section.
    pub agent_host: Vec<(String, String)>,
    /// Extra `key: value` lines at the end of the application totals.
    pub agent_totals: Vec<(String, String)>,
    pub error: Option<ErrorSection>,
}

/// Collects run statistics and renders the report.
#[derive(Debug, Clone)]
pub struct Reporter {
    env_signals: String,
    hostname: String,
    start_time: Option<String>,
    aggregator: SampleAggregator,
    time: Option<usize>,
    fields: Vec<(String, Field)>,
    env_fields: Vec<(String, Option<usize>)>,
}

impl Reporter {
    /// Creates a reporter. `env_signals` is a comma-separated list of
    /// extra signals, each `NAME` or `NAME@domain`.
    pub fn new(env_signals: &str) -> Self {
        Self {
            env_signals: env_signals.to_string(),
            hostname: hostname(),
            start_time: None,
            aggregator: SampleAggregator::new(),
            time: None,
            fields: Vec::new(),
            env_fields: Vec::new(),
        }
    }

    /// Overrides the host name shown in the report.
    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = hostname.to_string();
        self
    }

    /// Records the start time and pushes every signal the report needs.
    ///
    /// `TIME` is mandatory. Other built-in and extra signals that the
    /// platform cannot provide are reported as missing.
    pub fn init(&mut self, pio: &mut PlatformIO) -> Result<(), ReporterError> {
        if self.time.is_some() {
            return Err(ReporterError::AlreadyInitialized);
        }
        self.start_time = Some(
            chrono::Local::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, false),
        );
        let time = self.aggregator.push_signal(pio, TIME, Domain::Board, 0)?;
        self.time = Some(time);

        let energy = self.push_optional(pio, CPU_ENERGY, Domain::Board, 0)?;
        let dram = self.push_optional(pio, DRAM_ENERGY, Domain::Board, 0)?;
        let frequency = self.push_optional(pio, CPU_FREQUENCY, Domain::Board, 0)?;
        let mut fields = vec![
            ("sync-runtime (s)".to_string(), Field::Sample(Some(time))),
            ("package-energy (J)".to_string(), Field::Sample(energy)),
            ("dram-energy (J)".to_string(), Field::Sample(dram)),
            ("power (W)".to_string(), Field::Ratio(energy, Some(time))),
            ("frequency (Hz)".to_string(), Field::Sample(frequency)),
        ];
        for (label, signal) in TIME_HINTS {
            let idx = self.push_optional(pio, signal, Domain::Board, 0)?;
            fields.push((label.to_string(), Field::Sample(idx)));
        }
        self.fields = fields;

        self.init_env_signals(pio)?;
        self.aggregator.track_regions(pio)?;
        self.aggregator.track_epochs(pio)?;
        tracing::debug!(
            fields = self.fields.len(),
            extra = self.env_fields.len(),
            regions = self.aggregator.is_tracking_regions(),
            epochs = self.aggregator.is_tracking_epochs(),
            "reporter initialized"
        );
        Ok(())
    }

    fn init_env_signals(&mut self, pio: &mut PlatformIO) -> Result<(), ReporterError> {
        let names: Vec<String> = self
            .env_signals
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        for signal in names {
            let parts: Vec<&str> = signal.split('@').collect();
            match parts.as_slice() {
                [name] => {
                    let idx = self.push_optional(pio, name, Domain::Board, 0)?;
                    self.env_fields.push((signal.clone(), idx));
                }
                [name, domain] => {
                    let domain = Domain::from_name(domain)?;
                    for index in 0..pio.topo().num_domain(domain) {
                        let idx = self.push_optional(pio, name, domain, index)?;
                        self.env_fields.push((format!("{signal}-{index}"), idx));
                    }
                }
                _ => return Err(ReporterError::MultipleAt(signal.clone())),
            }
        }
        Ok(())
    }

    /// Pushes a signal the report can live without. Platform I/O failures
    /// are logged and yield `None`; anything else is fatal.
    fn push_optional(
        &mut self,
        pio: &mut PlatformIO,
        name: &str,
        domain: Domain,
        index: usize,
    ) -> Result<Option<usize>, ReporterError> {
        match self.aggregator.push_signal(pio, name, domain, index) {
            Ok(idx) => Ok(Some(idx)),
            Err(ReporterError::PlatformIO(e)) => {
                tracing::debug!(signal = name, %domain, index, error = %e, "report signal unavailable");
                if !self.is_builtin(name) {
                    tracing::warn!(signal = name, error = %e, "report signal will be missing");
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn is_builtin(&self, name: &str) -> bool {
        [TIME, CPU_ENERGY, DRAM_ENERGY, CPU_FREQUENCY].contains(&name)
            || TIME_HINTS.iter().any(|(_, signal)| *signal == name)
    }

    /// Folds the most recent batch into the report statistics.
    pub fn update(&mut self, pio: &PlatformIO) -> Result<(), ReporterError> {
        if self.time.is_none() {
            return Err(ReporterError::NotInitialized);
        }
        self.aggregator.update(pio)
    }

    pub fn aggregator(&self) -> &SampleAggregator {
        &self.aggregator
    }

    pub fn start_time(&self) -> Option<&str> {
        self.start_time.as_deref()
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Application-wide `TIME` delta, or NaN before `init()`.
    pub fn total_runtime(&self) -> f64 {
        self.time
            .and_then(|t| self.aggregator.sample_application(t).ok())
            .unwrap_or(f64::NAN)
    }

    pub fn generate(&self, profile: &str, agent: &str) -> String {
        self.generate_with(profile, agent, &ReportExtras::default())
    }

    /// Renders the report. Calling this repeatedly without an intervening
    /// `update()` yields identical text.
    pub fn generate_with(&self, profile: &str, agent: &str, extras: &ReportExtras) -> String {
        let mut out = Yaml::default();
        let policy = extras
            .policy
            .as_ref()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "{}".to_string());
        out.field(0, "GEOPM Version", env!("CARGO_PKG_VERSION"));
        out.field(0, "Start Time", self.start_time.as_deref().unwrap_or(""));
        out.field(0, "Profile", profile);
        out.field(0, "Agent", agent);
        out.field(0, "Policy", &policy);
        for (key, value) in &extras.agent_header {
            out.field(0, key, value);
        }
        out.blank();
        out.line(0, "Hosts:");
        out.line(INDENT_HOST, &format!("{}:", self.hostname));
        for (key, value) in &extras.agent_host {
            out.field(INDENT_SECTION, key, value);
        }

        out.line(INDENT_SECTION, "Application Totals:");
        out.field(INDENT_FIELD, "runtime (s)", &render(self.total_runtime()));
        self.write_fields(&mut out, |agg, idx| agg.sample_application(idx), true);
        for (key, value) in &extras.agent_totals {
            out.field(INDENT_FIELD, key, value);
        }

        if self.aggregator.is_tracking_regions() {
            self.write_regions(&mut out);
            out.line(INDENT_SECTION, "Unmarked Totals:");
            self.write_bucket_totals(&mut out, UNMARKED_HASH, 0);
        }

        if self.aggregator.is_tracking_epochs() {
            out.line(INDENT_SECTION, "Epoch Totals:");
            let runtime = self.sample_time(|agg, idx| agg.sample_epoch(idx));
            out.field(INDENT_FIELD, "runtime (s)", &render(runtime));
            out.field(
                INDENT_FIELD,
                "count",
                &Format::Integer.format(self.aggregator.epoch_count()),
            );
            self.write_fields(&mut out, |agg, idx| agg.sample_epoch(idx), false);
        }

        if let Some(error) = &extras.error {
            write_error(&mut out, error);
        }
        out.finish()
    }

    fn sample_time<F>(&self, sample: F) -> f64
    where
        F: Fn(&SampleAggregator, usize) -> Result<f64, ReporterError>,
    {
        self.time
            .and_then(|t| sample(&self.aggregator, t).ok())
            .unwrap_or(f64::NAN)
    }

    fn write_regions(&self, out: &mut Yaml) {
        let mut regions: Vec<(u64, usize, f64)> = self
            .aggregator
            .region_counts()
            .iter()
            .map(|(&hash, &count)| {
                let runtime = self.sample_time(|agg, idx| agg.sample_region(idx, hash));
                (hash, count, runtime)
            })
            .collect();
        regions.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));

        out.line(INDENT_SECTION, "Regions:");
        for (hash, count, _) in regions {
            out.line(INDENT_SECTION, "-");
            out.field(INDENT_FIELD, "hash", &Format::Hex.format(hash as f64));
            self.write_bucket_totals(out, hash, count);
        }
    }

    fn write_bucket_totals(&self, out: &mut Yaml, hash: u64, count: usize) {
        let runtime = self.sample_time(|agg, idx| agg.sample_region(idx, hash));
        out.field(INDENT_FIELD, "runtime (s)", &render(runtime));
        out.field(INDENT_FIELD, "count", &count.to_string());
        self.write_fields(out, |agg, idx| agg.sample_region(idx, hash), false);
    }

    fn write_fields<F>(&self, out: &mut Yaml, sample: F, with_warnings: bool)
    where
        F: Fn(&SampleAggregator, usize) -> Result<f64, ReporterError>,
    {
        let value_of = |idx: Option<usize>| {
            idx.and_then(|i| sample(&self.aggregator, i).ok())
                .unwrap_or(f64::NAN)
        };
        let warning_of = |idx: Option<usize>| {
            idx.filter(|_| with_warnings)
                .and_then(|i| self.aggregator.warning(i).ok().flatten())
        };
        for (label, field) in &self.fields {
            let (value, warning) = match field {
                Field::Sample(idx) => (value_of(*idx), warning_of(*idx)),
                Field::Ratio(numer, denom) => (ratio(value_of(*numer), value_of(*denom)), None),
            };
            out.flagged(INDENT_FIELD, label, &render(value), warning);
        }
        for (label, idx) in &self.env_fields {
            out.flagged(INDENT_FIELD, label, &render(value_of(*idx)), warning_of(*idx));
        }
    }
}

fn ratio(numer: f64, denom: f64) -> f64 {
    if denom == 0.0 {
        0.0
    } else {
        numer / denom
    }
}

fn render(value: f64) -> String {
    Format::Double.format(value)
}

fn write_error(out: &mut Yaml, error: &ErrorSection) {
    out.blank();
    out.line(0, "Error:");
    out.field(2, "kind", error.kind.name());
    out.field(2, "code", &error.kind.code().to_string());
    out.field(2, "message", &quote(&error.message));
    if error.saved_controls.is_empty() {
        out.field(2, "Saved Controls", "[]");
        return;
    }
    out.line(2, "Saved Controls:");
    for control in &error.saved_controls {
        out.line(2, "-");
        out.field(4, "name", &control.name);
        out.field(4, "domain", control.domain.name());
        out.field(4, "index", &control.index.to_string());
        out.field(4, "value", &render(control.value));
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Line-oriented YAML writer.
#[derive(Default)]
struct Yaml {
    text: String,
}

impl Yaml {
    fn line(&mut self, indent: usize, text: &str) {
        self.text.extend(std::iter::repeat(' ').take(indent));
        self.text.push_str(text);
        self.text.push('\n');
    }

    fn field(&mut self, indent: usize, key: &str, value: &str) {
        self.line(indent, &format!("{key}: {value}"));
    }

    fn flagged(&mut self, indent: usize, key: &str, value: &str, warning: Option<&str>) {
        match warning {
            Some(w) => self.line(indent, &format!("{key}: {value}  # {w}")),
            None => self.field(indent, key, value),
        }
    }

    fn blank(&mut self) {
        self.text.push('\n');
    }

    fn finish(self) -> String {
        self.text
    }
}

fn hostname() -> String {
    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}
