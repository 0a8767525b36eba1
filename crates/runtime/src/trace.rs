// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Per-tick trace output.
//!
//! One `|`-separated row per control tick: `TIME`, then every agent
//! signal, then every control setting the agent returned. The header row
//! names the columns `NAME@domain@index`.
//!
//! ```text
//! TIME|CPU_ENERGY@package@0|CPU_FREQUENCY_MAX_CONTROL@package@0
//! 0.0012|1234.5|2000000000
//! ```

use crate::config::OutputTarget;
use crate::RuntimeError;
use platform_io::{ControlRequest, Format, PlatformIO, SignalRequest};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};

const SEPARATOR: &str = "|";

/// Column name for a request.
pub fn column_label(request: &platform_io::Request) -> String {
    format!("{}@{}@{}", request.name, request.domain, request.index)
}

/// Writes the control loop trace.
///
/// A write failure disables the tracer with a warning; the control loop
/// keeps running.
pub struct Tracer {
    out: Box<dyn Write + Send>,
    target: String,
    formats: Vec<Format>,
    num_control: usize,
    enabled: bool,
    rows: usize,
}

impl Tracer {
    /// Opens `target`, truncating an existing file unless `append`.
    pub fn open(target: &OutputTarget, append: bool) -> Result<Self, RuntimeError> {
        match target {
            OutputTarget::Stdout => Ok(Self::from_writer(Box::new(std::io::stdout()), "stdout")),
            OutputTarget::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(append)
                    .truncate(!append)
                    .open(path)
                    .map_err(|source| RuntimeError::Output {
                        path: path.display().to_string(),
                        source,
                    })?;
                Ok(Self::from_writer(
                    Box::new(BufWriter::new(file)),
                    &path.display().to_string(),
                ))
            }
        }
    }

    pub fn from_writer(out: Box<dyn Write + Send>, target: &str) -> Self {
        Self {
            out,
            target: target.to_string(),
            formats: Vec::new(),
            num_control: 0,
            enabled: true,
            rows: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Data rows written so far.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Writes the header row and picks each signal column's format from
    /// its metadata.
    pub fn begin(
        &mut self,
        pio: &PlatformIO,
        signals: &[SignalRequest],
        controls: &[ControlRequest],
    ) {
        self.formats = signals
            .iter()
            .map(|s| pio.signal_info(&s.name).map_or(Format::Double, |info| info.format))
            .collect();
        self.num_control = controls.len();
        self.rows = 0;
        let header: Vec<String> = std::iter::once("TIME".to_string())
            .chain(signals.iter().map(column_label))
            .chain(controls.iter().map(column_label))
            .collect();
        self.write_line(&header.join(SEPARATOR));
    }

    /// Writes one row. Missing settings, as on a tick that ended early,
    /// are written as `NAN`.
    pub fn record(&mut self, time: f64, samples: &[f64], settings: &[f64]) {
        if !self.enabled {
            return;
        }
        let mut fields = Vec::with_capacity(1 + samples.len() + self.num_control);
        fields.push(Format::Double.format(time));
        for (i, value) in samples.iter().enumerate() {
            let format = self.formats.get(i).copied().unwrap_or(Format::Double);
            fields.push(format.format(*value));
        }
        for i in 0..self.num_control {
            let value = settings.get(i).copied().unwrap_or(f64::NAN);
            fields.push(Format::Double.format(value));
        }
        self.write_line(&fields.join(SEPARATOR));
        self.rows += 1;
    }

    pub fn flush(&mut self) {
        if self.enabled {
            if let Err(e) = self.out.flush() {
                self.disable(e);
            }
        }
    }

    fn write_line(&mut self, line: &str) {
        if !self.enabled {
            return;
        }
        if let Err(e) = writeln!(self.out, "{line}") {
            self.disable(e);
        }
    }

    fn disable(&mut self, e: std::io::Error) {
        tracing::warn!("trace output to {} failed, tracing disabled: {e}", self.target);
        self.enabled = false;
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("target", &self.target)
            .field("enabled", &self.enabled)
            .field("rows", &self.rows)
            .finish()
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        self.flush();
    }
}
