// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! An agent that only watches.
//!
//! [`MonitorAgent`] declares no controls. It samples a configured list of
//! signals plus `TIME` and adds one total per signal to the report:
//! counters marked [`MonitorKind::Incr`] report their increase over the
//! run, and everything else ([`MonitorKind::Avg`]) its time-weighted mean.

use crate::agent::Agent;
use crate::RuntimeError;
use platform_io::{Behavior, ControlRequest, Format, Request, SignalRequest};
use platform_topo::Domain;
use std::str::FromStr;

/// How a monitored signal is totalled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorKind {
    /// Increase between the first and last sample.
    Incr,
    /// Time-weighted mean over the run.
    Avg,
}

impl MonitorKind {
    pub fn for_behavior(behavior: Behavior) -> Self {
        match behavior {
            Behavior::Monotone => MonitorKind::Incr,
            _ => MonitorKind::Avg,
        }
    }
}

impl FromStr for MonitorKind {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incr" => Ok(MonitorKind::Incr),
            "avg" => Ok(MonitorKind::Avg),
            other => Err(RuntimeError::ConfigError(format!(
                "unknown monitor kind '{other}'; expected 'incr' or 'avg'"
            ))),
        }
    }
}

/// One signal watched by the [`MonitorAgent`].
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredSignal {
    pub request: SignalRequest,
    pub kind: MonitorKind,
}

impl MonitoredSignal {
    pub fn new(request: SignalRequest, kind: MonitorKind) -> Self {
        Self { request, kind }
    }

    /// Parses `NAME[@DOMAIN[:INDEX]][=incr|avg]`, using `default` when
    /// no kind is given.
    pub fn parse(text: &str, default: MonitorKind) -> Result<Self, RuntimeError> {
        let (request, kind) = match text.rsplit_once('=') {
            Some((request, kind)) => (request, kind.parse()?),
            None => (text, default),
        };
        let request = Request::parse(request)
            .map_err(|e| RuntimeError::ConfigError(format!("signal '{text}': {e}")))?;
        Ok(Self { request, kind })
    }

    /// Column name used in the report and trace, e.g.
    /// `CPU_ENERGY@package@0`.
    pub fn label(&self) -> String {
        crate::trace::column_label(&self.request)
    }
}

/// Control-free agent that totals a list of signals.
#[derive(Debug, Clone)]
pub struct MonitorAgent {
    period: f64,
    signals: Vec<MonitoredSignal>,
    num_update: usize,
    start_time: f64,
    last_time: f64,
    last: Vec<f64>,
    totals: Vec<f64>,
}

impl MonitorAgent {
    pub fn new(period: f64, signals: Vec<MonitoredSignal>) -> Result<Self, RuntimeError> {
        if !period.is_finite() || period <= 0.0 {
            return Err(RuntimeError::InvalidPeriod(period));
        }
        let n = signals.len();
        Ok(Self {
            period,
            signals,
            num_update: 0,
            start_time: f64::NAN,
            last_time: f64::NAN,
            last: vec![f64::NAN; n],
            totals: vec![0.0; n],
        })
    }

    pub fn signals(&self) -> &[MonitoredSignal] {
        &self.signals
    }

    /// Number of updates in the current session.
    pub fn num_update(&self) -> usize {
        self.num_update
    }

    /// Elapsed `TIME` between the first and last update.
    pub fn total_time(&self) -> f64 {
        if self.num_update < 2 {
            0.0
        } else {
            self.last_time - self.start_time
        }
    }

    /// Per-signal totals for the session so far, `TIME` first.
    pub fn totals(&self) -> Vec<(String, f64)> {
        let total_time = self.total_time();
        let mut values = vec![("TIME".to_string(), total_time)];
        if self.num_update < 2 {
            return values;
        }
        for (signal, total) in self.signals.iter().zip(&self.totals) {
            let value = match signal.kind {
                MonitorKind::Incr => *total,
                MonitorKind::Avg if total_time > 0.0 => total / total_time,
                MonitorKind::Avg => f64::NAN,
            };
            values.push((signal.label(), value));
        }
        values
    }
}

impl Agent for MonitorAgent {
    fn name(&self) -> &str {
        "monitor"
    }

    fn get_signals(&self) -> Vec<SignalRequest> {
        self.signals
            .iter()
            .map(|s| s.request.clone())
            .chain(std::iter::once(Request::new("TIME", Domain::Board, 0)))
            .collect()
    }

    fn get_controls(&self) -> Vec<ControlRequest> {
        Vec::new()
    }

    fn get_period(&self) -> f64 {
        self.period
    }

    fn run_begin(
        &mut self,
        _policy: Option<&serde_json::Value>,
        _profile: &str,
    ) -> geopm_error::Result<()> {
        let n = self.signals.len();
        self.num_update = 0;
        self.start_time = f64::NAN;
        self.last_time = f64::NAN;
        self.last = vec![f64::NAN; n];
        self.totals = vec![0.0; n];
        Ok(())
    }

    fn update(&mut self, signals: &[f64]) -> geopm_error::Result<Vec<f64>> {
        let Some((&time, values)) = signals.split_last() else {
            return Err(geopm_error::Error::invalid("monitor agent expects TIME as its last signal"));
        };
        if values.len() != self.signals.len() {
            return Err(geopm_error::Error::invalid(format!(
                "monitor agent expects {} signals, got {}",
                self.signals.len() + 1,
                signals.len()
            )));
        }
        let dt = if self.num_update == 0 {
            self.start_time = time;
            0.0
        } else {
            time - self.last_time
        };
        if self.num_update > 0 {
            for (i, signal) in self.signals.iter().enumerate() {
                match signal.kind {
                    MonitorKind::Incr => self.totals[i] += values[i] - self.last[i],
                    MonitorKind::Avg if dt > 0.0 => self.totals[i] += values[i] * dt,
                    MonitorKind::Avg => {}
                }
            }
        }
        self.last.copy_from_slice(values);
        self.last_time = time;
        self.num_update += 1;
        Ok(Vec::new())
    }

    fn run_end(&mut self) {
        tracing::debug!(updates = self.num_update, "monitor agent run ended");
    }

    fn report_totals(&self) -> Vec<(String, String)> {
        self.totals()
            .into_iter()
            .map(|(label, value)| (label, Format::Double.format(value)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent() -> MonitorAgent {
        MonitorAgent::new(
            0.1,
            vec![
                MonitoredSignal::parse("CPU_ENERGY@package:1=incr", MonitorKind::Avg).unwrap(),
                MonitoredSignal::parse("CPU_FREQUENCY_STATUS", MonitorKind::Avg).unwrap(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_signals_end_with_time() {
        let a = agent();
        let signals = a.get_signals();
        assert_eq!(signals.len(), 3);
        assert_eq!(signals[0], Request::new("CPU_ENERGY", Domain::Package, 1));
        assert_eq!(signals[2], Request::new("TIME", Domain::Board, 0));
        assert!(a.get_controls().is_empty());
    }

    #[test]
    fn test_totals() {
        let mut a = agent();
        a.run_begin(None, "p").unwrap();
        assert!(a.update(&[100.0, 1.0e9, 10.0]).unwrap().is_empty());
        a.update(&[150.0, 2.0e9, 11.0]).unwrap();
        a.update(&[250.0, 3.0e9, 13.0]).unwrap();

        let totals = a.totals();
        assert_eq!(totals[0], ("TIME".to_string(), 3.0));
        assert_eq!(totals[1], ("CPU_ENERGY@package@1".to_string(), 150.0));
        // (2e9 * 1 + 3e9 * 2) / 3
        assert_eq!(totals[2].0, "CPU_FREQUENCY_STATUS@board@0");
        assert!((totals[2].1 - 8.0e9 / 3.0).abs() < 1.0);
    }

    #[test]
    fn test_single_update_reports_zero_time() {
        let mut a = agent();
        a.run_begin(None, "p").unwrap();
        a.update(&[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(a.totals(), vec![("TIME".to_string(), 0.0)]);
        assert_eq!(a.report_totals(), vec![("TIME".to_string(), "0".to_string())]);
    }

    #[test]
    fn test_run_begin_resets() {
        let mut a = agent();
        a.run_begin(None, "p").unwrap();
        a.update(&[1.0, 2.0, 0.0]).unwrap();
        a.update(&[5.0, 2.0, 1.0]).unwrap();
        a.run_begin(None, "p").unwrap();
        assert_eq!(a.num_update(), 0);
        assert_eq!(a.total_time(), 0.0);
    }

    #[test]
    fn test_wrong_signal_count() {
        let mut a = agent();
        a.run_begin(None, "p").unwrap();
        let err = a.update(&[1.0]).unwrap_err();
        assert_eq!(err.kind(), geopm_error::ErrorKind::Invalid);
        assert!(a.update(&[]).is_err());
    }

    #[test]
    fn test_parse() {
        let s = MonitoredSignal::parse("TIME", MonitorKind::Incr).unwrap();
        assert_eq!(s.kind, MonitorKind::Incr);
        assert_eq!(s.request, Request::board("TIME"));
        assert!(MonitoredSignal::parse("X=median", MonitorKind::Avg).is_err());
        assert!(MonitoredSignal::parse("X@nowhere", MonitorKind::Avg).is_err());
        assert!(MonitorAgent::new(0.0, Vec::new()).is_err());
    }
}
