// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the control runtime.

use geopm_error::{Classify, ErrorKind};
use platform_io::PlatformIOError;
use reporter::ReporterError;

/// Errors that can occur while configuring or running a control session.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Loop and agent periods must be positive and finite.
    #[error("invalid period {0}: must be a finite number of seconds greater than zero")]
    InvalidPeriod(f64),

    /// Timeouts must be finite and non-negative.
    #[error("invalid timeout {0}: must be a finite number of seconds >= 0")]
    InvalidTimeout(f64),

    /// No workload command was given.
    #[error("no command given to run")]
    EmptyCommand,

    /// The workload could not be started.
    #[error("failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Querying the workload process failed for a reason other than
    /// the process being gone.
    #[error("failed to check process {pid}: {source}")]
    ProcessCheck {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    /// The workload has not finished yet.
    #[error("application process is still running")]
    ProcessRunning,

    /// The agent returned a different number of settings than it declared
    /// controls.
    #[error("agent returned {actual} control values but declared {expected} controls")]
    ControlCount { expected: usize, actual: usize },

    #[error(transparent)]
    PlatformIO(#[from] PlatformIOError),

    #[error(transparent)]
    Reporter(#[from] ReporterError),

    /// Failure reported by the agent.
    #[error("agent error: {0}")]
    Agent(#[from] geopm_error::Error),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// An `--initial-control` setting could not be parsed.
    #[error("invalid initial control '{0}': expected NAME[@DOMAIN[:INDEX]]=VALUE")]
    InvalidInitialControl(String),

    /// Opening or writing a trace or report file failed.
    #[error("cannot write '{path}': {source}")]
    Output {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A run ended in error after the session was opened. Carries the
    /// best-effort report and any failure from restoring controls.
    #[error("{source}{}", restore_suffix(.restore_error))]
    RunFailed {
        source: Box<RuntimeError>,
        restore_error: Option<PlatformIOError>,
        report: String,
    },
}

fn restore_suffix(restore_error: &Option<PlatformIOError>) -> String {
    match restore_error {
        Some(e) => format!(" (restore also failed: {e})"),
        None => String::new(),
    }
}

impl RuntimeError {
    /// The report of a failed run, if one was produced.
    pub fn report(&self) -> Option<&str> {
        match self {
            RuntimeError::RunFailed { report, .. } => Some(report),
            _ => None,
        }
    }
}

impl Classify for RuntimeError {
    fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::InvalidPeriod(_)
            | RuntimeError::InvalidTimeout(_)
            | RuntimeError::EmptyCommand
            | RuntimeError::InvalidInitialControl(_) => ErrorKind::Invalid,
            RuntimeError::Spawn { .. }
            | RuntimeError::ProcessCheck { .. }
            | RuntimeError::ProcessRunning
            | RuntimeError::Output { .. } => ErrorKind::Runtime,
            RuntimeError::ControlCount { .. } => ErrorKind::Logic,
            RuntimeError::ConfigError(_) => ErrorKind::FileParse,
            RuntimeError::PlatformIO(e) => e.kind(),
            RuntimeError::Reporter(e) => e.kind(),
            RuntimeError::Agent(e) => e.kind(),
            RuntimeError::RunFailed { source, .. } => source.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_failed_keeps_originating_kind() {
        let err = RuntimeError::RunFailed {
            source: Box::new(RuntimeError::Agent(geopm_error::Error::new(
                ErrorKind::MsrWrite,
                "denied",
            ))),
            restore_error: Some(PlatformIOError::WriteFailed {
                target: "scaling_max_freq".into(),
                detail: "permission denied".into(),
            }),
            report: "Error:\n".into(),
        };
        assert_eq!(err.kind(), ErrorKind::MsrWrite);
        assert_eq!(err.report(), Some("Error:\n"));
        let text = err.to_string();
        assert!(text.starts_with("agent error: "));
        assert!(text.contains("restore also failed: failed to write scaling_max_freq"));
    }

    #[test]
    fn test_kinds() {
        assert_eq!(RuntimeError::InvalidPeriod(0.0).kind(), ErrorKind::Invalid);
        assert_eq!(RuntimeError::ConfigError("x".into()).kind(), ErrorKind::FileParse);
        assert_eq!(
            RuntimeError::ControlCount {
                expected: 1,
                actual: 0
            }
            .kind(),
            ErrorKind::Logic
        );
        assert!(RuntimeError::EmptyCommand.report().is_none());
    }
}
