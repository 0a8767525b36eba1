// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runs a workload under an agent's control.
//!
//! One call to [`Controller::run`] is one session:
//!
//! ```text
//! save_control ──► initial controls ──► push ──► reporter init
//!      │
//!      ▼
//! spawn workload ──► run_begin ──► priming read
//!      │
//!      ▼
//! tick: read_batch → sample → update → report → trace → adjust → write_batch
//!      │   (until the workload exits, the timeout expires, or an error)
//!      ▼
//! run_end ──► restore_control ──► report
//! ```
//!
//! Controls are restored on every path out of the session. When the
//! session fails, the workload is stopped and the error carries a report
//! with an `Error:` section listing the saved controls.

use crate::agent::Agent;
use crate::config::InitialControl;
use crate::environment::Environment;
use crate::metrics::LoopMetrics;
use crate::timed_loop::PidTimedLoop;
use crate::trace::Tracer;
use crate::RuntimeError;
use geopm_error::Classify;
use platform_io::{PlatformIO, PlatformIOError};
use platform_topo::Domain;
use reporter::{ErrorSection, ReportExtras, Reporter};
use std::process::{Child, Command, ExitStatus};
use std::time::Instant;

// ── Session guard ──────────────────────────────────────────────

/// An open control session on a [`PlatformIO`].
///
/// Opening calls `save_control()`. [`finish`](Self::finish) restores and
/// reports the outcome; dropping an unfinished session restores and logs
/// any failure.
pub struct ControlSession<'p> {
    pio: &'p mut PlatformIO,
    open: bool,
}

impl<'p> ControlSession<'p> {
    pub fn open(pio: &'p mut PlatformIO) -> Result<Self, PlatformIOError> {
        pio.save_control()?;
        Ok(Self { pio, open: true })
    }

    pub fn pio(&mut self) -> &mut PlatformIO {
        &mut *self.pio
    }

    /// Restores every saved control and closes the session.
    pub fn finish(mut self) -> Result<(), PlatformIOError> {
        self.open = false;
        self.pio.restore_control()
    }
}

impl Drop for ControlSession<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.pio.restore_control() {
                tracing::warn!("failed to restore controls: {e}");
            }
        }
    }
}

impl std::fmt::Debug for ControlSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlSession")
            .field("open", &self.open)
            .finish()
    }
}

// ── Controller ─────────────────────────────────────────────────

/// State that outlives a failed tick.
#[derive(Default)]
struct SessionState {
    child: Option<Child>,
    began: bool,
}

/// Drives an [`Agent`] for the life of one workload process per run.
///
/// # Example
/// ```no_run
/// use runtime::{Controller, MonitorAgent};
///
/// # fn example() -> Result<(), runtime::RuntimeError> {
/// let mut agent = MonitorAgent::new(0.5, Vec::new())?;
/// let mut controller = Controller::new(&mut agent, 0.0)?;
/// let report = controller.run(&["sleep".into(), "2".into()], None)?;
/// println!("{report}");
/// println!("exit code {}", controller.returncode()?);
/// # Ok(())
/// # }
/// ```
pub struct Controller<'a, A: Agent + ?Sized> {
    agent: &'a mut A,
    timeout: f64,
    num_update: Option<usize>,
    profile: Option<String>,
    report_signals: Option<String>,
    hostname: Option<String>,
    initial_controls: Vec<InitialControl>,
    tracer: Option<Tracer>,
    environment: Environment,
    child: Option<Child>,
    status: Option<ExitStatus>,
    metrics: LoopMetrics,
}

impl<'a, A: Agent + ?Sized> Controller<'a, A> {
    /// Creates a controller. A `timeout` of zero controls the workload
    /// until it exits; otherwise the loop runs at most
    /// `ceil(timeout / period)` periods.
    pub fn new(agent: &'a mut A, timeout: f64) -> Result<Self, RuntimeError> {
        if !timeout.is_finite() || timeout < 0.0 {
            return Err(RuntimeError::InvalidTimeout(timeout));
        }
        let period = agent.get_period();
        if !period.is_finite() || period <= 0.0 {
            return Err(RuntimeError::InvalidPeriod(period));
        }
        let num_update = (timeout > 0.0).then(|| (timeout / period).ceil() as usize);
        Ok(Self {
            agent,
            timeout,
            num_update,
            profile: None,
            report_signals: None,
            hostname: None,
            initial_controls: Vec::new(),
            tracer: None,
            environment: Environment::from_env(),
            child: None,
            status: None,
            metrics: LoopMetrics::new(),
        })
    }

    /// Profile name for the report. Defaults to `GEOPM_PROFILE`, then the
    /// workload's program name.
    pub fn with_profile(mut self, profile: &str) -> Self {
        self.profile = Some(profile.to_string());
        self
    }

    /// Extra report signals. Defaults to `GEOPM_REPORT_SIGNALS`.
    pub fn with_report_signals(mut self, signals: &str) -> Self {
        self.report_signals = Some(signals.to_string());
        self
    }

    pub fn with_hostname(mut self, hostname: &str) -> Self {
        self.hostname = Some(hostname.to_string());
        self
    }

    /// Controls written once when the session opens, before the first
    /// tick. They are restored with everything else.
    pub fn with_initial_controls(mut self, controls: Vec<InitialControl>) -> Self {
        self.initial_controls = controls;
        self
    }

    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Replaces the environment snapshot taken by [`new`](Self::new).
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    /// Periods the loop runs for, `None` when unbounded.
    pub fn num_update(&self) -> Option<usize> {
        self.num_update
    }

    /// Loop timing for the most recent run.
    pub fn metrics(&self) -> &LoopMetrics {
        &self.metrics
    }

    /// Runs `argv` on the process-wide platform I/O instance and returns
    /// the agent's report.
    pub fn run(
        &mut self,
        argv: &[String],
        policy: Option<&serde_json::Value>,
    ) -> Result<String, RuntimeError> {
        let mut pio = platform_io::acquire()?;
        self.run_with(&mut pio, argv, policy)
    }

    /// Runs `argv` against `pio`.
    pub fn run_with(
        &mut self,
        pio: &mut PlatformIO,
        argv: &[String],
        policy: Option<&serde_json::Value>,
    ) -> Result<String, RuntimeError> {
        let (program, _) = argv.split_first().ok_or(RuntimeError::EmptyCommand)?;
        self.child = None;
        self.status = None;
        self.metrics = LoopMetrics::new();

        let profile = self
            .profile
            .clone()
            .or_else(|| self.environment.profile.clone())
            .unwrap_or_else(|| program.clone());
        let report_signals = self
            .report_signals
            .clone()
            .unwrap_or_else(|| self.environment.report_signals.clone());
        let mut reporter = Reporter::new(&report_signals);
        if let Some(hostname) = &self.hostname {
            reporter = reporter.with_hostname(hostname);
        }
        tracing::info!(
            agent = self.agent.name(),
            profile = %profile,
            command = %argv.join(" "),
            "run begin"
        );

        let mut session = ControlSession::open(pio)?;
        let mut state = SessionState::default();
        let result = self.run_session(
            session.pio(),
            &mut reporter,
            &mut state,
            argv,
            policy,
            &profile,
        );
        if state.began {
            self.agent.run_end();
        }
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.flush();
        }

        let mut extras = ReportExtras {
            policy: policy.cloned(),
            ..ReportExtras::default()
        };
        match result {
            Ok(()) => {
                let saved_controls = session.pio().saved_controls();
                match session.finish() {
                    Ok(()) => {
                        self.child = state.child;
                        let returncode = self.returncode().ok();
                        tracing::info!(ticks = self.metrics.ticks, ?returncode, "run end");
                        Ok(self.agent.get_report(&profile, &reporter, extras))
                    }
                    Err(e) => {
                        let source = RuntimeError::from(e);
                        extras.error = Some(ErrorSection {
                            kind: source.kind(),
                            message: source.to_string(),
                            saved_controls,
                        });
                        self.child = state.child;
                        Err(RuntimeError::RunFailed {
                            report: self.agent.get_report(&profile, &reporter, extras),
                            source: Box::new(source),
                            restore_error: None,
                        })
                    }
                }
            }
            Err(source) => {
                tracing::warn!("run failed: {source}");
                self.status = state.child.take().and_then(stop_child);
                extras.error = Some(ErrorSection {
                    kind: source.kind(),
                    message: source.to_string(),
                    saved_controls: session.pio().saved_controls(),
                });
                let report = self.agent.get_report(&profile, &reporter, extras);
                let restore_error = session.finish().err();
                if let Some(e) = &restore_error {
                    tracing::warn!("restore after failed run also failed: {e}");
                }
                Err(RuntimeError::RunFailed {
                    source: Box::new(source),
                    restore_error,
                    report,
                })
            }
        }
    }

    fn run_session(
        &mut self,
        pio: &mut PlatformIO,
        reporter: &mut Reporter,
        state: &mut SessionState,
        argv: &[String],
        policy: Option<&serde_json::Value>,
        profile: &str,
    ) -> Result<(), RuntimeError> {
        let (program, args) = argv.split_first().ok_or(RuntimeError::EmptyCommand)?;
        for control in &self.initial_controls {
            let request = &control.request;
            pio.write_control(&request.name, request.domain, request.index, control.value)?;
            tracing::debug!("initial control {request} = {}", control.value);
        }

        let signals = self.agent.get_signals();
        let controls = self.agent.get_controls();
        let signal_handles = signals
            .iter()
            .map(|s| pio.push_signal(&s.name, s.domain, s.index))
            .collect::<Result<Vec<_>, _>>()?;
        let control_handles = controls
            .iter()
            .map(|c| pio.push_control(&c.name, c.domain, c.index))
            .collect::<Result<Vec<_>, _>>()?;
        let time_handle = if self.tracer.is_some() {
            Some(pio.push_signal("TIME", Domain::Board, 0)?)
        } else {
            None
        };
        reporter.init(pio)?;
        if let Some(tracer) = self.tracer.as_mut() {
            tracer.begin(pio, &signals, &controls);
        }

        let child = Command::new(program)
            .args(args)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                command: argv.join(" "),
                source,
            })?;
        let pid = child.id() as i32;
        state.child = Some(child);
        tracing::debug!(pid, "workload started");

        self.agent.run_begin(policy, profile)?;
        state.began = true;

        pio.read_batch()?;
        reporter.update(pio)?;

        let loop_start = Instant::now();
        let mut samples = vec![f64::NAN; signal_handles.len()];
        for tick in PidTimedLoop::new(self.agent.get_period(), self.num_update, pid)? {
            let index = tick?;
            let tick_start = Instant::now();
            pio.read_batch()?;
            for (sample, handle) in samples.iter_mut().zip(&signal_handles) {
                *sample = pio.sample(*handle)?;
            }
            let settings = self.agent.update(&samples)?;
            reporter.update(pio)?;
            if let (Some(tracer), Some(time)) = (self.tracer.as_mut(), time_handle) {
                tracer.record(pio.sample(time)?, &samples, &settings);
            }

            let exited = match state.child.as_mut() {
                Some(child) => child
                    .try_wait()
                    .map_err(|source| RuntimeError::ProcessCheck { pid, source })?,
                None => None,
            };
            if let Some(status) = exited {
                self.status = Some(status);
                self.metrics.record_tick(index, tick_start.elapsed());
                tracing::debug!(index, %status, "workload exited");
                break;
            }

            if settings.len() != control_handles.len() {
                return Err(RuntimeError::ControlCount {
                    expected: control_handles.len(),
                    actual: settings.len(),
                });
            }
            for (handle, setting) in control_handles.iter().zip(&settings) {
                pio.adjust(*handle, *setting)?;
            }
            pio.write_batch()?;
            self.metrics.record_tick(index, tick_start.elapsed());
            tracing::debug!(index, "tick");
        }
        self.metrics.finalise(loop_start.elapsed());
        Ok(())
    }

    /// Exit code of the workload from the most recent run. A workload
    /// killed by a signal reports `128 + signal`.
    ///
    /// Fails with [`RuntimeError::ProcessRunning`] while the workload is
    /// still running, as after a timeout, or before any run.
    pub fn returncode(&mut self) -> Result<i32, RuntimeError> {
        if let Some(status) = self.status {
            return Ok(exit_code(status));
        }
        let Some(child) = self.child.as_mut() else {
            return Err(RuntimeError::ProcessRunning);
        };
        let pid = child.id() as i32;
        match child
            .try_wait()
            .map_err(|source| RuntimeError::ProcessCheck { pid, source })?
        {
            Some(status) => {
                self.status = Some(status);
                Ok(exit_code(status))
            }
            None => Err(RuntimeError::ProcessRunning),
        }
    }

    /// Blocks until the workload of the most recent run exits and returns
    /// its exit code.
    pub fn wait(&mut self) -> Result<i32, RuntimeError> {
        if let Some(status) = self.status {
            return Ok(exit_code(status));
        }
        let Some(child) = self.child.as_mut() else {
            return Err(RuntimeError::ProcessRunning);
        };
        let pid = child.id() as i32;
        let status = child
            .wait()
            .map_err(|source| RuntimeError::ProcessCheck { pid, source })?;
        self.status = Some(status);
        Ok(exit_code(status))
    }
}

impl<A: Agent + ?Sized> std::fmt::Debug for Controller<'_, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("agent", &self.agent.name())
            .field("timeout", &self.timeout)
            .field("num_update", &self.num_update)
            .field("status", &self.status)
            .finish()
    }
}

/// Kills and reaps a workload left running by a failed session.
fn stop_child(mut child: Child) -> Option<ExitStatus> {
    if let Err(e) = child.kill() {
        tracing::debug!("kill of workload {} failed: {e}", child.id());
    }
    match child.wait() {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::warn!("failed to reap workload {}: {e}", child.id());
            None
        }
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MonitorAgent;
    use platform_io::iogroup::TimeIOGroup;
    use platform_topo::PlatformTopo;
    use std::sync::Arc;

    fn pio() -> PlatformIO {
        let topo = Arc::new(PlatformTopo::uniform(1, 1, 1).unwrap());
        let mut pio = PlatformIO::new(topo);
        pio.register_iogroup(Box::new(TimeIOGroup::new())).unwrap();
        pio
    }

    fn argv(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_new_validates() {
        let mut agent = MonitorAgent::new(0.5, Vec::new()).unwrap();
        assert!(matches!(
            Controller::new(&mut agent, -1.0),
            Err(RuntimeError::InvalidTimeout(_))
        ));
        let c = Controller::new(&mut agent, 1.2).unwrap();
        assert_eq!(c.num_update(), Some(3));
        let c = Controller::new(&mut agent, 0.0).unwrap();
        assert_eq!(c.num_update(), None);
    }

    #[test]
    fn test_returncode_before_run() {
        let mut agent = MonitorAgent::new(0.5, Vec::new()).unwrap();
        let mut c = Controller::new(&mut agent, 0.0).unwrap();
        assert!(matches!(c.returncode(), Err(RuntimeError::ProcessRunning)));
    }

    #[test]
    fn test_empty_command() {
        let mut agent = MonitorAgent::new(0.5, Vec::new()).unwrap();
        let mut c = Controller::new(&mut agent, 0.0).unwrap();
        let mut pio = pio();
        assert!(matches!(
            c.run_with(&mut pio, &[], None),
            Err(RuntimeError::EmptyCommand)
        ));
        assert!(!pio.is_session_open());
    }

    #[test]
    fn test_spawn_failure_restores() {
        let mut agent = MonitorAgent::new(0.05, Vec::new()).unwrap();
        let mut c = Controller::new(&mut agent, 0.0)
            .unwrap()
            .with_environment(Environment::default());
        let mut pio = pio();
        let err = c
            .run_with(&mut pio, &argv(&["/nonexistent/workload"]), None)
            .unwrap_err();
        match &err {
            RuntimeError::RunFailed { source, .. } => {
                assert!(matches!(**source, RuntimeError::Spawn { .. }))
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(err.report().unwrap().contains("Error:"));
        assert!(!pio.is_session_open());
    }

    #[test]
    fn test_profile_defaults_to_program() {
        let mut agent = MonitorAgent::new(0.05, Vec::new()).unwrap();
        let mut c = Controller::new(&mut agent, 0.0)
            .unwrap()
            .with_environment(Environment::default())
            .with_hostname("node0");
        let report = c.run_with(&mut pio(), &argv(&["true"]), None).unwrap();
        assert!(report.contains("Profile: true\n"));
        assert!(report.contains("Agent: monitor\n"));
        assert!(report.contains("  node0:\n"));
        assert_eq!(c.returncode().unwrap(), 0);
    }

    #[test]
    fn test_session_guard_restores_on_drop() {
        let mut pio = pio();
        {
            let _session = ControlSession::open(&mut pio).unwrap();
        }
        assert!(!pio.is_session_open());
        let session = ControlSession::open(&mut pio).unwrap();
        session.finish().unwrap();
        assert!(!pio.is_session_open());
    }
}
