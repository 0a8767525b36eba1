// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! The periodic control loop that runs a workload under an agent.
//!
//! The runtime takes:
//! - An [`Agent`] that declares signals and controls and maps one to the
//!   other each period.
//! - A `PlatformIO` from `platform-io` that batches the reads and writes.
//! - A `Reporter` from `reporter` that summarises the run.
//!
//! And drives them from a [`Controller`] for the lifetime of one child
//! process, restoring every control it touched when the session ends.
//!
//! # Session Lifecycle
//! ```text
//! save_control → spawn → run_begin → tick* → run_end → restore_control → report
//! ```
//! Ticks are scheduled by a [`PidTimedLoop`] that stops within one period
//! of the workload exiting.
//!
//! # Threading
//! Everything runs on the caller's thread. The workload is the only
//! concurrent actor and is observed by polling its pid.

mod agent;
mod config;
mod controller;
mod environment;
mod error;
mod metrics;
mod monitor_agent;
mod timed_loop;
mod trace;

pub use agent::Agent;
pub use config::{InitialControl, LaunchConfig, OutputTarget};
pub use controller::{ControlSession, Controller};
pub use environment::{
    Environment, GEOPM_DEBUG, GEOPM_PROFILE, GEOPM_REPORT, GEOPM_REPORT_SIGNALS,
};
pub use error::RuntimeError;
pub use metrics::LoopMetrics;
pub use monitor_agent::{MonitorAgent, MonitorKind, MonitoredSignal};
pub use timed_loop::{process_liveness, Liveness, PidTimedLoop, TimedLoop};
pub use trace::{column_label, Tracer};
