// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # geopmrt
//!
//! Command-line wrapper around the control runtime.
//!
//! ## Usage
//! ```bash
//! # Launch a workload and report on it
//! geopmrt run --control-period 0.5 --report run.yaml -- ./stream 10
//!
//! # Pin the frequency cap for the duration of the run
//! geopmrt run --initial-control CPU_FREQUENCY_MAX_CONTROL=2.0e9 -- ./stream
//!
//! # One-shot reads and writes
//! geopmrt read CPU_ENERGY package 0
//! geopmrt write CPU_POWER_LIMIT_CONTROL package 0 150
//!
//! # Show the node topology
//! geopmrt topo
//! ```
//!
//! The exit status of `run` is the workload's own; any error exits with
//! status 255 unless `GEOPM_DEBUG` is set, in which case it propagates.

mod commands;

use clap::{Parser, Subcommand};
use geopm_error::Classify;
use runtime::Environment;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "geopmrt",
    about = "Run a workload under a periodic power and frequency control loop",
    version,
    author
)]
struct Cli {
    /// Path to a TOML launch configuration; command-line flags override it.
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch a workload and control it until it exits.
    Run(commands::run::RunArgs),

    /// Read a signal once, or list the available signals.
    Read {
        /// Signal name; omit to list every signal.
        name: Option<String>,

        /// Domain to read at; defaults to the signal's native domain.
        domain: Option<String>,

        /// Domain index.
        #[arg(default_value_t = 0)]
        index: usize,
    },

    /// Write a control once, or list the available controls.
    Write {
        /// Control name; omit to list every control.
        name: Option<String>,

        /// Domain to write at.
        domain: Option<String>,

        /// Domain index.
        index: Option<usize>,

        /// Setting in SI units.
        #[arg(allow_negative_numbers = true)]
        value: Option<f64>,
    },

    /// Display domain counts and nesting for this node.
    Topo,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize tracing/logging based on verbosity.
    commands::init_tracing(cli.verbose);
    let environment = Environment::from_env();

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(cli.config, args, environment.clone()),
        Commands::Read {
            name,
            domain,
            index,
        } => commands::read::execute(name, domain, index),
        Commands::Write {
            name,
            domain,
            index,
            value,
        } => commands::write::execute(name, domain, index, value),
        Commands::Topo => commands::topo::execute(),
    };
    finish(result, &environment)
}

/// Maps a command result to the process exit status. Errors exit with
/// 255 unless `GEOPM_DEBUG` asks for them to propagate.
fn finish(result: anyhow::Result<u8>, environment: &Environment) -> anyhow::Result<ExitCode> {
    match result {
        Ok(code) => Ok(ExitCode::from(code)),
        Err(err) if environment.debug => Err(err),
        Err(err) => {
            eprintln!("Error: {}", describe(&err));
            Ok(ExitCode::from(255))
        }
    }
}

/// One-line description of an error, prefixed with its taxonomy code
/// when it has one.
fn describe(err: &anyhow::Error) -> String {
    let kind = if let Some(e) = err.downcast_ref::<runtime::RuntimeError>() {
        Some(e.kind())
    } else if let Some(e) = err.downcast_ref::<platform_io::PlatformIOError>() {
        Some(e.kind())
    } else {
        err.downcast_ref::<platform_topo::TopoError>().map(Classify::kind)
    };
    match kind {
        Some(kind) => format!("[{}] {err:#}", kind.code()),
        None => format!("{err:#}"),
    }
}
