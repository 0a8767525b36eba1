// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `GEOPM_*` environment variables, read once.

use std::path::PathBuf;

pub const GEOPM_PROFILE: &str = "GEOPM_PROFILE";
pub const GEOPM_REPORT: &str = "GEOPM_REPORT";
pub const GEOPM_REPORT_SIGNALS: &str = "GEOPM_REPORT_SIGNALS";
pub const GEOPM_DEBUG: &str = "GEOPM_DEBUG";

/// Snapshot of the variables the runtime recognises.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    /// Profile name for the report header.
    pub profile: Option<String>,
    /// Where a wrapper should write the report.
    pub report: Option<PathBuf>,
    /// Comma-separated extra report signals.
    pub report_signals: String,
    /// Propagate errors instead of pretty-printing them.
    pub debug: bool,
}

impl Environment {
    /// Reads the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Builds a snapshot from `(name, value)` pairs; unrelated names are
    /// ignored and empty values count as unset, except `GEOPM_DEBUG` which
    /// only needs to be present.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut env = Self::default();
        for (key, value) in vars {
            let value: String = value.into();
            let non_empty = || Some(value.clone()).filter(|v| !v.trim().is_empty());
            match key.as_ref() {
                GEOPM_PROFILE => env.profile = non_empty(),
                GEOPM_REPORT => env.report = non_empty().map(PathBuf::from),
                GEOPM_REPORT_SIGNALS => env.report_signals = value.trim().to_string(),
                GEOPM_DEBUG => env.debug = true,
                _ => {}
            }
        }
        env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_vars() {
        let env = Environment::from_vars([
            ("GEOPM_PROFILE", "nightly"),
            ("GEOPM_REPORT", "/tmp/report.yaml"),
            ("GEOPM_REPORT_SIGNALS", " CPU_ENERGY@package "),
            ("HOME", "/root"),
        ]);
        assert_eq!(env.profile.as_deref(), Some("nightly"));
        assert_eq!(env.report, Some(PathBuf::from("/tmp/report.yaml")));
        assert_eq!(env.report_signals, "CPU_ENERGY@package");
        assert!(!env.debug);
    }

    #[test]
    fn test_empty_values_are_unset() {
        let env = Environment::from_vars([("GEOPM_PROFILE", ""), ("GEOPM_DEBUG", "")]);
        assert_eq!(env.profile, None);
        assert!(env.debug);
    }

    #[test]
    fn test_default_is_empty() {
        let env = Environment::from_vars(Vec::<(String, String)>::new());
        assert_eq!(env, Environment::default());
    }
}
