// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Elapsed wall time as a signal.

use crate::iogroup::IOGroup;
use crate::{Aggregation, Behavior, PlatformIOError, SignalInfo};
use platform_topo::Domain;
use std::time::Instant;

const TIME: &str = "TIME";
const TIME_ELAPSED: &str = "TIME::ELAPSED";

/// Provides `TIME`: seconds since the backend was created, from a
/// monotonic clock.
pub struct TimeIOGroup {
    start: Instant,
}

impl TimeIOGroup {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn is_time(name: &str) -> bool {
        name == TIME || name == TIME_ELAPSED
    }
}

impl Default for TimeIOGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl IOGroup for TimeIOGroup {
    fn name(&self) -> &str {
        "time"
    }

    fn signal_names(&self) -> Vec<String> {
        vec![TIME.to_string(), TIME_ELAPSED.to_string()]
    }

    fn control_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn signal_domain_type(&self, name: &str) -> Option<Domain> {
        Self::is_time(name).then_some(Domain::Board)
    }

    fn control_domain_type(&self, _name: &str) -> Option<Domain> {
        None
    }

    fn signal_info(&self, name: &str) -> Option<SignalInfo> {
        Self::is_time(name).then(|| {
            SignalInfo::new(Aggregation::SelectFirst, Behavior::Monotone, "seconds")
                .with_description("Time elapsed since the beginning of execution")
        })
    }

    fn read_signal(&mut self, name: &str, _domain_idx: usize) -> Result<f64, PlatformIOError> {
        if !Self::is_time(name) {
            return Err(PlatformIOError::UnknownSignal(name.to_string()));
        }
        Ok(self.start.elapsed().as_secs_f64())
    }

    fn write_control(
        &mut self,
        name: &str,
        _domain_idx: usize,
        _setting: f64,
    ) -> Result<(), PlatformIOError> {
        Err(PlatformIOError::UnknownControl(name.to_string()))
    }

    fn read_control(&mut self, name: &str, _domain_idx: usize) -> Result<f64, PlatformIOError> {
        Err(PlatformIOError::UnknownControl(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_is_monotone() {
        let mut group = TimeIOGroup::new();
        let a = group.read_signal(TIME, 0).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = group.read_signal(TIME_ELAPSED, 0).unwrap();
        assert!(b > a);
        assert!(b >= 0.005);
    }

    #[test]
    fn test_metadata() {
        let group = TimeIOGroup::new();
        assert_eq!(group.signal_domain_type(TIME), Some(Domain::Board));
        assert_eq!(group.signal_domain_type("CPU_ENERGY"), None);
        let info = group.signal_info(TIME).unwrap();
        assert_eq!(info.behavior, Behavior::Monotone);
        assert!(group.control_names().is_empty());
    }
}
