// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Periodic tick scheduling.
//!
//! [`TimedLoop`] yields tick indices `0, 1, 2, ...`. Index 0 is yielded
//! immediately; index `i` is yielded no earlier than `i * period` after
//! index 0, measured on a monotonic clock. With a period count `n` the loop
//! yields at most `n + 1` indices, so the whole loop spans `n * period`.
//!
//! Missed ticks are not replayed. A tick that is late by less than one
//! period still leaves the next target at its original time; a tick that
//! is a full period or more behind is skipped and the index jumps to the
//! latest target that has already passed.
//!
//! [`PidTimedLoop`] additionally stops once a process has exited.

use crate::RuntimeError;
use std::time::{Duration, Instant};

/// Fixed-period iterator over tick indices.
#[derive(Debug, Clone)]
pub struct TimedLoop {
    period: Duration,
    num_period: Option<usize>,
    start: Option<Instant>,
    next_index: usize,
}

impl TimedLoop {
    /// Creates a loop with `period` seconds between ticks. `None` for
    /// `num_period` runs forever.
    pub fn new(period: f64, num_period: Option<usize>) -> Result<Self, RuntimeError> {
        if !period.is_finite() || period <= 0.0 {
            return Err(RuntimeError::InvalidPeriod(period));
        }
        Ok(Self {
            period: Duration::from_secs_f64(period),
            num_period,
            start: None,
            next_index: 0,
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Upper bound on the number of ticks, if bounded.
    pub fn max_ticks(&self) -> Option<usize> {
        self.num_period.map(|n| n + 1)
    }

    fn last_index(&self) -> Option<usize> {
        self.num_period
    }
}

impl Iterator for TimedLoop {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if matches!(self.last_index(), Some(last) if self.next_index > last) {
            return None;
        }
        let Some(start) = self.start else {
            self.start = Some(Instant::now());
            self.next_index = 1;
            return Some(0);
        };

        let mut index = self.next_index;
        let target = start + self.period.mul_f64(index as f64);
        let now = Instant::now();
        if now < target {
            std::thread::sleep(target - now);
        } else if now - target >= self.period {
            let elapsed = (now - start).as_secs_f64();
            let caught_up = (elapsed / self.period.as_secs_f64()).floor() as usize;
            index = caught_up.max(index);
            if let Some(last) = self.last_index() {
                index = index.min(last);
            }
            tracing::debug!(
                skipped = index - self.next_index,
                index,
                "timed loop fell behind"
            );
        }
        self.next_index = index + 1;
        Some(index)
    }
}

/// Result of probing a process with signal 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// The process exists but belongs to someone else.
    NoPermission,
    /// The process no longer exists or is an unreaped zombie.
    Gone,
}

/// Probes `pid` with `kill(pid, 0)`.
///
/// `ESRCH` means gone and `EPERM` means alive but not ours. A process that
/// answers but is a zombie counts as gone. Any other failure is an error.
pub fn process_liveness(pid: i32) -> Result<Liveness, RuntimeError> {
    // SAFETY: signal 0 performs the permission and existence checks only.
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return Ok(if is_zombie(pid) {
            Liveness::Gone
        } else {
            Liveness::Alive
        });
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ESRCH) => Ok(Liveness::Gone),
        Some(libc::EPERM) => Ok(Liveness::NoPermission),
        _ => Err(RuntimeError::ProcessCheck { pid, source: err }),
    }
}

/// Reads the state field of `/proc/<pid>/stat`. The command name may
/// contain spaces or parentheses, so the state follows the last `)`.
fn is_zombie(pid: i32) -> bool {
    let stat = match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => stat,
        Err(e) => return e.kind() == std::io::ErrorKind::NotFound,
    };
    stat.rfind(')')
        .and_then(|end| stat.get(end + 1..))
        .and_then(|rest| rest.split_whitespace().next())
        .is_some_and(|state| state == "Z" || state == "X")
}

/// A [`TimedLoop`] that also ends when a process exits.
///
/// Liveness is checked after each wait, before yielding every tick but the
/// first, so the loop ends within one period of the process exiting.
#[derive(Debug, Clone)]
pub struct PidTimedLoop {
    inner: TimedLoop,
    pid: i32,
    finished: bool,
}

impl PidTimedLoop {
    pub fn new(period: f64, num_period: Option<usize>, pid: i32) -> Result<Self, RuntimeError> {
        Ok(Self {
            inner: TimedLoop::new(period, num_period)?,
            pid,
            finished: false,
        })
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }
}

impl Iterator for PidTimedLoop {
    type Item = Result<usize, RuntimeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let index = self.inner.next()?;
        if index > 0 {
            match process_liveness(self.pid) {
                Ok(Liveness::Gone) => {
                    tracing::debug!(pid = self.pid, index, "process exited, ending loop");
                    self.finished = true;
                    return None;
                }
                Ok(Liveness::Alive | Liveness::NoPermission) => {}
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        Some(Ok(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::Duration;

    #[test]
    fn test_invalid_period() {
        assert!(matches!(TimedLoop::new(0.0, None), Err(RuntimeError::InvalidPeriod(_))));
        assert!(matches!(TimedLoop::new(-1.0, Some(3)), Err(RuntimeError::InvalidPeriod(_))));
        assert!(matches!(TimedLoop::new(f64::NAN, None), Err(RuntimeError::InvalidPeriod(_))));
        assert!(PidTimedLoop::new(0.0, None, 1).is_err());
    }

    #[test]
    fn test_bounded_loop_yields_n_plus_one() {
        let start = Instant::now();
        let ticks: Vec<usize> = TimedLoop::new(0.02, Some(3)).unwrap().collect();
        assert_eq!(ticks, vec![0, 1, 2, 3]);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_first_tick_is_immediate() {
        let start = Instant::now();
        let mut timed = TimedLoop::new(1.0, None).unwrap();
        assert_eq!(timed.next(), Some(0));
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(timed.max_ticks(), None);
    }

    #[test]
    fn test_zero_periods_yields_single_tick() {
        let ticks: Vec<usize> = TimedLoop::new(5.0, Some(0)).unwrap().collect();
        assert_eq!(ticks, vec![0]);
    }

    #[test]
    fn test_ticks_keep_schedule_from_start() {
        let mut timed = TimedLoop::new(0.02, Some(5)).unwrap();
        let start = Instant::now();
        for index in timed.by_ref() {
            let due = Duration::from_secs_f64(0.02 * index as f64);
            assert!(start.elapsed() + Duration::from_millis(2) >= due);
        }
        assert!(timed.next().is_none());
    }

    #[test]
    fn test_late_ticks_are_skipped() {
        let mut timed = TimedLoop::new(0.01, Some(20)).unwrap();
        assert_eq!(timed.next(), Some(0));
        std::thread::sleep(Duration::from_millis(45));
        let index = timed.next().unwrap();
        assert!(index >= 4, "expected to skip ahead, got {index}");
        assert!(timed.next().unwrap() > index);
    }

    #[test]
    fn test_skip_never_passes_last_index() {
        let mut timed = TimedLoop::new(0.005, Some(2)).unwrap();
        timed.next();
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(timed.next(), Some(2));
        assert_eq!(timed.next(), None);
    }

    #[test]
    fn test_liveness_of_self() {
        let pid = std::process::id() as i32;
        assert_eq!(process_liveness(pid).unwrap(), Liveness::Alive);
    }

    #[test]
    fn test_liveness_of_init_is_not_gone() {
        assert_ne!(process_liveness(1).unwrap(), Liveness::Gone);
    }

    #[test]
    fn test_reaped_child_is_gone() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        child.wait().unwrap();
        assert_eq!(process_liveness(pid).unwrap(), Liveness::Gone);
    }

    #[test]
    fn test_zombie_child_is_gone() {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id() as i32;
        // Exited but not reaped.
        let deadline = Instant::now() + Duration::from_secs(5);
        while process_liveness(pid).unwrap() == Liveness::Alive && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(process_liveness(pid).unwrap(), Liveness::Gone);
        child.wait().unwrap();
    }

    #[test]
    fn test_pid_loop_ends_with_process() {
        let mut child = Command::new("sleep").arg("0.1").spawn().unwrap();
        let start = Instant::now();
        let ticks = PidTimedLoop::new(0.01, None, child.id() as i32)
            .unwrap()
            .map(|r| r.unwrap())
            .count();
        assert!(ticks >= 5, "only {ticks} ticks");
        assert!(start.elapsed() < Duration::from_secs(5));
        child.wait().unwrap();
    }

    #[test]
    fn test_pid_loop_honors_count() {
        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let ticks: Vec<usize> = PidTimedLoop::new(0.01, Some(2), child.id() as i32)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(ticks, vec![0, 1, 2]);
        child.kill().unwrap();
        child.wait().unwrap();
    }
}
