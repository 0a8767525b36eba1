// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # platform-io
//!
//! A uniform, named surface over the node's hardware signals (time,
//! energy, frequency, temperature) and controls (frequency caps, power
//! limits).
//!
//! Backends implement [`IOGroup`] and are registered on a [`PlatformIO`],
//! which provides domain conversion, batched reads and writes through
//! integer handles, and a save/restore contract that returns every control
//! written during a session to its prior setting.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use platform_io::{iogroup::TimeIOGroup, PlatformIO};
//! use platform_topo::{Domain, PlatformTopo};
//!
//! let topo = Arc::new(PlatformTopo::uniform(1, 2, 1).unwrap());
//! let mut pio = PlatformIO::new(topo);
//! pio.register_iogroup(Box::new(TimeIOGroup::new())).unwrap();
//!
//! let time = pio.push_signal("TIME", Domain::Board, 0).unwrap();
//! pio.read_batch().unwrap();
//! assert!(pio.sample(time).unwrap() >= 0.0);
//! ```

pub mod agg;
pub mod error;
pub mod iogroup;
pub mod platform_io;
pub mod signal;

pub use agg::Aggregation;
pub use error::PlatformIOError;
pub use iogroup::IOGroup;
pub use platform_io::{PlatformIO, SavedControl, WriteFailure};
pub use signal::{Behavior, ControlRequest, Format, Request, SignalInfo, SignalRequest};

use std::sync::{Mutex, MutexGuard, OnceLock, TryLockError};

static PLATFORM_IO: OnceLock<Mutex<PlatformIO>> = OnceLock::new();

/// Exclusive access to the process-wide instance.
///
/// The instance is built on first use from the cached topology and every
/// available sysfs backend. Fails with a runtime error while another
/// session holds it.
pub fn acquire() -> Result<MutexGuard<'static, PlatformIO>, PlatformIOError> {
    let cell = PLATFORM_IO
        .get_or_init(|| Mutex::new(PlatformIO::from_system(platform_topo::platform_topo())));
    match cell.try_lock() {
        Ok(guard) => Ok(guard),
        Err(TryLockError::WouldBlock) => Err(PlatformIOError::Busy),
        Err(TryLockError::Poisoned(poisoned)) => {
            tracing::warn!("previous holder of the platform I/O instance panicked");
            Ok(poisoned.into_inner())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geopm_error::{Classify, ErrorKind};

    #[test]
    fn test_acquire_is_exclusive() {
        let guard = acquire().unwrap();
        assert!(guard.signal_names().contains("TIME"));
        let second = acquire();
        assert!(matches!(second, Err(PlatformIOError::Busy)));
        assert_eq!(second.unwrap_err().kind(), ErrorKind::Runtime);
        drop(guard);
        assert!(acquire().is_ok());
    }
}
