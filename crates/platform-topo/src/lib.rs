// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # platform-topo
//!
//! Enumerates the hardware domains of a compute node (board, packages,
//! cores, CPUs, memory, NICs, GPUs) and how they contain one another.
//!
//! The booted machine is discovered from sysfs once and cached for the
//! life of the process; see [`platform_topo`]. Explicit topologies can be
//! built with [`PlatformTopo::from_counts`] or [`PlatformTopo::uniform`].
//!
//! # Example
//! ```
//! use platform_topo::{Domain, PlatformTopo};
//!
//! let topo = PlatformTopo::uniform(2, 4, 2).unwrap();
//! assert_eq!(topo.num_domain(Domain::Cpu), 16);
//! assert_eq!(topo.domain_idx(Domain::Package, 12).unwrap(), 1);
//! ```

pub mod domain;
pub mod error;
pub mod sysfs;
pub mod topo;

pub use domain::Domain;
pub use error::TopoError;
pub use topo::{PlatformTopo, TopoCounts};

use std::sync::{Arc, OnceLock};

static PLATFORM_TOPO: OnceLock<Arc<PlatformTopo>> = OnceLock::new();

/// Returns the cached topology of the booted machine.
///
/// Discovery happens on first call. If sysfs cannot be read the node is
/// modelled as one package with one core per available hardware thread.
pub fn platform_topo() -> Arc<PlatformTopo> {
    PLATFORM_TOPO
        .get_or_init(|| {
            let topo = PlatformTopo::from_system().unwrap_or_else(|e| {
                tracing::warn!("topology discovery failed ({e}), assuming a single package");
                let threads = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                PlatformTopo::single_package(threads)
            });
            tracing::info!("platform topology: {}", topo.summary());
            Arc::new(topo)
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_topo_is_cached() {
        let a = platform_topo();
        let b = platform_topo();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.num_domain(Domain::Cpu) >= 1);
    }
}
