// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Domain counts and containment.

use crate::sysfs;
use crate::{Domain, TopoError};
use std::collections::BTreeSet;
use std::path::Path;

/// Explicit description of a node, used when sysfs is not the source of
/// truth (tests, simulations, configuration files).
///
/// CPUs are laid out the way Linux enumerates hyper-threads: CPU `c`
/// belongs to core `c % num_core`, and core `k` to package
/// `k / core_per_package`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TopoCounts {
    pub num_package: usize,
    pub core_per_package: usize,
    pub thread_per_core: usize,
    /// Off-package memory nodes. When equal to `num_package`, memory node
    /// `m` holds the CPUs of package `m`.
    pub num_memory: usize,
    pub package_memory_per_package: usize,
    pub num_nic: usize,
    pub package_nic_per_package: usize,
    pub num_gpu: usize,
    pub package_gpu_per_package: usize,
    pub chip_per_gpu: usize,
}

impl Default for TopoCounts {
    fn default() -> Self {
        Self {
            num_package: 1,
            core_per_package: 1,
            thread_per_core: 1,
            num_memory: 1,
            package_memory_per_package: 0,
            num_nic: 0,
            package_nic_per_package: 0,
            num_gpu: 0,
            package_gpu_per_package: 0,
            chip_per_gpu: 0,
        }
    }
}

/// Hardware domains of one node and how they nest.
///
/// Immutable once built. Use [`platform_topo`](crate::platform_topo) for the
/// cached instance describing the booted machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTopo {
    pub(crate) num_package: usize,
    /// Package index of each core.
    pub(crate) core_package: Vec<usize>,
    /// Core index of each CPU.
    pub(crate) cpu_core: Vec<usize>,
    /// CPUs attached to each memory node.
    pub(crate) memory_cpus: Vec<BTreeSet<usize>>,
    pub(crate) package_memory_per_package: usize,
    pub(crate) num_nic: usize,
    pub(crate) package_nic_per_package: usize,
    pub(crate) num_gpu: usize,
    pub(crate) package_gpu_per_package: usize,
    pub(crate) chip_per_gpu: usize,
}

impl PlatformTopo {
    /// Builds a topology from explicit counts.
    pub fn from_counts(counts: &TopoCounts) -> Result<Self, TopoError> {
        if counts.num_package == 0 || counts.core_per_package == 0 || counts.thread_per_core == 0
        {
            return Err(TopoError::InvalidCounts(format!(
                "package, core and thread counts must be positive: {}x{}x{}",
                counts.num_package, counts.core_per_package, counts.thread_per_core
            )));
        }
        if counts.num_gpu > 0 && counts.chip_per_gpu == 0 {
            return Err(TopoError::InvalidCounts(
                "a GPU must have at least one chip".to_string(),
            ));
        }

        let num_core = counts.num_package * counts.core_per_package;
        let num_cpu = num_core * counts.thread_per_core;
        let core_package = (0..num_core).map(|k| k / counts.core_per_package).collect();
        let cpu_core = (0..num_cpu).map(|c| c % num_core).collect::<Vec<_>>();

        let memory_cpus = if counts.num_memory == counts.num_package {
            (0..counts.num_memory)
                .map(|m| {
                    (0..num_cpu)
                        .filter(|c| cpu_core[*c] / counts.core_per_package == m)
                        .collect()
                })
                .collect()
        } else {
            vec![BTreeSet::new(); counts.num_memory]
        };

        Ok(Self {
            num_package: counts.num_package,
            core_package,
            cpu_core,
            memory_cpus,
            package_memory_per_package: counts.package_memory_per_package,
            num_nic: counts.num_nic,
            package_nic_per_package: counts.package_nic_per_package,
            num_gpu: counts.num_gpu,
            package_gpu_per_package: counts.package_gpu_per_package,
            chip_per_gpu: counts.chip_per_gpu,
        })
    }

    /// Shorthand for a CPU-only node with one memory node per package.
    pub fn uniform(
        num_package: usize,
        core_per_package: usize,
        thread_per_core: usize,
    ) -> Result<Self, TopoError> {
        Self::from_counts(&TopoCounts {
            num_package,
            core_per_package,
            thread_per_core,
            num_memory: num_package,
            ..TopoCounts::default()
        })
    }

    /// One package, one memory node, `num_core` single-threaded cores.
    pub(crate) fn single_package(num_core: usize) -> Self {
        let num_core = num_core.max(1);
        Self {
            num_package: 1,
            core_package: vec![0; num_core],
            cpu_core: (0..num_core).collect(),
            memory_cpus: vec![(0..num_core).collect()],
            package_memory_per_package: 0,
            num_nic: 0,
            package_nic_per_package: 0,
            num_gpu: 0,
            package_gpu_per_package: 0,
            chip_per_gpu: 0,
        }
    }

    /// Discovers the topology from the given sysfs roots.
    pub fn from_sysfs(cpu_root: &Path, node_root: &Path) -> Result<Self, TopoError> {
        sysfs::discover(cpu_root, node_root)
    }

    /// Discovers the topology of the booted machine.
    pub fn from_system() -> Result<Self, TopoError> {
        Self::from_sysfs(Path::new(sysfs::CPU_ROOT), Path::new(sysfs::NODE_ROOT))
    }

    /// Number of instances of `domain` on this node.
    pub fn num_domain(&self, domain: Domain) -> usize {
        match domain {
            Domain::Board => 1,
            Domain::Package => self.num_package,
            Domain::Core => self.core_package.len(),
            Domain::Cpu => self.cpu_core.len(),
            Domain::Memory => self.memory_cpus.len(),
            Domain::PackageIntegratedMemory => self.num_package * self.package_memory_per_package,
            Domain::Nic => self.num_nic,
            Domain::PackageIntegratedNic => self.num_package * self.package_nic_per_package,
            Domain::Gpu => self.num_gpu,
            Domain::PackageIntegratedGpu => self.num_package * self.package_gpu_per_package,
            Domain::GpuChip => self.num_gpu * self.chip_per_gpu,
        }
    }

    /// True if every instance of `inner` is contained in exactly one
    /// instance of `outer`. Every domain is nested within itself and
    /// within the board.
    pub fn is_nested_domain(&self, inner: Domain, outer: Domain) -> bool {
        if inner == outer || outer == Domain::Board {
            return true;
        }
        match outer {
            Domain::Package => matches!(
                inner,
                Domain::Core
                    | Domain::Cpu
                    | Domain::PackageIntegratedMemory
                    | Domain::PackageIntegratedNic
                    | Domain::PackageIntegratedGpu
            ),
            Domain::Core => inner == Domain::Cpu,
            Domain::Gpu => inner == Domain::GpuChip,
            _ => false,
        }
    }

    fn check_index(&self, domain: Domain, index: usize) -> Result<(), TopoError> {
        let count = self.num_domain(domain);
        if index >= count {
            return Err(TopoError::IndexOutOfRange {
                domain,
                index,
                count,
            });
        }
        Ok(())
    }

    /// Index of the `outer` instance containing instance `inner_idx` of
    /// `inner`.
    pub fn outer_domain_idx(
        &self,
        inner: Domain,
        inner_idx: usize,
        outer: Domain,
    ) -> Result<usize, TopoError> {
        if !self.is_nested_domain(inner, outer) {
            return Err(TopoError::NotNested { inner, outer });
        }
        self.check_index(inner, inner_idx)?;
        let idx = match (inner, outer) {
            _ if inner == outer => inner_idx,
            (_, Domain::Board) => 0,
            (Domain::Cpu, Domain::Core) => self.cpu_core[inner_idx],
            (Domain::Cpu, Domain::Package) => self.core_package[self.cpu_core[inner_idx]],
            (Domain::Core, Domain::Package) => self.core_package[inner_idx],
            (Domain::PackageIntegratedMemory, Domain::Package) => {
                inner_idx / self.package_memory_per_package
            }
            (Domain::PackageIntegratedNic, Domain::Package) => {
                inner_idx / self.package_nic_per_package
            }
            (Domain::PackageIntegratedGpu, Domain::Package) => {
                inner_idx / self.package_gpu_per_package
            }
            (Domain::GpuChip, Domain::Gpu) => inner_idx / self.chip_per_gpu,
            _ => return Err(TopoError::NotNested { inner, outer }),
        };
        Ok(idx)
    }

    /// Indices of all `inner` instances contained in instance `outer_idx`
    /// of `outer`, ascending.
    pub fn domain_nested(
        &self,
        inner: Domain,
        outer: Domain,
        outer_idx: usize,
    ) -> Result<Vec<usize>, TopoError> {
        if !self.is_nested_domain(inner, outer) {
            return Err(TopoError::NotNested { inner, outer });
        }
        self.check_index(outer, outer_idx)?;
        let mut result = Vec::new();
        for idx in 0..self.num_domain(inner) {
            if self.outer_domain_idx(inner, idx, outer)? == outer_idx {
                result.push(idx);
            }
        }
        Ok(result)
    }

    /// Index of the `domain` instance that contains CPU `cpu_idx`.
    pub fn domain_idx(&self, domain: Domain, cpu_idx: usize) -> Result<usize, TopoError> {
        self.check_index(Domain::Cpu, cpu_idx)?;
        if domain.is_cpu_domain() {
            return self.outer_domain_idx(Domain::Cpu, cpu_idx, domain);
        }
        if domain == Domain::Memory && self.memory_cpus.iter().any(|s| !s.is_empty()) {
            return self
                .memory_cpus
                .iter()
                .position(|cpus| cpus.contains(&cpu_idx))
                .ok_or_else(|| TopoError::InvalidCounts(format!(
                    "cpu {cpu_idx} is not attached to any memory node"
                )));
        }
        Err(TopoError::NotImplemented {
            op: "domain_idx",
            domain,
        })
    }

    /// CPUs making up instance `index` of `domain`.
    pub fn domain_cpus(&self, domain: Domain, index: usize) -> Result<BTreeSet<usize>, TopoError> {
        self.check_index(domain, index)?;
        if domain.is_cpu_domain() {
            return Ok(self.domain_nested(Domain::Cpu, domain, index)?.into_iter().collect());
        }
        if domain == Domain::Memory {
            return Ok(self.memory_cpus[index].clone());
        }
        Err(TopoError::NotImplemented {
            op: "domain_cpus",
            domain,
        })
    }

    /// One-line description of the node.
    pub fn summary(&self) -> String {
        let mut s = format!(
            "{} package(s), {} core(s), {} cpu(s), {} memory node(s)",
            self.num_domain(Domain::Package),
            self.num_domain(Domain::Core),
            self.num_domain(Domain::Cpu),
            self.num_domain(Domain::Memory),
        );
        if self.num_gpu > 0 {
            s.push_str(&format!(
                ", {} gpu(s) x {} chip(s)",
                self.num_gpu, self.chip_per_gpu
            ));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn two_socket() -> PlatformTopo {
        PlatformTopo::uniform(2, 4, 2).unwrap()
    }

    #[test]
    fn test_uniform_counts() {
        let topo = two_socket();
        assert_eq!(topo.num_domain(Domain::Board), 1);
        assert_eq!(topo.num_domain(Domain::Package), 2);
        assert_eq!(topo.num_domain(Domain::Core), 8);
        assert_eq!(topo.num_domain(Domain::Cpu), 16);
        assert_eq!(topo.num_domain(Domain::Memory), 2);
        assert_eq!(topo.num_domain(Domain::Gpu), 0);
    }

    #[test]
    fn test_invalid_counts() {
        assert!(PlatformTopo::uniform(0, 4, 2).is_err());
        let counts = TopoCounts {
            num_gpu: 2,
            chip_per_gpu: 0,
            ..TopoCounts::default()
        };
        assert!(matches!(
            PlatformTopo::from_counts(&counts),
            Err(TopoError::InvalidCounts(_))
        ));
    }

    #[test]
    fn test_hyperthread_layout() {
        let topo = two_socket();
        // CPU 9 is the second thread of core 1.
        assert_eq!(topo.domain_idx(Domain::Core, 9).unwrap(), 1);
        assert_eq!(topo.domain_idx(Domain::Package, 9).unwrap(), 0);
        assert_eq!(topo.domain_idx(Domain::Package, 12).unwrap(), 1);
        assert_eq!(topo.domain_idx(Domain::Board, 15).unwrap(), 0);
        assert_eq!(topo.domain_idx(Domain::Memory, 12).unwrap(), 1);
    }

    #[test]
    fn test_domain_nested() {
        let topo = two_socket();
        assert_eq!(
            topo.domain_nested(Domain::Cpu, Domain::Package, 1).unwrap(),
            vec![4, 5, 6, 7, 12, 13, 14, 15]
        );
        assert_eq!(
            topo.domain_nested(Domain::Core, Domain::Package, 0).unwrap(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(
            topo.domain_nested(Domain::Package, Domain::Package, 1).unwrap(),
            vec![1]
        );
        assert_eq!(topo.domain_nested(Domain::Cpu, Domain::Board, 0).unwrap().len(), 16);
    }

    #[test]
    fn test_domain_nested_errors() {
        let topo = two_socket();
        assert!(matches!(
            topo.domain_nested(Domain::Package, Domain::Cpu, 0),
            Err(TopoError::NotNested { .. })
        ));
        assert!(matches!(
            topo.domain_nested(Domain::Cpu, Domain::Package, 2),
            Err(TopoError::IndexOutOfRange { count: 2, .. })
        ));
    }

    #[test]
    fn test_gpu_nesting() {
        let counts = TopoCounts {
            num_package: 2,
            core_per_package: 2,
            num_gpu: 2,
            chip_per_gpu: 3,
            package_memory_per_package: 1,
            ..TopoCounts::default()
        };
        let topo = PlatformTopo::from_counts(&counts).unwrap();
        assert_eq!(topo.num_domain(Domain::GpuChip), 6);
        assert_eq!(topo.domain_nested(Domain::GpuChip, Domain::Gpu, 1).unwrap(), vec![3, 4, 5]);
        assert_eq!(
            topo.outer_domain_idx(Domain::PackageIntegratedMemory, 1, Domain::Package)
                .unwrap(),
            1
        );
        assert!(!topo.is_nested_domain(Domain::GpuChip, Domain::Package));
        assert!(matches!(
            topo.domain_idx(Domain::Gpu, 0),
            Err(TopoError::NotImplemented { .. })
        ));
    }

    #[test]
    fn test_domain_cpus() {
        let topo = two_socket();
        let cpus: Vec<usize> = topo.domain_cpus(Domain::Core, 3).unwrap().into_iter().collect();
        assert_eq!(cpus, vec![3, 11]);
        assert!(topo.domain_cpus(Domain::Cpu, 16).is_err());
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_from_sysfs_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let cpu_root = dir.path().join("cpu");
        let node_root = dir.path().join("node");
        write(&cpu_root.join("online"), "0-3\n");
        // Sparse ids: packages 0 and 3, cores 0 and 8.
        let ids = [(0, 0), (0, 8), (3, 0), (3, 8)];
        for (cpu, (pkg, core)) in ids.iter().enumerate() {
            let topo = cpu_root.join(format!("cpu{cpu}/topology"));
            write(&topo.join("physical_package_id"), &format!("{pkg}\n"));
            write(&topo.join("core_id"), &format!("{core}\n"));
        }
        write(&node_root.join("node0/cpulist"), "0-1\n");
        write(&node_root.join("node1/cpulist"), "2-3\n");
        write(&node_root.join("node2/cpulist"), "\n");

        let topo = PlatformTopo::from_sysfs(&cpu_root, &node_root).unwrap();
        assert_eq!(topo.num_domain(Domain::Package), 2);
        assert_eq!(topo.num_domain(Domain::Core), 4);
        assert_eq!(topo.num_domain(Domain::Cpu), 4);
        assert_eq!(topo.num_domain(Domain::Memory), 3);
        assert_eq!(topo.domain_idx(Domain::Package, 2).unwrap(), 1);
        assert_eq!(topo.domain_idx(Domain::Memory, 3).unwrap(), 1);
        assert!(topo.domain_cpus(Domain::Memory, 2).unwrap().is_empty());
    }

    #[test]
    fn test_single_package_matches_uniform() {
        assert_eq!(
            PlatformTopo::single_package(4),
            PlatformTopo::uniform(1, 4, 1).unwrap()
        );
    }

    #[test]
    fn test_summary() {
        let s = two_socket().summary();
        assert!(s.contains("2 package(s)"));
        assert!(s.contains("16 cpu(s)"));
    }
}
