// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Topology discovery from sysfs.
//!
//! Reads:
//! - `<cpu_root>/online`: online CPU list, e.g. `"0-7"`.
//! - `<cpu_root>/cpuN/topology/{physical_package_id,core_id}`.
//! - `<node_root>/nodeN/cpulist`: NUMA memory nodes and their CPUs.
//!
//! Package and core identifiers reported by the kernel are sparse; they are
//! renumbered densely in ascending order.

use crate::{PlatformTopo, TopoError};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Default sysfs root for CPU topology.
pub const CPU_ROOT: &str = "/sys/devices/system/cpu";

/// Default sysfs root for NUMA nodes.
pub const NODE_ROOT: &str = "/sys/devices/system/node";

/// Reads a sysfs file and returns its trimmed content.
pub(crate) fn read_sysfs_file(path: &Path) -> Result<String, TopoError> {
    if !path.exists() {
        return Err(TopoError::NotAvailable {
            path: path.display().to_string(),
        });
    }
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| TopoError::ReadError {
            path: path.display().to_string(),
            source: e,
        })
}

fn read_id(path: &Path) -> Result<i64, TopoError> {
    let content = read_sysfs_file(path)?;
    content.parse::<i64>().map_err(|_| TopoError::ParseError {
        path: path.display().to_string(),
        detail: format!("expected integer id, got '{content}'"),
    })
}

/// Parses a kernel CPU list like `"0,2-3"` into `[0, 2, 3]`.
///
/// Returns `None` on malformed input. An empty string is an empty list.
pub fn parse_cpu_list(s: &str) -> Option<Vec<usize>> {
    let mut cpus = Vec::new();
    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((start_s, end_s)) = part.split_once('-') {
            let start: usize = start_s.trim().parse().ok()?;
            let end: usize = end_s.trim().parse().ok()?;
            if end < start {
                return None;
            }
            cpus.extend(start..=end);
        } else {
            cpus.push(part.parse().ok()?);
        }
    }
    Some(cpus)
}

/// Builds a [`PlatformTopo`] from the given sysfs roots.
pub(crate) fn discover(cpu_root: &Path, node_root: &Path) -> Result<PlatformTopo, TopoError> {
    let online_path = cpu_root.join("online");
    let online = read_sysfs_file(&online_path)?;
    let cpus = parse_cpu_list(&online).ok_or_else(|| TopoError::ParseError {
        path: online_path.display().to_string(),
        detail: format!("malformed cpu list '{online}'"),
    })?;
    if cpus.is_empty() || cpus.iter().enumerate().any(|(i, c)| i != *c) {
        return Err(TopoError::InvalidCounts(format!(
            "online cpu list '{online}' is not contiguous from 0"
        )));
    }

    let mut raw = Vec::with_capacity(cpus.len());
    for cpu in &cpus {
        let topo_dir = cpu_root.join(format!("cpu{cpu}")).join("topology");
        // Some hypervisors report -1 for the package id.
        let package_id = read_id(&topo_dir.join("physical_package_id"))?.max(0);
        let core_id = read_id(&topo_dir.join("core_id"))?;
        raw.push((package_id, core_id));
    }

    let package_rank: BTreeMap<i64, usize> = raw
        .iter()
        .map(|(p, _)| *p)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(rank, id)| (id, rank))
        .collect();
    let core_rank: BTreeMap<(usize, i64), usize> = raw
        .iter()
        .map(|(p, c)| (package_rank[p], *c))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(rank, key)| (key, rank))
        .collect();

    let mut core_package = vec![0; core_rank.len()];
    for ((package, _), rank) in &core_rank {
        core_package[*rank] = *package;
    }
    let cpu_core = raw
        .iter()
        .map(|(p, c)| core_rank[&(package_rank[p], *c)])
        .collect();

    let memory_cpus = discover_memory(node_root, cpus.len());
    tracing::debug!(
        num_package = package_rank.len(),
        num_core = core_package.len(),
        num_cpu = cpus.len(),
        num_memory = memory_cpus.len(),
        "discovered topology from sysfs"
    );

    Ok(PlatformTopo {
        num_package: package_rank.len(),
        core_package,
        cpu_core,
        memory_cpus,
        package_memory_per_package: 0,
        num_nic: 0,
        package_nic_per_package: 0,
        num_gpu: 0,
        package_gpu_per_package: 0,
        chip_per_gpu: 0,
    })
}

/// Lists NUMA nodes in ascending order. Missing roots yield no memory.
fn discover_memory(node_root: &Path, num_cpu: usize) -> Vec<BTreeSet<usize>> {
    let entries = match std::fs::read_dir(node_root) {
        Ok(entries) => entries,
        Err(_) => {
            tracing::debug!(path = %node_root.display(), "no NUMA node directory");
            return Vec::new();
        }
    };
    let mut nodes: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(id) = name.strip_prefix("node").and_then(|n| n.parse::<usize>().ok()) else {
            continue;
        };
        let cpus = read_sysfs_file(&entry.path().join("cpulist"))
            .ok()
            .and_then(|s| parse_cpu_list(&s))
            .unwrap_or_default()
            .into_iter()
            .filter(|c| *c < num_cpu)
            .collect();
        nodes.insert(id, cpus);
    }
    nodes.into_values().collect()
}
