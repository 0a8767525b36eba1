// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `geopmrt topo` command: display the node's domains.
//!
//! Reads the same cached topology the control loop uses. Domains this
//! node does not have are listed with a count of zero.

use platform_topo::Domain;

pub fn execute() -> anyhow::Result<u8> {
    println!("╔══════════════════════════════════════════════════════╗");
    println!("║               geopmrt · Node Topology                ║");
    println!("╚══════════════════════════════════════════════════════╝");
    println!();

    let topo = platform_topo::platform_topo();

    // ── Domain Counts ──────────────────────────────────────────
    println!("  {:<28} {:>6}  Contained in", "Domain", "Count");
    println!("  {}", "─".repeat(60));
    for domain in Domain::ALL {
        let count = topo.num_domain(domain);
        let outer: Vec<&str> = Domain::ALL
            .iter()
            .filter(|&&outer| {
                outer != domain && topo.num_domain(outer) > 0 && topo.is_nested_domain(domain, outer)
            })
            .map(|outer| outer.name())
            .collect();
        println!("  {:<28} {:>6}  {}", domain.name(), count, outer.join(", "));
    }
    println!();

    // ── Packages ───────────────────────────────────────────────
    for package in 0..topo.num_domain(Domain::Package) {
        let cpus = topo.domain_nested(Domain::Cpu, Domain::Package, package)?;
        println!("  package {package}: cpus {}", cpu_ranges(&cpus));
    }
    println!();
    println!("{}", topo.summary());

    Ok(0)
}

/// Compresses an ascending index list into `0-3,8-11` form.
fn cpu_ranges(cpus: &[usize]) -> String {
    let mut ranges: Vec<String> = Vec::new();
    let mut iter = cpus.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end += 1;
            iter.next();
        }
        ranges.push(if start == end {
            start.to_string()
        } else {
            format!("{start}-{end}")
        });
    }
    ranges.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_ranges() {
        assert_eq!(cpu_ranges(&[0, 1, 2, 3, 8, 9, 11]), "0-3,8-9,11");
        assert_eq!(cpu_ranges(&[5]), "5");
        assert_eq!(cpu_ranges(&[]), "");
    }
}
