// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `geopmrt write` command: write one control, or list them all.
//!
//! The write happens outside any session, so the setting persists after
//! the command exits.

use anyhow::bail;

pub fn execute(
    name: Option<String>,
    domain: Option<String>,
    index: Option<usize>,
    value: Option<f64>,
) -> anyhow::Result<u8> {
    let mut pio = platform_io::acquire()?;

    let Some(name) = name else {
        println!("╔══════════════════════════════════════════════════════╗");
        println!("║               geopmrt · Controls                     ║");
        println!("╚══════════════════════════════════════════════════════╝");
        println!();
        println!("  {:<36} {:<10}", "Name", "Domain");
        println!("  {}", "─".repeat(48));
        for name in pio.control_names() {
            let domain = pio.control_domain_type(&name)?;
            println!("  {:<36} {:<10}", name, domain.name());
        }
        return Ok(0);
    };

    let (Some(domain), Some(index), Some(value)) = (domain, index, value) else {
        bail!("usage: geopmrt write NAME DOMAIN INDEX VALUE");
    };
    let domain = super::parse_domain(&domain)?;
    pio.write_control(&name, domain, index, value)?;
    tracing::info!(%name, %domain, index, value, "wrote control");
    Ok(0)
}
