// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `geopmrt read` command: read one signal, or list them all.

pub fn execute(name: Option<String>, domain: Option<String>, index: usize) -> anyhow::Result<u8> {
    let mut pio = platform_io::acquire()?;

    let Some(name) = name else {
        println!("╔══════════════════════════════════════════════════════╗");
        println!("║               geopmrt · Signals                      ║");
        println!("╚══════════════════════════════════════════════════════╝");
        println!();
        println!("  {:<36} {:<10} {:<10} {:<8}", "Name", "Domain", "Behavior", "Units");
        println!("  {}", "─".repeat(68));
        for name in pio.signal_names() {
            let domain = pio.signal_domain_type(&name)?;
            let info = pio.signal_info(&name)?;
            println!(
                "  {:<36} {:<10} {:<10} {:<8}",
                name,
                domain.name(),
                format!("{:?}", info.behavior).to_lowercase(),
                info.units,
            );
        }
        return Ok(0);
    };

    let domain = match domain {
        Some(domain) => super::parse_domain(&domain)?,
        None => pio.signal_domain_type(&name)?,
    };
    let format = pio.signal_info(&name)?.format;
    let value = pio.read_signal(&name, domain, index)?;
    tracing::debug!(%name, %domain, index, value, "read signal");
    println!("{}", format.format(value));
    Ok(0)
}
