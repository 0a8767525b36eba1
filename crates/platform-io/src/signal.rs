// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Signal metadata and request descriptors.

use crate::agg::Aggregation;
use platform_topo::{Domain, TopoError};
use std::fmt;

/// How a signal evolves over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Behavior {
    /// Never decreases except on counter wrap (time, energy).
    Monotone,
    /// Free to move in either direction (power, frequency).
    Variable,
    /// Fixed for the life of the node (maximum frequency).
    Constant,
    /// An identifier rather than a quantity (region hash).
    Label,
}

/// Textual rendering of a signal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Format {
    Double,
    Integer,
    /// Raw 64-bit pattern as `0x%016x`.
    Hex,
    /// Engineering notation with an SI prefix, e.g. `1.5 G`.
    Si,
}

const SI_PREFIXES: [(f64, &str); 6] = [
    (1e18, "E"),
    (1e15, "P"),
    (1e12, "T"),
    (1e9, "G"),
    (1e6, "M"),
    (1e3, "k"),
];

impl Format {
    pub fn format(self, value: f64) -> String {
        if value.is_nan() {
            return "NAN".to_string();
        }
        match self {
            Format::Double => format!("{value}"),
            Format::Integer => format!("{}", value as i64),
            Format::Hex => format!("0x{:016x}", value as u64),
            Format::Si => {
                let magnitude = value.abs();
                for (scale, prefix) in SI_PREFIXES {
                    if magnitude >= scale {
                        return format!("{} {prefix}", trim_decimal(value / scale));
                    }
                }
                trim_decimal(value)
            }
        }
    }
}

/// Three decimals with trailing zeros removed.
fn trim_decimal(value: f64) -> String {
    let s = format!("{value:.3}");
    s.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Metadata describing one signal.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SignalInfo {
    /// `None` when instances cannot be combined across domains.
    pub aggregation: Option<Aggregation>,
    pub format: Format,
    pub behavior: Behavior,
    pub units: String,
    pub description: String,
}

impl SignalInfo {
    pub fn new(aggregation: Aggregation, behavior: Behavior, units: &str) -> Self {
        Self {
            aggregation: Some(aggregation),
            format: Format::Double,
            behavior,
            units: units.to_string(),
            description: String::new(),
        }
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// A `(name, domain, index)` triple naming one signal or control instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Request {
    pub name: String,
    pub domain: Domain,
    pub index: usize,
}

impl Request {
    pub fn new(name: impl Into<String>, domain: Domain, index: usize) -> Self {
        Self {
            name: name.into(),
            domain,
            index,
        }
    }

    /// Board-level request for instance 0.
    pub fn board(name: impl Into<String>) -> Self {
        Self::new(name, Domain::Board, 0)
    }

    /// Parses `NAME`, `NAME@DOMAIN` or `NAME@DOMAIN:INDEX`. Missing parts
    /// default to board and index 0.
    pub fn parse(text: &str) -> Result<Self, TopoError> {
        let text = text.trim();
        let Some((name, location)) = text.split_once('@') else {
            return Ok(Self::board(text));
        };
        let (domain, index) = match location.split_once(':') {
            Some((domain, index)) => {
                let index = index
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| TopoError::UnknownDomain(location.to_string()))?;
                (domain, index)
            }
            None => (location, 0),
        };
        Ok(Self::new(name.trim(), Domain::from_name(domain)?, index))
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.name, self.domain, self.index)
    }
}

/// Requests are the same shape whether they name a signal or a control.
pub type SignalRequest = Request;
pub type ControlRequest = Request;
