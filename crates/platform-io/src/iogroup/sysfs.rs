// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Shared sysfs file helpers for the backends.

use crate::PlatformIOError;
use std::path::Path;

/// Reads a sysfs file and returns its trimmed content.
pub(crate) fn read_sysfs_file(path: &Path) -> Result<String, PlatformIOError> {
    if !path.exists() {
        return Err(PlatformIOError::NotAvailable {
            path: path.display().to_string(),
        });
    }
    std::fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| PlatformIOError::ReadFailed {
            target: path.display().to_string(),
            detail: e.to_string(),
        })
}

/// Reads an unsigned integer from a sysfs file.
pub(crate) fn read_sysfs_u64(path: &Path) -> Result<u64, PlatformIOError> {
    let content = read_sysfs_file(path)?;
    content.parse::<u64>().map_err(|_| PlatformIOError::ReadFailed {
        target: path.display().to_string(),
        detail: format!("expected unsigned integer, got '{content}'"),
    })
}

/// Reads a signed integer from a sysfs file.
pub(crate) fn read_sysfs_i64(path: &Path) -> Result<i64, PlatformIOError> {
    let content = read_sysfs_file(path)?;
    content.parse::<i64>().map_err(|_| PlatformIOError::ReadFailed {
        target: path.display().to_string(),
        detail: format!("expected integer, got '{content}'"),
    })
}

/// Writes an integer to a sysfs file.
pub(crate) fn write_sysfs_u64(path: &Path, value: u64) -> Result<(), PlatformIOError> {
    std::fs::write(path, value.to_string()).map_err(|e| PlatformIOError::WriteFailed {
        target: path.display().to_string(),
        detail: e.to_string(),
    })
}
