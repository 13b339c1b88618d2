// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local admission checks for candidate files.
//!
//! Each rule is evaluated independently so a file reports every violation at
//! once. The extension comes from the file name, never the declared content
//! type.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a candidate file was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    TooLarge { limit: u64, actual: u64 },
    ExtensionNotAllowed { extension: Option<String>, allowed: Vec<String> },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooLarge { limit, actual } => {
                write!(f, "file is {}, limit is {}", format_size(*actual), format_size(*limit))
            }
            Self::ExtensionNotAllowed { extension: Some(ext), allowed } => {
                write!(f, "file type .{ext} is not allowed (allowed: {})", allowed.join(", "))
            }
            Self::ExtensionNotAllowed { extension: None, allowed } => {
                write!(f, "file has no extension (allowed: {})", allowed.join(", "))
            }
        }
    }
}

/// A refused candidate with every reason it failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub name: String,
    pub reasons: Vec<RejectReason>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name)?;
        for (i, reason) in self.reasons.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{reason}")?;
        }
        Ok(())
    }
}

/// Size limit and extension allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPolicy {
    max_size: u64,
    allowed: Vec<String>,
}

impl UploadPolicy {
    /// Extensions are normalised: trimmed, leading dot dropped, lowercased.
    pub fn new(max_size: u64, allowed: &[String]) -> Self {
        let allowed = allowed
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { max_size, allowed }
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed
    }

    /// Every rule `name`/`size` violates; empty means admissible.
    pub fn check(&self, name: &str, size: u64) -> Vec<RejectReason> {
        let mut reasons = Vec::new();
        if size > self.max_size {
            reasons.push(RejectReason::TooLarge { limit: self.max_size, actual: size });
        }
        let extension = extension_of(name);
        let allowed = extension.as_ref().is_some_and(|ext| self.allowed.iter().any(|a| a == ext));
        if !allowed {
            reasons.push(RejectReason::ExtensionNotAllowed {
                extension,
                allowed: self.allowed.clone(),
            });
        }
        reasons
    }
}

/// Lowercased text after the last `.` of `name`, if non-empty.
pub fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_lowercase())
}

/// Human-readable byte count (1024-based).
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
