//! Install receipts.
//!
//! Every keg carries an `INSTALL_RECEIPT.json` describing what was placed
//! there and from which archive:
//!
//! ```text
//! /opt/homebrew/Cellar/codespaces/3920504/
//!   INSTALL_RECEIPT.json
//!   libexec/
//! ```
//!
//! `vsotap list` and `vsotap info` read receipts back; a keg without one is
//! still reported, just with less detail.

use crate::formula::Formula;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallReceipt {
    pub installer_version: String,
    pub name: String,
    pub version: String,
    pub url: String,
    pub sha256: String,
    pub time: DateTime<Utc>,
    pub executables: Vec<String>,
    pub link: String,
    #[serde(default)]
    pub installed_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

impl InstallReceipt {
    pub fn new(formula: &Formula, version: &str, installed_files: usize) -> Self {
        Self {
            installer_version: format!("vsotap/{}", env!("CARGO_PKG_VERSION")),
            name: formula.name.clone(),
            version: version.to_string(),
            url: formula.url.clone(),
            sha256: formula.sha256.to_ascii_lowercase(),
            time: Utc::now(),
            executables: formula.install.executables.clone(),
            link: formula.install.link.clone(),
            installed_files,
            arch: Some(homebrew_arch().to_string()),
        }
    }

    pub fn read(keg: &Path) -> Result<Self> {
        let receipt_path = keg.join(RECEIPT_FILE);
        let contents = fs::read_to_string(&receipt_path)
            .with_context(|| format!("Failed to read receipt: {}", receipt_path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse receipt: {}", receipt_path.display()))
    }

    pub fn write(&self, keg: &Path) -> Result<()> {
        let receipt_path = keg.join(RECEIPT_FILE);
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize install receipt")?;
        fs::write(&receipt_path, json)
            .with_context(|| format!("Failed to write receipt: {}", receipt_path.display()))?;
        Ok(())
    }
}

/// Homebrew uses "arm64" for Apple Silicon, while Rust uses "aarch64"
fn homebrew_arch() -> &'static str {
    match std::env::consts::ARCH {
        "aarch64" => "arm64",
        arch => arch,
    }
}
