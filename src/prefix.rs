//! Installation prefix layout and installed-keg discovery

use crate::error::{Result, TapError};
use crate::receipt::InstallReceipt;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// Detect the default prefix on this system
pub fn detect_prefix() -> PathBuf {
    for var in ["VSOTAP_PREFIX", "HOMEBREW_PREFIX"] {
        if let Ok(prefix) = std::env::var(var)
            && !prefix.is_empty()
        {
            return PathBuf::from(prefix);
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        PathBuf::from("/opt/homebrew")
    }
    #[cfg(not(target_arch = "aarch64"))]
    {
        PathBuf::from("/usr/local")
    }
}

/// Whether `value` can be joined onto a prefix path as exactly one component
pub fn is_path_component(value: &str) -> bool {
    !value.is_empty()
        && value != "."
        && value != ".."
        && !value.contains(['/', '\\', '\0'])
}

/// Reject formula names that would resolve outside their rack
pub fn validate_name(name: &str) -> Result<()> {
    if is_path_component(name) && !name.starts_with('.') {
        Ok(())
    } else {
        Err(TapError::InvalidFormula(
            name.to_string(),
            "formula names must be a single, non-hidden path component".to_string(),
        ))
    }
}

/// Root of an installation tree:
///
/// ```text
/// <root>/bin/<link>                          -> ../Cellar/<name>/<version>/libexec/<link>
/// <root>/Cellar/<name>/<version>/libexec/*
/// <root>/Cellar/<name>/<version>/INSTALL_RECEIPT.json
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefix {
    root: PathBuf,
}

impl Prefix {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bin(&self) -> PathBuf {
        self.root.join("bin")
    }

    pub fn cellar(&self) -> PathBuf {
        self.root.join("Cellar")
    }

    pub fn rack(&self, name: &str) -> PathBuf {
        self.cellar().join(name)
    }

    pub fn keg(&self, name: &str, version: &str) -> PathBuf {
        self.rack(name).join(version)
    }

    pub fn libexec(&self, name: &str, version: &str) -> PathBuf {
        self.keg(name, version).join("libexec")
    }

    /// Scratch directory for an in-progress install, inside the Cellar so the
    /// final move is a same-filesystem rename
    pub fn staging(&self, name: &str, version: &str) -> PathBuf {
        self.cellar().join(format!(".staging-{}-{}", name, version))
    }
}

/// An installed keg
#[derive(Debug, Clone)]
pub struct InstalledKeg {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub receipt: Option<InstallReceipt>,
}

impl InstalledKeg {
    pub fn from_path(name: String, version: String, path: PathBuf) -> Self {
        let receipt = InstallReceipt::read(&path).ok();
        Self {
            name,
            version,
            path,
            receipt,
        }
    }
}

fn visible_dirs(dir: &Path) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut entries = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || !entry.file_type()?.is_dir() {
            continue;
        }
        entries.push((name, entry.path()));
    }
    entries.sort();
    Ok(entries)
}

/// All installed kegs in the prefix
pub fn list_installed(prefix: &Prefix) -> anyhow::Result<Vec<InstalledKeg>> {
    let cellar = prefix.cellar();
    if !cellar.exists() {
        return Ok(vec![]);
    }

    let mut kegs = Vec::new();
    for (name, rack) in visible_dirs(&cellar)? {
        for (version, path) in visible_dirs(&rack)? {
            kegs.push(InstalledKeg::from_path(name.clone(), version, path));
        }
    }
    Ok(kegs)
}

/// Installed versions of one formula, newest first
pub fn installed_versions(prefix: &Prefix, name: &str) -> anyhow::Result<Vec<InstalledKeg>> {
    let rack = prefix.rack(name);
    if !rack.exists() {
        return Ok(vec![]);
    }

    let mut kegs: Vec<_> = visible_dirs(&rack)?
        .into_iter()
        .map(|(version, path)| InstalledKeg::from_path(name.to_string(), version, path))
        .collect();

    kegs.sort_by(|a, b| compare_versions(&b.version, &a.version));
    Ok(kegs)
}

/// File count and total size of a keg
pub fn disk_usage(path: &Path) -> (usize, u64) {
    walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .fold((0, 0), |(files, bytes), entry| {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            (files + 1, bytes + size)
        })
}

/// Compare version strings numerically component by component
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let a_parts: Vec<u64> = a.split('.').filter_map(|s| s.parse().ok()).collect();
    let b_parts: Vec<u64> = b.split('.').filter_map(|s| s.parse().ok()).collect();

    for i in 0..a_parts.len().max(b_parts.len()) {
        let a_part = a_parts.get(i).unwrap_or(&0);
        let b_part = b_parts.get(i).unwrap_or(&0);
        match a_part.cmp(b_part) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }

    a.cmp(b)
}
