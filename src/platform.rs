//! Host platform detection for `depends_on` requirements.
//!
//! Formulae declare a minimum macOS release by codename (`high_sierra`,
//! `big_sur`, ...). This module maps codenames to version numbers, detects the
//! running macOS version, and decides whether a requirement is satisfied.
//!
//! # Examples
//!
//! ```no_run
//! use vsotap::platform::{Host, MacOsVersion};
//!
//! fn main() -> vsotap::Result<()> {
//!     let host = Host::detect();
//!     let required = MacOsVersion::from_codename("high_sierra")?;
//!     host.check_macos(&required)?;
//!     Ok(())
//! }
//! ```

use crate::error::{Result, TapError};
#[cfg(target_os = "macos")]
use anyhow::Context;
use std::fmt;
#[cfg(target_os = "macos")]
use std::process::Command;

/// Known macOS codenames, oldest first.
const CODENAMES: &[(&str, u32, u32)] = &[
    ("yosemite", 10, 10),
    ("el_capitan", 10, 11),
    ("sierra", 10, 12),
    ("high_sierra", 10, 13),
    ("mojave", 10, 14),
    ("catalina", 10, 15),
    ("big_sur", 11, 0),
    ("monterey", 12, 0),
    ("ventura", 13, 0),
    ("sonoma", 14, 0),
    ("sequoia", 15, 0),
    ("tahoe", 26, 0),
];

/// A macOS release as `major.minor`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MacOsVersion {
    pub major: u32,
    pub minor: u32,
}

impl MacOsVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Resolve a Homebrew-style codename such as `high_sierra`
    pub fn from_codename(codename: &str) -> Result<Self> {
        let wanted = codename.trim().to_ascii_lowercase().replace('-', "_");
        CODENAMES
            .iter()
            .find(|(name, _, _)| *name == wanted)
            .map(|(_, major, minor)| Self::new(*major, *minor))
            .ok_or_else(|| {
                TapError::UnsupportedPlatform(format!("Unknown macOS release: {}", codename))
            })
    }

    /// Parse `sw_vers -productVersion` output (`10.15.7`, `14.2`, `15`)
    pub fn parse(version: &str) -> Option<Self> {
        let mut parts = version.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        Some(Self::new(major, minor))
    }

    /// Codename of the newest release not newer than this version
    pub fn codename(&self) -> Option<&'static str> {
        CODENAMES
            .iter()
            .rev()
            .find(|(_, major, minor)| Self::new(*major, *minor) <= *self)
            .map(|(name, _, _)| *name)
    }
}

impl fmt::Display for MacOsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// The machine we are installing onto
#[derive(Debug, Clone, Default)]
pub struct Host {
    /// `None` when not running on macOS
    pub macos: Option<MacOsVersion>,
}

impl Host {
    pub fn detect() -> Self {
        Self {
            macos: detect_macos_version(),
        }
    }

    /// Fail unless this host runs at least `required`
    pub fn check_macos(&self, required: &MacOsVersion) -> Result<()> {
        let label = required
            .codename()
            .map(|name| format!("macOS {} ({})", required, name))
            .unwrap_or_else(|| format!("macOS {}", required));

        match self.macos {
            Some(current) if current >= *required => Ok(()),
            Some(current) => Err(TapError::UnsupportedPlatform(format!(
                "{} or newer is required; this system runs macOS {}",
                label, current
            ))),
            None => Err(TapError::UnsupportedPlatform(format!(
                "{} or newer is required; this system is not macOS",
                label
            ))),
        }
    }
}

#[cfg(target_os = "macos")]
fn detect_macos_version() -> Option<MacOsVersion> {
    let output = Command::new("sw_vers")
        .arg("-productVersion")
        .output()
        .context("Failed to run sw_vers")
        .ok()?;

    let version = String::from_utf8(output.stdout).ok()?;
    MacOsVersion::parse(&version)
}

#[cfg(not(target_os = "macos"))]
fn detect_macos_version() -> Option<MacOsVersion> {
    None
}
