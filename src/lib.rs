//! Library interface for vsotap
//!
//! Installs prebuilt agent releases described by TOML formula records and
//! keeps those records pointed at the newest deployed agent build.

pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod formula;
pub mod install;
pub mod platform;
pub mod prefix;
pub mod receipt;
pub mod smoke;
pub mod symlink;
pub mod tap;
pub mod updater;

// Re-export commonly used items
pub use error::{Result, TapError};
pub use formula::Formula;
pub use install::{InstallOptions, InstallOutcome, Installer};
pub use prefix::Prefix;
pub use symlink::normalize_path;
pub use tap::Tap;
