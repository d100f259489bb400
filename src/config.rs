//! Runtime configuration, resolved from the environment and CLI flags.
//!
//! | Setting      | Flag            | Environment                                   |
//! |--------------|-----------------|-----------------------------------------------|
//! | prefix       | `--prefix`      | `VSOTAP_PREFIX`, `HOMEBREW_PREFIX`            |
//! | cache        |                 | `VSOTAP_CACHE`, `XDG_CACHE_HOME/vsotap`       |
//! | formula dir  | `--formula-dir` | `VSOTAP_FORMULA_DIR`, `./Formula`             |

use crate::prefix::{Prefix, detect_prefix};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub prefix: Prefix,
    pub cache_dir: PathBuf,
    pub formula_dir: PathBuf,
}

impl Config {
    /// Resolve settings, letting explicit flags win over the environment
    pub fn resolve(prefix: Option<PathBuf>, formula_dir: Option<PathBuf>) -> Self {
        let config = Self {
            prefix: Prefix::new(prefix.unwrap_or_else(detect_prefix)),
            cache_dir: cache_dir(),
            formula_dir: formula_dir.unwrap_or_else(default_formula_dir),
        };
        tracing::debug!(?config, "resolved configuration");
        config
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.cache_dir.join("downloads")
    }
}

/// Cache directory (`~/.cache/vsotap` or equivalent)
pub fn cache_dir() -> PathBuf {
    if let Some(cache) = std::env::var_os("VSOTAP_CACHE") {
        PathBuf::from(cache)
    } else if let Some(cache_home) = std::env::var_os("XDG_CACHE_HOME") {
        PathBuf::from(cache_home).join("vsotap")
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".cache/vsotap")
    } else {
        PathBuf::from(".cache/vsotap")
    }
}

fn default_formula_dir() -> PathBuf {
    std::env::var_os("VSOTAP_FORMULA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("Formula"))
}
