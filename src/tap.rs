//! The tap: a directory of `<name>.toml` formula records

use crate::error::{Result, TapError};
use crate::formula::Formula;
use std::fs;
use std::path::{Path, PathBuf};

/// Similarity above which a name is offered as a suggestion
const SUGGESTION_THRESHOLD: f64 = 0.8;

pub const FORMULA_EXTENSION: &str = "toml";

#[derive(Debug, Clone)]
pub struct Tap {
    dir: PathBuf,
}

impl Tap {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn formula_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, FORMULA_EXTENSION))
    }

    /// Names of every formula file, sorted
    pub fn formula_names(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(FORMULA_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load every formula in the tap
    pub fn load_all(&self) -> Result<Vec<Formula>> {
        self.formula_names()?
            .iter()
            .map(|name| self.load(name))
            .collect()
    }

    /// Load one formula by name
    pub fn load(&self, name: &str) -> Result<Formula> {
        let path = self.formula_path(name);
        if !path.exists() {
            return Err(TapError::FormulaNotFound {
                name: name.to_string(),
                suggestion: self.suggest(name),
            });
        }
        Formula::load(&path).map_err(|e| match e {
            TapError::TomlError(e) => TapError::InvalidFormula(name.to_string(), e.to_string()),
            other => other,
        })
    }

    /// Closest existing name to a misspelled one
    fn suggest(&self, name: &str) -> Option<String> {
        self.formula_names()
            .ok()?
            .into_iter()
            .map(|candidate| (strsim::jaro_winkler(name, &candidate), candidate))
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, candidate)| candidate)
    }
}
