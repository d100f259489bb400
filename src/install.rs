//! The install pipeline: verify, place, chmod, link, test.
//!
//! Installing a formula runs one fixed sequence:
//!
//! 1. check the `depends_on` macOS requirement
//! 2. download the archive and verify its SHA-256 (a mismatch stops here,
//!    before anything is written to the prefix)
//! 3. extract into a staging directory inside the Cellar and make sure the
//!    `bin/` link is free to take
//! 4. move the staging directory into `Cellar/<name>/<version>`
//! 5. chmod every declared executable to `0555`
//! 6. link the primary executable into `bin/`
//! 7. delete every other installed version of the same formula
//! 8. write `INSTALL_RECEIPT.json`
//! 9. run the smoke tests
//!
//! Two records with the same name never coexist: step 7 means the most
//! recent install replaces the previous one wholesale.

use crate::download::Downloader;
use crate::error::{Result, TapError};
use crate::extract;
use crate::formula::{EXECUTABLE_MODE, Formula};
use crate::platform::Host;
use crate::prefix::{self, Prefix};
use crate::receipt::InstallReceipt;
use crate::smoke;
use crate::symlink;
use anyhow::Context;
use indicatif::MultiProgress;
use std::fs;
use std::path::{Path, PathBuf};

use std::os::unix::fs::PermissionsExt;

#[derive(Debug, Clone)]
pub struct InstallOptions {
    pub host: Host,
    /// Install even when the host does not meet `depends_on`
    pub ignore_os_requirement: bool,
    /// Reinstall a version that is already present
    pub force: bool,
    /// Run the smoke tests after linking
    pub run_tests: bool,
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            host: Host::detect(),
            ignore_os_requirement: false,
            force: false,
            run_tests: true,
        }
    }
}

/// What placing a keg produced
#[derive(Debug, Clone)]
pub struct PlacedKeg {
    pub keg: PathBuf,
    pub link: PathBuf,
    pub files: usize,
    /// Versions that were removed because this one replaced them
    pub superseded: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum InstallOutcome {
    Installed {
        version: String,
        placed: PlacedKeg,
        tests_passed: Vec<String>,
    },
    AlreadyInstalled {
        version: String,
    },
}

pub struct Installer {
    prefix: Prefix,
    downloader: Downloader,
}

impl Installer {
    pub fn new(prefix: Prefix, downloader: Downloader) -> Self {
        Self { prefix, downloader }
    }

    pub fn prefix(&self) -> &Prefix {
        &self.prefix
    }

    pub fn downloader(&self) -> &Downloader {
        &self.downloader
    }

    pub async fn install(
        &self,
        formula: &Formula,
        options: &InstallOptions,
        progress: Option<&MultiProgress>,
    ) -> Result<InstallOutcome> {
        formula.validate()?;
        let version = formula.version()?;

        if let Some(required) = formula.required_macos()? {
            match options.host.check_macos(&required) {
                Ok(()) => {}
                Err(e) if options.ignore_os_requirement => {
                    tracing::warn!("{}: {} (ignored)", formula.name, e);
                }
                Err(e) => return Err(e),
            }
        }

        let keg = self.prefix.keg(&formula.name, &version);
        if keg.exists() && !options.force {
            tracing::info!("{} {} is already installed", formula.name, version);
            return Ok(InstallOutcome::AlreadyInstalled { version });
        }

        let archive = self.downloader.fetch(formula, progress).await?;
        let placed = place_keg(&self.prefix, formula, &version, &archive)?;

        let tests_passed = if options.run_tests {
            smoke::run_smoke_tests(formula, &self.prefix).await?
        } else {
            vec![]
        };

        Ok(InstallOutcome::Installed {
            version,
            placed,
            tests_passed,
        })
    }

    /// Remove the link and every keg of a formula, returning the removed versions
    pub fn uninstall(&self, name: &str) -> Result<Vec<String>> {
        prefix::validate_name(name)?;
        let kegs = prefix::installed_versions(&self.prefix, name)?;
        if kegs.is_empty() {
            return Err(TapError::Other(anyhow::anyhow!(
                "No such keg: {}",
                self.prefix.rack(name).display()
            )));
        }

        for link in symlink::unlink_formula(&self.prefix, name)? {
            tracing::debug!("Unlinked {}", link.display());
        }

        let mut removed = Vec::new();
        for keg in kegs {
            remove_keg(&keg.path)?;
            removed.push(keg.version);
        }

        let rack = self.prefix.rack(name);
        if rack.exists() && fs::read_dir(&rack)?.next().is_none() {
            fs::remove_dir(&rack)?;
        }

        Ok(removed)
    }
}

/// Place a verified archive into the prefix (steps 3 to 8)
pub fn place_keg(
    prefix: &Prefix,
    formula: &Formula,
    version: &str,
    archive: &Path,
) -> Result<PlacedKeg> {
    formula.validate()?;
    let name = formula.name.as_str();
    let staging = prefix.staging(name, version);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }

    let staged = stage(formula, archive, &staging).and_then(|files| {
        symlink::ensure_linkable(prefix, name, &formula.install.link)?;
        Ok(files)
    });
    let files = match staged {
        Ok(files) => files,
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
    };

    symlink::unlink_formula(prefix, name)?;

    let keg = prefix.keg(name, version);
    if keg.exists() {
        remove_keg(&keg)?;
    }
    fs::create_dir_all(prefix.rack(name))?;
    fs::rename(&staging, &keg)
        .with_context(|| format!("Failed to move {} into place", keg.display()))?;

    let link = match activate(prefix, formula, version, &keg) {
        Ok(link) => link,
        Err(e) => {
            roll_back(prefix, formula, version, &keg);
            return Err(e);
        }
    };

    let mut superseded = Vec::new();
    for old in prefix::installed_versions(prefix, name)? {
        if old.version != version {
            tracing::info!("Removing superseded {} {}", name, old.version);
            remove_keg(&old.path)?;
            superseded.push(old.version);
        }
    }

    InstallReceipt::new(formula, version, files).write(&keg)?;

    Ok(PlacedKeg {
        keg,
        link,
        files,
        superseded,
    })
}

/// chmod the executables of a freshly moved keg and link the primary one
fn activate(prefix: &Prefix, formula: &Formula, version: &str, keg: &Path) -> Result<PathBuf> {
    let libexec = keg.join("libexec");
    for exe in &formula.install.executables {
        set_executable_mode(&libexec.join(exe))?;
    }
    symlink::link_executable(prefix, &formula.name, version, &formula.install.link)
}

/// Drop a keg that could not be activated and relink the newest version left
fn roll_back(prefix: &Prefix, formula: &Formula, version: &str, keg: &Path) {
    let name = formula.name.as_str();
    if let Err(e) = remove_keg(keg) {
        tracing::warn!("{}", e);
    }

    let previous = prefix::installed_versions(prefix, name)
        .ok()
        .and_then(|kegs| kegs.into_iter().find(|k| k.version != version));
    if let Some(previous) = previous {
        match symlink::link_executable(prefix, name, &previous.version, &formula.install.link) {
            Ok(link) => tracing::info!("Relinked {} to {} {}", link.display(), name, previous.version),
            Err(e) => tracing::warn!("Could not relink {} {}: {}", name, previous.version, e),
        }
    }
}

/// Extract into `<staging>/libexec` and check the declared executables exist
fn stage(formula: &Formula, archive: &Path, staging: &Path) -> Result<usize> {
    let libexec = staging.join("libexec");
    let files = extract::extract_archive(archive, &libexec)?;

    for exe in &formula.install.executables {
        if !libexec.join(exe).is_file() {
            return Err(TapError::InvalidFormula(
                formula.name.clone(),
                format!("archive does not contain executable {}", exe),
            ));
        }
    }

    Ok(files)
}

fn set_executable_mode(path: &Path) -> Result<()> {
    fs::set_permissions(path, fs::Permissions::from_mode(EXECUTABLE_MODE))
        .with_context(|| format!("Failed to chmod {}", path.display()))?;
    Ok(())
}

fn remove_keg(keg: &Path) -> Result<()> {
    fs::remove_dir_all(keg).with_context(|| format!("Failed to remove {}", keg.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_run_tests() {
        let options = InstallOptions::default();
        assert!(options.run_tests);
        assert!(!options.force);
        assert!(!options.ignore_os_requirement);
    }
}
