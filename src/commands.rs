//! Command implementations for the vsotap CLI

use anyhow::{Result, bail};
use colored::Colorize;
use indicatif::MultiProgress;
use std::collections::HashSet;
use std::path::Path;
use vsotap::config::Config;
use vsotap::download::Downloader;
use vsotap::install::{InstallOptions, InstallOutcome, Installer};
use vsotap::prefix;
use vsotap::updater::{self, HttpAgentSource};
use vsotap::{Formula, Tap};

fn load_formulae(tap: &Tap, names: &[String]) -> Result<Vec<Formula>> {
    if names.is_empty() {
        bail!("This command requires at least one formula argument");
    }
    Ok(unique_names(names)
        .into_iter()
        .map(|name| tap.load(name))
        .collect::<vsotap::Result<Vec<_>>>()?)
}

/// Drop repeated arguments, keeping the first occurrence of each name.
/// Two installs of the same formula would share a staging directory.
fn unique_names(names: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    names
        .iter()
        .map(String::as_str)
        .filter(|name| seen.insert(*name))
        .collect()
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", bytes, UNITS[0])
    } else {
        format!("{:.1}{}", size, UNITS[unit])
    }
}

pub async fn install(config: &Config, names: &[String], options: InstallOptions) -> Result<()> {
    let tap = Tap::new(&config.formula_dir);
    let formulae = load_formulae(&tap, names)?;
    let installer = Installer::new(
        config.prefix.clone(),
        Downloader::new(config.downloads_dir())?,
    );

    println!(
        "Installing {} formulae...",
        formulae.len().to_string().bold()
    );

    let mp = MultiProgress::new();
    let results = futures::future::join_all(
        formulae
            .iter()
            .map(|formula| installer.install(formula, &options, Some(&mp))),
    )
    .await;

    let mut failures = 0;
    for (formula, result) in formulae.iter().zip(results) {
        match result {
            Ok(InstallOutcome::Installed {
                version,
                placed,
                tests_passed,
            }) => {
                println!(
                    "  {} {} {} ({} files)",
                    "✓".green(),
                    formula.name.bold(),
                    version.dimmed(),
                    placed.files
                );
                for old in &placed.superseded {
                    println!("    Replaced {} {}", formula.name, old.dimmed());
                }
                for invocation in &tests_passed {
                    println!("    {} {}", "✓".green(), invocation.dimmed());
                }
                println!("\n{}", "==> Caveats".bold());
                print!("{}", formula.caveats(&config.prefix)?);
            }
            Ok(InstallOutcome::AlreadyInstalled { version }) => {
                println!(
                    "  {} {} {} is already installed (use --force to reinstall)",
                    "⚠".yellow(),
                    formula.name.bold(),
                    version
                );
            }
            Err(e) => {
                println!("  {} {}: {}", "✗".red(), formula.name.bold(), e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} formulae failed to install", failures, formulae.len());
    }
    Ok(())
}

pub fn uninstall(config: &Config, names: &[String]) -> Result<()> {
    if names.is_empty() {
        bail!("This command requires at least one formula argument");
    }
    let installer = Installer::new(
        config.prefix.clone(),
        Downloader::new(config.downloads_dir())?,
    );

    for name in unique_names(names) {
        let removed = installer.uninstall(name)?;
        println!(
            "  {} Uninstalled {} {}",
            "✓".green(),
            name.bold(),
            removed.join(", ").dimmed()
        );
    }
    Ok(())
}

pub async fn fetch(config: &Config, names: &[String]) -> Result<()> {
    let tap = Tap::new(&config.formula_dir);
    let formulae = load_formulae(&tap, names)?;
    let downloader = Downloader::new(config.downloads_dir())?;

    for (name, path) in downloader.fetch_all(&formulae).await? {
        println!("  {} {}: {}", "✓".green(), name.bold(), path.display());
    }
    Ok(())
}

pub fn info(config: &Config, name: &str) -> Result<()> {
    let tap = Tap::new(&config.formula_dir);
    let formula = tap.load(name)?;
    let version = formula.version()?;

    println!("{}: {}", formula.name.bold().green(), version);
    println!("{}", formula.desc);
    println!("{}", formula.homepage.cyan());
    println!("From: {}", tap.formula_path(name).display());

    if let Some(required) = formula.required_macos()? {
        println!(
            "Requires: macOS >= {} ({})",
            required,
            formula.depends_on.macos.as_deref().unwrap_or_default()
        );
    }

    let kegs = prefix::installed_versions(&config.prefix, name)?;
    if kegs.is_empty() {
        println!("Not installed");
    } else {
        for keg in &kegs {
            let (files, bytes) = prefix::disk_usage(&keg.path);
            let when = keg
                .receipt
                .as_ref()
                .map(|r| format!(", installed {}", r.time.format("%Y-%m-%d %H:%M")))
                .unwrap_or_default();
            println!(
                "{} ({} files, {}{})",
                keg.path.display(),
                files,
                format_size(bytes),
                when
            );
        }
    }

    println!("\n{}", "==> Caveats".bold());
    print!("{}", formula.caveats(&config.prefix)?);
    Ok(())
}

pub fn list(config: &Config) -> Result<()> {
    let kegs = prefix::list_installed(&config.prefix)?;
    if kegs.is_empty() {
        println!("No formulae installed");
        return Ok(());
    }

    for keg in kegs {
        let source = keg
            .receipt
            .as_ref()
            .map(|r| format!(" ({})", &r.sha256[..r.sha256.len().min(12)]))
            .unwrap_or_default();
        println!("{} {}{}", keg.name.bold(), keg.version, source.dimmed());
    }
    Ok(())
}

pub fn caveats(config: &Config, name: &str) -> Result<()> {
    let formula = Tap::new(&config.formula_dir).load(name)?;
    print!("{}", formula.caveats(&config.prefix)?);
    Ok(())
}

pub async fn test(config: &Config, name: &str) -> Result<()> {
    let formula = Tap::new(&config.formula_dir).load(name)?;
    if prefix::installed_versions(&config.prefix, name)?.is_empty() {
        bail!("Testing requires the latest version of {}", name);
    }

    println!("Testing {}", formula.name.bold());
    for invocation in vsotap::smoke::run_smoke_tests(&formula, &config.prefix).await? {
        println!("  {} {}", "✓".green(), invocation);
    }
    Ok(())
}

pub fn audit(config: &Config, names: &[String]) -> Result<()> {
    let tap = Tap::new(&config.formula_dir);
    let names = if names.is_empty() {
        tap.formula_names()?
    } else {
        names.to_vec()
    };

    let mut problem_count = 0;
    for name in &names {
        let formula = tap.load(name)?;
        let problems = formula.audit(Some(name));
        if problems.is_empty() {
            continue;
        }
        println!("{}:", name.bold());
        for problem in &problems {
            println!("  * {}", problem);
        }
        problem_count += problems.len();
    }

    if problem_count > 0 {
        bail!("{} problems in {} formulae", problem_count, names.len());
    }
    Ok(())
}

/// Only the new version goes to stdout; everything else is logged
pub async fn update_formula(config: &Config, path: &Path) -> Result<()> {
    tracing::debug!("Using file {}", path.display());
    let source = HttpAgentSource::new(Downloader::new(config.downloads_dir())?);

    if let Some(version) = updater::update_formula(path, &source).await? {
        tracing::info!("The new version is {}", version);
        println!("{}", version);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_names_keeps_first_occurrence() {
        let names: Vec<String> = ["vso", "codespaces", "vso", "vso"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(unique_names(&names), vec!["vso", "codespaces"]);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(2048), "2.0KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0MB");
    }
}
