//! Symlink management between `bin/` and the Cellar

use crate::error::{Result, TapError};
use crate::prefix::Prefix;
use anyhow::Context;
use std::fs;
use std::os::unix::fs as unix_fs;
use std::path::{Component, Path, PathBuf};

/// Lexically normalize a path, resolving `.` and `..` without touching the filesystem
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Where a symlink points, as an absolute normalized path
fn resolve_link(link: &Path) -> Option<PathBuf> {
    let target = fs::read_link(link).ok()?;
    let absolute = if target.is_relative() {
        link.parent()?.join(target)
    } else {
        target
    };
    Some(normalize_path(&absolute))
}

/// Relative target for `bin/<exe>`, e.g. `../Cellar/vso/3604372/libexec/vso`
pub fn relative_link_target(name: &str, version: &str, exe: &str) -> PathBuf {
    PathBuf::from("..")
        .join("Cellar")
        .join(name)
        .join(version)
        .join("libexec")
        .join(exe)
}

/// Fail unless `bin/<exe>` is free or is a link into one of this formula's kegs
pub fn ensure_linkable(prefix: &Prefix, name: &str, exe: &str) -> Result<()> {
    let link = prefix.bin().join(exe);
    if link.symlink_metadata().is_err() {
        return Ok(());
    }

    let rack = normalize_path(&prefix.rack(name));
    if resolve_link(&link).is_some_and(|p| p.starts_with(&rack)) {
        return Ok(());
    }

    Err(TapError::Other(anyhow::anyhow!(
        "Could not symlink {}: target already exists and is not owned by {}",
        link.display(),
        name
    )))
}

/// Link `<prefix>/bin/<exe>` to the executable inside a keg.
///
/// An existing link into any keg of the same formula is replaced, which is
/// how a newer record supersedes an older one. Anything else already at that
/// path is left alone and reported as a conflict.
pub fn link_executable(prefix: &Prefix, name: &str, version: &str, exe: &str) -> Result<PathBuf> {
    ensure_linkable(prefix, name, exe)?;

    let bin = prefix.bin();
    fs::create_dir_all(&bin)
        .with_context(|| format!("Failed to create directory: {}", bin.display()))?;

    let link = bin.join(exe);
    let relative = relative_link_target(name, version, exe);

    if let Ok(existing) = fs::read_link(&link) {
        if existing == relative {
            tracing::debug!("{} already linked", link.display());
            return Ok(link);
        }
        tracing::debug!("Replacing link {}", link.display());
        fs::remove_file(&link)?;
    }

    unix_fs::symlink(&relative, &link).with_context(|| {
        format!(
            "Failed to create symlink: {} -> {}",
            link.display(),
            relative.display()
        )
    })?;

    Ok(link)
}

/// Remove every `bin/` symlink that points into this formula's kegs
pub fn unlink_formula(prefix: &Prefix, name: &str) -> Result<Vec<PathBuf>> {
    let bin = prefix.bin();
    let rack = normalize_path(&prefix.rack(name));
    let mut unlinked = Vec::new();

    if !bin.exists() {
        return Ok(unlinked);
    }

    for entry in fs::read_dir(&bin)? {
        let path = entry?.path();
        if !path.symlink_metadata()?.file_type().is_symlink() {
            continue;
        }
        if resolve_link(&path).is_some_and(|p| p.starts_with(&rack)) {
            fs::remove_file(&path)?;
            unlinked.push(path);
        }
    }

    Ok(unlinked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path(Path::new("foo/bar/../baz")), PathBuf::from("foo/baz"));
        assert_eq!(normalize_path(Path::new("./foo/./bar")), PathBuf::from("foo/bar"));
        assert_eq!(
            normalize_path(Path::new("/usr/local/bin/../Cellar/vso")),
            PathBuf::from("/usr/local/Cellar/vso")
        );
        assert_eq!(normalize_path(Path::new("foo/../../bar")), PathBuf::from("../bar"));
    }

    #[test]
    fn test_relative_link_target() {
        assert_eq!(
            relative_link_target("vso", "3604372", "vso"),
            PathBuf::from("../Cellar/vso/3604372/libexec/vso")
        );
    }

    #[test]
    fn test_link_refuses_foreign_file() {
        let temp = TempDir::new().unwrap();
        let prefix = Prefix::new(temp.path());
        fs::create_dir_all(prefix.bin()).unwrap();
        fs::write(prefix.bin().join("vso"), "user's script").unwrap();

        assert!(link_executable(&prefix, "vso", "1", "vso").is_err());
        assert_eq!(
            fs::read_to_string(prefix.bin().join("vso")).unwrap(),
            "user's script"
        );
    }

    #[test]
    fn test_ensure_linkable() {
        let temp = TempDir::new().unwrap();
        let prefix = Prefix::new(temp.path());
        assert!(ensure_linkable(&prefix, "vso", "vso").is_ok());

        link_executable(&prefix, "vso", "1", "vso").unwrap();
        assert!(ensure_linkable(&prefix, "vso", "vso").is_ok());
        assert!(ensure_linkable(&prefix, "codespaces", "vso").is_err());

        unix_fs::symlink("/usr/bin/true", prefix.bin().join("codespaces")).unwrap();
        assert!(ensure_linkable(&prefix, "codespaces", "codespaces").is_err());
    }

    #[test]
    fn test_link_replaces_older_keg_and_unlinks() {
        let temp = TempDir::new().unwrap();
        let prefix = Prefix::new(temp.path());

        let first = link_executable(&prefix, "vso", "1", "vso").unwrap();
        let second = link_executable(&prefix, "vso", "2", "vso").unwrap();
        assert_eq!(first, second);
        assert_eq!(
            fs::read_link(&second).unwrap(),
            PathBuf::from("../Cellar/vso/2/libexec/vso")
        );

        // A link owned by another formula survives
        link_executable(&prefix, "codespaces", "1", "codespaces").unwrap();

        let removed = unlink_formula(&prefix, "vso").unwrap();
        assert_eq!(removed, vec![prefix.bin().join("vso")]);
        assert!(prefix.bin().join("codespaces").symlink_metadata().is_ok());
    }
}
