// Test helpers for isolated testing
// Provides throwaway prefixes, caches and taps that never touch the real system

#![allow(dead_code)]

use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use vsotap::download::Downloader;
use vsotap::install::{InstallOptions, Installer};
use vsotap::platform::{Host, MacOsVersion};
use vsotap::{Formula, Prefix};
use zip::write::SimpleFileOptions;

/// A script that succeeds for every invocation
pub const OK_SCRIPT: &str = "#!/bin/sh\nexit 0\n";

/// Isolated test environment using temporary directories
/// Automatically cleaned up when dropped
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub prefix: Prefix,
    pub cache: PathBuf,
    pub formula_dir: PathBuf,
    pub archives: PathBuf,
}

impl TestEnvironment {
    /// Layout:
    /// - temp/
    ///   - prefix/    (Cellar and bin)
    ///   - cache/     (downloaded archives)
    ///   - Formula/   (formula records)
    ///   - archives/  (what the file:// URLs point at)
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let root = temp_dir.path().to_path_buf();
        let prefix = Prefix::new(root.join("prefix"));
        let cache = root.join("cache");
        let formula_dir = root.join("Formula");
        let archives = root.join("archives");

        std::fs::create_dir_all(prefix.root()).unwrap();
        std::fs::create_dir_all(&formula_dir).unwrap();
        std::fs::create_dir_all(&archives).unwrap();

        Self {
            temp_dir,
            prefix,
            cache,
            formula_dir,
            archives,
        }
    }

    pub fn installer(&self) -> Installer {
        Installer::new(self.prefix.clone(), Downloader::new(&self.cache).unwrap())
    }

    /// Write an agent zip named like the real releases and return its path and digest
    pub fn write_agent_zip(&self, version: &str, files: &[(&str, &str)]) -> (PathBuf, String) {
        let path = self.archives.join(format!("VSOAgent_osx_{}.zip", version));
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, contents) in files {
            zip.start_file(*name, SimpleFileOptions::default().unix_permissions(0o644))
                .unwrap();
            zip.write_all(contents.as_bytes()).unwrap();
        }
        zip.finish().unwrap();

        let sha = sha256_hex(&std::fs::read(&path).unwrap());
        (path, sha)
    }

    /// Formula pointing at a local archive
    pub fn formula(&self, name: &str, archive: &Path, sha256: &str) -> Formula {
        Formula::parse(&formula_toml(name, &format!("file://{}", archive.display()), sha256))
            .unwrap()
    }

    /// Formula for a two-executable agent whose scripts always succeed
    pub fn agent(&self, name: &str, version: &str) -> Formula {
        let (archive, sha) = self.write_agent_zip(
            version,
            &[
                (name, OK_SCRIPT),
                ("vsls-agent", OK_SCRIPT),
                ("runtimes/libcoreclr.dylib", "not really a library"),
            ],
        );
        self.formula(name, &archive, &sha)
    }
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn formula_toml(name: &str, url: &str, sha256: &str) -> String {
    format!(
        r#"name = "{name}"
desc = "Visual Studio Online Self-Hosted Agent"
homepage = "https://online.visualstudio.com"
url = "{url}"
# must be lower-case
sha256 = "{sha256}"

[depends_on]
macos = "high_sierra"

[install]
executables = ["{name}", "vsls-agent"]
link = "{name}"
"#
    )
}

/// Options for a macOS host that satisfies `high_sierra`
pub fn options() -> InstallOptions {
    InstallOptions {
        host: Host {
            macos: Some(MacOsVersion::new(14, 0)),
        },
        ignore_os_requirement: false,
        force: false,
        run_tests: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new();
        assert!(env.prefix.root().exists());
        assert!(env.formula_dir.exists());
        assert!(env.archives.exists());
    }

    #[test]
    fn test_environment_cleanup() {
        let root = {
            let env = TestEnvironment::new();
            env.prefix.root().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[test]
    fn test_agent_formula_is_sound() {
        let env = TestEnvironment::new();
        let formula = env.agent("vso", "100");
        assert_eq!(formula.version().unwrap(), "100");
        // file:// URLs are fine for tests but not for a published record
        let problems = formula.audit(Some("vso"));
        assert_eq!(problems.len(), 1, "{:?}", problems);
    }
}
