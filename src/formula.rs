//! Formula records.
//!
//! A formula is a flat TOML declaration of one prebuilt agent release:
//!
//! ```toml
//! name = "codespaces"
//! desc = "Visual Studio Codespaces Self-Hosted Agent"
//! homepage = "https://online.visualstudio.com"
//! url = "https://vsoagentdownloads.blob.core.windows.net/vsoagent/VSOAgent_osx_3920504.zip"
//! sha256 = "ee8604c0fda9a052824bde00411be6e094f1b47e30f49a061377c4015194db33"
//!
//! [depends_on]
//! macos = "high_sierra"
//!
//! [install]
//! executables = ["codespaces", "vsls-agent"]
//! link = "codespaces"
//! ```
//!
//! There is no `version` key. The version is read from the archive URL, so a
//! new release is published by replacing `url` and `sha256` together.

use crate::error::{Result, TapError};
use crate::platform::MacOsVersion;
use crate::prefix::{Prefix, is_path_component, validate_name};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Permission bits applied to every declared executable
pub const EXECUTABLE_MODE: u32 = 0o555;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    pub name: String,
    pub desc: String,
    pub homepage: String,
    pub url: String,
    pub sha256: String,
    #[serde(default)]
    pub depends_on: Dependencies,
    pub install: InstallSpec,
    #[serde(default)]
    pub test: TestSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dependencies {
    /// Minimum macOS codename, e.g. `high_sierra`
    #[serde(default)]
    pub macos: Option<String>,
}

/// Install actions: copy everything into `libexec`, chmod the executables,
/// link one of them into `bin`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallSpec {
    pub executables: Vec<String>,
    pub link: String,
}

/// Post-install smoke tests, each an argument list for the linked executable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSpec {
    #[serde(default = "default_invocations")]
    pub invocations: Vec<Vec<String>>,
}

impl Default for TestSpec {
    fn default() -> Self {
        Self {
            invocations: default_invocations(),
        }
    }
}

fn default_invocations() -> Vec<Vec<String>> {
    vec![
        vec![],
        vec!["--help".to_string()],
        vec!["--version".to_string()],
    ]
}

impl Formula {
    /// Load a formula from a `.toml` file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let formula = Self::parse(&contents)?;
        tracing::debug!("Loaded formula {} from {}", formula.name, path.display());
        Ok(formula)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Version derived from the archive URL
    pub fn version(&self) -> Result<String> {
        version_from_url(&self.url).ok_or_else(|| {
            TapError::InvalidFormula(
                self.name.clone(),
                format!("cannot determine version from url {}", self.url),
            )
        })
    }

    /// Minimum macOS release, if the formula declares one
    pub fn required_macos(&self) -> Result<Option<MacOsVersion>> {
        self.depends_on
            .macos
            .as_deref()
            .map(MacOsVersion::from_codename)
            .transpose()
    }

    /// File extension of the archive (`zip`, `tar.gz`, ...)
    pub fn archive_extension(&self) -> &'static str {
        let file_name = archive_file_name(&self.url).to_ascii_lowercase();
        if file_name.ends_with(".tar.gz") {
            "tar.gz"
        } else if file_name.ends_with(".tgz") {
            "tgz"
        } else {
            "zip"
        }
    }

    /// Post-install note shown to the user
    pub fn caveats(&self, prefix: &Prefix) -> Result<String> {
        let version = self.version()?;
        Ok(format!(
            "The executable should already be on PATH so run with `{link}`. \
             If not, the full path to the executable is:\n  {bin}\n\n\
             Other application files were installed at:\n  {libexec}\n",
            link = self.install.link,
            bin = prefix.bin().join(&self.install.link).display(),
            libexec = prefix.libexec(&self.name, &version).display(),
        ))
    }

    /// Fields that become paths under the prefix must be single path components,
    /// and the linked executable must be one of the declared ones
    fn layout_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if validate_name(&self.name).is_err() {
            problems.push(format!("invalid formula name: {:?}", self.name));
        }

        if self.install.executables.is_empty() {
            problems.push("install.executables is empty".to_string());
        }

        for exe in &self.install.executables {
            if !is_path_component(exe) {
                problems.push(format!("invalid executable name: {:?}", exe));
            }
        }

        if !self.install.executables.contains(&self.install.link) {
            problems.push(format!(
                "install.link \"{}\" is not one of install.executables",
                self.install.link
            ));
        }

        problems
    }

    /// Reject records whose names would escape their keg when joined onto it
    pub fn validate(&self) -> Result<()> {
        match self.layout_problems().into_iter().next() {
            Some(problem) => Err(TapError::InvalidFormula(self.name.clone(), problem)),
            None => Ok(()),
        }
    }

    /// Check the record for problems; an empty list means the formula is sound
    pub fn audit(&self, file_stem: Option<&str>) -> Vec<String> {
        let mut problems = Vec::new();

        if let Some(stem) = file_stem
            && stem != self.name
        {
            problems.push(format!(
                "formula name \"{}\" does not match file name \"{}\"",
                self.name, stem
            ));
        }

        if self.sha256.len() != 64
            || !self
                .sha256
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        {
            problems.push("sha256 must be 64 lower-case hex characters".to_string());
        }

        if !self.url.starts_with("https://") {
            problems.push(format!("url should use https: {}", self.url));
        }

        if version_from_url(&self.url).is_none() {
            problems.push(format!("cannot determine version from url {}", self.url));
        }

        if !self.homepage.starts_with("https://") && !self.homepage.starts_with("http://") {
            problems.push(format!("homepage is not a URL: {}", self.homepage));
        }

        if self.desc.trim().is_empty() {
            problems.push("desc is empty".to_string());
        }

        problems.extend(self.layout_problems());

        if let Err(e) = self.required_macos() {
            problems.push(e.to_string());
        }

        problems
    }
}

/// Last path segment of a URL, without query or fragment
fn archive_file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Derive a version from an archive URL.
///
/// `VSOAgent_osx_3920504.zip` yields `3920504`. Otherwise the last dotted run
/// of digits in the file name is used (`agent-1.2.3.tar.gz` yields `1.2.3`).
pub fn version_from_url(url: &str) -> Option<String> {
    let file_name = archive_file_name(url);
    let stem = [".tar.gz", ".tgz", ".zip"]
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext))
        .unwrap_or(file_name);

    if let Some(last) = stem.rsplit('_').next()
        && !last.is_empty()
        && last.chars().all(|c| c.is_ascii_digit())
    {
        return Some(last.to_string());
    }

    let mut best: Option<&str> = None;
    let mut start = None;
    for (i, c) in stem.char_indices() {
        match (c.is_ascii_digit() || (c == '.' && start.is_some()), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                best = Some(&stem[s..i]);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        best = Some(&stem[s..]);
    }

    best.map(|v| v.trim_end_matches('.').to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CODESPACES: &str = r#"
name = "codespaces"
desc = "Visual Studio Codespaces Self-Hosted Agent"
homepage = "https://online.visualstudio.com"
url = "https://vsoagentdownloads.blob.core.windows.net/vsoagent/VSOAgent_osx_3920504.zip"
sha256 = "ee8604c0fda9a052824bde00411be6e094f1b47e30f49a061377c4015194db33"

[depends_on]
macos = "high_sierra"

[install]
executables = ["codespaces", "vsls-agent"]
link = "codespaces"
"#;

    #[test]
    fn test_parse_formula() {
        let formula = Formula::parse(CODESPACES).unwrap();
        assert_eq!(formula.name, "codespaces");
        assert_eq!(formula.version().unwrap(), "3920504");
        assert_eq!(formula.install.executables.len(), 2);
        assert_eq!(
            formula.required_macos().unwrap(),
            Some(MacOsVersion::new(10, 13))
        );
        assert_eq!(formula.archive_extension(), "zip");
    }

    #[test]
    fn test_default_smoke_invocations() {
        let formula = Formula::parse(CODESPACES).unwrap();
        assert_eq!(
            formula.test.invocations,
            vec![
                Vec::<String>::new(),
                vec!["--help".to_string()],
                vec!["--version".to_string()],
            ]
        );
    }

    #[test]
    fn test_missing_install_section_is_rejected() {
        let broken = CODESPACES.split("[install]").next().unwrap();
        assert!(Formula::parse(broken).is_err());
    }

    #[test]
    fn test_version_from_url() {
        assert_eq!(
            version_from_url("https://host/vsoagent/VSOAgent_osx_3604372.zip").as_deref(),
            Some("3604372")
        );
        assert_eq!(
            version_from_url("https://host/agent-1.2.3.tar.gz").as_deref(),
            Some("1.2.3")
        );
        assert_eq!(
            version_from_url("https://host/agent_42.zip?sig=abc").as_deref(),
            Some("42")
        );
        assert_eq!(version_from_url("https://host/agent.zip"), None);
    }

    #[test]
    fn test_audit_clean() {
        let formula = Formula::parse(CODESPACES).unwrap();
        assert!(formula.audit(Some("codespaces")).is_empty());
    }

    #[test]
    fn test_audit_problems() {
        let mut formula = Formula::parse(CODESPACES).unwrap();
        formula.sha256 = formula.sha256.to_uppercase();
        formula.url = "http://host/agent.zip".to_string();
        formula.install.link = "missing".to_string();
        formula.depends_on.macos = Some("leopard".to_string());

        let problems = formula.audit(Some("vso"));
        assert_eq!(problems.len(), 6, "{:?}", problems);
        assert!(problems.iter().any(|p| p.contains("lower-case")));
        assert!(problems.iter().any(|p| p.contains("https")));
        assert!(problems.iter().any(|p| p.contains("does not match")));
    }

    #[test]
    fn test_validate_rejects_escaping_names() {
        let formula = Formula::parse(CODESPACES).unwrap();
        assert!(formula.validate().is_ok());

        let mut absolute = formula.clone();
        absolute.install.executables.push("/tmp/victim".to_string());
        assert!(matches!(
            absolute.validate(),
            Err(TapError::InvalidFormula(_, ref msg)) if msg.contains("/tmp/victim")
        ));

        let mut parent = formula.clone();
        parent.name = "..".to_string();
        assert!(parent.validate().is_err());

        let mut unlisted = formula;
        unlisted.install.link = "vsls".to_string();
        assert!(unlisted.validate().is_err());
    }

    #[test]
    fn test_caveats_mention_paths() {
        let formula = Formula::parse(CODESPACES).unwrap();
        let prefix = Prefix::new("/opt/homebrew");
        let caveats = formula.caveats(&prefix).unwrap();
        assert!(caveats.contains("/opt/homebrew/bin/codespaces"));
        assert!(caveats.contains("/opt/homebrew/Cellar/codespaces/3920504/libexec"));
    }
}
