//! Bump a formula to the agent build currently deployed by the service.
//!
//! Each regional endpoint reports the agent it serves as JSON, e.g.
//! `{"name": "VSOAgent_osx_3920504"}`. A build counts as deployed once every
//! region serves it, so the lowest version across endpoints wins. When that
//! is newer than the formula's version, the formula's `url` and `sha256`
//! lines are rewritten in place and everything else in the file is kept.

use crate::download::Downloader;
use crate::error::{Result, TapError};
use crate::formula::Formula;
use crate::tap::FORMULA_EXTENSION;
use anyhow::{Context, anyhow};
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub const AGENT_VERSION_ENDPOINTS: &[&str] = &[
    "https://online.visualstudio.com/api/v1/Agents/vsoagentosx",
    "https://westeurope.online.visualstudio.com/api/v1/Agents/vsoagentosx",
    "https://westus2.online.visualstudio.com/api/v1/Agents/vsoagentosx",
    "https://eastus.online.visualstudio.com/api/v1/Agents/vsoagentosx",
    "https://southeastasia.online.visualstudio.com/api/v1/Agents/vsoagentosx",
];

const AGENT_DOWNLOAD_URL: &str = "https://vsoagentdownloads.blob.core.windows.net/vsoagent";

/// Archive URL for an agent build
pub fn agent_download_url(version: &str) -> String {
    format!("{}/VSOAgent_osx_{}.zip", AGENT_DOWNLOAD_URL, version)
}

#[derive(Debug, Deserialize)]
struct AgentInfo {
    name: String,
}

/// Where deployed agent versions and archive digests come from
#[allow(async_fn_in_trait)]
pub trait AgentSource {
    /// The agent version reported by each endpoint
    async fn deployed_versions(&self) -> Result<Vec<u64>>;

    /// SHA-256 of the archive at `url`
    async fn archive_sha256(&self, url: &str) -> Result<String>;
}

/// Queries the live service endpoints
pub struct HttpAgentSource {
    downloader: Downloader,
    endpoints: Vec<String>,
}

impl HttpAgentSource {
    pub fn new(downloader: Downloader) -> Self {
        Self {
            downloader,
            endpoints: AGENT_VERSION_ENDPOINTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    async fn endpoint_version(&self, endpoint: &str) -> Result<u64> {
        tracing::debug!("Making GET request to {}", endpoint);
        let info: AgentInfo = self
            .downloader
            .client()
            .get(endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        tracing::debug!("Response: name={}", info.name);
        version_from_agent_name(&info.name)
    }
}

impl AgentSource for HttpAgentSource {
    async fn deployed_versions(&self) -> Result<Vec<u64>> {
        futures::future::try_join_all(
            self.endpoints
                .iter()
                .map(|endpoint| self.endpoint_version(endpoint)),
        )
        .await
    }

    async fn archive_sha256(&self, url: &str) -> Result<String> {
        self.downloader.remote_sha256(url).await
    }
}

/// Extract the build number from an agent name; it must contain exactly one
/// run of digits
pub fn version_from_agent_name(name: &str) -> Result<u64> {
    let digits = Regex::new(r"\d+").map_err(anyhow::Error::from)?;
    let runs: Vec<&str> = digits.find_iter(name).map(|m| m.as_str()).collect();

    match runs.as_slice() {
        [single] => Ok(single
            .parse()
            .with_context(|| format!("Agent version out of range: {}", single))?),
        _ => {
            tracing::error!(
                "Expected exactly one version number candidate in {}, found {}",
                name,
                runs.len()
            );
            Err(TapError::Other(anyhow!(
                "Unable to get agent version from name."
            )))
        }
    }
}

/// Replace the first `url = "https://..."` and first `sha256 = "<hex>"` lines
pub fn rewrite_formula(contents: &str, new_url: &str, new_sha256: &str) -> Result<String> {
    let url_line = Regex::new(r#"(?m)^(\s*url\s*=\s*)"https://[^"]+""#)
        .map_err(anyhow::Error::from)?;
    let sha_line = Regex::new(r#"(?m)^(\s*sha256\s*=\s*)"[A-Fa-f0-9]{64}""#)
        .map_err(anyhow::Error::from)?;

    if !url_line.is_match(contents) {
        return Err(TapError::Other(anyhow!("No url line found in formula")));
    }
    if !sha_line.is_match(contents) {
        return Err(TapError::Other(anyhow!("No sha256 line found in formula")));
    }

    let contents = url_line.replace(contents, format!(r#"${{1}}"{}""#, new_url).as_str());
    let contents = sha_line.replace(&contents, format!(r#"${{1}}"{}""#, new_sha256).as_str());
    Ok(contents.into_owned())
}

fn ensure_valid_formula_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(TapError::Other(anyhow!(
            "Formula file '{}' not found.",
            path.display()
        )));
    }
    if path.extension().and_then(|e| e.to_str()) != Some(FORMULA_EXTENSION) {
        return Err(TapError::Other(anyhow!(
            "A valid formula file should end with .{}.",
            FORMULA_EXTENSION
        )));
    }
    Ok(())
}

/// Update the formula at `path` if a newer agent is deployed, returning the
/// new version
pub async fn update_formula<S: AgentSource>(path: &Path, source: &S) -> Result<Option<String>> {
    ensure_valid_formula_file(path)?;
    let formula = Formula::load(path)?;

    tracing::debug!("Determining if the formula should be updated.");
    let formula_version: u64 = formula.version()?.parse().map_err(|_| {
        TapError::Other(anyhow!(
            "Unable to determine if an updated version is available."
        ))
    })?;

    let deployed = source
        .deployed_versions()
        .await?
        .into_iter()
        .min()
        .ok_or_else(|| TapError::Other(anyhow!("Unable to get the current agent version.")))?;

    tracing::debug!("Current formula version: {}", formula_version);
    tracing::debug!("Current deployed agent version: {}", deployed);

    if deployed <= formula_version {
        tracing::info!("No newer version available to update formula to.");
        return Ok(None);
    }

    tracing::info!("Preparing to update the formula file...");
    let new_version = deployed.to_string();
    let new_url = agent_download_url(&new_version);
    let new_sha256 = source.archive_sha256(&new_url).await?.to_ascii_lowercase();
    tracing::info!("New formula url will be: {}", new_url);
    tracing::info!("New formula sha256 will be: {}", new_sha256);

    let contents = fs::read_to_string(path)?;
    let updated = rewrite_formula(&contents, &new_url, &new_sha256)?;
    fs::write(path, updated)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::info!("Completed updates to formula file.");
    Ok(Some(new_version))
}
