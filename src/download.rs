//! Archive downloads with progress tracking and checksum verification

use crate::error::{Result, TapError};
use crate::formula::Formula;
use anyhow::Context;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// SHA256 of a local file as lower-case hex
pub async fn file_sha256(file_path: &Path) -> Result<String> {
    let mut file = fs::File::open(file_path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Declared checksums are compared case-insensitively
pub fn checksums_match(actual: &str, expected: &str) -> bool {
    actual.trim().eq_ignore_ascii_case(expected.trim())
}

/// Fail with [`TapError::ChecksumMismatch`] unless the file hashes to `expected`
pub async fn verify_checksum(file_path: &Path, name: &str, expected: &str) -> Result<()> {
    let actual = file_sha256(file_path).await?;
    if checksums_match(&actual, expected) {
        tracing::debug!("Verified {} ({})", file_path.display(), actual);
        Ok(())
    } else {
        Err(TapError::ChecksumMismatch {
            name: name.to_string(),
            expected: expected.to_ascii_lowercase(),
            actual,
        })
    }
}

/// Downloads formula archives into a cache directory
#[derive(Clone)]
pub struct Downloader {
    client: reqwest::Client,
    cache: PathBuf,
}

impl Downloader {
    pub fn new(cache: impl Into<PathBuf>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(format!("vsotap/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            cache: cache.into(),
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Cache location for a formula's archive
    pub fn archive_path(&self, formula: &Formula) -> Result<PathBuf> {
        Ok(self.cache.join(format!(
            "{}--{}.{}",
            formula.name,
            formula.version()?,
            formula.archive_extension()
        )))
    }

    /// Fetch and verify a formula's archive.
    ///
    /// A cached archive that still verifies is reused. A freshly downloaded
    /// archive that fails verification is deleted and nothing is returned.
    pub async fn fetch(
        &self,
        formula: &Formula,
        progress: Option<&MultiProgress>,
    ) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache)
            .await
            .context("Failed to create cache directory")?;

        let output_path = self.archive_path(formula)?;

        if output_path.exists() {
            match verify_checksum(&output_path, &formula.name, &formula.sha256).await {
                Ok(()) => {
                    tracing::info!("Using cached {}", output_path.display());
                    return Ok(output_path);
                }
                Err(TapError::ChecksumMismatch { .. }) => {
                    tracing::warn!("Discarding stale cache entry {}", output_path.display());
                    fs::remove_file(&output_path).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let partial_path = output_path.with_extension("incomplete");
        self.download_to(&formula.url, &formula.name, &partial_path, progress)
            .await?;

        if let Err(e) = verify_checksum(&partial_path, &formula.name, &formula.sha256).await {
            fs::remove_file(&partial_path).await?;
            return Err(e);
        }

        fs::rename(&partial_path, &output_path).await?;
        Ok(output_path)
    }

    async fn download_to(
        &self,
        url: &str,
        label: &str,
        output_path: &Path,
        progress: Option<&MultiProgress>,
    ) -> Result<()> {
        if let Some(local) = url.strip_prefix("file://") {
            tracing::debug!("Copying local archive {}", local);
            fs::copy(local, output_path)
                .await
                .with_context(|| format!("Failed to read {}", local))?;
            return Ok(());
        }

        tracing::info!("Downloading {}", url);

        let pb = progress.map(|mp| {
            let pb = mp.add(ProgressBar::new(0));
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            pb.set_message(format!("⬇ {}", label));
            pb
        });

        let mut response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        if let Some(pb) = &pb
            && let Some(total) = response.content_length()
        {
            pb.set_length(total);
        }

        let mut file = fs::File::create(output_path)
            .await
            .context("Failed to create output file")?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
            if let Some(pb) = &pb {
                pb.set_position(downloaded);
            }
        }

        file.flush().await?;

        if let Some(pb) = &pb {
            pb.finish_with_message(format!("✓ {}", label));
        }

        Ok(())
    }

    /// Hash a remote file without keeping it
    pub async fn remote_sha256(&self, url: &str) -> Result<String> {
        tracing::debug!("Calculating sha256 for {}", url);

        if let Some(local) = url.strip_prefix("file://") {
            return file_sha256(Path::new(local)).await;
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?;

        let mut hasher = Sha256::new();
        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
        }

        let digest = format!("{:x}", hasher.finalize());
        tracing::debug!("SHA256: {}", digest);
        Ok(digest)
    }

    /// Fetch several archives concurrently, failing on the first error
    pub async fn fetch_all(&self, formulae: &[Formula]) -> Result<Vec<(String, PathBuf)>> {
        let mp = MultiProgress::new();

        let results = futures::future::join_all(formulae.iter().map(|formula| {
            let mp = &mp;
            async move {
                let result = self.fetch(formula, Some(mp)).await;
                (formula.name.clone(), result)
            }
        }))
        .await;

        results
            .into_iter()
            .map(|(name, result)| result.map(|path| (name, path)))
            .collect()
    }
}
