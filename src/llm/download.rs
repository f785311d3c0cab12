// Streaming model download

use anyhow::{Context, Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const DEFAULT_ATTEMPTS: u32 = 3;
const CONNECT_TIMEOUT_SECONDS: u64 = 30;

/// Why a single download attempt failed
#[derive(Debug)]
enum AttemptError {
    /// Worth trying again: transport trouble or a server-side error
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Downloads a model file over HTTP, writing to `<name>.part` and renaming
/// into place only once the body is complete
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    agent: ureq::Agent,
    attempts: u32,
    retry_delay: Duration,
}

impl Default for ModelDownloader {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl ModelDownloader {
    #[inline]
    pub fn new() -> Self {
        // Multi-gigabyte bodies: only the connect phase gets a timeout
        let agent = ureq::Agent::config_builder()
            .timeout_connect(Some(Duration::from_secs(CONNECT_TIMEOUT_SECONDS)))
            .build()
            .into();

        Self {
            agent,
            attempts: DEFAULT_ATTEMPTS,
            retry_delay: Duration::from_secs(2),
        }
    }

    #[inline]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Path of the in-progress file for `destination`
    #[inline]
    pub fn partial_path(destination: &Path) -> PathBuf {
        let mut name = destination
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        destination.with_file_name(name)
    }

    /// Fetch `url` into `destination`. Nothing is left at either path on
    /// failure.
    #[inline]
    pub fn download(&self, url: &str, destination: &Path) -> Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let partial = Self::partial_path(destination);
        info!("Downloading model from {}", url);

        for attempt in 1..=self.attempts {
            debug!("Download attempt {}/{}", attempt, self.attempts);

            let outcome = self.download_once(url, &partial);
            let error = match outcome {
                Ok(bytes) => {
                    fs::rename(&partial, destination).with_context(|| {
                        format!("Failed to move download into {}", destination.display())
                    })?;
                    info!("Downloaded {} bytes to {}", bytes, destination.display());
                    return Ok(());
                }
                Err(error) => error,
            };

            remove_partial(&partial);

            match error {
                AttemptError::Fatal(e) => return Err(e),
                AttemptError::Transient(e) if attempt == self.attempts => {
                    return Err(e.context(format!(
                        "Download failed after {} attempts",
                        self.attempts
                    )));
                }
                AttemptError::Transient(e) => {
                    warn!(
                        "Download attempt {}/{} failed: {:#}",
                        attempt, self.attempts, e
                    );
                    std::thread::sleep(self.retry_delay.saturating_mul(attempt));
                }
            }
        }

        Err(anyhow!("Download of {} did not complete", url))
    }

    fn download_once(&self, url: &str, partial: &Path) -> Result<u64, AttemptError> {
        let mut response = self.agent.get(url).call().map_err(classify)?;

        let expected = response
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        let file = File::create(partial)
            .with_context(|| format!("Failed to create {}", partial.display()))
            .map_err(AttemptError::Fatal)?;
        let bar = progress_bar(expected);
        let mut writer = bar.wrap_write(BufWriter::new(file));

        let mut reader = response.body_mut().as_reader();
        let copied = io::copy(&mut reader, &mut writer)
            .context("Connection interrupted while downloading")
            .map_err(AttemptError::Transient)?;
        writer
            .flush()
            .context("Failed to flush model file")
            .map_err(AttemptError::Fatal)?;
        bar.finish_and_clear();

        match expected {
            Some(expected) if copied != expected => Err(AttemptError::Transient(anyhow!(
                "Received {} of {} bytes",
                copied,
                expected
            ))),
            _ => Ok(copied),
        }
    }
}

fn classify(error: ureq::Error) -> AttemptError {
    match error {
        ureq::Error::StatusCode(status) if status >= 500 => {
            AttemptError::Transient(anyhow!("Server error: HTTP {}", status))
        }
        ureq::Error::StatusCode(status) => {
            AttemptError::Fatal(anyhow!("Download refused: HTTP {}", status))
        }
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => AttemptError::Transient(anyhow!("Transport error: {}", error)),
        other => AttemptError::Fatal(anyhow!("Download failed: {}", other)),
    }
}

fn remove_partial(partial: &Path) {
    if partial.exists() {
        if let Err(e) = fs::remove_file(partial) {
            warn!("Failed to remove partial download {}: {}", partial.display(), e);
        }
    }
}

fn progress_bar(len: Option<u64>) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }
    match len {
        Some(len) => ProgressBar::new(len).with_style(
            ProgressStyle::with_template(
                "Downloading model [{bar:40}] {percent}% {bytes}/{total_bytes} ({eta})",
            )
            .expect("style template is valid"),
        ),
        None => ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template("{spinner} Downloading model {bytes}")
                .expect("style template is valid"),
        ),
    }
}
