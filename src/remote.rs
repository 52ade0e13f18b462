//! HTTP release feed: one JSON manifest per target.
//!
//! A manifest looks like `{"version": "1.4.0", "url": "perch-1.4.0"}`. The
//! `url` may be absolute or relative to the manifest URL. The feed answers
//! staleness checks by comparing the manifest version and serves downloads
//! by streaming the artifact URL.

use crate::config::FeedConfig;
use crate::error::{LauncherError, Result};
use crate::update::{ArtifactDownloader, StalenessChecker, Target, Version};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Time allowed for fetching a manifest.
const MANIFEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A release manifest for one target.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseManifest {
    /// Newest available version.
    pub version: Version,
    /// Artifact location, absolute or relative to the manifest.
    pub url: String,
}

/// [`StalenessChecker`] and [`ArtifactDownloader`] backed by HTTP manifests.
#[derive(Debug, Clone)]
pub struct HttpFeed {
    client: reqwest::Client,
    launcher_manifest: Url,
    application_manifest: Url,
}

impl HttpFeed {
    /// Create a feed for the two manifest URLs.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Http`] if the HTTP client cannot be built.
    pub fn new(launcher_manifest: Url, application_manifest: Url, connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .user_agent(concat!("perch/", env!("CARGO_PKG_VERSION"), " (self-update)"))
            .build()?;
        Ok(Self {
            client,
            launcher_manifest,
            application_manifest,
        })
    }

    /// Build a feed from the `[feed]` config section.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Config`] if a manifest URL is missing or
    /// malformed.
    pub fn from_config(config: &FeedConfig) -> Result<Self> {
        let launcher = config.launcher.manifest_url(Target::Launcher)?;
        let application = config.application.manifest_url(Target::Application)?;
        Self::new(launcher, application, Duration::from_secs(config.timeout_secs))
    }

    fn manifest_url(&self, target: Target) -> &Url {
        match target {
            Target::Launcher => &self.launcher_manifest,
            Target::Application => &self.application_manifest,
        }
    }

    /// Fetch and decode the manifest for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Http`] on transport failure, a non-success
    /// status, or an undecodable body.
    pub async fn fetch_manifest(&self, target: Target) -> Result<ReleaseManifest> {
        let url = self.manifest_url(target);
        let resp = self
            .client
            .get(url.clone())
            .timeout(MANIFEST_TIMEOUT)
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(LauncherError::Http(format!(
                "{target} manifest {url} returned {}",
                resp.status()
            )));
        }

        let body = resp.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| LauncherError::Http(format!("invalid {target} manifest from {url}: {e}")))
    }

    /// Absolute artifact URL for a manifest fetched for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`LauncherError::Http`] if the manifest `url` cannot be
    /// resolved against the manifest location.
    pub fn artifact_url(&self, target: Target, manifest: &ReleaseManifest) -> Result<Url> {
        self.manifest_url(target).join(&manifest.url).map_err(|e| {
            LauncherError::Http(format!("invalid {target} artifact url {:?}: {e}", manifest.url))
        })
    }
}

#[async_trait]
impl StalenessChecker for HttpFeed {
    async fn is_newer_available(
        &self,
        target: Target,
        current: Option<&Version>,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let manifest = tokio::select! {
            () = cancel.cancelled() => {
                return Err(LauncherError::Http(format!("{target} manifest fetch cancelled")));
            }
            manifest = self.fetch_manifest(target) => manifest?,
        };

        let newer = current.is_none_or(|current| manifest.version > *current);
        tracing::debug!(
            %target,
            remote = %manifest.version,
            current = ?current.map(ToString::to_string),
            newer,
            "checked release feed"
        );
        Ok(newer)
    }
}

#[async_trait]
impl ArtifactDownloader for HttpFeed {
    async fn download(
        &self,
        target: Target,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let manifest = self.fetch_manifest(target).await?;
        let url = self.artifact_url(target, &manifest)?;

        tracing::info!(%target, version = %manifest.version, %url, "downloading artifact");
        let resp = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(false),
            resp = self.client.get(url.clone()).send() => resp?,
        };
        if !resp.status().is_success() {
            tracing::warn!(%target, %url, status = %resp.status(), "artifact request rejected");
            return Ok(false);
        }

        let mut stream = resp.bytes_stream();
        let mut written: u64 = 0;
        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(false),
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    sink.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                Some(Err(e)) => {
                    return Err(LauncherError::Transfer(format!(
                        "{target} transfer from {url} broke after {written} bytes: {e}"
                    )));
                }
                None => break,
            }
        }
        sink.flush().await?;

        tracing::info!(%target, bytes = written, "artifact downloaded");
        Ok(true)
    }
}
