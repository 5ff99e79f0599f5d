use std::{collections::HashMap, path::{Path, PathBuf}};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::DownloadError;

use super::{
    cache::{DownloadCache, FetchOptions},
    checksum::Checksum,
};

pub const PAPER_API: &str = "https://fill.papermc.io/v3/projects/paper";

/// Download key of the runnable server jar in a build.
pub const SERVER_ARTIFACT: &str = "server:default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperProject {
    pub id: String,
    pub name: String,
}

/// Versions grouped by minor line, newest first as served by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperVersions {
    pub project: PaperProject,
    pub versions: IndexMap<String, Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperCommit {
    pub sha: String,
    pub time: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperDownload {
    pub name: String,
    pub checksums: HashMap<String, String>,
    pub size: u64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperBuild {
    pub id: u64,
    pub time: String,
    pub channel: String,
    #[serde(default)]
    pub commits: Vec<PaperCommit>,
    pub downloads: HashMap<String, PaperDownload>,
}

impl PaperBuild {
    pub fn server_download(&self) -> Option<&PaperDownload> {
        self.downloads.get(SERVER_ARTIFACT)
    }
}

/// Resolves Paper builds and fetches them through a [`DownloadCache`].
/// Version and build listings are memoized for the lifetime of the downloader.
#[derive(Debug)]
pub struct PaperDownloader {
    cache: DownloadCache,
    base_url: String,
    versions: RwLock<Option<IndexMap<String, Vec<String>>>>,
    builds: RwLock<HashMap<String, Vec<PaperBuild>>>,
}

impl PaperDownloader {
    pub fn new(cache: DownloadCache) -> Self {
        Self::with_base_url(cache, PAPER_API)
    }

    pub fn with_base_url<S: Into<String>>(cache: DownloadCache, base_url: S) -> Self {
        Self {
            cache,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            versions: RwLock::new(None),
            builds: RwLock::new(HashMap::new()),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, DownloadError> {
        let response = self.cache.client().get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Api {
                url: url.to_string(),
                status,
            });
        }
        Ok(response.json().await?)
    }

    pub async fn fetch_versions(&self) -> Result<IndexMap<String, Vec<String>>, DownloadError> {
        if let Some(versions) = self.versions.read().await.as_ref() {
            return Ok(versions.clone());
        }

        let data: PaperVersions = self.get_json(&self.base_url).await?;
        debug!(groups = data.versions.len(), "fetched paper versions");

        if !data.versions.is_empty() {
            *self.versions.write().await = Some(data.versions.clone());
        }
        Ok(data.versions)
    }

    pub async fn fetch_builds(&self, version: &str) -> Result<Vec<PaperBuild>, DownloadError> {
        if let Some(builds) = self.builds.read().await.get(version) {
            return Ok(builds.clone());
        }

        let url = format!("{}/versions/{}/builds", self.base_url, version);
        let builds: Vec<PaperBuild> = self.get_json(&url).await?;
        debug!(version, count = builds.len(), "fetched paper builds");

        self.builds
            .write()
            .await
            .insert(version.to_string(), builds.clone());
        Ok(builds)
    }

    /// First build of the newest version, if the API lists any.
    pub async fn fetch_latest_build(&self) -> Result<Option<PaperBuild>, DownloadError> {
        let versions = self.fetch_versions().await?;
        let Some(release) = versions.values().next().and_then(|group| group.first()) else {
            return Ok(None);
        };

        Ok(self.fetch_builds(release).await?.into_iter().next())
    }

    /// Fetches the server jar of `build`, verified against its published sha256.
    pub async fn download_build(
        &self,
        build: &PaperBuild,
        destination_dir: impl AsRef<Path>,
        mut options: FetchOptions,
    ) -> Result<PathBuf, DownloadError> {
        let artifact = build
            .server_download()
            .ok_or_else(|| DownloadError::MissingArtifact {
                build: build.id,
                artifact: SERVER_ARTIFACT.to_string(),
            })?;

        options.checksum = artifact.checksums.get("sha256").map(Checksum::sha256);
        if options.filename.is_none() {
            options.filename = Some(artifact.name.clone());
        }

        info!(build = build.id, artifact = %artifact.name, "downloading paper build");
        self.cache
            .fetch(&artifact.url, destination_dir, options)
            .await
    }

    pub async fn download_latest(
        &self,
        destination_dir: impl AsRef<Path>,
        options: FetchOptions,
    ) -> Result<PathBuf, DownloadError> {
        let build = self
            .fetch_latest_build()
            .await?
            .ok_or(DownloadError::NoBuildsFound)?;
        self.download_build(&build, destination_dir, options).await
    }
}
