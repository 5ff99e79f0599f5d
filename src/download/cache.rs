use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::SystemTime,
};

use reqwest::{Client, Response};
use sha2::{Digest, Sha256};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DownloadError;

use super::{
    checksum::{Checksum, file_digest},
    filename::resolve_filename,
};

/// Cache slot key for a URL. The URL string is hashed, not the content, so one
/// URL always maps to the same slot.
pub fn cache_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Destination filename. Resolved from the response or URL when absent.
    pub filename: Option<String>,
    /// Fail with `DestinationExists` when the target is present. When false an
    /// existing target is returned untouched.
    pub throw_if_exists: bool,
    pub use_cache: bool,
    pub checksum: Option<Checksum>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            filename: None,
            throw_if_exists: true,
            use_cache: true,
            checksum: None,
        }
    }
}

impl FetchOptions {
    pub fn with_filename<S: Into<String>>(mut self, filename: S) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn throw_if_exists(mut self, throw: bool) -> Self {
        self.throw_if_exists = throw;
        self
    }

    pub fn use_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }
}

/// Fetches artifacts by URL, reusing earlier downloads from `<cache_dir>/<key>/<filename>`.
///
/// Slot files are written under a hidden temporary name and renamed into place
/// once flushed, so a partially written artifact is never served. Concurrent
/// writers of one slot both complete and the last rename wins.
#[derive(Debug, Clone)]
pub struct DownloadCache {
    client: Client,
    cache_dir: PathBuf,
}

impl DownloadCache {
    pub fn new<P: Into<PathBuf>>(cache_dir: P) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self::with_client(client, cache_dir))
    }

    pub fn with_client<P: Into<PathBuf>>(client: Client, cache_dir: P) -> Self {
        Self {
            client,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn slot_dir(&self, url: &str) -> PathBuf {
        self.cache_dir.join(cache_key(url))
    }

    /// The cached artifact for `url`, if a complete one exists.
    pub async fn cached_path(&self, url: &str) -> Result<Option<PathBuf>, DownloadError> {
        find_cached(&self.slot_dir(url)).await
    }

    /// Drops the cache slot for `url`.
    pub async fn evict(&self, url: &str) -> Result<(), DownloadError> {
        let slot = self.slot_dir(url);
        match fs::remove_dir_all(&slot).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DownloadError::Io { path: slot, source: e }),
        }
    }

    /// Materializes `url` into `destination_dir` and returns the file's path.
    pub async fn fetch(
        &self,
        url: &str,
        destination_dir: impl AsRef<Path>,
        options: FetchOptions,
    ) -> Result<PathBuf, DownloadError> {
        let destination_dir = destination_dir.as_ref();
        fs::create_dir_all(destination_dir)
            .await
            .map_err(DownloadError::io(destination_dir))?;

        let slot = self.slot_dir(url);

        if options.use_cache {
            if let Some(cached) = find_cached(&slot).await? {
                let filename = match options.filename.as_deref() {
                    Some(name) => resolve_filename(Some(name), None, url)?,
                    None => file_name_of(&cached)?,
                };
                let destination = destination_dir.join(filename);
                if let Some(existing) =
                    check_destination(&destination, options.throw_if_exists).await?
                {
                    return Ok(existing);
                }

                debug!(url, cached = %cached.display(), "serving from cache");
                copy(&cached, &destination).await?;
                verify(&destination, options.checksum.as_ref(), Some(&cached)).await?;
                return Ok(destination);
            }
        }

        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::DownloadFailed {
                url: url.to_string(),
                status,
            });
        }

        let filename = resolve_filename(options.filename.as_deref(), Some(response.headers()), url)?;
        let destination = destination_dir.join(&filename);
        if let Some(existing) = check_destination(&destination, options.throw_if_exists).await? {
            return Ok(existing);
        }

        info!(url, destination = %destination.display(), cached = options.use_cache, "downloading");

        let cached = if options.use_cache {
            fs::create_dir_all(&slot)
                .await
                .map_err(DownloadError::io(&slot))?;
            let cached = slot.join(&filename);
            let written = stream_to_file(response, &cached).await?;
            debug!(url, bytes = written, slot = %slot.display(), "cache slot written");
            copy(&cached, &destination).await?;
            Some(cached)
        } else {
            stream_to_file(response, &destination).await?;
            None
        };

        verify(&destination, options.checksum.as_ref(), cached.as_deref()).await?;
        Ok(destination)
    }
}

async fn find_cached(slot: &Path) -> Result<Option<PathBuf>, DownloadError> {
    let mut entries = match fs::read_dir(slot).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(DownloadError::Io {
                path: slot.to_path_buf(),
                source: e,
            });
        }
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await.map_err(DownloadError::io(slot))? {
        // Hidden names are in-progress writes.
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let meta = entry
            .metadata()
            .await
            .map_err(DownloadError::io(entry.path()))?;
        if !meta.is_file() {
            continue;
        }

        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if newest.as_ref().is_none_or(|(seen, _)| modified >= *seen) {
            newest = Some((modified, entry.path()));
        }
    }

    Ok(newest.map(|(_, path)| path))
}

fn file_name_of(path: &Path) -> Result<String, DownloadError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| DownloadError::InvalidFilename(path.display().to_string()))
}

async fn check_destination(
    destination: &Path,
    throw_if_exists: bool,
) -> Result<Option<PathBuf>, DownloadError> {
    let exists = fs::try_exists(destination)
        .await
        .map_err(DownloadError::io(destination))?;

    match (exists, throw_if_exists) {
        (false, _) => Ok(None),
        (true, true) => Err(DownloadError::DestinationExists(destination.to_path_buf())),
        (true, false) => {
            debug!(destination = %destination.display(), "destination exists, keeping it");
            Ok(Some(destination.to_path_buf()))
        }
    }
}

async fn copy(from: &Path, to: &Path) -> Result<u64, DownloadError> {
    fs::copy(from, to).await.map_err(DownloadError::io(to))
}

/// Re-reads the destination and compares digests. On mismatch both the
/// destination and the cache slot file are removed so a retry starts clean.
async fn verify(
    destination: &Path,
    checksum: Option<&Checksum>,
    cached: Option<&Path>,
) -> Result<(), DownloadError> {
    let Some(checksum) = checksum else {
        return Ok(());
    };

    let actual = file_digest(destination, checksum.algorithm).await?;
    if checksum.matches(&actual) {
        return Ok(());
    }

    warn!(
        destination = %destination.display(),
        algorithm = %checksum.algorithm,
        expected = %checksum.expected,
        %actual,
        "checksum mismatch"
    );
    remove_quietly(destination).await;
    if let Some(cached) = cached {
        remove_quietly(cached).await;
    }

    Err(DownloadError::ChecksumMismatch {
        path: destination.to_path_buf(),
        expected: checksum.expected.clone(),
        actual,
    })
}

/// Streams the body to a hidden sibling of `target`, then renames it into place.
async fn stream_to_file(response: Response, target: &Path) -> Result<u64, DownloadError> {
    let partial = partial_path(target);

    let written = match write_body(response, &partial).await {
        Ok(written) => written,
        Err(e) => {
            remove_quietly(&partial).await;
            return Err(e);
        }
    };

    if let Err(e) = fs::rename(&partial, target).await {
        remove_quietly(&partial).await;
        return Err(DownloadError::Io {
            path: target.to_path_buf(),
            source: e,
        });
    }

    Ok(written)
}

async fn write_body(response: Response, path: &Path) -> Result<u64, DownloadError> {
    let mut file = File::create(path).await.map_err(DownloadError::io(path))?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(DownloadError::io(path))?;
        written += chunk.len() as u64;
    }

    file.flush().await.map_err(DownloadError::io(path))?;
    file.sync_all().await.map_err(DownloadError::io(path))?;
    Ok(written)
}

fn partial_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.{}.part", Uuid::new_v4()))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}
