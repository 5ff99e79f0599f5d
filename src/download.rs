//! Content-addressed cache of downloaded server artifacts.

mod cache;
mod checksum;
mod filename;
mod paper;

pub use cache::{DownloadCache, FetchOptions, cache_key};
pub use checksum::{Checksum, ChecksumAlgorithm, file_digest};
pub use filename::{filename_from_content_disposition, filename_from_url, resolve_filename};
pub use paper::{
    PAPER_API, PaperBuild, PaperCommit, PaperDownload, PaperDownloader, PaperProject,
    PaperVersions, SERVER_ARTIFACT,
};
