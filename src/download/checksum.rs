use std::{
    fmt::{self, Display},
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::DownloadError;

const CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl FromStr for ChecksumAlgorithm {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha224" => Ok(ChecksumAlgorithm::Sha224),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            "sha384" => Ok(ChecksumAlgorithm::Sha384),
            "sha512" => Ok(ChecksumAlgorithm::Sha512),
            _ => Err(DownloadError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChecksumAlgorithm::Sha224 => "sha224",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha384 => "sha384",
            ChecksumAlgorithm::Sha512 => "sha512",
        };
        write!(f, "{s}")
    }
}

/// Expected digest of a downloaded file, as lowercase or uppercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    pub expected: String,
}

impl Checksum {
    pub fn new<S: Into<String>>(algorithm: ChecksumAlgorithm, expected: S) -> Self {
        Self {
            algorithm,
            expected: expected.into(),
        }
    }

    pub fn sha256<S: Into<String>>(expected: S) -> Self {
        Self::new(ChecksumAlgorithm::Sha256, expected)
    }

    pub fn matches(&self, actual: &str) -> bool {
        self.expected.trim().eq_ignore_ascii_case(actual)
    }
}

/// Hex digest of a file, read in fixed-size chunks on the blocking pool.
pub async fn file_digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String, DownloadError> {
    let owned: PathBuf = path.to_path_buf();
    let digest = tokio::task::spawn_blocking(move || match algorithm {
        ChecksumAlgorithm::Sha224 => hash_file::<Sha224>(&owned),
        ChecksumAlgorithm::Sha256 => hash_file::<Sha256>(&owned),
        ChecksumAlgorithm::Sha384 => hash_file::<Sha384>(&owned),
        ChecksumAlgorithm::Sha512 => hash_file::<Sha512>(&owned),
    })
    .await
    .map_err(|e| DownloadError::Io {
        path: path.to_path_buf(),
        source: std::io::Error::other(e),
    })?;

    digest.map_err(DownloadError::io(path))
}

fn hash_file<D: Digest>(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}
