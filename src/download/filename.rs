use std::{path::Path, sync::LazyLock};

use chrono::Utc;
use regex::Regex;
use reqwest::{
    Url,
    header::{CONTENT_DISPOSITION, HeaderMap},
};

use crate::error::DownloadError;

// RFC 6266 extended form: filename*=UTF-8''name%20here.jar
static EXTENDED_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)filename\*\s*=\s*[\w-]*'[^']*'([^;\s]+)")
        .expect("valid extended filename regex")
});

static PLAIN_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]*)"|([^;\s]+))"#).expect("valid filename regex")
});

/// Reduces a name to its final path component, rejecting names that do not
/// denote a file.
pub(crate) fn sanitize(name: &str) -> Option<String> {
    let name = name.trim().replace('\\', "/");
    let base = Path::new(&name).file_name()?.to_str()?.trim();
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}

pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    if let Some(caps) = EXTENDED_FILENAME.captures(value) {
        let decoded = urlencoding::decode(&caps[1]).ok()?;
        if let Some(name) = sanitize(&decoded) {
            return Some(name);
        }
    }

    let caps = PLAIN_FILENAME.captures(value)?;
    let raw = caps.get(1).or_else(|| caps.get(2))?.as_str();
    sanitize(raw)
}

pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last).ok()?;
    sanitize(&decoded)
}

/// Picks the destination filename: explicit name, then content-disposition,
/// then the URL's last path segment, then a timestamped fallback.
pub fn resolve_filename(
    explicit: Option<&str>,
    headers: Option<&HeaderMap>,
    url: &str,
) -> Result<String, DownloadError> {
    if let Some(name) = explicit {
        return sanitize(name).ok_or_else(|| DownloadError::InvalidFilename(name.to_string()));
    }

    let from_header = headers
        .and_then(|h| h.get(CONTENT_DISPOSITION))
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_content_disposition);

    Ok(from_header
        .or_else(|| filename_from_url(url))
        .unwrap_or_else(|| format!("download-{}", Utc::now().timestamp_millis())))
}
