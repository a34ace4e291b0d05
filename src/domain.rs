use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;

use crate::error::SyncError;

static SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+$").expect("static identifier pattern compiles")
});

/// Identifiers end up as directory and file names, so only a conservative
/// character set is accepted.
fn is_path_safe(value: &str) -> bool {
    SEGMENT_RE.is_match(value) && value != "." && value != ".."
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionId(String);

impl CollectionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CollectionId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !is_path_safe(trimmed) {
            return Err(SyncError::InvalidCollection(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ItemId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !is_path_safe(value) {
            return Err(SyncError::InvalidIdentifier(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

/// One remote item and the catalog's last-update timestamp for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    pub id: ItemId,
    pub updated: DateTime<Utc>,
}

/// Accepts RFC 3339, or a naive date-time which is taken as UTC. Naive
/// values may be ISO-like or US-locale (`3/1/2017 5:21:19 AM`).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%m/%d/%Y %I:%M:%S %p",
        "%m/%d/%Y %H:%M:%S",
    ]
    .iter()
    .find_map(|pattern| NaiveDateTime::parse_from_str(value, pattern).ok())
    .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadFormat {
    ArchiveTorrent,
    Zip,
}

impl DownloadFormat {
    /// Name used by the catalog for this format.
    pub fn display_name(self) -> &'static str {
        match self {
            DownloadFormat::ArchiveTorrent => "Archive BitTorrent",
            DownloadFormat::Zip => "ZIP",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            DownloadFormat::ArchiveTorrent => "https://archive.org/download",
            DownloadFormat::Zip => "https://archive.org/compress",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            DownloadFormat::ArchiveTorrent => "torrent",
            DownloadFormat::Zip => "zip",
        }
    }
}

impl fmt::Display for DownloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for DownloadFormat {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "torrent" | "archive bittorrent" => Ok(DownloadFormat::ArchiveTorrent),
            "zip" => Ok(DownloadFormat::Zip),
            _ => Err(SyncError::UnknownFormat(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatPolicy {
    pub format: DownloadFormat,
    pub base_url: String,
    pub extension: String,
}

impl FormatPolicy {
    pub fn new(format: DownloadFormat) -> Self {
        Self {
            format,
            base_url: format.default_base_url().to_string(),
            extension: format.extension().to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl Default for FormatPolicy {
    fn default() -> Self {
        Self::new(DownloadFormat::Zip)
    }
}
