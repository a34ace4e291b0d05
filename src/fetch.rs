use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::domain::{DownloadFormat, FormatPolicy, ItemId};
use crate::error::SyncError;

/// Source URL for an item under the given policy.
pub fn build_url(id: &ItemId, policy: &FormatPolicy) -> String {
    let base = policy.base_url.trim_end_matches('/');
    match policy.format {
        DownloadFormat::ArchiveTorrent => format!(
            "{base}/{id}/{id}_archive.{ext}",
            id = id.as_str(),
            ext = policy.extension
        ),
        DownloadFormat::Zip => format!("{base}/{}", id.as_str()),
    }
}

/// `<collection_dir>/<identifier>.<extension>`
pub fn destination_path(collection_dir: &Utf8Path, id: &ItemId, policy: &FormatPolicy) -> Utf8PathBuf {
    collection_dir.join(format!("{}.{}", id.as_str(), policy.extension))
}

/// Transfers one URL to a local file, overwriting it. Errors stay per item;
/// the caller removes whatever was left at `destination`.
pub trait Fetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), SyncError>;

    /// True when a failed fetch never touches an existing `destination`.
    fn writes_atomically(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("collection-mirror/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::HttpClient(err.to_string()))?,
        );
        // archives can be large; no overall request timeout
        let client = Client::builder()
            .default_headers(headers)
            .timeout(None::<Duration>)
            .build()
            .map_err(|err| SyncError::HttpClient(err.to_string()))?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str, destination: &Path) -> Result<(), SyncError> {
        let item_error = |detail: String| SyncError::ItemFetch {
            url: url.to_string(),
            detail,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| item_error(err.to_string()))?;
        if !response.status().is_success() {
            return Err(SyncError::ItemStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let parent = destination
            .parent()
            .ok_or_else(|| item_error("destination has no parent directory".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| item_error(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix(".partial")
            .tempfile_in(parent)
            .map_err(|err| item_error(err.to_string()))?;
        io::copy(&mut response, temp.as_file_mut()).map_err(|err| item_error(err.to_string()))?;
        temp.persist(destination)
            .map_err(|err| item_error(err.to_string()))?;
        Ok(())
    }

    fn writes_atomically(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torrent_url_has_archive_suffix() {
        let id: ItemId = "foo".parse().unwrap();
        let policy =
            FormatPolicy::new(DownloadFormat::ArchiveTorrent).with_base_url("https://X/download");
        assert_eq!(build_url(&id, &policy), "https://X/download/foo/foo_archive.torrent");
    }

    #[test]
    fn zip_url_is_plain_path_segment() {
        let id: ItemId = "foo".parse().unwrap();
        let policy = FormatPolicy::new(DownloadFormat::Zip).with_base_url("https://X/compress");
        assert_eq!(build_url(&id, &policy), "https://X/compress/foo");
    }

    #[test]
    fn destination_uses_policy_extension() {
        let id: ItemId = "foo".parse().unwrap();
        let policy = FormatPolicy::new(DownloadFormat::Zip);
        let path = destination_path(Utf8Path::new("coll"), &id, &policy);
        assert_eq!(path, Utf8PathBuf::from("coll/foo.zip"));
    }
}
