use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Deserialize;

use crate::domain::{CollectionId, DownloadFormat, FormatPolicy};
use crate::error::SyncError;

pub const DEFAULT_COLLECTION: &str = "apple_ii_library_4am";
pub const DEFAULT_ROW_CAP: u32 = 30_000;
pub const DEFAULT_DELAY_MS: u64 = 500;
pub const DEFAULT_CATALOG_URL: &str = "https://archive.org/advancedsearch.php";
pub const CONFIG_FILE_NAME: &str = "collection-mirror.json";

/// On-disk shape of `collection-mirror.json`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub rows: Option<u32>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
    #[serde(default)]
    pub output_root: Option<String>,
    #[serde(default)]
    pub catalog_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub collection: CollectionId,
    pub row_cap: u32,
    pub policy: FormatPolicy,
    /// Pause after every attempted item.
    pub item_delay: Duration,
    pub output_root: Utf8PathBuf,
    pub catalog_url: String,
}

impl SyncConfig {
    pub fn new(collection: CollectionId) -> Self {
        Self {
            collection,
            row_cap: DEFAULT_ROW_CAP,
            policy: FormatPolicy::default(),
            item_delay: Duration::from_millis(DEFAULT_DELAY_MS),
            output_root: Utf8PathBuf::from("."),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file (an explicit `path`, or `collection-mirror.json`
    /// in the working directory when present) and applies the CLI collection
    /// override on top.
    pub fn resolve(
        path: Option<&str>,
        collection_override: Option<&str>,
    ) -> Result<SyncConfig, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(CONFIG_FILE_NAME),
        };

        let file_config = if path.is_none() && !config_path.exists() {
            FileConfig::default()
        } else {
            let content = fs::read_to_string(&config_path)
                .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
            serde_json::from_str(&content).map_err(|err| SyncError::ConfigParse(err.to_string()))?
        };

        Self::resolve_config(file_config, collection_override)
    }

    pub fn resolve_config(
        config: FileConfig,
        collection_override: Option<&str>,
    ) -> Result<SyncConfig, SyncError> {
        let collection = collection_override
            .map(str::to_string)
            .or(config.collection)
            .unwrap_or_else(|| DEFAULT_COLLECTION.to_string())
            .parse::<CollectionId>()?;

        let format = match config.format.as_deref() {
            Some(name) => name.parse::<DownloadFormat>()?,
            None => DownloadFormat::Zip,
        };
        let mut policy = FormatPolicy::new(format);
        if let Some(base_url) = config.base_url {
            policy = policy.with_base_url(base_url);
        }

        let mut resolved = SyncConfig::new(collection);
        resolved.policy = policy;
        if let Some(rows) = config.rows {
            resolved.row_cap = rows;
        }
        if let Some(delay) = config.delay_ms {
            resolved.item_delay = Duration::from_millis(delay);
        }
        if let Some(root) = config.output_root {
            resolved.output_root = Utf8PathBuf::from(root);
        }
        if let Some(url) = config.catalog_url {
            resolved.catalog_url = url;
        }
        Ok(resolved)
    }
}
