use std::collections::BTreeMap;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use crate::domain::{CollectionId, ItemId, parse_timestamp};
use crate::error::SyncError;

pub const MANIFEST_FILE: &str = "fileList.txt";
pub const BACKUP_FILE: &str = "fileListOld.txt";

/// Items already fetched, keyed by identifier, with the remote timestamp
/// they were fetched at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<ItemId, DateTime<Utc>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ItemId) -> Option<&DateTime<Utc>> {
        self.entries.get(id)
    }

    pub fn insert(&mut self, id: ItemId, updated: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entries.insert(id, updated)
    }

    pub fn remove(&mut self, id: &ItemId) -> Option<DateTime<Utc>> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn render(&self) -> String {
        let mut out = String::with_capacity(self.entries.len() * 48);
        for (id, updated) in &self.entries {
            out.push_str(id.as_str());
            out.push('\t');
            out.push_str(&updated.to_rfc3339_opts(SecondsFormat::AutoSi, true));
            out.push('\n');
        }
        out
    }
}

impl FromIterator<(ItemId, DateTime<Utc>)> for Manifest {
    fn from_iter<T: IntoIterator<Item = (ItemId, DateTime<Utc>)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Parses manifest text. Any malformed line fails the whole parse.
pub fn parse_manifest(path: &Utf8Path, content: &str) -> Result<Manifest, SyncError> {
    let mut manifest = Manifest::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parse_error = |detail: String| SyncError::ManifestParse {
            path: path.to_string(),
            line: index + 1,
            detail,
        };
        let (id, timestamp) = line
            .split_once('\t')
            .ok_or_else(|| parse_error("expected identifier<TAB>timestamp".to_string()))?;
        let id = id
            .parse::<ItemId>()
            .map_err(|err| parse_error(err.to_string()))?;
        let updated = parse_timestamp(timestamp)
            .ok_or_else(|| parse_error(format!("invalid timestamp {timestamp:?}")))?;
        manifest.insert(id, updated);
    }
    Ok(manifest)
}

#[derive(Debug, Clone)]
pub struct ManifestStore {
    root: Utf8PathBuf,
}

impl ManifestStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn collection_dir(&self, collection: &CollectionId) -> Utf8PathBuf {
        self.root.join(collection.as_str())
    }

    pub fn manifest_path(&self, collection: &CollectionId) -> Utf8PathBuf {
        self.collection_dir(collection).join(MANIFEST_FILE)
    }

    pub fn backup_path(&self, collection: &CollectionId) -> Utf8PathBuf {
        self.collection_dir(collection).join(BACKUP_FILE)
    }

    pub fn ensure_collection_dir(&self, collection: &CollectionId) -> Result<(), SyncError> {
        fs::create_dir_all(self.collection_dir(collection).as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))
    }

    /// Loads the current manifest, or an empty one when none exists yet.
    pub fn load(&self, collection: &CollectionId) -> Result<Manifest, SyncError> {
        self.ensure_collection_dir(collection)?;
        Self::read(&self.manifest_path(collection))
    }

    /// Loads the manifest kept from the previous run.
    pub fn load_backup(&self, collection: &CollectionId) -> Result<Manifest, SyncError> {
        Self::read(&self.backup_path(collection))
    }

    /// Moves the current manifest over the backup. No-op when there is no
    /// current manifest.
    pub fn archive_previous(&self, collection: &CollectionId) -> Result<(), SyncError> {
        let current = self.manifest_path(collection);
        if !current.as_std_path().exists() {
            return Ok(());
        }
        let backup = self.backup_path(collection);
        if backup.as_std_path().exists() {
            fs::remove_file(backup.as_std_path())
                .map_err(|err| SyncError::Filesystem(format!("remove {backup}: {err}")))?;
        }
        fs::rename(current.as_std_path(), backup.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("rename {current}: {err}")))?;
        debug!(%backup, "archived previous manifest");
        Ok(())
    }

    /// Rewrites the whole manifest. Called after every item outcome, so the
    /// file on disk always matches what was actually fetched.
    pub fn save(&self, manifest: &Manifest, collection: &CollectionId) -> Result<(), SyncError> {
        self.ensure_collection_dir(collection)?;
        let dir = self.collection_dir(collection);
        let path = self.manifest_path(collection);

        let mut temp = tempfile::Builder::new()
            .prefix(".fileList")
            .tempfile_in(dir.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        temp.write_all(manifest.render().as_bytes())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        temp.flush()
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        // persist replaces the old file in one rename, so a crash never
        // leaves the collection without a manifest
        temp.persist(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(err.to_string()))?;
        debug!(entries = manifest.len(), %path, "manifest checkpoint");
        Ok(())
    }

    fn read(path: &Utf8Path) -> Result<Manifest, SyncError> {
        if !path.as_std_path().exists() {
            return Ok(Manifest::new());
        }
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("read {path}: {err}")))?;
        parse_manifest(path, &content)
    }
}
