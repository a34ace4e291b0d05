use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use collection_mirror::domain::{CollectionId, ItemId, parse_timestamp};
use collection_mirror::error::SyncError;
use collection_mirror::manifest::{Manifest, ManifestStore};

fn temp_store() -> (tempfile::TempDir, ManifestStore) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    (temp, ManifestStore::new(root))
}

fn entry(id: &str, updated: &str) -> (ItemId, chrono::DateTime<chrono::Utc>) {
    (id.parse().unwrap(), parse_timestamp(updated).unwrap())
}

#[test]
fn load_creates_collection_dir_and_returns_empty() {
    let (_temp, store) = temp_store();
    let collection: CollectionId = "demo".parse().unwrap();

    let manifest = store.load(&collection).unwrap();
    assert!(manifest.is_empty());
    assert!(store.collection_dir(&collection).as_std_path().is_dir());
}

#[test]
fn save_then_load_round_trips() {
    let (_temp, store) = temp_store();
    let collection: CollectionId = "demo".parse().unwrap();
    let manifest: Manifest = [
        entry("zeta", "2019-12-31T23:59:59Z"),
        entry("alpha", "2020-02-29T12:00:00Z"),
    ]
    .into_iter()
    .collect();

    store.save(&manifest, &collection).unwrap();
    store.save(&manifest, &collection).unwrap();
    let loaded = store.load(&collection).unwrap();
    assert_eq!(loaded, manifest);

    let text = std::fs::read_to_string(store.manifest_path(&collection).as_std_path()).unwrap();
    assert_eq!(
        text,
        "alpha\t2020-02-29T12:00:00Z\nzeta\t2019-12-31T23:59:59Z\n"
    );
}

#[test]
fn archive_previous_moves_current_over_backup() {
    let (_temp, store) = temp_store();
    let collection: CollectionId = "demo".parse().unwrap();
    store.ensure_collection_dir(&collection).unwrap();
    std::fs::write(store.backup_path(&collection).as_std_path(), "stale\t2001-01-01T00:00:00Z\n")
        .unwrap();
    let manifest: Manifest = [entry("a", "2020-01-01T00:00:00Z")].into_iter().collect();
    store.save(&manifest, &collection).unwrap();

    store.archive_previous(&collection).unwrap();

    assert!(!store.manifest_path(&collection).as_std_path().exists());
    assert_eq!(store.load_backup(&collection).unwrap(), manifest);
    assert!(store.load(&collection).unwrap().is_empty());
}

#[test]
fn archive_previous_without_manifest_is_noop() {
    let (_temp, store) = temp_store();
    let collection: CollectionId = "demo".parse().unwrap();
    store.ensure_collection_dir(&collection).unwrap();
    std::fs::write(store.backup_path(&collection).as_std_path(), "a\t2001-01-01T00:00:00Z\n")
        .unwrap();

    store.archive_previous(&collection).unwrap();
    assert_eq!(store.load_backup(&collection).unwrap().len(), 1);
}

#[test]
fn malformed_manifest_fails_load() {
    let (_temp, store) = temp_store();
    let collection: CollectionId = "demo".parse().unwrap();
    store.ensure_collection_dir(&collection).unwrap();
    std::fs::write(
        store.manifest_path(&collection).as_std_path(),
        "a\t2020-01-01T00:00:00Z\nb\t31/31/2020\n",
    )
    .unwrap();

    let err = store.load(&collection).unwrap_err();
    assert_matches!(err, SyncError::ManifestParse { line: 2, .. });
}
