use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::catalog::{CatalogClient, CatalogSnapshot};
use crate::config::SyncConfig;
use crate::domain::{ItemId, ItemRecord};
use crate::error::SyncError;
use crate::fetch::{Fetcher, build_url, destination_path};
use crate::manifest::{Manifest, ManifestStore};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Result of one item's download attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Fetched { updated: DateTime<Utc> },
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemReport {
    pub id: String,
    pub url: String,
    pub action: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub collection: String,
    pub catalog_items: usize,
    pub fetch_set: usize,
    pub items: Vec<ItemReport>,
    pub aborted: Option<String>,
    pub manifest_entries: usize,
}

impl SyncReport {
    pub fn fetched(&self) -> usize {
        self.items.iter().filter(|item| item.action == "fetched").count()
    }

    pub fn failed(&self) -> usize {
        self.items.iter().filter(|item| item.action == "failed").count()
    }
}

/// Items present remotely that are missing locally or strictly newer than
/// the recorded timestamp, in catalog order.
pub fn compute_fetch_set(snapshot: &CatalogSnapshot, manifest: &Manifest) -> Vec<ItemRecord> {
    snapshot
        .records()
        .iter()
        .filter(|record| match manifest.get(&record.id) {
            Some(recorded) => record.updated > *recorded,
            None => true,
        })
        .cloned()
        .collect()
}

/// Mutable state of the fetch loop that must survive an early exit.
#[derive(Default)]
struct LoopState {
    in_flight: Option<(ItemId, Utf8PathBuf)>,
    items: Vec<ItemReport>,
}

pub struct SyncEngine<C: CatalogClient, F: Fetcher> {
    config: SyncConfig,
    store: ManifestStore,
    catalog: C,
    fetcher: F,
}

impl<C: CatalogClient, F: Fetcher> SyncEngine<C, F> {
    pub fn new(config: SyncConfig, catalog: C, fetcher: F) -> Self {
        let store = ManifestStore::new(config.output_root.clone());
        Self {
            config,
            store,
            catalog,
            fetcher,
        }
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Runs one sync. Catalog and manifest-parse failures are returned
    /// before anything on disk changes; per-item failures and faults inside
    /// the fetch loop end up in the report instead.
    pub fn run(&self, sink: &dyn ProgressSink) -> Result<SyncReport, SyncError> {
        let collection = &self.config.collection;

        let baseline = self.store.load(collection)?;
        let snapshot = self.catalog.search(collection, self.config.row_cap)?;
        info!(
            %collection,
            remote = snapshot.len(),
            local = baseline.len(),
            "catalog loaded"
        );

        if snapshot.is_empty() {
            warn!(%collection, "catalog returned no items");
        }

        let fetch_set = compute_fetch_set(&snapshot, &baseline);
        sink.event(ProgressEvent {
            message: format!(
                "{} of {} items need fetching",
                fetch_set.len(),
                snapshot.len()
            ),
            elapsed: None,
        });

        self.store.archive_previous(collection)?;
        // the baseline goes straight back to disk so an interrupted first
        // transfer still finds it on the next run
        self.store.save(&baseline, collection)?;

        let mut working = baseline;
        let mut state = LoopState::default();
        let aborted = match self.fetch_all(&fetch_set, &mut working, &mut state, sink) {
            Ok(()) => None,
            Err(err) => {
                warn!(error = %err, "fetch loop aborted");
                sink.event(ProgressEvent {
                    message: format!("Error while downloading {err}"),
                    elapsed: None,
                });
                if let Some((id, path)) = state.in_flight.take() {
                    working.remove(&id);
                    if let Err(cleanup) = remove_partial(&path) {
                        warn!(%path, error = %cleanup, "could not remove partial download");
                    }
                }
                Some(err.to_string())
            }
        };

        self.store.save(&working, collection)?;

        Ok(SyncReport {
            collection: collection.to_string(),
            catalog_items: snapshot.len(),
            fetch_set: fetch_set.len(),
            items: state.items,
            aborted,
            manifest_entries: working.len(),
        })
    }

    fn fetch_all(
        &self,
        fetch_set: &[ItemRecord],
        working: &mut Manifest,
        state: &mut LoopState,
        sink: &dyn ProgressSink,
    ) -> Result<(), SyncError> {
        let collection = &self.config.collection;
        let policy = &self.config.policy;
        let collection_dir = self.store.collection_dir(collection);
        if !fetch_set.is_empty() {
            info!(format = %policy.format, base_url = %policy.base_url, "fetching items");
        }

        for record in fetch_set {
            let destination = destination_path(&collection_dir, &record.id, policy);
            let url = build_url(&record.id, policy);
            sink.event(ProgressEvent {
                message: format!("Downloading {destination}"),
                elapsed: None,
            });
            sink.event(ProgressEvent {
                message: format!("Downloading from {url}"),
                elapsed: None,
            });

            state.in_flight = Some((record.id.clone(), destination.clone()));
            let start = Instant::now();
            let outcome = self.attempt(record, &url, &destination);

            let report = match outcome {
                ItemOutcome::Fetched { updated } => {
                    working.insert(record.id.clone(), updated);
                    sink.event(ProgressEvent {
                        message: format!("Fetched {}", record.id),
                        elapsed: Some(start.elapsed()),
                    });
                    ItemReport {
                        id: record.id.to_string(),
                        url,
                        action: "fetched".to_string(),
                        error: None,
                    }
                }
                ItemOutcome::Failed { reason } => {
                    // an atomic fetcher leaves the previous copy intact, so
                    // its entry stays and the next run retries the update
                    if !(self.fetcher.writes_atomically() && working.contains(&record.id)) {
                        working.remove(&record.id);
                        remove_partial(&destination)?;
                    }
                    sink.event(ProgressEvent {
                        message: format!("Error while downloading {reason}"),
                        elapsed: None,
                    });
                    ItemReport {
                        id: record.id.to_string(),
                        url,
                        action: "failed".to_string(),
                        error: Some(reason),
                    }
                }
            };
            state.in_flight = None;
            state.items.push(report);

            self.store.save(working, collection)?;

            if !self.config.item_delay.is_zero() {
                thread::sleep(self.config.item_delay);
            }
        }
        Ok(())
    }

    fn attempt(&self, record: &ItemRecord, url: &str, destination: &Utf8Path) -> ItemOutcome {
        match self.fetcher.fetch(url, destination.as_std_path()) {
            Ok(()) => ItemOutcome::Fetched {
                updated: record.updated,
            },
            Err(err) => {
                warn!(id = %record.id, %url, error = %err, "item download failed");
                ItemOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}

fn remove_partial(path: &Utf8Path) -> Result<(), SyncError> {
    if path.as_std_path().exists() {
        fs::remove_file(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("remove {path}: {err}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::parse_timestamp;

    fn record(id: &str, updated: &str) -> ItemRecord {
        ItemRecord {
            id: id.parse().unwrap(),
            updated: parse_timestamp(updated).unwrap(),
        }
    }

    #[test]
    fn fetch_set_selects_new_and_newer() {
        let manifest: Manifest = [
            record("a", "2020-01-01T00:00:00Z"),
            record("b", "2020-01-01T00:00:00Z"),
            record("d", "2022-01-01T00:00:00Z"),
        ]
        .into_iter()
        .map(|r| (r.id, r.updated))
        .collect();
        let snapshot = CatalogSnapshot::from_records([
            record("a", "2020-01-01T00:00:00Z"),
            record("b", "2021-01-01T00:00:00Z"),
            record("c", "2019-01-01T00:00:00Z"),
            record("d", "2021-01-01T00:00:00Z"),
        ]);

        let ids: Vec<_> = compute_fetch_set(&snapshot, &manifest)
            .into_iter()
            .map(|r| r.id.to_string())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn fetch_set_matches_definition() {
        let t1 = "2020-01-01T00:00:00Z";
        let t2 = "2021-01-01T00:00:00Z";
        // (local, remote, expected in fetch set)
        let cases: &[(Option<&str>, &str, bool)] = &[
            (None, t1, true),
            (Some(t1), t1, false),
            (Some(t1), t2, true),
            (Some(t2), t1, false),
        ];

        for (index, (local, remote, expected)) in cases.iter().enumerate() {
            let name = format!("item{index}");
            let mut manifest: Manifest = local
                .map(|value| record(&name, value))
                .into_iter()
                .map(|r| (r.id, r.updated))
                .collect();
            manifest.insert("gone".parse().unwrap(), parse_timestamp(t1).unwrap());
            let snapshot = CatalogSnapshot::from_records([record(&name, remote)]);

            let fetch_set = compute_fetch_set(&snapshot, &manifest);
            let ids: Vec<_> = fetch_set.iter().map(|r| r.id.to_string()).collect();
            if *expected {
                assert_eq!(ids, vec![name.clone()], "case {index}");
                assert_eq!(fetch_set[0].updated, parse_timestamp(remote).unwrap());
            } else {
                assert!(ids.is_empty(), "case {index}");
            }
        }
    }

    #[test]
    fn fetch_set_empty_when_up_to_date() {
        let snapshot = CatalogSnapshot::from_records([record("a", "2020-01-01T00:00:00Z")]);
        let manifest: Manifest = snapshot
            .records()
            .iter()
            .map(|r| (r.id.clone(), r.updated))
            .collect();
        assert!(compute_fetch_set(&snapshot, &manifest).is_empty());
    }
}
