use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::{CollectionId, ItemId, ItemRecord, parse_timestamp};
use crate::error::SyncError;

/// Authoritative remote state of a collection, in the catalog's return order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    records: Vec<ItemRecord>,
}

impl CatalogSnapshot {
    /// Builds a snapshot, keeping the first position of a repeated
    /// identifier and the later timestamp.
    pub fn from_records(records: impl IntoIterator<Item = ItemRecord>) -> Self {
        let mut positions = HashMap::<ItemId, usize>::new();
        let mut ordered: Vec<ItemRecord> = Vec::new();
        for record in records {
            match positions.get(&record.id) {
                Some(&index) => ordered[index].updated = record.updated,
                None => {
                    positions.insert(record.id.clone(), ordered.len());
                    ordered.push(record);
                }
            }
        }
        Self { records: ordered }
    }

    pub fn records(&self) -> &[ItemRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub trait CatalogClient {
    fn search(&self, collection: &CollectionId, row_cap: u32)
    -> Result<CatalogSnapshot, SyncError>;
}

#[derive(Debug, Deserialize)]
struct SearchEnvelope {
    response: SearchResponse,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<SearchDoc>,
}

#[derive(Debug, Deserialize)]
struct SearchDoc {
    identifier: String,
    #[serde(default)]
    oai_updatedate: Option<UpdateDates>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum UpdateDates {
    History(Vec<String>),
    Single(String),
}

impl UpdateDates {
    /// The history list is oldest-first; its last entry is the update date.
    fn latest(&self) -> Option<&str> {
        match self {
            UpdateDates::History(values) => values.last().map(String::as_str),
            UpdateDates::Single(value) => Some(value.as_str()),
        }
    }
}

/// Decodes an advancedsearch JSON body. Documents with an unusable
/// identifier or update date are skipped.
pub fn parse_search_response(body: &str) -> Result<CatalogSnapshot, SyncError> {
    let envelope: SearchEnvelope =
        serde_json::from_str(body).map_err(|err| SyncError::CatalogResponse(err.to_string()))?;

    let mut records = Vec::with_capacity(envelope.response.docs.len());
    for doc in envelope.response.docs {
        let id = match doc.identifier.parse::<ItemId>() {
            Ok(id) => id,
            Err(err) => {
                warn!(identifier = %doc.identifier, "skipping catalog entry: {err}");
                continue;
            }
        };
        let Some(raw) = doc.oai_updatedate.as_ref().and_then(UpdateDates::latest) else {
            warn!(%id, "skipping catalog entry without update date");
            continue;
        };
        let Some(updated) = parse_timestamp(raw) else {
            warn!(%id, value = raw, "skipping catalog entry with unparsable update date");
            continue;
        };
        records.push(ItemRecord { id, updated });
    }
    Ok(CatalogSnapshot::from_records(records))
}

#[derive(Clone)]
pub struct ArchiveCatalogClient {
    client: Client,
    search_url: String,
}

impl ArchiveCatalogClient {
    pub fn new(search_url: impl Into<String>) -> Result<Self, SyncError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("collection-mirror/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| SyncError::HttpClient(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| SyncError::HttpClient(err.to_string()))?;
        Ok(Self {
            client,
            search_url: search_url.into(),
        })
    }

    pub fn query_params(collection: &CollectionId, row_cap: u32) -> Vec<(&'static str, String)> {
        vec![
            ("q", format!("collection:{}", collection.as_str())),
            ("fl[]", "identifier".to_string()),
            ("fl[]", "oai_updatedate".to_string()),
            ("sort[]", "identifier asc".to_string()),
            ("rows", row_cap.to_string()),
            ("output", "json".to_string()),
        ]
    }
}

impl CatalogClient for ArchiveCatalogClient {
    fn search(
        &self,
        collection: &CollectionId,
        row_cap: u32,
    ) -> Result<CatalogSnapshot, SyncError> {
        let params = Self::query_params(collection, row_cap);
        debug!(url = %self.search_url, %collection, row_cap, "catalog query");
        let response = self
            .client
            .get(&self.search_url)
            .query(&params)
            .send()
            .map_err(|err| SyncError::CatalogHttp(err.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(SyncError::CatalogUnavailable {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string(),
            });
        }

        let body = response
            .text()
            .map_err(|err| SyncError::CatalogHttp(err.to_string()))?;
        parse_search_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn last_update_date_wins() {
        let body = r#"{"responseHeader":{"status":0},"response":{"numFound":2,"start":0,"docs":[
            {"identifier":"alpha","oai_updatedate":["2015-01-01T00:00:00Z","2019-06-01T12:00:00Z"]},
            {"identifier":"beta","oai_updatedate":"2018-02-03T04:05:06Z"}
        ]}}"#;
        let snapshot = parse_search_response(body).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.records()[0].id.as_str(), "alpha");
        assert_eq!(
            snapshot.records()[0].updated,
            parse_timestamp("2019-06-01T12:00:00Z").unwrap()
        );
    }

    #[test]
    fn skips_docs_without_dates() {
        let body = r#"{"response":{"docs":[
            {"identifier":"alpha"},
            {"identifier":"beta","oai_updatedate":[]},
            {"identifier":"gamma","oai_updatedate":["2018-02-03T04:05:06Z"]}
        ]}}"#;
        let snapshot = parse_search_response(body).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.records()[0].id.as_str(), "gamma");
    }

    #[test]
    fn malformed_body_is_an_error() {
        let err = parse_search_response("<html>oops</html>").unwrap_err();
        assert_matches!(err, SyncError::CatalogResponse(_));
    }

    #[test]
    fn duplicates_keep_first_position() {
        let body = r#"{"response":{"docs":[
            {"identifier":"a","oai_updatedate":["2018-01-01T00:00:00Z"]},
            {"identifier":"b","oai_updatedate":["2018-01-01T00:00:00Z"]},
            {"identifier":"a","oai_updatedate":["2020-01-01T00:00:00Z"]}
        ]}}"#;
        let snapshot = parse_search_response(body).unwrap();
        let ids: Vec<_> = snapshot.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(
            snapshot.records()[0].updated,
            parse_timestamp("2020-01-01T00:00:00Z").unwrap()
        );
    }

    #[test]
    fn query_requests_sorted_identifiers() {
        let collection: CollectionId = "apple_ii_library_4am".parse().unwrap();
        let params = ArchiveCatalogClient::query_params(&collection, 30_000);
        assert!(params.contains(&("q", "collection:apple_ii_library_4am".to_string())));
        assert!(params.contains(&("sort[]", "identifier asc".to_string())));
        assert!(params.contains(&("rows", "30000".to_string())));
    }
}
