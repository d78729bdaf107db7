//! Participant documents: the `/seed` reader and the operator bulk loader.
//!
//! A document is a JSON array of [`NewParticipant`] objects.

use std::path::Path;

use tracing::info;

use crate::error::{DashboardError, Result};
use crate::models::NewParticipant;
use crate::store::Store;

/// Read and parse a participant document.
pub async fn read_document(path: impl AsRef<Path>) -> Result<Vec<NewParticipant>> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| DashboardError::Document {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Insert every record of the document in one transaction.
///
/// Existing rows are left alone; a duplicate `external_id` aborts the batch.
pub async fn seed(store: &Store, path: impl AsRef<Path>) -> Result<usize> {
    let records = read_document(path).await?;
    store.insert_all(records).await
}

/// Replace the whole table with the document's records.
pub async fn bulk_load(store: &Store, path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();
    info!(path = %path.display(), "loading bulk participant document");
    let records = read_document(path).await?;

    info!(records = records.len(), "replacing participant table");
    store.ensure_schema().await?;
    let inserted = store.replace_all(records).await?;

    info!(inserted, "bulk load complete");
    Ok(inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ParticipantFilter;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn document(body: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    const TWO: &str = r#"[
        {"external_id":"A1","diagnosis":"ADHD","age":8,"gender":"Male","state":"NY","joined_at":"2023-01-01T00:00:00"},
        {"external_id":"A2","diagnosis":"Autism","age":11,"gender":"Female","state":"CA","joined_at":"2023-02-01T10:30:00"}
    ]"#;

    #[tokio::test]
    async fn test_read_document_parses_entries() {
        let file = document(TWO);
        let records = read_document(file.path()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].state, "CA");
    }

    #[tokio::test]
    async fn test_read_document_missing_file() {
        let err = read_document("/definitely/not/here.json").await.unwrap_err();
        assert!(matches!(err, DashboardError::Document { .. }));
        assert_eq!(err.status(), 500);
    }

    #[tokio::test]
    async fn test_read_document_malformed() {
        let file = document(r#"[{"external_id":"A1"}]"#);
        let err = read_document(file.path()).await.unwrap_err();
        assert!(matches!(err, DashboardError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_seed_appends() {
        let store = Store::open_in_memory().unwrap();
        let file = document(TWO);
        assert_eq!(seed(&store, file.path()).await.unwrap(), 2);
        assert_eq!(store.count(ParticipantFilter::all()).await.unwrap(), 2);

        // seeding the same document again collides on external_id
        let err = seed(&store, file.path()).await.unwrap_err();
        assert!(matches!(err, DashboardError::Conflict(_)));
        assert_eq!(store.count(ParticipantFilter::all()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_bulk_load_replaces_and_is_repeatable() {
        let store = Store::open_in_memory().unwrap();
        let first = document(
            r#"[{"external_id":"OLD","diagnosis":"ADHD","age":8,"gender":"Male","state":"NY","joined_at":"2022-01-01"}]"#,
        );
        bulk_load(&store, first.path()).await.unwrap();

        let second = document(TWO);
        assert_eq!(bulk_load(&store, second.path()).await.unwrap(), 2);
        assert_eq!(bulk_load(&store, second.path()).await.unwrap(), 2);

        let rows = store.list(ParticipantFilter::all(), 100, 0).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|p| p.external_id.as_str()).collect();
        assert_eq!(ids, vec!["A1", "A2"]);
    }

    #[tokio::test]
    async fn test_bulk_load_bad_document_keeps_table() {
        let store = Store::open_in_memory().unwrap();
        let good = document(TWO);
        bulk_load(&store, good.path()).await.unwrap();

        let bad = document("not json");
        assert!(bulk_load(&store, bad.path()).await.is_err());
        assert_eq!(store.count(ParticipantFilter::all()).await.unwrap(), 2);
    }
}
