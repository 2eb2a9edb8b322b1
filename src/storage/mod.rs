use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// Metadata carried with every stored chunk record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub page_id: Uuid,
    pub url: String,
    pub title: String,
    pub chunk_index: usize,
    pub chunk_count: usize,
}

/// The record shape handed to the embedding/storage collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// A ranked search result from the collaborator
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: ChunkMetadata,
    pub score: f64,
}

/// The external embedding/storage boundary: the pipeline only ever upserts
/// records and runs ranked searches; what the backend does with them is its
/// own business.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Insert or replace records, keyed by record id
    async fn upsert(&self, records: Vec<DocumentRecord>) -> Result<()>;

    /// Rank stored records against a query
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;

    /// Number of distinct stored records
    async fn count(&self) -> Result<usize>;
}

/// Storage backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// "memory" or "jsonl"
    pub backend: String,

    /// Output file for the jsonl backend
    pub path: Option<PathBuf>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: None,
        }
    }
}

/// Factory for creating a DocumentSink implementation
pub struct DocumentStore;

impl DocumentStore {
    pub fn create(settings: &StorageSettings) -> Result<Arc<dyn DocumentSink>> {
        match settings.backend.as_str() {
            "memory" => Ok(Arc::new(MemorySink::new())),
            "jsonl" => {
                let path = settings
                    .path
                    .clone()
                    .context("The jsonl storage backend requires a path")?;
                Ok(Arc::new(JsonlSink::new(path)))
            }
            other => anyhow::bail!("Unsupported storage backend: {}", other),
        }
    }
}

/// In-memory sink used by tests and throwaway runs
pub struct MemorySink {
    records: Mutex<HashMap<String, DocumentRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn upsert(&self, records: Vec<DocumentRecord>) -> Result<()> {
        let mut store = self.records.lock().await;
        for record in records {
            store.insert(record.id.clone(), record);
        }
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let store = self.records.lock().await;
        Ok(rank(store.values(), query, limit))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.lock().await.len())
    }
}

/// Append-only JSON-lines sink; the latest line per id wins on read
pub struct JsonlSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> Result<HashMap<String, DocumentRecord>> {
        let mut records = HashMap::new();

        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => {
                return Err(e).context(format!("Failed to read {}", self.path.display()));
            }
        };

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: DocumentRecord = serde_json::from_str(line)
                .context(format!("Corrupt record in {}", self.path.display()))?;
            records.insert(record.id.clone(), record);
        }

        Ok(records)
    }
}

#[async_trait]
impl DocumentSink for JsonlSink {
    async fn upsert(&self, records: Vec<DocumentRecord>) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context(format!("Failed to create {}", parent.display()))?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .context(format!("Failed to open {}", self.path.display()))?;

        let mut buffer = String::new();
        for record in &records {
            buffer.push_str(&serde_json::to_string(record)?);
            buffer.push('\n');
        }
        file.write_all(buffer.as_bytes())
            .await
            .context(format!("Failed to write {}", self.path.display()))?;
        file.flush().await?;

        debug!("Appended {} records to {}", records.len(), self.path.display());
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let records = self.read_all().await?;
        Ok(rank(records.values(), query, limit))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read_all().await?.len())
    }
}

/// Naive term-overlap ranking, good enough for local inspection
fn rank<'a, I>(records: I, query: &str, limit: usize) -> Vec<SearchHit>
where
    I: Iterator<Item = &'a DocumentRecord>,
{
    let terms: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(|t| t.to_string())
        .collect();
    if terms.is_empty() {
        return Vec::new();
    }

    let mut hits: Vec<SearchHit> = records
        .filter_map(|record| {
            let haystack = record.text.to_lowercase();
            let matched = terms.iter().filter(|t| haystack.contains(*t)).count();
            if matched == 0 {
                return None;
            }
            Some(SearchHit {
                id: record.id.clone(),
                text: record.text.clone(),
                metadata: record.metadata.clone(),
                score: matched as f64 / terms.len() as f64,
            })
        })
        .collect();

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, text: &str) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                page_id: Uuid::new_v4(),
                url: "https://example.test".to_string(),
                title: "Example".to_string(),
                chunk_index: 0,
                chunk_count: 1,
            },
        }
    }

    #[tokio::test]
    async fn memory_sink_upserts_by_id() {
        let sink = MemorySink::new();
        sink.upsert(vec![record("a", "first"), record("b", "second")])
            .await
            .unwrap();
        sink.upsert(vec![record("a", "replaced")]).await.unwrap();

        assert_eq!(sink.count().await.unwrap(), 2);

        let hits = sink.search("replaced", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn search_ranks_by_term_overlap() {
        let sink = MemorySink::new();
        sink.upsert(vec![
            record("both", "rust crawler engine"),
            record("one", "rust parser"),
            record("none", "python scripts"),
        ])
        .await
        .unwrap();

        let hits = sink.search("rust crawler", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "both");
        assert!(hits[0].score > hits[1].score);

        let limited = sink.search("rust", 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn jsonl_sink_round_trips_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunks.jsonl");
        let sink = JsonlSink::new(path.clone());

        sink.upsert(vec![record("a", "original text")]).await.unwrap();
        sink.upsert(vec![record("a", "rewritten text"), record("b", "other")])
            .await
            .unwrap();

        assert_eq!(sink.count().await.unwrap(), 2);
        let hits = sink.search("rewritten", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn factory_rejects_unknown_backends() {
        let settings = StorageSettings {
            backend: "postgres".to_string(),
            path: None,
        };
        assert!(DocumentStore::create(&settings).is_err());

        let jsonl_without_path = StorageSettings {
            backend: "jsonl".to_string(),
            path: None,
        };
        assert!(DocumentStore::create(&jsonl_without_path).is_err());
    }
}
