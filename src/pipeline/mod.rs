use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::chunker::Chunker;
use crate::crawler::engine::Crawler;
use crate::storage::{ChunkMetadata, DocumentRecord, DocumentSink};

/// Aggregate counters for one ingestion run
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct IngestStats {
    /// URLs fetched by the crawl
    pub pages_processed: u32,

    /// Chunk records handed to the storage collaborator
    pub chunks_stored: u32,
}

/// Crawl, chunk, and store: the full ingestion path from a seed URL to
/// embedding-ready records in the storage collaborator.
pub struct IngestPipeline {
    crawler: Crawler,
    chunker: Chunker,
    sink: Arc<dyn DocumentSink>,
}

impl IngestPipeline {
    pub fn new(crawler: Crawler, chunker: Chunker, sink: Arc<dyn DocumentSink>) -> Self {
        Self {
            crawler,
            chunker,
            sink,
        }
    }

    /// Run a full ingestion from `seed`. Crawl failures are already absorbed
    /// page-by-page; storage failures are configuration-grade and propagate.
    pub async fn ingest(&self, seed: &str) -> Result<IngestStats> {
        let report = self.crawler.crawl(seed).await?;

        let mut chunks_stored: u32 = 0;
        for page in &report.pages {
            let chunks = self.chunker.split(&page.content);
            let chunk_count = chunks.len();
            if chunk_count == 0 {
                continue;
            }

            let records: Vec<DocumentRecord> = chunks
                .into_iter()
                .enumerate()
                .map(|(index, text)| DocumentRecord {
                    id: format!("{}-{}", page.id, index),
                    text,
                    metadata: ChunkMetadata {
                        page_id: page.id,
                        url: page.url.clone(),
                        title: page.title.clone(),
                        chunk_index: index,
                        chunk_count,
                    },
                })
                .collect();

            self.sink
                .upsert(records)
                .await
                .context(format!("Failed to store chunks for {}", page.url))?;

            debug!("Stored {} chunks for {}", chunk_count, page.url);
            chunks_stored += chunk_count as u32;
        }

        info!(
            "Ingestion finished: {} pages fetched, {} chunks stored",
            report.pages_processed, chunks_stored
        );

        Ok(IngestStats {
            pages_processed: report.pages_processed,
            chunks_stored,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::session::{FetchRequest, FetchedPage, PageFetcher};
    use crate::chunker::ChunkSettings;
    use crate::crawler::engine::CrawlSettings;
    use crate::scraper::engine::{ScrapeOptions, Scraper};
    use crate::storage::MemorySink;
    use async_trait::async_trait;

    /// Two-page site with enough text to chunk
    struct TinySite;

    #[async_trait]
    impl PageFetcher for TinySite {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage> {
            let paragraph = "Practical systems hold up under sustained load because every \
                failure path is considered in advance and rehearsed until it is boring. "
                .repeat(4);

            let (links, title) = match request.url.as_str() {
                "https://example.test" => (vec!["/guide".to_string()], "Home"),
                "https://example.test/guide" => (Vec::new(), "Guide"),
                other => anyhow::bail!("404 not found: {}", other),
            };

            Ok(FetchedPage {
                url: request.url.clone(),
                status: 200,
                title: title.to_string(),
                html: format!("<html><body><p>{}</p></body></html>", paragraph),
                links,
                cookies: Vec::new(),
            })
        }
    }

    fn pipeline(sink: Arc<dyn DocumentSink>) -> IngestPipeline {
        let options = ScrapeOptions {
            retries: 0,
            cache_enabled: false,
            backoff_delay_ms: 1,
            ..Default::default()
        };
        let scraper = Scraper::with_fetcher(options, Arc::new(TinySite)).unwrap();
        let crawler = Crawler::new(
            CrawlSettings {
                max_pages: 10,
                max_depth: 2,
                politeness_delay_ms: 0,
                min_content_length: 50,
                ..Default::default()
            },
            Arc::new(scraper),
        )
        .unwrap();
        let chunker = Chunker::new(ChunkSettings {
            chunk_size: 300,
            chunk_overlap: 50,
            min_chunk_size: 30,
            ..Default::default()
        })
        .unwrap();

        IngestPipeline::new(crawler, chunker, sink)
    }

    #[tokio::test]
    async fn ingest_stores_chunk_records_with_metadata() {
        let sink = Arc::new(MemorySink::new());
        let stats = pipeline(sink.clone()).ingest("https://example.test/").await.unwrap();

        assert_eq!(stats.pages_processed, 2);
        assert!(stats.chunks_stored >= 2);
        assert_eq!(sink.count().await.unwrap() as u32, stats.chunks_stored);

        let hits = sink.search("sustained load", 5).await.unwrap();
        assert!(!hits.is_empty());
        let hit = &hits[0];
        assert!(hit.metadata.chunk_count >= 1);
        assert!(hit.metadata.chunk_index < hit.metadata.chunk_count);
        assert!(hit.metadata.url.starts_with("https://example.test"));
        assert!(hit.id.ends_with(&format!("-{}", hit.metadata.chunk_index)));
    }
}
