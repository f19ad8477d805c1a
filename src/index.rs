//! In-memory knowledge index.
//!
//! Built once at startup from a snapshot of the content directory: scan →
//! chunk → deduplicate → embed in paced batches. Queries are a brute-force
//! cosine scan over all vectors, which is plenty for a single site's content.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::chunk::chunk_item;
use crate::config::Config;
use crate::connector_fs::scan_content;
use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::models::{Chunk, RetrievedDocument, SourceItem};

#[derive(Debug, Clone)]
struct IndexedChunk {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// A scored hit returned by [`KnowledgeIndex::search`].
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub score: f32,
    pub document: RetrievedDocument,
}

#[derive(Debug, Clone)]
pub struct IndexStats {
    pub documents: usize,
    pub chunks: usize,
    pub skipped_duplicates: usize,
    pub built_at: DateTime<Utc>,
}

pub struct KnowledgeIndex {
    entries: Vec<IndexedChunk>,
    stats: IndexStats,
}

/// Scan the content root and chunk every document, dropping chunks whose
/// text was already seen. Returns the surviving chunks and the number skipped.
pub fn prepare_chunks(config: &Config) -> Result<(Vec<SourceItem>, Vec<Chunk>, usize)> {
    let items = scan_content(&config.content)?;

    let mut seen = HashSet::new();
    let mut chunks = Vec::new();
    let mut skipped = 0;
    for item in &items {
        for chunk in chunk_item(
            item,
            config.chunking.max_tokens,
            config.chunking.overlap_tokens,
        ) {
            if seen.insert(chunk.hash.clone()) {
                chunks.push(chunk);
            } else {
                skipped += 1;
            }
        }
    }

    Ok((items, chunks, skipped))
}

impl KnowledgeIndex {
    /// Build the index from `[content]`, embedding with `embedder`.
    ///
    /// Batches of `embedding.batch_size` are sent sequentially with
    /// `embedding.batch_delay_ms` between them; retries within a batch are
    /// the provider's business. Any batch failure fails the build.
    pub async fn build(config: &Config, embedder: &dyn EmbeddingProvider) -> Result<Self> {
        let (items, chunks, skipped_duplicates) = prepare_chunks(config)?;
        if chunks.is_empty() {
            bail!(
                "No indexable content found under {}",
                config.content.root.display()
            );
        }

        let batch_size = config.embedding.batch_size.max(1);
        let batch_count = chunks.len().div_ceil(batch_size);
        tracing::info!(
            documents = items.len(),
            chunks = chunks.len(),
            batches = batch_count,
            model = embedder.model_name(),
            "embedding content"
        );

        let mut entries = Vec::with_capacity(chunks.len());
        for (batch_no, batch) in chunks.chunks(batch_size).enumerate() {
            if batch_no > 0 {
                tokio::time::sleep(config.embedding.batch_delay()).await;
            }

            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "Embedding provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                );
            }

            tracing::debug!(batch = batch_no + 1, of = batch_count, "embedded batch");
            entries.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| IndexedChunk { chunk, vector }),
            );
        }

        Ok(Self::from_parts(entries, items.len(), skipped_duplicates))
    }

    /// Assemble an index from already-embedded chunks.
    pub fn from_embedded(chunks: Vec<(Chunk, Vec<f32>)>) -> Self {
        let documents = chunks
            .iter()
            .map(|(c, _)| c.source_id.as_str())
            .collect::<HashSet<_>>()
            .len();
        let entries = chunks
            .into_iter()
            .map(|(chunk, vector)| IndexedChunk { chunk, vector })
            .collect();
        Self::from_parts(entries, documents, 0)
    }

    fn from_parts(entries: Vec<IndexedChunk>, documents: usize, skipped_duplicates: usize) -> Self {
        let stats = IndexStats {
            documents,
            chunks: entries.len(),
            skipped_duplicates,
            built_at: Utc::now(),
        };
        Self { entries, stats }
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `k` chunks most similar to `query_vec`, best first.
    pub fn search(&self, query_vec: &[f32], k: usize) -> Vec<Hit> {
        let mut scored: Vec<(f32, &IndexedChunk)> = self
            .entries
            .iter()
            .map(|e| (cosine_similarity(query_vec, &e.vector), e))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        scored
            .into_iter()
            .map(|(score, e)| Hit {
                score,
                document: RetrievedDocument {
                    text: e.chunk.text.clone(),
                    source: e.chunk.source.clone(),
                },
            })
            .collect()
    }
}
