//! Document retrieval boundary and knowledge snippet assembly.
//!
//! Loading, splitting and embedding documents happen elsewhere. This module
//! owns what happens around the vector index: naming chunks, upserting them in
//! bounded batches, and turning query matches into a token-budgeted block of
//! context text.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token_counter::TokenCounter;

/// Chunks sent to [`DocumentIndex::upsert`] per call.
pub const UPSERT_BATCH_SIZE: usize = 100;

/// Matches requested when looking up knowledge for a question.
pub const DEFAULT_TOP_K: usize = 30;

/// Token budget for assembled knowledge text.
pub const DEFAULT_KNOWLEDGE_LIMIT: u32 = 3000;

/// Index operation future type alias.
pub type IndexFut<'a, T> = Pin<Box<dyn Future<Output = Result<T, IndexError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{chunks} chunks but {embeddings} embeddings")]
    EmbeddingCountMismatch { chunks: usize, embeddings: usize },
    #[error("index backend failed: {0}")]
    Backend(String),
}

/// Metadata stored with every chunk and returned with every match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub context: String,
    pub page: u32,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMatch {
    pub id: String,
    pub score: f32,
    pub metadata: ChunkMetadata,
}

/// A vector store that chunks can be written to and queried from.
pub trait DocumentIndex: Send + Sync {
    fn upsert<'a>(&'a self, chunks: &'a [DocumentChunk]) -> IndexFut<'a, ()>;

    /// Best matches first.
    fn query<'a>(&'a self, vector: &'a [f32], top_k: usize) -> IndexFut<'a, Vec<DocumentMatch>>;
}

/// Stable id for the `index`-th chunk of `file_name`.
#[must_use]
pub fn chunk_id(file_name: &str, index: usize) -> String {
    format!("vec-{file_name}-{index}")
}

/// Zips split text with its embeddings into indexable chunks.
///
/// `pieces` yields `(context, page)` pairs in document order.
pub fn build_chunks<I>(
    file_name: &str,
    pieces: I,
    embeddings: Vec<Vec<f32>>,
) -> Result<Vec<DocumentChunk>, IndexError>
where
    I: IntoIterator<Item = (String, u32)>,
{
    let pieces: Vec<(String, u32)> = pieces.into_iter().collect();
    if pieces.len() != embeddings.len() {
        return Err(IndexError::EmbeddingCountMismatch {
            chunks: pieces.len(),
            embeddings: embeddings.len(),
        });
    }

    Ok(pieces
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(i, ((context, page), values))| DocumentChunk {
            id: chunk_id(file_name, i),
            values,
            metadata: ChunkMetadata {
                context,
                page,
                source: file_name.to_string(),
            },
        })
        .collect())
}

/// Upserts `chunks` in batches of [`UPSERT_BATCH_SIZE`]. Returns the number of batches sent.
pub async fn upsert_in_batches<X>(index: &X, chunks: &[DocumentChunk]) -> Result<usize, IndexError>
where
    X: DocumentIndex + ?Sized,
{
    let mut batches = 0;
    for batch in chunks.chunks(UPSERT_BATCH_SIZE) {
        index.upsert(batch).await?;
        batches += 1;
    }
    tracing::debug!(chunks = chunks.len(), batches, "Upserted document chunks");
    Ok(batches)
}

fn snippet(m: &DocumentMatch) -> String {
    let source = m
        .metadata
        .source
        .rsplit('/')
        .next()
        .unwrap_or(&m.metadata.source);
    format!(
        "===\nsource: {source} page: {page} score: {score}\ncontext:\n{context}\n===\n",
        page = m.metadata.page,
        score = m.score,
        context = m.metadata.context,
    )
}

/// Concatenates match snippets in order while they fit under `limit` tokens.
///
/// Stops at the first snippet that does not fit, even if a later, smaller
/// one would.
#[must_use]
pub fn assemble_knowledge(matches: &[DocumentMatch], limit: u32, counter: &TokenCounter) -> String {
    let mut text = String::new();
    for m in matches {
        let current = snippet(m);
        if counter.count_str(&current) + counter.count_str(&text) < limit {
            text.push_str(&current);
        } else {
            break;
        }
    }
    text
}

/// Queries `index` with an already-embedded question and assembles the result.
pub async fn knowledge_for_question<X>(
    index: &X,
    question_embedding: &[f32],
    top_k: usize,
    limit: u32,
    counter: &TokenCounter,
) -> Result<String, IndexError>
where
    X: DocumentIndex + ?Sized,
{
    let matches = index.query(question_embedding, top_k).await?;
    Ok(assemble_knowledge(&matches, limit, counter))
}

/// Brute-force cosine-similarity index held in memory.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    chunks: Mutex<Vec<DocumentChunk>>,
}

impl InMemoryIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.lock().map_or(0, |chunks| chunks.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<DocumentChunk>>, IndexError> {
        self.chunks
            .lock()
            .map_err(|_| IndexError::Backend("in-memory index lock poisoned".to_string()))
    }

    fn upsert_now(&self, incoming: &[DocumentChunk]) -> Result<(), IndexError> {
        let mut chunks = self.lock()?;
        if let Some(expected) = chunks.first().or(incoming.first()).map(|c| c.values.len())
            && let Some(bad) = incoming.iter().find(|c| c.values.len() != expected)
        {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: bad.values.len(),
            });
        }
        for chunk in incoming {
            match chunks.iter_mut().find(|existing| existing.id == chunk.id) {
                Some(existing) => *existing = chunk.clone(),
                None => chunks.push(chunk.clone()),
            }
        }
        Ok(())
    }

    fn query_now(&self, vector: &[f32], top_k: usize) -> Result<Vec<DocumentMatch>, IndexError> {
        let chunks = self.lock()?;
        if let Some(first) = chunks.first()
            && first.values.len() != vector.len()
        {
            return Err(IndexError::DimensionMismatch {
                expected: first.values.len(),
                actual: vector.len(),
            });
        }

        let mut matches: Vec<DocumentMatch> = chunks
            .iter()
            .map(|chunk| DocumentMatch {
                id: chunk.id.clone(),
                score: cosine_similarity(&chunk.values, vector),
                metadata: chunk.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }
}

impl DocumentIndex for InMemoryIndex {
    fn upsert<'a>(&'a self, chunks: &'a [DocumentChunk]) -> IndexFut<'a, ()> {
        Box::pin(async move { self.upsert_now(chunks) })
    }

    fn query<'a>(&'a self, vector: &'a [f32], top_k: usize) -> IndexFut<'a, Vec<DocumentMatch>> {
        Box::pin(async move { self.query_now(vector, top_k) })
    }
}

/// Zero vectors score 0 against everything.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn matched(source: &str, page: u32, score: f32, context: &str) -> DocumentMatch {
        DocumentMatch {
            id: "id".to_string(),
            score,
            metadata: ChunkMetadata {
                context: context.to_string(),
                page,
                source: source.to_string(),
            },
        }
    }

    #[test]
    fn chunk_ids_are_stable() {
        assert_eq!(chunk_id("report.pdf", 0), "vec-report.pdf-0");
        assert_eq!(chunk_id("report.pdf", 17), "vec-report.pdf-17");
    }

    #[test]
    fn build_chunks_rejects_count_mismatch() {
        let err = build_chunks("a.pdf", [("x".to_string(), 1)], vec![]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::EmbeddingCountMismatch {
                chunks: 1,
                embeddings: 0
            }
        ));
    }

    #[test]
    fn snippet_uses_basename_and_format() {
        let text = snippet(&matched("/tmp/uploads/paper.pdf", 3, 0.5, "hello"));
        assert_eq!(
            text,
            "===\nsource: paper.pdf page: 3 score: 0.5\ncontext:\nhello\n===\n"
        );
    }

    #[test]
    fn assemble_knowledge_stops_at_first_overflow() {
        let counter = TokenCounter::new();
        let long = "word ".repeat(400);
        let matches = [
            matched("a.pdf", 1, 0.9, "short one"),
            matched("b.pdf", 2, 0.8, &long),
            matched("c.pdf", 3, 0.7, "short two"),
        ];

        let text = assemble_knowledge(&matches, 200, &counter);
        assert!(text.contains("source: a.pdf"));
        assert!(!text.contains("source: b.pdf"));
        assert!(!text.contains("source: c.pdf"));
        assert!(counter.count_str(&text) < 200);
    }

    #[test]
    fn assemble_knowledge_empty_when_nothing_fits() {
        let counter = TokenCounter::new();
        let matches = [matched("a.pdf", 1, 0.9, "some context")];
        assert_eq!(assemble_knowledge(&matches, 1, &counter), "");
    }

    fn chunk(id: &str, values: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            values,
            metadata: ChunkMetadata {
                context: format!("context of {id}"),
                page: 0,
                source: "doc.pdf".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn in_memory_query_ranks_by_cosine() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[
                chunk("x", vec![1.0, 0.0]),
                chunk("y", vec![0.0, 1.0]),
                chunk("xy", vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        let matches = index.query(&[1.0, 0.1], 2).await.unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["x", "xy"]);
        assert!(matches[0].score > matches[1].score);
    }

    #[tokio::test]
    async fn in_memory_upsert_replaces_by_id() {
        let index = InMemoryIndex::new();
        index.upsert(&[chunk("a", vec![1.0, 0.0])]).await.unwrap();
        index.upsert(&[chunk("a", vec![0.0, 1.0])]).await.unwrap();

        assert_eq!(index.len(), 1);
        let best = index.query(&[0.0, 1.0], 1).await.unwrap();
        assert!((best[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn in_memory_rejects_dimension_mismatch() {
        let index = InMemoryIndex::new();
        index.upsert(&[chunk("a", vec![1.0, 0.0])]).await.unwrap();

        assert!(matches!(
            index.query(&[1.0, 0.0, 0.0], 1).await,
            Err(IndexError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        assert!(index.upsert(&[chunk("b", vec![1.0])]).await.is_err());
    }

    struct CountingIndex {
        calls: AtomicUsize,
        largest: AtomicUsize,
    }

    impl DocumentIndex for CountingIndex {
        fn upsert<'a>(&'a self, chunks: &'a [DocumentChunk]) -> IndexFut<'a, ()> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                self.largest.fetch_max(chunks.len(), Ordering::SeqCst);
                Ok(())
            })
        }

        fn query<'a>(&'a self, _vector: &'a [f32], _top_k: usize) -> IndexFut<'a, Vec<DocumentMatch>> {
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    #[tokio::test]
    async fn upserts_in_batches_of_one_hundred() {
        let index = CountingIndex {
            calls: AtomicUsize::new(0),
            largest: AtomicUsize::new(0),
        };
        let chunks: Vec<_> = (0..250).map(|i| chunk(&chunk_id("f", i), vec![1.0])).collect();

        let batches = upsert_in_batches(&index, &chunks).await.unwrap();
        assert_eq!(batches, 3);
        assert_eq!(index.calls.load(Ordering::SeqCst), 3);
        assert_eq!(index.largest.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn knowledge_for_question_end_to_end() {
        let index = InMemoryIndex::new();
        let chunks = build_chunks(
            "/data/manual.pdf",
            [("install steps".to_string(), 4), ("unrelated".to_string(), 9)],
            vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        )
        .unwrap();
        upsert_in_batches(&index, &chunks).await.unwrap();

        let text = knowledge_for_question(&index, &[1.0, 0.0], 1, DEFAULT_KNOWLEDGE_LIMIT, &TokenCounter::new())
            .await
            .unwrap();
        assert!(text.starts_with("===\nsource: manual.pdf page: 4 score: 1"));
        assert!(text.contains("install steps"));
        assert!(!text.contains("unrelated"));
    }
}
