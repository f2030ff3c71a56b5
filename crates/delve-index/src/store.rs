use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use delve_core::error::{DelveError, Result};
use delve_core::traits::EmbeddingProvider;
use delve_core::types::{ChunkKind, ChunkRef};

use crate::embeddings::cosine_similarity;

/// One original chunk plus the summary it is searched by.
#[derive(Debug, Clone)]
struct IndexedChunk {
    doc_id: String,
    kind: ChunkKind,
    content: String,
    summary: String,
    vector: Option<Vec<f32>>,
}

/// Multi-vector index: summaries are what gets matched, originals are
/// what gets returned.
///
/// With an embedding provider, summaries are ranked by cosine similarity
/// to the embedded query. Without one, ranking falls back to term overlap
/// between the query and the summary plus original text.
pub struct ChunkIndex {
    entries: Vec<IndexedChunk>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
}

impl ChunkIndex {
    pub fn new(embedder: Option<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            entries: Vec::new(),
            embedder,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index `originals` under their `summaries` (paired by position).
    pub async fn add(
        &mut self,
        kind: ChunkKind,
        originals: Vec<String>,
        summaries: Vec<String>,
    ) -> Result<()> {
        if originals.len() != summaries.len() {
            return Err(DelveError::Index(format!(
                "{} {:?} chunks but {} summaries",
                originals.len(),
                kind,
                summaries.len()
            )));
        }
        if originals.is_empty() {
            return Ok(());
        }

        let vectors = match &self.embedder {
            Some(embedder) => {
                let vectors = embedder.embed(&summaries).await?;
                if vectors.len() != summaries.len() {
                    return Err(DelveError::Embedding(format!(
                        "expected {} embeddings, got {}",
                        summaries.len(),
                        vectors.len()
                    )));
                }
                vectors.into_iter().map(Some).collect()
            }
            None => vec![None; summaries.len()],
        };

        for ((content, summary), vector) in originals.into_iter().zip(summaries).zip(vectors) {
            self.entries.push(IndexedChunk {
                doc_id: Uuid::new_v4().to_string(),
                kind,
                content,
                summary,
                vector,
            });
        }
        debug!(kind = ?kind, total = self.entries.len(), "Chunks indexed");
        Ok(())
    }

    /// The `top_k` chunks most relevant to `query`, best first.
    /// Ties keep insertion order.
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Vec<ChunkRef>> {
        if self.entries.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let scores: Vec<f32> = match &self.embedder {
            Some(embedder) => {
                let query_vec = embedder
                    .embed(&[query.to_string()])
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| DelveError::Embedding("no embedding for query".into()))?;
                self.entries
                    .iter()
                    .map(|e| {
                        e.vector
                            .as_deref()
                            .map_or(0.0, |v| cosine_similarity(&query_vec, v))
                    })
                    .collect()
            }
            None => {
                let query_terms = terms(query);
                self.entries
                    .iter()
                    .map(|e| lexical_score(&query_terms, &e.summary, &e.content))
                    .collect()
            }
        };

        let mut ranked: Vec<(usize, f32)> = scores.into_iter().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(ranked
            .into_iter()
            .take(top_k)
            .map(|(i, score)| {
                let e = &self.entries[i];
                ChunkRef {
                    doc_id: e.doc_id.clone(),
                    kind: e.kind,
                    content: e.content.clone(),
                    score,
                }
            })
            .collect())
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "what", "which", "who", "how", "why", "when", "with",
    "that", "this", "from", "does", "did", "into", "about", "its", "has", "have", "of", "to",
    "in", "on", "is", "a", "an", "it", "be", "by", "as", "at", "or",
];

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Fraction of query terms present in the summary, with a smaller bonus
/// for terms present only in the original chunk.
fn lexical_score(query_terms: &HashSet<String>, summary: &str, content: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let summary_terms = terms(summary);
    let content_terms = terms(content);
    let mut score = 0.0;
    for t in query_terms {
        if summary_terms.contains(t) {
            score += 1.0;
        } else if content_terms.contains(t) {
            score += 0.5;
        }
    }
    score / query_terms.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;

    /// Embeds text as a bag of three keywords.
    struct KeywordEmbedder;

    impl EmbeddingProvider for KeywordEmbedder {
        fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
            let vectors = texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    ["revenue", "climate", "engine"]
                        .iter()
                        .map(|k| if t.contains(k) { 1.0 } else { 0.0 })
                        .collect()
                })
                .collect();
            Box::pin(async move { Ok(vectors) })
        }

        fn dimensions(&self) -> usize {
            3
        }
    }

    #[tokio::test]
    async fn test_lexical_retrieval_returns_originals() {
        let mut index = ChunkIndex::new(None);
        index
            .add(
                ChunkKind::Text,
                vec!["ORIGINAL A".into(), "ORIGINAL B".into()],
                vec![
                    "Discussion of quarterly revenue growth".into(),
                    "Climate policy overview".into(),
                ],
            )
            .await
            .unwrap();
        let hits = index.retrieve("What was the revenue growth?", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content, "ORIGINAL A");
        assert_eq!(hits[0].kind, ChunkKind::Text);
    }

    #[tokio::test]
    async fn test_embedding_retrieval_ranks_by_summary() {
        let mut index = ChunkIndex::new(Some(Arc::new(KeywordEmbedder)));
        index
            .add(
                ChunkKind::Text,
                vec!["t1".into()],
                vec!["the engine design".into()],
            )
            .await
            .unwrap();
        index
            .add(
                ChunkKind::Table,
                vec!["| year | revenue |".into()],
                vec!["table of revenue by year".into()],
            )
            .await
            .unwrap();
        let hits = index.retrieve("revenue", 2).await.unwrap();
        assert_eq!(hits[0].content, "| year | revenue |");
        assert_eq!(hits[0].kind, ChunkKind::Table);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_mismatched_summaries_rejected() {
        let mut index = ChunkIndex::new(None);
        let err = index
            .add(ChunkKind::Text, vec!["a".into(), "b".into()], vec!["s".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, DelveError::Index(_)));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_empty_index_and_top_k() {
        let mut index = ChunkIndex::new(None);
        assert!(index.retrieve("anything", 3).await.unwrap().is_empty());
        index
            .add(
                ChunkKind::Text,
                vec!["a".into(), "b".into(), "c".into()],
                vec!["x".into(), "y".into(), "z".into()],
            )
            .await
            .unwrap();
        let hits = index.retrieve("unrelated", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        // all scores tie at zero: insertion order wins
        assert_eq!(hits[0].content, "a");
        assert_eq!(hits[1].content, "b");
    }
}
