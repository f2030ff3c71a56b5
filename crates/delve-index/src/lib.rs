pub mod embeddings;
pub mod store;

pub use embeddings::{cosine_similarity, HttpEmbeddingProvider};
pub use store::ChunkIndex;
