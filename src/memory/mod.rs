//! Long-term semantic memory: embeddings, the SQLite-backed record store and
//! nearest-neighbour search over a user's past utterances.

mod embeddings;
mod reconcile;
mod schema;
mod search;
mod store;
mod types;

pub use embeddings::{
    resolve_embedding_provider, CachedEmbeddingProvider, EmbeddingProvider,
    OllamaEmbeddingProvider, OpenAiEmbeddingProvider,
};
pub use reconcile::{reconcile, ReconcileReport};
pub use search::cosine_distance;
pub use store::{MemoryStore, StoreStats};
pub use types::{MemoryHit, MemoryRecord, Role};
