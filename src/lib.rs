pub mod config;
pub mod format;
pub mod query;
pub mod ranker;
pub mod store;

// Re-export embedding types for convenience
pub use facematch_embed::{
    embedding, provider, similarity, DescriptorProvider, Embedding, EmbeddingProvider,
    ProviderError,
};
pub use query::{run_query, QueryReport, QueryStatus};
pub use store::{ReferenceRecord, ReferenceStore};
