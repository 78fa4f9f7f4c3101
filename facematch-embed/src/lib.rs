pub mod embedding;
pub mod provider;
pub mod similarity;

// Re-export commonly used types
pub use embedding::{Embedding, EmbeddingError};
pub use provider::{DescriptorProvider, EmbeddingProvider, ProviderError};
pub use similarity::{similarity, SimilarityError};
