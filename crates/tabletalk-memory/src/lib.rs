pub mod embedding;
pub mod handle;
pub mod store;

pub use embedding::{EmbeddingProvider, EmbeddingResult, GeminiEmbeddingProvider, StubEmbeddingProvider};
pub use handle::StoreHandle;
pub use store::{ContextStore, DocMetadata, Document, DocumentStore, RetrievedDocument};
