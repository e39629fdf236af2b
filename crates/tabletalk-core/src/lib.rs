pub mod engine;
pub mod ingest;
pub mod prompt;
pub mod session;

pub use engine::{ChatEngine, ChatEvent, ChatStream, EngineOptions};
pub use ingest::IngestPipeline;
pub use session::{SessionStore, Turn};
