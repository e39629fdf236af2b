use std::sync::Arc;

use tabletalk_core::{ChatEngine, IngestPipeline};

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ChatEngine>,
    pub pipeline: Arc<IngestPipeline>,
}
