use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::OnceCell;

use crate::embedding::EmbeddingProvider;
use crate::store::DocumentStore;

/// Process-wide, lazily-initialized handle to the document store.
///
/// The first caller that needs the store opens the connection; concurrent
/// first callers race safely and all end up sharing the same instance for
/// the life of the process.
pub struct StoreHandle {
    cell: OnceCell<Arc<DocumentStore>>,
    path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl StoreHandle {
    pub fn new(path: impl Into<PathBuf>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            cell: OnceCell::new(),
            path: path.into(),
            embedder,
        }
    }

    pub async fn get(&self) -> Result<Arc<DocumentStore>> {
        let store = self
            .cell
            .get_or_try_init(|| async {
                if let Some(parent) = self.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
                let path = self.path.to_string_lossy().to_string();
                let embedder = Arc::clone(&self.embedder);
                let store =
                    tokio::task::spawn_blocking(move || DocumentStore::open(&path, embedder))
                        .await??;
                Ok::<Arc<DocumentStore>, anyhow::Error>(Arc::new(store))
            })
            .await?;
        Ok(Arc::clone(store))
    }
}
