use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;

use tabletalk_memory::{ContextStore, DocMetadata, Document};

/// External-service batch limit for a single store submission.
pub const BATCH_SIZE: usize = 100;

/// Converts stored tabular records into documents and writes them to the
/// context store in order-preserving batches.
pub struct IngestPipeline {
    context: Arc<dyn ContextStore>,
}

impl IngestPipeline {
    pub fn new(context: Arc<dyn ContextStore>) -> Self {
        Self { context }
    }

    /// Embed one upload's records. Returns the number of documents
    /// submitted. Batches are sequential so ids stay deterministic.
    pub async fn embed_records(
        &self,
        records: &[serde_json::Map<String, Value>],
        file_id: i64,
        file_name: &str,
    ) -> Result<usize> {
        let documents: Vec<Document> = records
            .iter()
            .enumerate()
            .map(|(i, record)| Document {
                id: document_id(file_id, i),
                body: record_to_text(record, file_name),
                metadata: DocMetadata {
                    file_id,
                    file_name: file_name.to_string(),
                    record_index: i,
                },
            })
            .collect();

        let total = documents.len();
        for batch in documents.chunks(BATCH_SIZE) {
            self.context.add_documents(batch.to_vec()).await?;
        }

        tracing::info!(
            "Embedded {} documents for '{}' (file_id={})",
            total,
            file_name,
            file_id
        );
        Ok(total)
    }
}

/// Document ids are a pure function of (file id, record index), which makes
/// re-ingestion an upsert rather than a duplicate.
pub fn document_id(file_id: i64, record_index: usize) -> String {
    format!("file_{file_id}_record_{record_index}")
}

/// Human-readable serialization of one record. Null fields are omitted
/// entirely; remaining fields render as "key: value" joined by ", ".
pub fn record_to_text(record: &serde_json::Map<String, Value>, file_name: &str) -> String {
    let pairs = record
        .iter()
        .filter(|(_, value)| !value.is_null())
        .map(|(key, value)| format!("{key}: {}", render_value(value)))
        .collect::<Vec<_>>()
        .join(", ");
    if file_name.is_empty() {
        pairs
    } else {
        format!("file: {file_name} | {pairs}")
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
