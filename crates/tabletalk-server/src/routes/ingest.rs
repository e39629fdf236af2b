use axum::{extract::State, routing::post, Json, Router};

use tabletalk_schema::{IngestRequest, IngestResponse};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(ingest))
}

/// Embed one upload's records. Embedding failure is reported in the body
/// rather than as a 5xx: the upload itself already succeeded upstream and
/// the caller decides whether to retry.
async fn ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Json<IngestResponse> {
    match state
        .pipeline
        .embed_records(&request.records, request.file_id, &request.file_name)
        .await
    {
        Ok(embedded_count) => Json(IngestResponse {
            ok: true,
            embedded_count,
            message: None,
        }),
        Err(e) => {
            tracing::warn!(
                file_id = request.file_id,
                file_name = %request.file_name,
                "embedding failed: {e:#}"
            );
            Json(IngestResponse {
                ok: false,
                embedded_count: 0,
                message: Some(format!("embedding failed: {e}")),
            })
        }
    }
}
