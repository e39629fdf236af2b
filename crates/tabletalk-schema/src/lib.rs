use serde::{Deserialize, Serialize};

/// Chat request body. When `session_id` is absent the server generates one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub session_id: String,
}

/// Ingestion trigger payload: the ordered records of one persisted upload.
///
/// Each record is a field map as parsed from the source file; field values
/// may be null, which ingestion drops during serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub file_id: i64,
    pub file_name: String,
    pub records: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Ingestion outcome. Advisory only: the upload that triggered ingestion
/// succeeds or fails on its own terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub ok: bool,
    pub embedded_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_session_id_optional() {
        let req: ChatRequest = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert_eq!(req.message, "hi");
        assert!(req.session_id.is_none());

        let req: ChatRequest =
            serde_json::from_str(r#"{"message": "hi", "session_id": "s1"}"#).unwrap();
        assert_eq!(req.session_id.as_deref(), Some("s1"));
    }

    #[test]
    fn chat_response_serializes() {
        let resp = ChatResponse {
            answer: "42 rows".into(),
            session_id: "s1".into(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["answer"], "42 rows");
        assert_eq!(json["session_id"], "s1");
    }

    #[test]
    fn ingest_request_parses_records() {
        let raw = r#"{
            "file_id": 7,
            "file_name": "sales.csv",
            "records": [{"region": "north", "total": 120}, {"region": "south", "total": null}]
        }"#;
        let req: IngestRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(req.file_id, 7);
        assert_eq!(req.records.len(), 2);
        assert!(req.records[1]["total"].is_null());
    }

    #[test]
    fn ingest_response_omits_empty_message() {
        let resp = IngestResponse {
            ok: true,
            embedded_count: 3,
            message: None,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("message").is_none());
    }
}
