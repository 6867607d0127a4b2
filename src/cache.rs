//! Result Cache (component D): TTL-bounded cache of full pipeline outputs,
//! keyed by a content-addressed hash of the document.
//!
//! Only fully-successful runs populate the cache (see `pipeline.rs`); a hit
//! reuses the cached chunks and findings verbatim and skips stages A, B, C.

use std::sync::Arc;

use moka::future::Cache as MokaCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::model::{RawFinding, ReviewChunk};

/// The full output of one pipeline execution, as cached under a doc's key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResult {
    pub chunks: Vec<ReviewChunk>,
    pub findings: Vec<RawFinding>,
    pub llm_model: Option<String>,
    pub prompt_rev: String,
    pub token_usage: Value,
}

#[derive(Clone)]
pub struct ResultCache {
    inner: MokaCache<String, Arc<CachedResult>>,
    enabled: bool,
}

impl ResultCache {
    pub fn new(enabled: bool, ttl_seconds: u64) -> Self {
        let inner = MokaCache::builder()
            .time_to_live(std::time::Duration::from_secs(ttl_seconds))
            .build();
        Self { inner, enabled }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<CachedResult>> {
        if !self.enabled {
            return None;
        }
        self.inner.get(key).await
    }

    pub async fn put(&self, key: String, value: CachedResult) {
        if !self.enabled {
            return;
        }
        self.inner.insert(key, Arc::new(value)).await;
    }
}

/// Recursively serialize a `Value` with object keys sorted, matching
/// Python's `json.dumps(..., sort_keys=True, separators=(",", ":"))`. Plain
/// `serde_json::to_string` does not guarantee this for nested objects built
/// from a `HashMap`, so key order is made explicit here.
fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap(), canonicalize(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", parts.join(","))
        }
        other => serde_json::to_string(other).unwrap(),
    }
}

fn document_hash(source_type: &str, text: &str, ingestion_metadata: &Value) -> String {
    let payload = serde_json::json!({
        "source_type": source_type,
        "text": text,
        "ingestion_metadata": ingestion_metadata,
    });
    let canonical = canonicalize(&payload);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `"review:" + doc_hash + ":" + prompt_rev + ":" + chunk_schema_version`
pub fn build_pipeline_cache_key(
    source_type: &str,
    text: &str,
    ingestion_metadata: &Value,
    prompt_rev: &str,
    chunk_schema_version: &str,
) -> String {
    format!(
        "review:{}:{}:{}",
        document_hash(source_type, text, ingestion_metadata),
        prompt_rev,
        chunk_schema_version
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys_regardless_of_insertion_order() {
        let a = json!({ "b": 1, "a": 2 });
        let b = json!({ "a": 2, "b": 1 });
        assert_eq!(canonicalize(&a), canonicalize(&b));
        assert_eq!(canonicalize(&a), r#"{"a":2,"b":1}"#);
    }

    #[test]
    fn cache_key_is_stable_for_same_document() {
        let k1 = build_pipeline_cache_key("text", "hello", &Value::Null, "v1", "v1");
        let k2 = build_pipeline_cache_key("text", "hello", &Value::Null, "v1", "v1");
        assert_eq!(k1, k2);
        assert!(k1.starts_with("review:"));
    }

    #[test]
    fn cache_key_changes_with_text() {
        let k1 = build_pipeline_cache_key("text", "hello", &Value::Null, "v1", "v1");
        let k2 = build_pipeline_cache_key("text", "goodbye", &Value::Null, "v1", "v1");
        assert_ne!(k1, k2);
    }

    #[tokio::test]
    async fn disabled_cache_never_returns_hits() {
        let cache = ResultCache::new(false, 60);
        cache
            .put(
                "k".to_string(),
                CachedResult {
                    chunks: vec![],
                    findings: vec![],
                    llm_model: None,
                    prompt_rev: "v1".to_string(),
                    token_usage: json!({}),
                },
            )
            .await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn enabled_cache_round_trips() {
        let cache = ResultCache::new(true, 60);
        cache
            .put(
                "k".to_string(),
                CachedResult {
                    chunks: vec![],
                    findings: vec![],
                    llm_model: Some("mock".to_string()),
                    prompt_rev: "v1".to_string(),
                    token_usage: json!({}),
                },
            )
            .await;
        let hit = cache.get("k").await.unwrap();
        assert_eq!(hit.llm_model.as_deref(), Some("mock"));
    }
}
