//! Result comparison for dual and shadow traffic.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::routing::router::ExecutionResult;

/// How the two providers' results differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonResult {
    /// One provider succeeded and the other failed.
    pub divergent: bool,
    pub status_match: bool,
    /// Normalized payloads are deeply equal (both absent counts as equal).
    pub data_match: bool,
    pub legacy_success: bool,
    pub replacement_success: bool,
    /// Replacement latency minus legacy latency.
    pub latency_delta_ms: i64,
}

/// Compare the legacy result against the replacement result.
pub fn compare(
    legacy: &ExecutionResult,
    replacement: &ExecutionResult,
    ignore_fields: &[String],
) -> ComparisonResult {
    let normalized = |r: &ExecutionResult| r.data().map(|data| normalize(data, ignore_fields));

    ComparisonResult {
        divergent: legacy.success() != replacement.success(),
        status_match: legacy.status_code() == replacement.status_code(),
        data_match: normalized(legacy) == normalized(replacement),
        legacy_success: legacy.success(),
        replacement_success: replacement.success(),
        latency_delta_ms: replacement.duration.as_millis() as i64 - legacy.duration.as_millis() as i64,
    }
}

/// Drop null-valued keys and ignored field names from every object, at any depth.
pub fn normalize(value: &Value, ignore_fields: &[String]) -> Value {
    match value {
        Value::Object(obj) => {
            let cleaned: Map<String, Value> = obj
                .iter()
                .filter(|(k, v)| !v.is_null() && !ignore_fields.iter().any(|f| f == *k))
                .map(|(k, v)| (k.clone(), normalize(v, ignore_fields)))
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| normalize(v, ignore_fields)).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForwardError;
    use crate::provider::{Provider, ProviderResponse};
    use crate::resilience::ClassifiedError;
    use serde_json::json;
    use std::time::{Duration, SystemTime};

    fn ok(provider: Provider, data: Value, ms: u64) -> ExecutionResult {
        ExecutionResult {
            provider,
            outcome: Ok(ProviderResponse::new(200, data)),
            timestamp: SystemTime::UNIX_EPOCH,
            duration: Duration::from_millis(ms),
            attempts: 1,
            retryable: false,
            fallback: false,
        }
    }

    fn failed(provider: Provider, status: u16) -> ExecutionResult {
        ExecutionResult {
            provider,
            outcome: Err(ForwardError::from(
                ClassifiedError::transient("boom").with_status(status),
            )),
            timestamp: SystemTime::UNIX_EPOCH,
            duration: Duration::from_millis(5),
            attempts: 3,
            retryable: true,
            fallback: false,
        }
    }

    #[test]
    fn test_normalize_drops_nulls_and_ignored_fields() {
        let value = json!({
            "id": 1,
            "requestId": "abc",
            "note": null,
            "items": [{"sku": "x", "extra": null, "requestId": "def"}]
        });
        let normalized = normalize(&value, &["requestId".to_string()]);
        assert_eq!(normalized, json!({"id": 1, "items": [{"sku": "x"}]}));
    }

    #[test]
    fn test_equal_after_normalization() {
        let legacy = ok(Provider::Legacy, json!({"status": "approved", "ref": "L-1", "memo": null}), 120);
        let replacement = ok(Provider::Replacement, json!({"status": "approved", "ref": "N-9"}), 80);

        let result = compare(&legacy, &replacement, &["ref".to_string()]);
        assert!(!result.divergent);
        assert!(result.status_match);
        assert!(result.data_match);
        assert_eq!(result.latency_delta_ms, -40);
    }

    #[test]
    fn test_data_mismatch_is_not_divergence() {
        let legacy = ok(Provider::Legacy, json!({"status": "approved"}), 10);
        let replacement = ok(Provider::Replacement, json!({"status": "pending"}), 10);

        let result = compare(&legacy, &replacement, &[]);
        assert!(!result.divergent);
        assert!(!result.data_match);
    }

    #[test]
    fn test_success_mismatch_is_divergence() {
        let legacy = ok(Provider::Legacy, json!({}), 10);
        let replacement = failed(Provider::Replacement, 503);

        let result = compare(&legacy, &replacement, &[]);
        assert!(result.divergent);
        assert!(!result.status_match);
        assert!(!result.data_match);
        assert!(result.legacy_success);
        assert!(!result.replacement_success);
    }

    #[test]
    fn test_both_failed_match() {
        let result = compare(&failed(Provider::Legacy, 502), &failed(Provider::Replacement, 502), &[]);
        assert!(!result.divergent);
        assert!(result.status_match);
        assert!(result.data_match);
    }
}
