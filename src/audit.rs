//! Run-scoped audit recorder.
//!
//! Every prompt/response exchange of a run lands here, including failed
//! ones (recorded with an `ERROR: ...` response), so the audit trail is
//! complete regardless of success. The recorder is a cheap cloneable
//! handle; writes from parallel challengers are serialized by the mutex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// One prompt/response exchange captured for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub timestamp: DateTime<Utc>,
    /// Workflow stage, e.g. `generator`, `challenger_b`, `verifier`.
    pub stage: String,
    /// Role of the agent at that stage.
    pub role: String,
    /// `provider/model` label, with fallback/error markers.
    pub model_label: String,
    /// Revision cycle the exchange belongs to.
    pub revision: u32,
    pub prompt: String,
    pub response: String,
    /// Stage-specific metadata (intended/actual providers, counts, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Append-only conversation log for one run.
#[derive(Clone, Default)]
pub struct AuditRecorder {
    records: Arc<Mutex<Vec<ConversationRecord>>>,
}

impl AuditRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one record with the current timestamp.
    pub fn record(
        &self,
        stage: &str,
        role: &str,
        model_label: &str,
        prompt: &str,
        response: &str,
        revision: u32,
        extra: BTreeMap<String, Value>,
    ) {
        let record = ConversationRecord {
            timestamp: Utc::now(),
            stage: stage.to_string(),
            role: role.to_string(),
            model_label: model_label.to_string(),
            revision,
            prompt: prompt.to_string(),
            response: response.to_string(),
            extra,
        };
        self.lock().push(record);
    }

    /// Record a failed exchange; the response carries the error message.
    pub fn record_error(
        &self,
        stage: &str,
        role: &str,
        model_label: &str,
        prompt: &str,
        message: &str,
        revision: u32,
    ) {
        let mut extra = BTreeMap::new();
        extra.insert("error".to_string(), Value::String(message.to_string()));
        self.record(
            stage,
            role,
            model_label,
            prompt,
            &format!("ERROR: {message}"),
            revision,
            extra,
        );
    }

    /// Copy of the records captured so far.
    pub fn snapshot(&self) -> Vec<ConversationRecord> {
        self.lock().clone()
    }

    /// Number of records captured so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ConversationRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn records_are_appended_in_order() {
        let audit = AuditRecorder::new();
        audit.record("generator", "generator", "openai/gpt-4o", "p1", "r1", 0, BTreeMap::new());
        audit.record("aggregator", "aggregator", "anthropic/claude", "p2", "r2", 0, BTreeMap::new());

        let records = audit.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].stage, "generator");
        assert_eq!(records[1].stage, "aggregator");
        assert!(records[0].timestamp <= records[1].timestamp);
    }

    #[test]
    fn error_records_carry_the_message() {
        let audit = AuditRecorder::new();
        audit.record_error("challenger_a", "challenger", "openai/gpt-4o", "p", "boom", 1);

        let records = audit.snapshot();
        assert_eq!(records[0].response, "ERROR: boom");
        assert_eq!(records[0].revision, 1);
        assert_eq!(
            records[0].extra.get("error"),
            Some(&Value::String("boom".to_string()))
        );
    }

    #[tokio::test]
    async fn concurrent_writers_are_serialized() {
        let audit = AuditRecorder::new();
        let mut handles = Vec::new();
        for i in 0..8 {
            let audit = audit.clone();
            handles.push(tokio::spawn(async move {
                audit.record(
                    &format!("stage_{i}"),
                    "challenger",
                    "m",
                    "p",
                    "r",
                    0,
                    BTreeMap::new(),
                );
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(audit.len(), 8);
    }
}
