//! Call Record Model
//!
//! The authoritative, server-maintained history entry for a call, the agent
//! summaries used to populate a selector, and the shared [`RecordCache`]
//! that enforces the monotonic `call_status` rule for every reader.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallType {
    WebCall,
    PhoneCall,
}

/// Server-side status of a call. Only ever moves forward along
/// `registered -> ongoing -> (ended | error)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Registered,
    Ongoing,
    Ended,
    Error,
}

impl CallStatus {
    /// Position along the status sequence. `Ended` and `Error` share the last rank.
    pub fn rank(self) -> u8 {
        match self {
            CallStatus::Registered => 0,
            CallStatus::Ongoing => 1,
            CallStatus::Ended | CallStatus::Error => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Ended | CallStatus::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallAnalysis {
    #[serde(default)]
    pub call_summary: Option<String>,
    #[serde(default)]
    pub user_sentiment: Option<String>,
    #[serde(default)]
    pub call_successful: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductCost {
    pub product: String,
    #[serde(default)]
    pub unit_price: Option<f64>,
    pub cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallCost {
    #[serde(default)]
    pub product_costs: Vec<ProductCost>,
    #[serde(default)]
    pub total_duration_seconds: Option<f64>,
    pub combined_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallRecord {
    pub call_id: String,
    pub agent_id: String,
    pub call_type: CallType,
    pub call_status: CallStatus,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub recording_url: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub start_timestamp: Option<i64>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub end_timestamp: Option<i64>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub disconnection_reason: Option<String>,
    #[serde(default)]
    pub call_analysis: Option<CallAnalysis>,
    #[serde(default)]
    pub call_cost: Option<CallCost>,
}

impl CallRecord {
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.start_timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.end_timestamp
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
    }

    /// Whether `incoming` may replace `self` without moving `call_status` backwards.
    ///
    /// Responses with a lower status rank are stale. Once terminal, the status
    /// is pinned: a later response may fill in fields but never swap
    /// `ended` for `error` or the reverse.
    pub fn can_be_replaced_by(&self, incoming: &CallRecord) -> bool {
        if incoming.call_status.rank() < self.call_status.rank() {
            return false;
        }
        !(self.call_status.is_terminal() && incoming.call_status != self.call_status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSummary {
    pub agent_id: String,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub last_modification_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Inserted,
    Updated,
    /// The incoming record would have moved `call_status` backwards and was dropped.
    Stale,
}

/// Read-shared cache of call records keyed by `call_id`.
///
/// Writes go exclusively through [`RecordCache::merge`], so no reader can
/// ever observe a backward status transition.
#[derive(Clone, Default)]
pub struct RecordCache {
    records: Arc<RwLock<HashMap<String, CallRecord>>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, call_id: &str) -> Option<CallRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(call_id)
            .cloned()
    }

    pub fn merge(&self, record: CallRecord) -> MergeOutcome {
        self.merge_if(record, || true)
            .unwrap_or(MergeOutcome::Stale)
    }

    /// Merges `record` only if `proceed` still holds once the write lock is held.
    ///
    /// Returns `None` when `proceed` declined, leaving the cache untouched.
    pub fn merge_if(
        &self,
        record: CallRecord,
        proceed: impl FnOnce() -> bool,
    ) -> Option<MergeOutcome> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if !proceed() {
            return None;
        }
        let outcome = match records.get(&record.call_id) {
            None => MergeOutcome::Inserted,
            Some(current) if current.can_be_replaced_by(&record) => MergeOutcome::Updated,
            Some(_) => MergeOutcome::Stale,
        };
        if outcome != MergeOutcome::Stale {
            records.insert(record.call_id.clone(), record);
        }
        Some(outcome)
    }
}

#[cfg(test)]
pub(crate) fn sample_record(call_id: &str, status: CallStatus) -> CallRecord {
    CallRecord {
        call_id: call_id.to_string(),
        agent_id: "agent_123".to_string(),
        call_type: CallType::WebCall,
        call_status: status,
        transcript: None,
        recording_url: None,
        start_timestamp: None,
        end_timestamp: None,
        duration_ms: None,
        disconnection_reason: None,
        call_analysis: None,
        call_cost: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_record_deserialization() {
        let json = r#"{
            "call_id": "call_1",
            "agent_id": "agent_123",
            "call_type": "web_call",
            "call_status": "ended",
            "transcript": "Agent: Hello!\nUser: Hi.",
            "start_timestamp": 1703302407333,
            "end_timestamp": 1703302428855,
            "disconnection_reason": "user_hangup",
            "call_analysis": {
                "call_summary": "Short greeting.",
                "user_sentiment": "Positive",
                "call_successful": true
            },
            "call_cost": {
                "product_costs": [{"product": "elevenlabs_tts", "unit_price": 1.0, "cost": 60.0}],
                "total_duration_seconds": 21.5,
                "combined_cost": 70.0
            }
        }"#;

        let record: CallRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.call_type, CallType::WebCall);
        assert_eq!(record.call_status, CallStatus::Ended);
        assert_eq!(record.recording_url, None);
        assert_eq!(
            record.call_analysis.as_ref().unwrap().user_sentiment.as_deref(),
            Some("Positive")
        );
        assert_eq!(record.call_cost.as_ref().unwrap().combined_cost, 70.0);
        assert_eq!(
            record.started_at().unwrap().timestamp_millis(),
            1703302407333
        );
        assert!(record.ended_at().unwrap() > record.started_at().unwrap());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let json =
            r#"{"call_id":"c","agent_id":"a","call_type":"web_call","call_status":"paused"}"#;
        assert!(serde_json::from_str::<CallRecord>(json).is_err());
    }

    #[test]
    fn test_status_rank_and_terminal() {
        assert!(CallStatus::Registered.rank() < CallStatus::Ongoing.rank());
        assert_eq!(CallStatus::Ended.rank(), CallStatus::Error.rank());
        assert!(CallStatus::Error.is_terminal());
        assert!(!CallStatus::Ongoing.is_terminal());
    }

    #[test]
    fn test_replacement_rules() {
        let registered = sample_record("c", CallStatus::Registered);
        let ongoing = sample_record("c", CallStatus::Ongoing);
        let ended = sample_record("c", CallStatus::Ended);
        let error = sample_record("c", CallStatus::Error);

        assert!(registered.can_be_replaced_by(&ongoing));
        assert!(ongoing.can_be_replaced_by(&ongoing));
        assert!(ongoing.can_be_replaced_by(&error));
        assert!(!ongoing.can_be_replaced_by(&registered));
        assert!(!ended.can_be_replaced_by(&ongoing));
        assert!(!ended.can_be_replaced_by(&error));
        assert!(ended.can_be_replaced_by(&ended));
    }

    #[test]
    fn test_cache_never_moves_status_backwards() {
        let cache = RecordCache::new();
        let arrivals = [
            CallStatus::Ongoing,
            CallStatus::Registered,
            CallStatus::Ongoing,
            CallStatus::Ended,
            CallStatus::Ongoing,
            CallStatus::Error,
        ];

        let mut observed = Vec::new();
        for status in arrivals {
            cache.merge(sample_record("call_1", status));
            observed.push(cache.get("call_1").unwrap().call_status.rank());
        }

        assert!(observed.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(cache.get("call_1").unwrap().call_status, CallStatus::Ended);
    }

    #[test]
    fn test_cache_merge_outcomes() {
        let cache = RecordCache::new();
        assert_eq!(
            cache.merge(sample_record("c", CallStatus::Ongoing)),
            MergeOutcome::Inserted
        );
        let mut with_transcript = sample_record("c", CallStatus::Ongoing);
        with_transcript.transcript = Some("Agent: Hi".into());
        assert_eq!(cache.merge(with_transcript), MergeOutcome::Updated);
        assert_eq!(
            cache.merge(sample_record("c", CallStatus::Registered)),
            MergeOutcome::Stale
        );
        assert_eq!(
            cache.get("c").unwrap().transcript.as_deref(),
            Some("Agent: Hi")
        );
    }

    #[test]
    fn test_merge_if_declined_leaves_cache_untouched() {
        let cache = RecordCache::new();
        assert_eq!(cache.merge_if(sample_record("c", CallStatus::Ongoing), || false), None);
        assert!(cache.get("c").is_none());
    }
}
