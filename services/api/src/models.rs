//! API Models
//!
//! Response bodies for the REST endpoints, annotated for `utoipa` so they show
//! up in the OpenAPI document. Domain types from `callboard-core` are
//! converted into these at the HTTP boundary.

use callboard_core::record::{
    AgentSummary, CallAnalysis, CallCost, CallRecord, CallStatus, CallType,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct AgentResponse {
    #[schema(example = "agent_123")]
    pub agent_id: String,
    pub agent_name: Option<String>,
    pub voice_id: Option<String>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl From<AgentSummary> for AgentResponse {
    fn from(agent: AgentSummary) -> Self {
        Self {
            last_modified_at: agent
                .last_modification_timestamp
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            agent_id: agent.agent_id,
            agent_name: agent.agent_name,
            voice_id: agent.voice_id,
        }
    }
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct CallAnalysisResponse {
    pub call_summary: Option<String>,
    #[schema(example = "Positive")]
    pub user_sentiment: Option<String>,
    pub call_successful: Option<bool>,
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct ProductCostResponse {
    pub product: String,
    pub unit_price: Option<f64>,
    pub cost: f64,
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct CallCostResponse {
    pub product_costs: Vec<ProductCostResponse>,
    pub total_duration_seconds: Option<f64>,
    pub combined_cost: f64,
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct CallRecordResponse {
    #[schema(example = "call_1")]
    pub call_id: String,
    #[schema(example = "agent_123")]
    pub agent_id: String,
    #[schema(value_type = String, example = "web_call")]
    pub call_type: CallType,
    #[schema(value_type = String, example = "ongoing")]
    pub call_status: CallStatus,
    pub transcript: Option<String>,
    pub recording_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub disconnection_reason: Option<String>,
    pub call_analysis: Option<CallAnalysisResponse>,
    pub call_cost: Option<CallCostResponse>,
}

impl From<CallAnalysis> for CallAnalysisResponse {
    fn from(analysis: CallAnalysis) -> Self {
        Self {
            call_summary: analysis.call_summary,
            user_sentiment: analysis.user_sentiment,
            call_successful: analysis.call_successful,
        }
    }
}

impl From<CallCost> for CallCostResponse {
    fn from(cost: CallCost) -> Self {
        Self {
            product_costs: cost
                .product_costs
                .into_iter()
                .map(|line| ProductCostResponse {
                    product: line.product,
                    unit_price: line.unit_price,
                    cost: line.cost,
                })
                .collect(),
            total_duration_seconds: cost.total_duration_seconds,
            combined_cost: cost.combined_cost,
        }
    }
}

impl From<CallRecord> for CallRecordResponse {
    fn from(record: CallRecord) -> Self {
        Self {
            started_at: record.started_at(),
            ended_at: record.ended_at(),
            call_id: record.call_id,
            agent_id: record.agent_id,
            call_type: record.call_type,
            call_status: record.call_status,
            transcript: record.transcript,
            recording_url: record.recording_url,
            duration_ms: record.duration_ms,
            disconnection_reason: record.disconnection_reason,
            call_analysis: record.call_analysis.map(Into::into),
            call_cost: record.call_cost.map(Into::into),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use callboard_core::record::ProductCost;
    use serde_json::json;

    #[test]
    fn test_agent_response_timestamp() {
        let agent = AgentSummary {
            agent_id: "agent_123".into(),
            agent_name: Some("Front desk".into()),
            voice_id: None,
            last_modification_timestamp: Some(1_700_000_000_000),
        };

        let response = AgentResponse::from(agent);
        assert_eq!(
            response.last_modified_at,
            Utc.timestamp_millis_opt(1_700_000_000_000).single()
        );
        assert_eq!(response.agent_name.as_deref(), Some("Front desk"));
    }

    #[test]
    fn test_call_record_response_serialization() {
        let record = CallRecord {
            call_id: "call_1".into(),
            agent_id: "agent_123".into(),
            call_type: CallType::WebCall,
            call_status: CallStatus::Ended,
            transcript: Some("Agent: Hi".into()),
            recording_url: None,
            start_timestamp: Some(1_000),
            end_timestamp: Some(61_000),
            duration_ms: Some(60_000),
            disconnection_reason: Some("user_hangup".into()),
            call_analysis: Some(CallAnalysis {
                call_summary: Some("Booked a table".into()),
                user_sentiment: Some("Positive".into()),
                call_successful: Some(true),
            }),
            call_cost: Some(CallCost {
                product_costs: vec![ProductCost {
                    product: "voice".into(),
                    unit_price: Some(0.1),
                    cost: 6.0,
                }],
                total_duration_seconds: Some(60.0),
                combined_cost: 6.0,
            }),
        };

        let value = serde_json::to_value(CallRecordResponse::from(record)).unwrap();
        assert_eq!(value["call_type"], json!("web_call"));
        assert_eq!(value["call_status"], json!("ended"));
        assert_eq!(value["started_at"], json!("1970-01-01T00:00:01Z"));
        assert_eq!(value["call_analysis"]["user_sentiment"], json!("Positive"));
        assert_eq!(value["call_cost"]["combined_cost"], json!(6.0));
        assert_eq!(value["call_cost"]["product_costs"][0]["product"], json!("voice"));
    }

    #[test]
    fn test_error_response_serialization() {
        let body = serde_json::to_string(&ErrorResponse {
            message: "nope".into(),
        })
        .unwrap();
        assert_eq!(body, r#"{"message":"nope"}"#);
    }
}
