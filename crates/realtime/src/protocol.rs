//! JSON event frames sent by the realtime endpoint.

use callboard_core::transport::TransportEvent;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    CallStarted,
    CallEnded,
    AgentStartTalking,
    AgentStopTalking,
    /// Everything but the `event` tag, forwarded untouched.
    Update(Value),
    Error { message: String },
    Unknown(String),
}

impl ServerEvent {
    /// Parses one text frame. Frames without an `event` tag come back as `Unknown`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let mut value: Value = serde_json::from_str(text)?;
        let tag = value
            .as_object_mut()
            .and_then(|fields| fields.remove("event"))
            .and_then(|tag| tag.as_str().map(str::to_string))
            .unwrap_or_default();

        let event = match tag.as_str() {
            "call_started" => ServerEvent::CallStarted,
            "call_ended" => ServerEvent::CallEnded,
            "agent_start_talking" => ServerEvent::AgentStartTalking,
            "agent_stop_talking" => ServerEvent::AgentStopTalking,
            "update" => ServerEvent::Update(value),
            "error" => ServerEvent::Error {
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown transport error")
                    .to_string(),
            },
            _ => ServerEvent::Unknown(tag),
        };
        Ok(event)
    }

    pub fn into_transport_event(self) -> Option<TransportEvent> {
        match self {
            ServerEvent::CallStarted => Some(TransportEvent::Started),
            ServerEvent::CallEnded => Some(TransportEvent::Ended),
            ServerEvent::AgentStartTalking => Some(TransportEvent::RemoteSpeakingStarted),
            ServerEvent::AgentStopTalking => Some(TransportEvent::RemoteSpeakingStopped),
            ServerEvent::Update(payload) => Some(TransportEvent::StatusUpdate(payload)),
            ServerEvent::Error { message } => Some(TransportEvent::Error(message)),
            ServerEvent::Unknown(tag) => {
                tracing::debug!(%tag, "Ignoring unknown realtime event");
                None
            }
        }
    }
}
