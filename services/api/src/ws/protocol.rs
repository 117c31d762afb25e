//! Defines the WebSocket message protocol between the browser client and the API server.

use callboard_core::controller::SessionView;
use serde::{Deserialize, Serialize};

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Starts a web call with the selected agent.
    #[serde(rename = "start")]
    Start { agent_id: String },
    /// Stops the current call, or cancels it while it is still being set up.
    #[serde(rename = "end")]
    End,
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The full, current projection of the call session.
    Session { view: SessionView },
    /// A request was rejected; the session is unchanged.
    Error { message: String },
    /// Something degraded but the call carries on.
    Warning { message: String },
}
