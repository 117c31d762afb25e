//! Manages the WebSocket connection lifecycle for one call screen.

use super::protocol::{ClientMessage, ServerMessage};
use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use callboard_core::controller::{ControllerUpdate, SessionController};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Owns the screen's [`SessionController`] for as long as the socket is open.
/// Client commands and controller signals are served from one `select!`
/// loop, so the controller is only ever touched from this task. When the
/// socket closes for any reason the controller is shut down, which ends a
/// live call and cancels its record watch.
#[instrument(name = "ws_session", skip_all, fields(screen_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let screen_id = Uuid::new_v4();
    tracing::Span::current().record("screen_id", tracing::field::display(screen_id));
    info!("New WebSocket connection.");

    let (mut socket_tx, mut socket_rx) = socket.split();
    let mut controller = state.session_controller();

    let initial = ServerMessage::Session {
        view: controller.view(),
    };
    if send_msg(&mut socket_tx, initial).await.is_ok() {
        loop {
            let outgoing = tokio::select! {
                msg = socket_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_text(&mut controller, &text).await
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Client closed the connection.");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error.");
                        break;
                    }
                    Some(Ok(_)) => None,
                },
                signal = controller.next_signal() => {
                    match controller.handle_signal(signal).await {
                        Some(ControllerUpdate::View(view)) => Some(ServerMessage::Session { view }),
                        Some(ControllerUpdate::Warning(message)) => {
                            Some(ServerMessage::Warning { message })
                        }
                        None => None,
                    }
                }
            };

            if let Some(msg) = outgoing {
                if send_msg(&mut socket_tx, msg).await.is_err() {
                    error!("Failed to send message to client.");
                    break;
                }
            }
        }
    }

    controller.shutdown().await;
    info!("Call screen closed.");
}

async fn handle_client_text(
    controller: &mut SessionController,
    text: &str,
) -> Option<ServerMessage> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed client message");
            return Some(ServerMessage::Error {
                message: format!("Invalid message: {}", e),
            });
        }
    };

    match msg {
        ClientMessage::Start { agent_id } => match controller.start(&agent_id) {
            Ok(view) => Some(ServerMessage::Session { view }),
            Err(e) => Some(ServerMessage::Error {
                message: e.reason(),
            }),
        },
        ClientMessage::End => controller
            .end()
            .await
            .map(|view| ServerMessage::Session { view }),
    }
}

/// Serializes `msg` and writes it to the socket.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> anyhow::Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
