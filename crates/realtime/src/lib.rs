//! Realtime web-call transport.
//!
//! Connects to the vendor's realtime endpoint over a WebSocket and turns its
//! JSON event frames into [`TransportEvent`]s for the session controller.

mod protocol;

pub use protocol::ServerEvent;

use async_trait::async_trait;
use callboard_core::{
    CallError,
    transport::{CallTransport, TransportEvent, TransportFactory, TransportSubscription},
};
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio::{
    net::TcpStream,
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{debug, info, warn};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_BUFFER: usize = 64;

/// Creates a [`WebCallTransport`] per session, all pointed at the same endpoint.
#[derive(Clone)]
pub struct WebCallTransportFactory {
    url: String,
}

impl WebCallTransportFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl TransportFactory for WebCallTransportFactory {
    fn create(&self) -> Arc<dyn CallTransport> {
        Arc::new(WebCallTransport::new(self.url.clone()))
    }
}

enum Link {
    Idle,
    Open {
        reader: JoinHandle<()>,
        close_tx: mpsc::Sender<()>,
    },
    Closed,
}

/// One realtime connection for one call.
pub struct WebCallTransport {
    url: String,
    link: Mutex<Link>,
}

impl WebCallTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            link: Mutex::new(Link::Idle),
        }
    }
}

#[async_trait]
impl CallTransport for WebCallTransport {
    async fn connect(
        &self,
        access_token: &SecretString,
    ) -> Result<TransportSubscription, CallError> {
        if matches!(*self.link.lock().await, Link::Closed) {
            return Err(CallError::Transport("transport already disconnected".into()));
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| CallError::Transport(format!("invalid realtime url: {}", e)))?;
        let bearer = format!("Bearer {}", access_token.expose_secret())
            .parse()
            .map_err(|_| CallError::Transport("access token is not a valid header value".into()))?;
        request.headers_mut().insert("Authorization", bearer);

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| CallError::Transport(format!("failed to connect: {}", e)))?;
        info!("Connected to realtime call endpoint.");

        let mut link = self.link.lock().await;
        if matches!(*link, Link::Closed) {
            // disconnect() won the race against the handshake.
            debug!("Transport released during handshake; closing new connection");
            let mut socket = socket;
            let _ = socket.close(None).await;
            return Err(CallError::Transport("transport already disconnected".into()));
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (close_tx, close_rx) = mpsc::channel(1);
        let reader = tokio::spawn(run_socket(socket, events_tx, close_rx));
        *link = Link::Open { reader, close_tx };
        Ok(events_rx)
    }

    async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *self.link.lock().await, Link::Closed);
        match previous {
            Link::Open {
                mut reader,
                close_tx,
            } => {
                // The socket task sends the close frame; abort it if it is wedged.
                let _ = close_tx.send(()).await;
                if tokio::time::timeout(CLOSE_GRACE, &mut reader).await.is_err() {
                    debug!("Realtime socket did not close in time; aborting");
                    reader.abort();
                }
                info!("Realtime transport disconnected.");
            }
            Link::Idle => debug!("Transport disconnected before connecting"),
            Link::Closed => {}
        }
    }
}

const CLOSE_GRACE: std::time::Duration = std::time::Duration::from_secs(2);

/// Pumps server frames into `events` until the socket closes or a close is requested.
async fn run_socket(
    socket: Socket,
    events: mpsc::Sender<TransportEvent>,
    mut close_rx: mpsc::Receiver<()>,
) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            biased;
            _ = close_rx.recv() => {
                let _ = sink.send(WsMessage::Close(None)).await;
                let _ = sink.close().await;
                return;
            }
            frame = stream.next() => {
                let event = match frame {
                    Some(Ok(WsMessage::Text(text))) => match ServerEvent::parse(&text) {
                        Ok(server_event) => match server_event.into_transport_event() {
                            Some(event) => event,
                            None => continue,
                        },
                        Err(e) => {
                            warn!(error = %e, "Ignoring unparseable realtime frame");
                            continue;
                        }
                    },
                    Some(Ok(WsMessage::Ping(payload))) => {
                        let _ = sink.send(WsMessage::Pong(payload)).await;
                        continue;
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        debug!(?frame, "Realtime endpoint closed the connection");
                        TransportEvent::Ended
                    }
                    None => TransportEvent::Ended,
                    Some(Err(e)) => TransportEvent::Error(e.to_string()),
                    Some(Ok(_)) => continue,
                };
                // Ended and Error are final; the socket is done after either.
                let last = matches!(event, TransportEvent::Ended | TransportEvent::Error(_));
                if events.send(event).await.is_err() || last {
                    if !last {
                        // Nobody is listening any more.
                        let _ = sink.close().await;
                    }
                    return;
                }
            }
        }
    }
}
