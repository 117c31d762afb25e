//! The realtime transport seam.
//!
//! Implementations wrap the vendor's realtime call client and translate its
//! callbacks into an ordered stream of [`TransportEvent`]s.

use crate::error::CallError;
use async_trait::async_trait;
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The call is established.
    Started,
    /// The remote side terminated the call normally.
    Ended,
    Error(String),
    /// Advisory only; never drives a state transition.
    RemoteSpeakingStarted,
    /// Advisory only; never drives a state transition.
    RemoteSpeakingStopped,
    /// Opaque payload forwarded for display.
    StatusUpdate(serde_json::Value),
}

/// Events in emission order. The stream ends when the transport is released.
pub type TransportSubscription = mpsc::Receiver<TransportEvent>;

#[async_trait]
pub trait CallTransport: Send + Sync {
    async fn connect(
        &self,
        access_token: &SecretString,
    ) -> Result<TransportSubscription, CallError>;

    /// Releases every resource held by the transport.
    ///
    /// Idempotent and safe from any state, including while `connect` is
    /// still pending; a connection that completes afterwards is closed
    /// immediately.
    async fn disconnect(&self);
}

/// Mints one transport per session.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Arc<dyn CallTransport>;
}
