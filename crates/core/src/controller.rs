//! Session Controller
//!
//! The façade one screen binds to. It owns the [`CallSession`], the transport
//! connection, and the record watch for the current call attempt, and it
//! guarantees that all three are released on every exit path.
//!
//! The controller is driven from a single task. Asynchronous work (the
//! registration request, the transport handshake, the connect deadline) runs
//! in helper tasks that report back through [`Signal`]s tagged with the
//! session identity; the owner loop pulls them with
//! [`SessionController::next_signal`] and applies them with
//! [`SessionController::handle_signal`].

use crate::{
    calling_api::{CallingApi, WebCallRegistration},
    error::CallError,
    machine::{CallSession, InvalidTransition, SessionEvent, SessionState},
    poller::{CallRecordPoller, PollEvent, PollHandle},
    record::CallRecord,
    transport::{CallTransport, TransportEvent, TransportFactory},
};
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

const CANCELLED: &str = "cancelled";
const CONNECTION_TIMEOUT: &str = "connection timeout";

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Deadline for the transport to report `started` after registration.
    pub connect_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Read-only projection of the current session for display.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SessionView {
    pub session_id: Option<Uuid>,
    pub agent_id: Option<String>,
    pub state: SessionState,
    pub last_error: Option<String>,
    pub call_id: Option<String>,
    pub record: Option<CallRecord>,
    pub agent_speaking: bool,
    pub status_update: Option<serde_json::Value>,
}

/// What the owner should render after handling a signal.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerUpdate {
    View(SessionView),
    /// Non-fatal; the session carries on.
    Warning(String),
}

/// An asynchronous result delivered to the owner loop.
#[derive(Debug)]
pub struct Signal {
    session: Uuid,
    kind: SignalKind,
}

#[derive(Debug)]
enum SignalKind {
    Registered(Result<WebCallRegistration, CallError>),
    ConnectFailed(CallError),
    ConnectTimedOut,
    Transport(TransportEvent),
    /// The subscription ended; emitted once after the last transport event.
    TransportClosed,
    Poll(PollEvent),
}

pub struct SessionController {
    api: Arc<dyn CallingApi>,
    transports: Arc<dyn TransportFactory>,
    poller: CallRecordPoller,
    settings: SessionSettings,
    session: Option<CallSession>,
    transport: Option<Arc<dyn CallTransport>>,
    poll: Option<PollHandle>,
    record: Option<CallRecord>,
    agent_speaking: bool,
    status_update: Option<serde_json::Value>,
    tasks: Vec<JoinHandle<()>>,
    signals_tx: mpsc::UnboundedSender<Signal>,
    signals_rx: mpsc::UnboundedReceiver<Signal>,
}

impl SessionController {
    pub fn new(
        api: Arc<dyn CallingApi>,
        transports: Arc<dyn TransportFactory>,
        poller: CallRecordPoller,
        settings: SessionSettings,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        Self {
            api,
            transports,
            poller,
            settings,
            session: None,
            transport: None,
            poll: None,
            record: None,
            agent_speaking: false,
            status_update: None,
            tasks: Vec::new(),
            signals_tx,
            signals_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session
            .as_ref()
            .map_or(SessionState::Idle, CallSession::state)
    }

    pub fn view(&self) -> SessionView {
        let session = self.session.as_ref();
        SessionView {
            session_id: session.map(CallSession::id),
            agent_id: session.map(|s| s.agent_id().to_string()),
            state: self.state(),
            last_error: session.and_then(|s| s.last_error().map(str::to_string)),
            call_id: session.and_then(|s| s.call_id().map(str::to_string)),
            record: self.record.clone(),
            agent_speaking: self.agent_speaking,
            status_update: self.status_update.clone(),
        }
    }

    /// Starts a new call attempt for `agent_id`.
    ///
    /// Returns immediately; registration proceeds in the background and
    /// reports back through [`Self::next_signal`].
    pub fn start(&mut self, agent_id: &str) -> Result<SessionView, CallError> {
        let agent_id = agent_id.trim();
        if agent_id.is_empty() {
            return Err(CallError::Validation("agent id is required".to_string()));
        }
        if !self.state().accepts_new_session() {
            return Err(CallError::SessionInProgress);
        }

        // The previous session is terminal; drop whatever it still watches.
        self.abort_tasks();
        self.cancel_poll();
        self.record = None;
        self.agent_speaking = false;
        self.status_update = None;

        let mut session = CallSession::new(agent_id);
        session.apply(SessionEvent::Start).map_err(internal)?;
        let session_id = session.id();
        info!(%session_id, %agent_id, "Starting call session");

        let api = self.api.clone();
        let tx = self.signals_tx.clone();
        let agent = agent_id.to_string();
        self.tasks.push(tokio::spawn(async move {
            let result = api.register_web_call(&agent).await;
            let _ = tx.send(Signal {
                session: session_id,
                kind: SignalKind::Registered(result),
            });
        }));

        self.session = Some(session);
        Ok(self.view())
    }

    /// Stops the current attempt. Safe to call in any state.
    ///
    /// Returns the new view, or `None` when there was nothing to stop.
    pub async fn end(&mut self) -> Option<SessionView> {
        match self.state() {
            SessionState::Requesting | SessionState::Connecting => {
                self.fail(SessionEvent::UserEnd, CANCELLED).await;
                Some(self.view())
            }
            SessionState::Active => {
                self.apply(SessionEvent::UserEnd, None)?;
                self.abort_tasks();
                self.release_transport().await;
                self.agent_speaking = false;
                self.apply(SessionEvent::TeardownAcknowledged, None)?;
                Some(self.view())
            }
            SessionState::Idle
            | SessionState::Ending
            | SessionState::Ended
            | SessionState::Failed => None,
        }
    }

    /// Tears everything down, as when the owning screen goes away.
    ///
    /// Ends a non-terminal session exactly once and always cancels the
    /// record watch.
    pub async fn shutdown(&mut self) {
        if !self.state().is_terminal() {
            self.end().await;
        }
        self.abort_tasks();
        self.cancel_poll();
        self.release_transport().await;
    }

    /// Waits for the next asynchronous result. Cancel-safe, so it can sit in
    /// a `tokio::select!` next to other event sources.
    pub async fn next_signal(&mut self) -> Signal {
        let session = self.session.as_ref().map_or_else(Uuid::nil, CallSession::id);
        tokio::select! {
            Some(signal) = self.signals_rx.recv() => signal,
            Some(event) = next_poll_event(&mut self.poll) => Signal {
                session,
                kind: SignalKind::Poll(event),
            },
        }
    }

    /// Applies a signal from [`Self::next_signal`].
    pub async fn handle_signal(&mut self, signal: Signal) -> Option<ControllerUpdate> {
        // Poll events outlive the call; everything else belongs to one live session.
        let live = self
            .session
            .as_ref()
            .is_some_and(|s| s.id() == signal.session && !s.state().is_terminal());
        if !live && !matches!(signal.kind, SignalKind::Poll(_)) {
            debug!(
                session_id = %signal.session,
                kind = ?signal.kind,
                "Dropping signal for a stale session"
            );
            return None;
        }

        match signal.kind {
            SignalKind::Registered(Ok(registration)) => self.on_registered(registration).await,
            SignalKind::Registered(Err(error)) => {
                warn!(%error, "Web call registration failed");
                self.fail(SessionEvent::RegistrationFailed, error.reason())
                    .await;
            }
            SignalKind::ConnectFailed(error) => {
                self.fail(SessionEvent::TransportFailed, error.reason()).await;
            }
            SignalKind::ConnectTimedOut => {
                if self.state() != SessionState::Connecting {
                    return None;
                }
                warn!("Transport did not start before the deadline");
                self.fail(SessionEvent::ConnectTimedOut, CONNECTION_TIMEOUT)
                    .await;
            }
            SignalKind::Transport(event) => return self.on_transport_event(event).await,
            SignalKind::TransportClosed => {
                if self.state() == SessionState::Connecting {
                    self.fail(
                        SessionEvent::TransportFailed,
                        "transport closed before the call started",
                    )
                    .await;
                } else {
                    return self.on_transport_event(TransportEvent::Ended).await;
                }
            }
            SignalKind::Poll(event) => return self.on_poll_event(event),
        }
        Some(ControllerUpdate::View(self.view()))
    }

    async fn on_registered(&mut self, registration: WebCallRegistration) {
        if !registration.is_complete() {
            warn!("Registration payload is missing the call id or access token");
            self.fail(
                SessionEvent::RegistrationFailed,
                "malformed registration payload",
            )
            .await;
            return;
        }

        let WebCallRegistration {
            call_id,
            access_token,
        } = registration;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Err(e) = session.registered(call_id.clone(), access_token.clone()) {
            warn!(error = %e, "Ignoring registration");
            return;
        }
        let session_id = session.id();
        info!(%session_id, %call_id, "Web call registered; connecting transport");

        self.poll = Some(self.poller.watch(call_id));

        let transport = self.transports.create();
        self.transport = Some(transport.clone());
        self.tasks.push(spawn_connect(
            transport,
            access_token,
            session_id,
            self.signals_tx.clone(),
        ));

        let tx = self.signals_tx.clone();
        let deadline = self.settings.connect_timeout;
        self.tasks.push(tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = tx.send(Signal {
                session: session_id,
                kind: SignalKind::ConnectTimedOut,
            });
        }));
    }

    async fn on_transport_event(&mut self, event: TransportEvent) -> Option<ControllerUpdate> {
        match event {
            TransportEvent::Started => {
                self.apply(SessionEvent::TransportStarted, None)?;
                info!("Call is active");
            }
            TransportEvent::Ended => match self.state() {
                SessionState::Active => {
                    self.apply(SessionEvent::TransportEnded, None)?;
                    info!("Call ended by the remote side");
                    self.after_call_finished().await;
                }
                SessionState::Connecting => {
                    self.fail(
                        SessionEvent::TransportEnded,
                        "call ended before it was established",
                    )
                    .await;
                }
                _ => return None,
            },
            TransportEvent::Error(reason) => match self.state() {
                SessionState::Active => {
                    warn!(%reason, "Fatal transport error; stopping call");
                    self.apply(SessionEvent::TransportFailed, Some(reason))?;
                    self.after_call_finished().await;
                    self.apply(SessionEvent::TeardownAcknowledged, None)?;
                }
                SessionState::Connecting => {
                    warn!(%reason, "Transport failed to connect");
                    self.fail(SessionEvent::TransportFailed, reason).await;
                }
                _ => return None,
            },
            TransportEvent::RemoteSpeakingStarted => self.agent_speaking = true,
            TransportEvent::RemoteSpeakingStopped => self.agent_speaking = false,
            TransportEvent::StatusUpdate(payload) => self.status_update = Some(payload),
        }
        Some(ControllerUpdate::View(self.view()))
    }

    fn on_poll_event(&mut self, event: PollEvent) -> Option<ControllerUpdate> {
        match event {
            PollEvent::Updated(record) => {
                let accepted = self
                    .record
                    .as_ref()
                    .is_none_or(|current| current.can_be_replaced_by(&record));
                if !accepted {
                    return None;
                }
                self.record = Some(record);
                Some(ControllerUpdate::View(self.view()))
            }
            PollEvent::FetchFailed { consecutive, error } => {
                debug!(consecutive, %error, "Call record refresh failed");
                None
            }
            PollEvent::Degraded { consecutive, error } => Some(ControllerUpdate::Warning(format!(
                "Call details have failed to refresh {} times in a row ({}); still retrying",
                consecutive,
                error.reason()
            ))),
            PollEvent::Finished(status) => {
                debug!(?status, "Record watch finished");
                self.poll = None;
                None
            }
        }
    }

    /// Releases the transport once the call itself is over. The record watch
    /// keeps running so the final transcript and analysis still arrive.
    async fn after_call_finished(&mut self) {
        self.abort_tasks();
        self.release_transport().await;
        self.agent_speaking = false;
    }

    /// Moves the session to `Failed` and releases everything it holds.
    async fn fail(&mut self, event: SessionEvent, reason: impl Into<String>) {
        let reason = reason.into();
        if self.apply(event, Some(reason.clone())).is_none() {
            return;
        }
        info!(%reason, "Call session failed");
        self.abort_tasks();
        self.release_transport().await;
        self.cancel_poll();
        self.agent_speaking = false;
    }

    fn apply(&mut self, event: SessionEvent, reason: Option<String>) -> Option<SessionState> {
        let session = self.session.as_mut()?;
        let result = match reason {
            Some(reason) => session.apply_with_error(event, reason),
            None => session.apply(event),
        };
        match result {
            Ok(state) => {
                debug!(session_id = %session.id(), %state, ?event, "Session transition");
                Some(state)
            }
            Err(e) => {
                warn!(error = %e, "Rejected session transition");
                None
            }
        }
    }

    /// Disconnects the held transport. Taking it out of the slot makes a
    /// second disconnect impossible.
    async fn release_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.disconnect().await;
        }
    }

    fn cancel_poll(&mut self) {
        if let Some(poll) = self.poll.take() {
            poll.cancel();
        }
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.abort_tasks();
        self.cancel_poll();
        if let Some(transport) = self.transport.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    warn!("Session controller dropped with a live transport; disconnecting");
                    handle.spawn(async move { transport.disconnect().await });
                }
                Err(_) => warn!("No runtime to release the transport on; it will close on drop"),
            }
        }
    }
}

fn spawn_connect(
    transport: Arc<dyn CallTransport>,
    access_token: SecretString,
    session: Uuid,
    tx: mpsc::UnboundedSender<Signal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut events = match transport.connect(&access_token).await {
            Ok(events) => events,
            Err(error) => {
                let _ = tx.send(Signal {
                    session,
                    kind: SignalKind::ConnectFailed(error),
                });
                return;
            }
        };
        // Forward in emission order; the owner applies them one at a time.
        while let Some(event) = events.recv().await {
            if tx
                .send(Signal {
                    session,
                    kind: SignalKind::Transport(event),
                })
                .is_err()
            {
                return;
            }
        }
        let _ = tx.send(Signal {
            session,
            kind: SignalKind::TransportClosed,
        });
    })
}

async fn next_poll_event(poll: &mut Option<PollHandle>) -> Option<PollEvent> {
    match poll {
        Some(handle) => handle.next_event().await,
        None => std::future::pending().await,
    }
}

fn internal(e: InvalidTransition) -> CallError {
    CallError::Service(format!("internal session error: {}", e))
}
