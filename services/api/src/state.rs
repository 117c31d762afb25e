//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the calling API client and the record cache.

use crate::config::Config;
use callboard_core::{
    calling_api::CallingApi,
    controller::{SessionController, SessionSettings},
    poller::CallRecordPoller,
    record::RecordCache,
    transport::TransportFactory,
};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub calling_api: Arc<dyn CallingApi>,
    pub transports: Arc<dyn TransportFactory>,
    /// The only state shared between sessions. Written through the monotonic merge.
    pub records: RecordCache,
    pub config: Arc<Config>,
}

impl AppState {
    /// A fresh controller for one screen. Each socket gets its own.
    pub fn session_controller(&self) -> SessionController {
        let poller = CallRecordPoller::new(
            self.calling_api.clone(),
            self.records.clone(),
            self.config.poll_interval,
        );
        SessionController::new(
            self.calling_api.clone(),
            self.transports.clone(),
            poller,
            SessionSettings {
                connect_timeout: self.config.connect_timeout,
            },
        )
    }
}
