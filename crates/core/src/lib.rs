//! Callboard Core
//!
//! The live call session lifecycle: the call record model, the error
//! taxonomy shared by every layer, the session state machine, the call record
//! poller, and the [`controller::SessionController`] façade a screen binds to.
//! The vendor backend is reached through the [`calling_api::CallingApi`] and
//! [`transport::CallTransport`] seams so every component can be driven by
//! fakes in tests.

pub mod calling_api;
pub mod controller;
pub mod error;
pub mod machine;
pub mod poller;
pub mod record;
pub mod transport;

pub use error::CallError;
