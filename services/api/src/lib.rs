//! Callboard API Library Crate
//!
//! This library contains the web service around the call session lifecycle:
//! configuration, credential resolution, application state, REST handlers,
//! the call-screen WebSocket, and routing. The `api` binary is a thin wrapper
//! around this library.

pub mod config;
pub mod credential;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
