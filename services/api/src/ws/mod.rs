//! WebSocket Call Screen
//!
//! One browser socket is one dashboard screen, bound to one
//! [`SessionController`](callboard_core::controller::SessionController):
//!
//! - `protocol`: Defines the JSON-based message format for client-server communication.
//! - `session`: Drives the controller from the socket and tears it down when the socket goes away.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
