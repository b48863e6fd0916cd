//! Client sessions
//!
//! Socket listener, wire protocol, and the per-connection handler that
//! bridges pipeline events to response frames.

mod handler;
mod listener;
mod protocol;

pub use handler::{EVENT_CHANNEL_CAPACITY, SessionHandler};
pub use listener::{cleanup_socket, create_listener_at};
pub use protocol::{ClientRequest, FrameRole, ResponseFrame};
