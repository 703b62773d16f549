//! WebSocket delivery of job lifecycle events.

pub mod handler;

pub use handler::events_handler;
