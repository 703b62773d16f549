//! Job lifecycle event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: the lifecycle notification envelope.
//! - [`JobEventStream`]: a subscription, optionally scoped to one workspace.

pub mod bus;

pub use bus::{EventBus, JobEvent, JobEventKind, JobEventStream};
