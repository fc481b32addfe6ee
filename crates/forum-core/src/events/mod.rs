//! Events carried by the queue between request handlers and the drain

mod pending_event;

pub use pending_event::{EventClass, PendingEvent};
