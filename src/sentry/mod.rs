//! Everything needed to turn alerts into sentry events and deliver them.

mod client;
mod dsn;
mod event;

pub use client::{DispatchError, EventSink, SentryClient};
pub use dsn::{Dsn, DsnError};
pub use event::{EventId, Level, SentryEvent, LOGGER};
