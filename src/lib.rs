//! prometheus alertmanager receiver that forwards alerts to sentry
//!
//! Features:
//! - every alert of a webhook becomes its own sentry event
//! - event messages are rendered with a configurable tera template
//! - events are grouped by alert name, namespace and pod
//! - queued alerts are still dispatched on shutdown

pub mod alert;
pub mod gateway;
pub mod log;
pub mod metrics;
pub mod queue;
pub mod sentry;
pub mod settings;
pub mod shutdown;
pub mod telemetry_endpoint;
pub mod template;
pub mod webhook_receiver;
pub mod worker;

pub use gateway::Gateway;
pub use settings::Settings;
