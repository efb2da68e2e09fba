//! prometheus meters for the gateway

use prometheus::{
	exponential_buckets, histogram_opts, opts, Histogram, IntCounter, IntCounterVec, IntGauge,
	Registry,
};

/// namespace of all meters
const NAMESPACE: &str = "sentry_gateway";

#[derive(Debug, Clone)]
/// prometheus meters, registered in their own [Registry]
pub struct GatewayMetrics {
	registry: Registry,
	/// webhook requests by result (`accepted`, `invalid`, `closed`)
	pub(crate) webhook_requests: IntCounterVec,
	/// alerts handed to sentry by outcome (`success`, `failure`)
	pub(crate) alerts_dispatched: IntCounterVec,
	/// alerts rendered with the fallback message
	pub(crate) render_failures: IntCounter,
	/// webhook messages waiting in the intake queue
	pub(crate) queue_depth: IntGauge,
	/// time spent waiting for sentry per alert
	pub(crate) dispatch_duration: Histogram,
}

impl GatewayMetrics {
	/// construct and register prometheus meters
	pub fn new() -> Result<Self, prometheus::Error> {
		let registry = Registry::new();

		let webhook_requests = IntCounterVec::new(
			opts!("webhook_requests_total", "total number of received webhook requests")
				.namespace(NAMESPACE),
			&["result"],
		)?;
		registry.register(Box::new(webhook_requests.clone()))?;

		let alerts_dispatched = IntCounterVec::new(
			opts!("alerts_dispatched_total", "total number of alerts submitted to sentry")
				.namespace(NAMESPACE),
			&["outcome"],
		)?;
		registry.register(Box::new(alerts_dispatched.clone()))?;

		let render_failures = IntCounter::with_opts(
			opts!("alerts_render_failures_total", "alerts that failed to render").namespace(NAMESPACE),
		)?;
		registry.register(Box::new(render_failures.clone()))?;

		let queue_depth = IntGauge::with_opts(
			opts!("intake_queue_depth", "webhook messages waiting to be dispatched")
				.namespace(NAMESPACE),
		)?;
		registry.register(Box::new(queue_depth.clone()))?;

		let dispatch_duration = Histogram::with_opts(
			histogram_opts!(
				"dispatch_duration_seconds",
				"time until sentry accepted or rejected an event",
				exponential_buckets(0.01, 2., 12)?
			)
			.namespace(NAMESPACE),
		)?;
		registry.register(Box::new(dispatch_duration.clone()))?;

		Ok(Self {
			registry,
			webhook_requests,
			alerts_dispatched,
			render_failures,
			queue_depth,
			dispatch_duration,
		})
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	pub(crate) fn record_webhook(&self, result: &str) {
		self.webhook_requests.with_label_values(&[result]).inc();
	}

	pub(crate) fn record_dispatch(&self, success: bool) {
		let outcome = if success { "success" } else { "failure" };
		self.alerts_dispatched.with_label_values(&[outcome]).inc();
	}

	pub(crate) fn set_queue_depth(&self, depth: usize) {
		self.queue_depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
	}
}
