//! Renders alerts and dispatches them to sentry.
//!
//! Webhook messages are received from the [webhook receiver](crate::webhook_receiver)
//! through the [intake queue](crate::queue). Every alert of a message is
//! rendered and submitted on its own, strictly one after the other.

use std::sync::Arc;

use crate::{
	alert::{Alert, WebhookMessage},
	metrics::GatewayMetrics,
	queue::IntakeConsumer,
	sentry::{EventId, EventSink, SentryEvent},
	template::AlertTemplate,
};

/// message used if an alert can't be rendered and has no `alertname` label
pub const FALLBACK_MESSAGE: &str = "fallback";

/// Dispatch worker
pub struct DispatchWorker {
	template: AlertTemplate,
	sink: Arc<dyn EventSink>,
	metrics: GatewayMetrics,
}

impl DispatchWorker {
	pub fn new(template: AlertTemplate, sink: Arc<dyn EventSink>, metrics: GatewayMetrics) -> Self {
		Self { template, sink, metrics }
	}

	/// main loop of [DispatchWorker]
	///
	/// returns once the queue is closed and every message in it was dispatched
	///
	/// * `queue` - the channel where we receive decoded webhook messages
	pub async fn run(self, mut queue: IntakeConsumer) {
		while let Some(message) = queue.recv().await {
			self.metrics.set_queue_depth(queue.len());
			self.dispatch_message(message).await;
		}

		tracing::info!("intake queue closed, dispatch worker stopped");
	}

	/// Dispatches all alerts of a message in their original order.
	pub async fn dispatch_message(&self, message: WebhookMessage) {
		tracing::debug!(
			receiver = %message.receiver,
			alerts = message.alerts.len(),
			"dispatching webhook message"
		);

		for alert in message.alerts.iter() {
			self.dispatch_alert(alert).await;
		}
	}

	/// Renders an alert, submits it and waits for sentry's answer.
	/// Returns the event id if sentry accepted the event.
	pub async fn dispatch_alert(&self, alert: &Alert) -> Option<EventId> {
		let event = SentryEvent::from_alert(alert, self.render(alert));

		let timer = self.metrics.dispatch_duration.start_timer();
		let result = self.sink.capture(&event).await;
		timer.observe_duration();

		self.metrics.record_dispatch(result.is_ok());

		match result {
			Ok(event_id) => {
				tracing::info!("event_id:{} alert_name:{}", event_id, alert.alert_name());
				Some(event_id)
			}
			Err(err) => {
				tracing::warn!(
					"event_id:{} alert_name:{} dispatch failed: {:#}",
					event.event_id,
					alert.alert_name(),
					anyhow::Error::new(err)
				);
				None
			}
		}
	}

	/// Renders an alert. If rendering fails the message falls back to the
	/// alert's name or [FALLBACK_MESSAGE].
	pub fn render(&self, alert: &Alert) -> String {
		match self.template.render(alert) {
			Ok(message) => message,
			Err(err) => {
				self.metrics.render_failures.inc();
				tracing::error!("invalid template: {:#}", anyhow::Error::new(err));

				match alert.alert_name() {
					"" => FALLBACK_MESSAGE.to_owned(),
					alert_name => alert_name.to_owned(),
				}
			}
		}
	}
}
