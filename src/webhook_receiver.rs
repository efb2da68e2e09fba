//! HTTP endpoint alertmanager posts its webhooks to.
//!
//! Decoded messages are pushed onto the [intake queue](crate::queue); rendering
//! and dispatching happens in the [DispatchWorker](crate::worker::DispatchWorker).

use std::{
	net::{IpAddr, Ipv4Addr, SocketAddr},
	sync::Arc,
};

use axum::{extract::Extension, http::StatusCode, routing::post, Router};
use bytes::Bytes;
use serde::Deserialize;

use crate::{alert::WebhookMessage, metrics::GatewayMetrics, queue::IntakeQueue};

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct WebhookReceiverSettings {
	pub bind_address: IpAddr,
	pub port: u16,
}

impl WebhookReceiverSettings {
	pub fn to_socket_addr(&self) -> SocketAddr {
		SocketAddr::new(self.bind_address, self.port)
	}
}

impl Default for WebhookReceiverSettings {
	fn default() -> Self {
		Self { bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 9096 }
	}
}

impl From<SocketAddr> for WebhookReceiverSettings {
	fn from(addr: SocketAddr) -> Self {
		Self { bind_address: addr.ip(), port: addr.port() }
	}
}

struct State {
	queue: IntakeQueue,
	metrics: GatewayMetrics,
}

/// Decodes the body and enqueues it. Bodies that can't be decoded are logged
/// and dropped without telling the sender.
async fn alertmanager_webhook(Extension(state): Extension<Arc<State>>, body: Bytes) -> StatusCode {
	let State { queue, metrics } = &*state;

	let message = match serde_json::from_slice::<WebhookMessage>(&body) {
		Ok(message) => message,
		Err(err) => {
			metrics.record_webhook("invalid");
			tracing::error!("invalid webhook: {}", err);
			return StatusCode::OK;
		}
	};

	tracing::debug!(
		receiver = %message.receiver,
		status = %message.status,
		alerts = message.alerts.len(),
		"received webhook"
	);

	match queue.push(message) {
		Ok(()) => {
			metrics.record_webhook("accepted");
			metrics.set_queue_depth(queue.len());
			StatusCode::OK
		}
		Err(err) => {
			metrics.record_webhook("closed");
			tracing::warn!("dropping webhook with {} alerts: {}", err.0.alerts.len(), err);
			StatusCode::SERVICE_UNAVAILABLE
		}
	}
}

/// Router accepting webhooks on every path.
pub fn router(queue: IntakeQueue, metrics: GatewayMetrics) -> Router {
	let state = Arc::new(State { queue, metrics });

	// alertmanager may post to any path
	Router::new()
		.route("/", post(alertmanager_webhook))
		.fallback(post(alertmanager_webhook))
		.layer(Extension(state))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::queue::intake_queue;

	fn state() -> (Arc<State>, crate::queue::IntakeConsumer) {
		let (queue, consumer) = intake_queue();
		(Arc::new(State { queue, metrics: GatewayMetrics::new().unwrap() }), consumer)
	}

	const BODY: &str = r#"{
		"receiver": "sentry",
		"status": "firing",
		"alerts": [
			{"labels": {"alertname": "A"}, "startsAt": "2022-05-20T10:00:00Z"},
			{"labels": {"alertname": "B"}, "startsAt": "2022-05-20T10:00:00Z"}
		]
	}"#;

	#[tokio::test]
	async fn enqueues_decoded_message() {
		let (state, mut consumer) = state();

		let status = alertmanager_webhook(Extension(Arc::clone(&state)), Bytes::from(BODY)).await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(state.queue.len(), 1);

		let message = consumer.recv().await.unwrap();
		let names: Vec<_> = message.alerts.iter().map(|alert| alert.alert_name()).collect();
		assert_eq!(names, vec!["A", "B"]);
	}

	#[tokio::test]
	async fn drops_malformed_body() {
		let (state, _consumer) = state();

		let status =
			alertmanager_webhook(Extension(Arc::clone(&state)), Bytes::from_static(b"{\"alerts\": [")).await;
		assert_eq!(status, StatusCode::OK);
		assert!(state.queue.is_empty());
		assert_eq!(state.metrics.webhook_requests.with_label_values(&["invalid"]).get(), 1);

		// later requests are unaffected
		alertmanager_webhook(Extension(Arc::clone(&state)), Bytes::from(BODY)).await;
		assert_eq!(state.queue.len(), 1);
	}

	#[tokio::test]
	async fn rejects_when_queue_closed() {
		let (state, _consumer) = state();
		state.queue.close();

		let status = alertmanager_webhook(Extension(Arc::clone(&state)), Bytes::from(BODY)).await;
		assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
		assert!(state.queue.is_empty());
	}

	#[tokio::test]
	async fn router_accepts_root_and_sub_paths() {
		let (queue, mut consumer) = intake_queue();
		let app = router(queue, GatewayMetrics::new().unwrap());

		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		let server = tokio::spawn(axum::Server::from_tcp(listener).unwrap().serve(app.into_make_service()));

		let client = reqwest::Client::new();
		for path in ["/", "/alertmanager", "/api/v1/alerts"] {
			let response = client.post(format!("http://{addr}{path}")).body(BODY).send().await.unwrap();
			assert_eq!(response.status(), reqwest::StatusCode::OK, "POST {path}");
		}

		for _ in 0..3 {
			assert_eq!(consumer.recv().await.unwrap().alerts.len(), 2);
		}

		server.abort();
	}

	#[test]
	fn default_listen_address() {
		assert_eq!(
			WebhookReceiverSettings::default().to_socket_addr(),
			"0.0.0.0:9096".parse::<SocketAddr>().unwrap()
		);
	}
}
