//! Here we expose prometheus metrics about the gateway
use std::net::{IpAddr, SocketAddr};

use axum::{
	body::Body,
	extract::Extension,
	http::{header::CONTENT_TYPE, Response, StatusCode},
	routing::get,
	Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;

use crate::metrics::GatewayMetrics;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TelemetryEndpointSettings {
	pub bind_address: IpAddr,
	pub port: u16,
}

impl TelemetryEndpointSettings {
	pub fn to_socket_addr(&self) -> SocketAddr {
		SocketAddr::new(self.bind_address, self.port)
	}
}

async fn metrics_handler(Extension(metrics): Extension<GatewayMetrics>) -> Response<Body> {
	let mut buffer = vec![];
	let encoder = TextEncoder::new();
	let metric_families = metrics.registry().gather();

	let response = match encoder.encode(&metric_families, &mut buffer) {
		Ok(()) => Response::builder()
			.status(StatusCode::OK)
			.header(CONTENT_TYPE, encoder.format_type())
			.body(Body::from(buffer)),
		Err(err) => {
			tracing::error!("failed to encode metrics: {}", err);
			Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).body(Body::empty())
		}
	};

	response.unwrap_or_else(|_| Response::new(Body::empty()))
}

pub fn router(metrics: GatewayMetrics) -> Router {
	Router::new().route("/metrics", get(metrics_handler)).layer(Extension(metrics))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn serves_text_format() {
		let metrics = GatewayMetrics::new().unwrap();
		metrics.record_webhook("accepted");

		let response = metrics_handler(Extension(metrics.clone())).await;
		assert_eq!(response.status(), StatusCode::OK);
		assert_eq!(response.headers()[CONTENT_TYPE], TextEncoder::new().format_type());

		let mut buffer = vec![];
		TextEncoder::new().encode(&metrics.registry().gather(), &mut buffer).unwrap();
		let text = String::from_utf8(buffer).unwrap();
		assert!(text.contains("sentry_gateway_webhook_requests_total{result=\"accepted\"} 1"));
		assert!(text.contains("sentry_gateway_intake_queue_depth 0"));
	}
}
