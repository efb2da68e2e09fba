//! Submits events to sentry's store endpoint

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use super::{
	dsn::Dsn,
	event::{EventId, SentryEvent},
};

/// value of `sentry_client` in the auth header
const CLIENT_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Error returned when an event couldn't be delivered
#[derive(Error, Debug)]
pub enum DispatchError {
	#[error("request to sentry failed")]
	Transport(#[from] reqwest::Error),
	#[error("sentry rejected event with status {status}: {body}")]
	Rejected { status: StatusCode, body: String },
}

/// Something events can be sent to
#[async_trait]
pub trait EventSink: Send + Sync {
	/// Submits an event and waits until it was accepted or rejected.
	/// Returns the id the event is stored under.
	async fn capture(&self, event: &SentryEvent) -> Result<EventId, DispatchError>;
}

#[derive(Debug, Deserialize)]
struct StoreResponse {
	id: Option<String>,
}

/// Sentry client bound to a single DSN
#[derive(Debug, Clone)]
pub struct SentryClient {
	client: reqwest::Client,
	dsn: Dsn,
	store_url: String,
}

impl SentryClient {
	/// Constructs a client.
	///
	/// # Arguments
	///
	/// * `dsn` - project the events are sent to
	///
	/// * `timeout` - upper bound for a single submission
	pub fn new(dsn: Dsn, timeout: Duration) -> Result<Self, DispatchError> {
		let client = reqwest::Client::builder().timeout(timeout).user_agent(CLIENT_NAME).build()?;
		let store_url = dsn.store_url();

		Ok(Self { client, dsn, store_url })
	}

	/// value of the `X-Sentry-Auth` header
	fn auth_header(&self) -> String {
		let mut auth = format!(
			"Sentry sentry_version=7, sentry_client={CLIENT_NAME}, sentry_timestamp={}, sentry_key={}",
			Utc::now().timestamp(),
			self.dsn.public_key()
		);

		if let Some(secret) = self.dsn.secret_key() {
			auth.push_str(", sentry_secret=");
			auth.push_str(secret);
		}

		auth
	}
}

#[async_trait]
impl EventSink for SentryClient {
	#[tracing::instrument(skip_all, fields(event_id = %event.event_id))]
	async fn capture(&self, event: &SentryEvent) -> Result<EventId, DispatchError> {
		let response = self
			.client
			.post(self.store_url.as_str())
			.header("X-Sentry-Auth", self.auth_header())
			.json(event)
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(DispatchError::Rejected { status, body });
		}

		// sentry answers with the id it stored the event under, which is the one we sent
		let id = match response.json::<StoreResponse>().await {
			Ok(StoreResponse { id: Some(id) }) => EventId::from(id),
			Ok(StoreResponse { id: None }) | Err(_) => event.event_id.clone(),
		};

		Ok(id)
	}
}
