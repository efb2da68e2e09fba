//! The event record sent to sentry for every alert

use std::{
	collections::{BTreeMap, HashMap},
	fmt,
};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::alert::{Alert, ALERT_NAME_LABEL, NAMESPACE_LABEL, POD_NAME_LABEL};

/// logger name attached to every event
pub const LOGGER: &str = "alertmanager";

/// format of the `firing_since` and `firing_until` extra values
const EXTRA_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// 32 lowercase hex characters identifying a sentry event
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId(String);

impl EventId {
	/// random UUIDv4 without dashes
	pub fn new_v4() -> Self {
		Self(Uuid::new_v4().simple().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<String> for EventId {
	/// ids that aren't UUIDs are kept as sent
	fn from(id: String) -> Self {
		match Uuid::parse_str(&id) {
			Ok(uuid) => Self(uuid.simple().to_string()),
			Err(_) => Self(id),
		}
	}
}

impl fmt::Display for EventId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Serialize for EventId {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.0)
	}
}

/// severity of a sentry event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
	Debug,
	Info,
	Warning,
	Error,
	Fatal,
}

/// Event in the format accepted by sentry's store endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SentryEvent {
	pub event_id: EventId,
	/// point in time the event was captured, not when the alert started firing
	pub timestamp: DateTime<Utc>,
	pub level: Level,
	pub platform: &'static str,
	pub logger: &'static str,
	pub message: String,
	pub server_name: String,
	/// sentry groups events with equal fingerprints into one issue
	pub fingerprint: Vec<String>,
	pub extra: BTreeMap<String, Value>,
	pub tags: BTreeMap<String, String>,
}

impl SentryEvent {
	/// Builds the event for an alert.
	///
	/// # Arguments
	///
	/// * `alert` - the alert the event is reporting
	///
	/// * `message` - the rendered alert
	pub fn from_alert(alert: &Alert, message: String) -> Self {
		let alert_name = alert.label(ALERT_NAME_LABEL);
		let namespace = alert.label(NAMESPACE_LABEL);
		let pod_name = alert.label(POD_NAME_LABEL);

		let mut extra = BTreeMap::new();
		extra.insert(
			"firing_since".to_owned(),
			Value::String(alert.starts_at.format(EXTRA_TIMESTAMP_FORMAT).to_string()),
		);
		extra.insert(
			"firing_until".to_owned(),
			alert
				.firing_until()
				.map_or(Value::Null, |until| Value::String(until.format(EXTRA_TIMESTAMP_FORMAT).to_string())),
		);

		Self {
			event_id: EventId::new_v4(),
			timestamp: Utc::now(),
			level: Level::Error,
			platform: "other",
			logger: LOGGER,
			message,
			server_name: format!("{namespace}/{pod_name}"),
			fingerprint: vec![alert_name.to_owned(), namespace.to_owned(), pod_name.to_owned()],
			extra,
			tags: tags(&alert.labels),
		}
	}
}

/// sentry tag keys are limited to 32 characters, values to 200
fn tags(labels: &HashMap<String, String>) -> BTreeMap<String, String> {
	labels
		.iter()
		.map(|(key, value)| {
			(key.chars().take(32).collect(), value.chars().take(200).collect())
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn alert(labels: &[(&str, &str)]) -> Alert {
		Alert {
			status: "firing".to_owned(),
			labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
			annotations: HashMap::new(),
			starts_at: "2022-05-20T10:00:00Z".parse().unwrap(),
			ends_at: Some("0001-01-01T00:00:00Z".parse().unwrap()),
			generator_url: String::new(),
			fingerprint: String::new(),
		}
	}

	#[test]
	fn event_from_alert() {
		let alert = alert(&[("alertname", "PodDown"), ("namespace", "prod"), ("pod_name", "web-1")]);
		let event = SentryEvent::from_alert(&alert, "PodDown - prod/web-1\npod unresponsive".to_owned());

		assert_eq!(event.message, "PodDown - prod/web-1\npod unresponsive");
		assert_eq!(event.fingerprint, vec!["PodDown", "prod", "web-1"]);
		assert_eq!(event.server_name, "prod/web-1");
		assert_eq!(event.logger, "alertmanager");
		assert_eq!(event.extra["firing_since"], json!("2022-05-20T10:00:00"));
		assert_eq!(event.extra["firing_until"], Value::Null);
		assert_eq!(event.tags["namespace"], "prod");
	}

	#[test]
	fn missing_labels_are_empty() {
		let event = SentryEvent::from_alert(&alert(&[]), "fallback".to_owned());

		assert_eq!(event.fingerprint, vec!["", "", ""]);
		assert_eq!(event.server_name, "/");
		assert!(event.tags.is_empty());
	}

	#[test]
	fn resolved_alert_has_firing_until() {
		let mut alert = alert(&[("alertname", "DiskFull")]);
		alert.ends_at = Some("2022-05-20T10:30:00Z".parse().unwrap());

		let event = SentryEvent::from_alert(&alert, "DiskFull".to_owned());
		assert_eq!(event.extra["firing_until"], json!("2022-05-20T10:30:00"));
	}

	#[test]
	fn event_ids_are_uuid_v4() {
		let id = EventId::new_v4();

		assert_eq!(id.as_str().len(), 32);
		assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
		assert_eq!(&id.as_str()[12..13], "4");
		assert_ne!(id, EventId::new_v4());

		let parsed = EventId::from("FC6D8C0C-43FC-4630-AD85-0E11B2A4F5A9".to_owned());
		assert_eq!(parsed.as_str(), "fc6d8c0c43fc4630ad850e11b2a4f5a9");

		let simple = EventId::from("fc6d8c0c43fc4630ad850e11b2a4f5a9".to_owned());
		assert_eq!(simple, parsed);

		assert_eq!(EventId::from("not-a-uuid".to_owned()).as_str(), "not-a-uuid");
	}

	#[test]
	fn serializes_store_payload() {
		let alert = alert(&[("alertname", "PodDown")]);
		let event = SentryEvent::from_alert(&alert, "PodDown".to_owned());
		let payload = serde_json::to_value(&event).unwrap();

		assert_eq!(payload["event_id"], json!(event.event_id.as_str()));
		assert_eq!(payload["level"], json!("error"));
		assert_eq!(payload["logger"], json!("alertmanager"));
		assert_eq!(payload["fingerprint"], json!(["PodDown", "", ""]));
		assert_eq!(payload["tags"], json!({"alertname": "PodDown"}));
	}
}
