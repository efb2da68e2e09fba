//! data structures for deserializing incoming alertmanager webhooks
use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DefaultOnNull};

/// label holding the name of the alert
pub const ALERT_NAME_LABEL: &str = "alertname";
/// label holding the kubernetes namespace of the alerting workload
pub const NAMESPACE_LABEL: &str = "namespace";
/// label holding the pod of the alerting workload
pub const POD_NAME_LABEL: &str = "pod_name";

#[serde_as]
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
/// data from prometheus received by the alertmanager webhook receiver
#[allow(clippy::missing_docs_in_private_items)]
pub struct WebhookMessage {
	pub version: String,
	pub group_key: String,
	pub truncated_alerts: u64,

	pub receiver: String,
	pub status: String,
	#[serde_as(as = "DefaultOnNull")]
	pub alerts: Vec<Alert>,
	#[serde_as(as = "DefaultOnNull")]
	pub group_labels: HashMap<String, String>,
	#[serde_as(as = "DefaultOnNull")]
	pub common_labels: HashMap<String, String>,
	#[serde_as(as = "DefaultOnNull")]
	pub common_annotations: HashMap<String, String>,
	#[serde(rename = "externalURL")]
	pub external_url: String,
}

#[serde_as]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::missing_docs_in_private_items)]
pub struct Alert {
	#[serde(default)]
	pub status: String,
	#[serde_as(as = "DefaultOnNull")]
	#[serde(default)]
	pub labels: HashMap<String, String>,
	#[serde_as(as = "DefaultOnNull")]
	#[serde(default)]
	pub annotations: HashMap<String, String>,
	/// the zero time (`0001-01-01T00:00:00Z`) if alertmanager didn't send one
	#[serde(default = "zero_time")]
	pub starts_at: DateTime<Utc>,
	#[serde(default)]
	pub ends_at: Option<DateTime<Utc>>,
	#[serde(rename = "generatorURL", default)]
	pub generator_url: String,
	#[serde(default)]
	pub fingerprint: String,
}

/// alertmanager's representation of an unset timestamp
fn zero_time() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}

impl Alert {
	/// value of a label, `""` if the label is missing
	pub fn label(&self, name: &str) -> &str {
		self.labels.get(name).map_or("", String::as_str)
	}

	/// value of the `alertname` label, `""` if missing
	pub fn alert_name(&self) -> &str {
		self.label(ALERT_NAME_LABEL)
	}

	/// end of the firing period. alertmanager sends the zero time
	/// (`0001-01-01T00:00:00Z`) for alerts that are still firing, which is
	/// reported as `None` as well.
	pub fn firing_until(&self) -> Option<DateTime<Utc>> {
		self.ends_at.filter(|ends_at| ends_at.timestamp() > 0)
	}
}
