//! Renders alerts via tera templates.
//!
//! The template is compiled once at startup. Every alert is rendered with its
//! labels, annotations and timestamps as context. Labels and annotations the
//! template refers to but an alert doesn't carry render as empty strings. This
//! holds for `labels.key`, `labels["key"]`, the same through a
//! `{% set l = labels %}` alias, and `labels | get(key=..)`. The `get` filter
//! is the way to look up keys computed at render time.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tera::{Tera, Value};
use thiserror::Error;

use crate::alert::Alert;

/// template used if no template file is configured
pub const DEFAULT_TEMPLATE: &str =
	"{{ labels.alertname }} - {{ labels.namespace }}/{{ labels.pod_name }}\n{{ annotations.message }}";

/// name the template is registered under inside [Tera]
const TEMPLATE_NAME: &str = "alert";

/// matches `var.key` and `var["key"]`
#[allow(clippy::expect_used)]
static KEY_REFERENCE: Lazy<Regex> = Lazy::new(|| {
	Regex::new(
		r#"\b([A-Za-z_][A-Za-z0-9_]*)\s*(?:\.\s*([A-Za-z_][A-Za-z0-9_]*)|\[\s*["']([^"']*)["']\s*\])"#,
	)
	.expect("key reference regex is valid")
});

/// matches `{% set alias = labels %}` and the same for `annotations`
#[allow(clippy::expect_used)]
static ALIAS: Lazy<Regex> = Lazy::new(|| {
	Regex::new(
		r#"\{%-?\s*set(?:_global)?\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(labels|annotations)\s*-?%\}"#,
	)
	.expect("alias regex is valid")
});

/// Error occuring when compiling a template or rendering an alert
#[derive(Error, Debug)]
pub enum TemplateError {
	/// the template source has a syntax error
	#[error("failed to compile template")]
	Compile(#[source] tera::Error),
	/// the template couldn't be rendered against an alert
	#[error("failed to render alert")]
	Render(#[source] tera::Error),
}

/// Compiled alert template
#[derive(Debug)]
pub struct AlertTemplate {
	tera: Tera,
	/// label keys referenced by the template
	labels: BTreeSet<String>,
	/// annotation keys referenced by the template
	annotations: BTreeSet<String>,
}

impl AlertTemplate {
	/// Compiles a template.
	///
	/// # Arguments
	///
	/// * `source` - tera template source, e.g. [DEFAULT_TEMPLATE] or the contents of a template file
	pub fn new(source: &str) -> Result<Self, TemplateError> {
		let mut tera = Tera::default();
		tera.register_filter("get", get_or_empty);
		tera.add_raw_template(TEMPLATE_NAME, source).map_err(TemplateError::Compile)?;

		// variable name -> whether it refers to the labels (or the annotations)
		let mut maps = BTreeMap::from([("labels", true), ("annotations", false)]);
		for alias in ALIAS.captures_iter(source) {
			let is_labels = &alias[2] == "labels";
			if let Some(name) = alias.get(1) {
				maps.insert(name.as_str(), is_labels);
			}
		}

		let mut labels = BTreeSet::new();
		let mut annotations = BTreeSet::new();

		for reference in KEY_REFERENCE.captures_iter(source) {
			let is_labels = match reference.get(1).and_then(|name| maps.get(name.as_str())) {
				Some(is_labels) => *is_labels,
				None => continue,
			};
			let key = match reference.get(2).or_else(|| reference.get(3)) {
				Some(key) => key.as_str().to_owned(),
				None => continue,
			};

			if is_labels {
				labels.insert(key);
			} else {
				annotations.insert(key);
			}
		}

		tracing::debug!(?labels, ?annotations, "compiled alert template");

		Ok(Self { tera, labels, annotations })
	}

	/// Compiles [DEFAULT_TEMPLATE].
	pub fn default_template() -> Result<Self, TemplateError> {
		Self::new(DEFAULT_TEMPLATE)
	}

	/// Renders a single alert.
	pub fn render(&self, alert: &Alert) -> Result<String, TemplateError> {
		let view = AlertView {
			status: alert.status.as_str(),
			labels: with_missing_keys(&alert.labels, &self.labels),
			annotations: with_missing_keys(&alert.annotations, &self.annotations),
			starts_at: alert.starts_at,
			ends_at: alert.firing_until(),
			generator_url: alert.generator_url.as_str(),
			fingerprint: alert.fingerprint.as_str(),
		};

		let context = tera::Context::from_serialize(&view).map_err(TemplateError::Render)?;

		self.tera.render(TEMPLATE_NAME, &context).map_err(TemplateError::Render)
	}
}

/// the context an alert is rendered with
#[derive(Serialize)]
struct AlertView<'a> {
	status: &'a str,
	labels: HashMap<&'a str, &'a str>,
	annotations: HashMap<&'a str, &'a str>,
	starts_at: DateTime<Utc>,
	ends_at: Option<DateTime<Utc>>,
	generator_url: &'a str,
	fingerprint: &'a str,
}

/// Replaces tera's `get` filter: a missing key yields the `default` argument
/// or `""` instead of an error.
fn get_or_empty(value: &Value, args: &HashMap<String, Value>) -> tera::Result<Value> {
	let key = match args.get("key") {
		Some(Value::String(key)) => key,
		_ => return Err(tera::Error::msg("filter `get` expects a string argument `key`")),
	};

	match value {
		Value::Object(map) => Ok(map
			.get(key)
			.or_else(|| args.get("default"))
			.cloned()
			.unwrap_or_else(|| Value::String(String::new()))),
		_ => Err(tera::Error::msg("filter `get` can only be applied to an object")),
	}
}

/// borrows `values` and adds an empty value for each referenced key not in `values`
fn with_missing_keys<'a>(
	values: &'a HashMap<String, String>,
	referenced: &'a BTreeSet<String>,
) -> HashMap<&'a str, &'a str> {
	let mut view: HashMap<&str, &str> =
		values.iter().map(|(key, value)| (key.as_str(), value.as_str())).collect();

	for key in referenced {
		view.entry(key.as_str()).or_insert("");
	}

	view
}
