use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use config::{Config, ConfigBuilder, Environment};
use serde::Deserialize;
use serde_with::{serde_as, DurationSecondsWithFrac};

use crate::{
	log::LogSettings, telemetry_endpoint::TelemetryEndpointSettings,
	webhook_receiver::WebhookReceiverSettings,
};

/// prefix of environment variables overriding config values, e.g. `SENTRY_GATEWAY_DSN`
const ENV_PREFIX: &str = "SENTRY_GATEWAY";

/// in-flight requests get this long to finish after a termination signal
pub const DEFAULT_SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);
/// upper bound for a single event submission
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
	/// sentry DSN events are sent to
	pub dsn: Option<String>,
	/// path of a template file replacing the default template
	pub template: Option<PathBuf>,
	pub webhook_receiver: WebhookReceiverSettings,
	#[serde_as(as = "DurationSecondsWithFrac<f64>")]
	pub shutdown_grace_period: Duration,
	#[serde_as(as = "DurationSecondsWithFrac<f64>")]
	pub dispatch_timeout: Duration,
	pub log: LogSettings,
	pub telemetry_endpoint: Option<TelemetryEndpointSettings>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			dsn: None,
			template: None,
			webhook_receiver: WebhookReceiverSettings::default(),
			shutdown_grace_period: DEFAULT_SHUTDOWN_GRACE_PERIOD,
			dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
			log: LogSettings::default(),
			telemetry_endpoint: None,
		}
	}
}

impl Settings {
	/// Loads settings from the command line, the config file and the environment.
	pub fn load() -> Result<Self> {
		Self::from_matches(&command().get_matches())
	}

	/// Builds settings from parsed command line arguments.
	///
	/// Precedence (lowest first): defaults, config file, environment, command line.
	pub fn from_matches(opts: &ArgMatches) -> Result<Self> {
		let mut builder = defaults()?;

		if let Some(config_path) = opts.value_of("config") {
			builder = builder.add_source(config::File::with_name(config_path));
		}

		builder = builder
			.add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__"));

		if let Some(dsn) = opts.value_of("dsn") {
			builder = builder.set_override("dsn", dsn)?;
		}

		if let Some(template) = opts.value_of("template") {
			builder = builder.set_override("template", template)?;
		}

		if let Some(addr) = opts.value_of("addr") {
			let addr: SocketAddr = addr.parse().context(format!("invalid listen address {addr}"))?;
			builder = builder
				.set_override("webhook_receiver.bind_address", addr.ip().to_string())?
				.set_override("webhook_receiver.port", i64::from(addr.port()))?;
		}

		if let Some(level) = opts.value_of("level") {
			builder = builder.set_override("log.level", level)?;
		}

		builder
			.build()
			.context("can't load config")?
			.try_deserialize()
			.context("can't load config")
	}
}

fn defaults() -> Result<ConfigBuilder<config::builder::DefaultState>> {
	let receiver = WebhookReceiverSettings::default();

	Ok(Config::builder()
		.set_default("webhook_receiver.bind_address", receiver.bind_address.to_string())?
		.set_default("webhook_receiver.port", i64::from(receiver.port))?
		.set_default("shutdown_grace_period", DEFAULT_SHUTDOWN_GRACE_PERIOD.as_secs_f64())?
		.set_default("dispatch_timeout", DEFAULT_DISPATCH_TIMEOUT.as_secs_f64())?
		.set_default("log.level", LogSettings::default().level)?)
}

/// command line interface
pub fn command() -> Command<'static> {
	Command::new(clap::crate_name!())
		.version(clap::crate_version!())
		.about(clap::crate_description!())
		.author(clap::crate_authors!())
		.args(&[
			Arg::new("config")
				.help("path of config file")
				.takes_value(true)
				.short('c')
				.long("config"),
			Arg::new("dsn").help("Sentry DSN").takes_value(true).short('d').long("dsn"),
			Arg::new("template")
				.help("Path of the template file of event message")
				.takes_value(true)
				.short('t')
				.long("template"),
			Arg::new("addr")
				.help("Address to listen on for WebHook")
				.takes_value(true)
				.short('a')
				.long("addr"),
			Arg::new("level")
				.help("log level")
				.possible_values(["Error", "Warn", "Info", "Debug", "Trace"])
				.ignore_case(true)
				.takes_value(true)
				.long("log"),
		])
}
