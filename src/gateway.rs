//! Startup and wiring of the gateway components

use std::{
	future::Future,
	net::{SocketAddr, TcpListener},
	path::Path,
	sync::Arc,
	time::Duration,
};

use anyhow::{Context, Result};
use axum::Router;
use tokio_util::sync::CancellationToken;

use crate::{
	metrics::GatewayMetrics,
	queue::intake_queue,
	sentry::{Dsn, EventSink, SentryClient},
	settings::Settings,
	shutdown::{ShutdownCoordinator, ShutdownError},
	telemetry_endpoint,
	template::{AlertTemplate, DEFAULT_TEMPLATE},
	webhook_receiver,
	worker::DispatchWorker,
};

/// A fully configured gateway with its listeners bound
pub struct Gateway {
	template: AlertTemplate,
	sink: Arc<dyn EventSink>,
	metrics: GatewayMetrics,
	listener: TcpListener,
	telemetry_listener: Option<TcpListener>,
	shutdown_grace_period: Duration,
}

impl Gateway {
	/// Validates the settings, compiles the template and binds the listeners.
	/// Any error here is fatal, no traffic has been served yet.
	pub fn new(settings: &Settings) -> Result<Self> {
		let dsn: Dsn = settings
			.dsn
			.as_deref()
			.filter(|dsn| !dsn.trim().is_empty())
			.context("Sentry DSN required")?
			.parse()
			.context("invalid Sentry DSN")?;

		let sink = SentryClient::new(dsn, settings.dispatch_timeout)
			.context("failed to construct sentry client")?;

		let source = load_template(settings.template.as_deref())?;
		let template = AlertTemplate::new(&source).context("failed to compile template")?;

		let metrics = GatewayMetrics::new().context("failed to register metrics")?;

		let listener = bind(settings.webhook_receiver.to_socket_addr())
			.context("failed to bind webhook listener")?;

		let telemetry_listener = settings
			.telemetry_endpoint
			.as_ref()
			.map(|telemetry| bind(telemetry.to_socket_addr()))
			.transpose()
			.context("failed to bind telemetry endpoint")?;

		Ok(Self {
			template,
			sink: Arc::new(sink),
			metrics,
			listener,
			telemetry_listener,
			shutdown_grace_period: settings.shutdown_grace_period,
		})
	}

	/// address the webhook listener is bound to
	pub fn local_addr(&self) -> Result<SocketAddr> {
		Ok(self.listener.local_addr()?)
	}

	/// address the telemetry endpoint is bound to, if enabled
	pub fn telemetry_addr(&self) -> Option<SocketAddr> {
		self.telemetry_listener.as_ref().and_then(|listener| listener.local_addr().ok())
	}

	/// Serves webhooks until `signal` resolves, then shuts down.
	///
	/// * `signal` - usually [termination_signal](crate::shutdown::termination_signal)
	pub async fn run(self, signal: impl Future<Output = ()>) -> Result<(), ShutdownError> {
		let Self { template, sink, metrics, listener, telemetry_listener, shutdown_grace_period } =
			self;

		let (queue, consumer) = intake_queue();
		let coordinator = ShutdownCoordinator::new(shutdown_grace_period);
		let token = coordinator.listener_token();

		let worker = DispatchWorker::new(template, sink, metrics.clone());
		let worker = tokio::spawn(worker.run(consumer));

		let app = webhook_receiver::router(queue.clone(), metrics.clone());
		let listener = tokio::spawn(serve(listener, app, token.clone()));

		if let Some(telemetry_listener) = telemetry_listener {
			let app = telemetry_endpoint::router(metrics);
			tokio::spawn(async move {
				if let Err(err) = serve(telemetry_listener, app, token).await {
					tracing::error!("telemetry endpoint failed: {:#}", err);
				}
			});
		}

		coordinator.run(signal, listener, queue, worker).await
	}
}

/// template file contents, or [DEFAULT_TEMPLATE] if no file is configured
fn load_template(path: Option<&Path>) -> Result<String> {
	match path {
		Some(path) => std::fs::read_to_string(path)
			.context(format!("failed to read template file {}", path.display())),
		None => Ok(DEFAULT_TEMPLATE.to_owned()),
	}
}

fn bind(addr: SocketAddr) -> Result<TcpListener> {
	let listener = TcpListener::bind(addr).context(format!("can't bind {addr}"))?;
	listener.set_nonblocking(true)?;

	Ok(listener)
}

/// serves `app` until `token` is cancelled and all open connections are closed
async fn serve(listener: TcpListener, app: Router, token: CancellationToken) -> Result<()> {
	let addr = listener.local_addr()?;
	tracing::info!("listening on {}", addr);

	axum::Server::from_tcp(listener)?
		.serve(app.into_make_service())
		.with_graceful_shutdown(async move { token.cancelled().await })
		.await
		.context(format!("server on {addr} crashed"))
}
