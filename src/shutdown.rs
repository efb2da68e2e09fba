//! Ordered termination of the webhook listener, the intake queue and the
//! dispatch worker.
//!
//! ```text
//! RUNNING ──signal──▶ DRAINING ──queue drained──▶ STOPPED
//! ```
//!
//! While draining, the listener stops accepting connections and gets a grace
//! period to finish in-flight requests. Afterwards the intake queue is closed
//! and the worker dispatches whatever is left before it exits.

use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::queue::IntakeQueue;

/// lifecycle of the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
	/// listener active, worker consuming
	Running,
	/// listener stopping, queue being drained
	Draining,
	/// everything stopped
	Stopped,
}

/// Error returned by [ShutdownCoordinator::run]
#[derive(Error, Debug)]
pub enum ShutdownError {
	#[error("webhook listener did not stop within {0:?}")]
	GracePeriodExceeded(Duration),
	#[error("webhook listener failed: {0:#}")]
	Listener(anyhow::Error),
	#[error("gateway task failed")]
	Task(#[from] tokio::task::JoinError),
}

/// Drives the shutdown state machine.
#[derive(Debug)]
pub struct ShutdownCoordinator {
	grace_period: Duration,
	listener: CancellationToken,
	state: watch::Sender<ShutdownState>,
}

impl ShutdownCoordinator {
	/// # Arguments
	///
	/// * `grace_period` - time in-flight requests get to finish after the termination signal
	pub fn new(grace_period: Duration) -> Self {
		let (state, _) = watch::channel(ShutdownState::Running);

		Self { grace_period, listener: CancellationToken::new(), state }
	}

	/// token the webhook listener stops accepting connections on
	pub fn listener_token(&self) -> CancellationToken {
		self.listener.clone()
	}

	/// subscribe to state transitions
	pub fn subscribe(&self) -> watch::Receiver<ShutdownState> {
		self.state.subscribe()
	}

	pub fn state(&self) -> ShutdownState {
		*self.state.borrow()
	}

	fn transition(&self, state: ShutdownState) {
		tracing::info!("gateway state {:?} -> {:?}", self.state(), state);
		// there may be no subscribers
		let _ = self.state.send(state);
	}

	/// Waits for `signal`, then shuts the gateway down.
	///
	/// # Arguments
	///
	/// * `signal` - resolves when the gateway should terminate, see [termination_signal]
	///
	/// * `listener` - the webhook listener, stops once [Self::listener_token] is cancelled
	///
	/// * `queue` - the intake queue, closed after the listener stopped
	///
	/// * `worker` - the dispatch worker, exits after the closed queue is drained
	pub async fn run(
		self,
		signal: impl Future<Output = ()>,
		mut listener: JoinHandle<anyhow::Result<()>>,
		queue: IntakeQueue,
		worker: JoinHandle<()>,
	) -> Result<(), ShutdownError> {
		// a listener that stops on its own is an error, but queued alerts still get dispatched
		let stopped_early = tokio::select! {
			_ = signal => None,
			result = &mut listener => Some(result),
		};

		self.transition(ShutdownState::Draining);
		self.listener.cancel();

		let listener_result = match stopped_early {
			Some(result) => listener_outcome(result).and_then(|()| {
				Err(ShutdownError::Listener(anyhow::anyhow!("listener stopped unexpectedly")))
			}),
			None => match tokio::time::timeout(self.grace_period, &mut listener).await {
				Ok(result) => listener_outcome(result),
				Err(_) => {
					listener.abort();
					Err(ShutdownError::GracePeriodExceeded(self.grace_period))
				}
			},
		};

		if let Err(err) = &listener_result {
			tracing::error!("{}", err);
		}

		tracing::info!("closing intake queue with {} pending webhook messages", queue.len());
		queue.close();

		let worker_result = worker.await;

		self.transition(ShutdownState::Stopped);

		listener_result?;
		worker_result?;

		Ok(())
	}
}

fn listener_outcome(
	result: Result<anyhow::Result<()>, tokio::task::JoinError>,
) -> Result<(), ShutdownError> {
	result?.map_err(ShutdownError::Listener)
}

/// resolves on SIGINT or SIGTERM
pub async fn termination_signal() {
	let interrupt = async {
		if let Err(err) = tokio::signal::ctrl_c().await {
			tracing::error!("failed to listen for SIGINT: {}", err);
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		use tokio::signal::unix::{signal, SignalKind};

		match signal(SignalKind::terminate()) {
			Ok(mut terminate) => {
				terminate.recv().await;
			}
			Err(err) => {
				tracing::error!("failed to listen for SIGTERM: {}", err);
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		_ = interrupt => tracing::info!("received SIGINT"),
		_ = terminate => tracing::info!("received SIGTERM"),
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::{
		alert::WebhookMessage,
		metrics::GatewayMetrics,
		queue::intake_queue,
		sentry::EventSink,
		template::AlertTemplate,
		worker::{
			tests::{alert, RecordingSink},
			DispatchWorker,
		},
	};

	fn spawn_worker(sink: &Arc<RecordingSink>) -> (IntakeQueue, JoinHandle<()>) {
		let (queue, consumer) = intake_queue();
		let worker = DispatchWorker::new(
			AlertTemplate::new("{{ labels.alertname }}").unwrap(),
			Arc::clone(sink) as Arc<dyn EventSink>,
			GatewayMetrics::new().unwrap(),
		);

		(queue, tokio::spawn(worker.run(consumer)))
	}

	fn message(names: &[&str]) -> WebhookMessage {
		WebhookMessage {
			alerts: names.iter().map(|name| alert(&[("alertname", *name)], &[])).collect(),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn drains_queue_before_stopping() {
		let sink = Arc::new(RecordingSink { delay: Duration::from_millis(10), ..Default::default() });
		let (queue, worker) = spawn_worker(&sink);
		let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
		let mut states = coordinator.subscribe();

		let token = coordinator.listener_token();
		let listener = tokio::spawn(async move {
			token.cancelled().await;
			Ok::<_, anyhow::Error>(())
		});

		queue.push(message(&["a", "b"])).unwrap();
		queue.push(message(&["c", "d"])).unwrap();

		coordinator.run(async {}, listener, queue.clone(), worker).await.unwrap();

		assert_eq!(sink.messages(), vec!["a", "b", "c", "d"]);
		assert!(queue.is_closed());
		assert!(queue.is_empty());
		assert_eq!(*states.borrow_and_update(), ShutdownState::Stopped);
	}

	#[tokio::test]
	async fn waits_for_signal() {
		let sink = Arc::new(RecordingSink::default());
		let (queue, worker) = spawn_worker(&sink);
		let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
		let mut states = coordinator.subscribe();
		let token = coordinator.listener_token();

		let listener = {
			let token = token.clone();
			tokio::spawn(async move {
				token.cancelled().await;
				Ok::<_, anyhow::Error>(())
			})
		};

		let (tx, rx) = tokio::sync::oneshot::channel::<()>();
		let shutdown = tokio::spawn(coordinator.run(
			async move {
				let _ = rx.await;
			},
			listener,
			queue.clone(),
			worker,
		));

		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(*states.borrow(), ShutdownState::Running);
		assert!(!token.is_cancelled());

		queue.push(message(&["late"])).unwrap();
		tx.send(()).unwrap();

		shutdown.await.unwrap().unwrap();
		assert!(token.is_cancelled());
		assert_eq!(sink.messages(), vec!["late"]);
		assert_eq!(*states.borrow_and_update(), ShutdownState::Stopped);
	}

	#[tokio::test]
	async fn fails_when_grace_period_is_exceeded() {
		let sink = Arc::new(RecordingSink::default());
		let (queue, worker) = spawn_worker(&sink);
		let coordinator = ShutdownCoordinator::new(Duration::from_millis(50));

		// ignores the listener token
		let listener = tokio::spawn(std::future::pending::<anyhow::Result<()>>());

		queue.push(message(&["pending"])).unwrap();

		let result = coordinator.run(async {}, listener, queue.clone(), worker).await;

		assert!(matches!(result, Err(ShutdownError::GracePeriodExceeded(d)) if d == Duration::from_millis(50)));
		assert!(queue.is_closed());
		assert_eq!(sink.messages(), vec!["pending"]);
	}

	#[tokio::test]
	async fn reports_crashed_listener() {
		let sink = Arc::new(RecordingSink::default());
		let (queue, worker) = spawn_worker(&sink);
		let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
		let mut states = coordinator.subscribe();

		queue.push(message(&["queued"])).unwrap();

		let listener = tokio::spawn(async { Err(anyhow::anyhow!("address in use")) });

		let result = coordinator.run(std::future::pending(), listener, queue.clone(), worker).await;

		assert!(matches!(result, Err(ShutdownError::Listener(_))));
		assert_eq!(sink.messages(), vec!["queued"]);
		assert_eq!(*states.borrow_and_update(), ShutdownState::Stopped);
	}
}
