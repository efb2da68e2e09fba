//! Unbounded FIFO between the webhook receiver and the dispatch worker.
//!
//! [IntakeQueue] handles are cloned into every request handler, the single
//! [IntakeConsumer] is owned by the [DispatchWorker](crate::worker::DispatchWorker).
//! Once the queue is closed new messages are rejected while the consumer still
//! receives everything that was enqueued before.

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc,
};

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::alert::WebhookMessage;

/// the queue was closed, the message wasn't enqueued
#[derive(Error, Debug)]
#[error("intake queue is closed")]
pub struct QueueClosed(pub WebhookMessage);

/// Producer side of the intake queue
#[derive(Debug, Clone)]
pub struct IntakeQueue {
	tx: mpsc::UnboundedSender<WebhookMessage>,
	depth: Arc<AtomicUsize>,
	closed: CancellationToken,
}

/// Consumer side of the intake queue
#[derive(Debug)]
pub struct IntakeConsumer {
	rx: mpsc::UnboundedReceiver<WebhookMessage>,
	depth: Arc<AtomicUsize>,
	closed: CancellationToken,
}

/// Creates a new intake queue.
pub fn intake_queue() -> (IntakeQueue, IntakeConsumer) {
	let (tx, rx) = mpsc::unbounded_channel();
	let depth = Arc::new(AtomicUsize::new(0));
	let closed = CancellationToken::new();

	(
		IntakeQueue { tx, depth: Arc::clone(&depth), closed: closed.clone() },
		IntakeConsumer { rx, depth, closed },
	)
}

impl IntakeQueue {
	/// Enqueues a message. Never blocks.
	pub fn push(&self, message: WebhookMessage) -> Result<(), QueueClosed> {
		if self.closed.is_cancelled() {
			return Err(QueueClosed(message));
		}

		self.depth.fetch_add(1, Ordering::SeqCst);

		self.tx.send(message).map_err(|mpsc::error::SendError(message)| {
			self.depth.fetch_sub(1, Ordering::SeqCst);
			QueueClosed(message)
		})
	}

	/// number of messages enqueued but not yet taken by the consumer
	pub fn len(&self) -> usize {
		self.depth.load(Ordering::SeqCst)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Rejects all further pushes. The consumer drains the remaining messages
	/// and then sees the end of the queue.
	pub fn close(&self) {
		self.closed.cancel();
	}

	pub fn is_closed(&self) -> bool {
		self.closed.is_cancelled()
	}
}

impl IntakeConsumer {
	/// Waits for the next message. Returns `None` once the queue is closed and
	/// empty.
	pub async fn recv(&mut self) -> Option<WebhookMessage> {
		let received = tokio::select! {
			biased;

			message = self.rx.recv() => Some(message),
			_ = self.closed.cancelled() => None,
		};

		let message = match received {
			Some(message) => message,
			None => {
				// sends racing the close fail instead of landing in a drained channel
				self.rx.close();
				self.rx.recv().await
			}
		}?;

		self.depth.fetch_sub(1, Ordering::SeqCst);

		Some(message)
	}

	/// number of messages waiting to be received
	pub fn len(&self) -> usize {
		self.depth.load(Ordering::SeqCst)
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
