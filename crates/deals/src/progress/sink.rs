// Copyright 2025 itscheems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};
use pacer_sdk::DeliveryProgressReportBatch;
use tracing::warn;

/// Receiver of finished reporting windows
///
/// Called from the thread that rotates the window, so implementations
/// must not block for long.
pub trait DeliveryStatsSink: Send + Sync {
	fn accept(&self, batch: DeliveryProgressReportBatch);
}

/// Bounded hand-off of report batches to a reporting consumer
///
/// Properties:
/// - Any number of producers (window rotation, shutdown)
/// - Single consumer (report uploader)
/// - Bounded capacity; a full buffer drops the batch with a warning
///   rather than stalling window rotation
pub struct ReportBuffer {
	sender: Sender<DeliveryProgressReportBatch>,
	receiver: Receiver<DeliveryProgressReportBatch>,
}

impl ReportBuffer {
	/// A capacity of 0 is treated as 1
	pub fn new(capacity: usize) -> Self {
		let (sender, receiver) = bounded(capacity.max(1));
		Self { sender, receiver }
	}

	/// Split the buffer into producer and consumer ends
	pub fn split(self) -> (ReportProducer, ReportConsumer) {
		(
			ReportProducer {
				sender: self.sender,
			},
			ReportConsumer {
				receiver: self.receiver,
			},
		)
	}
}

/// Producer end, installed as the delivery stats sink
#[derive(Clone)]
pub struct ReportProducer {
	sender: Sender<DeliveryProgressReportBatch>,
}

impl ReportProducer {
	pub fn push(&self, batch: DeliveryProgressReportBatch) -> Result<(), ReportBufferError> {
		self.sender.try_send(batch).map_err(|e| match e {
			TrySendError::Full(_) => ReportBufferError::Full,
			TrySendError::Disconnected(_) => ReportBufferError::Disconnected,
		})
	}
}

impl DeliveryStatsSink for ReportProducer {
	fn accept(&self, batch: DeliveryProgressReportBatch) {
		let report_id = batch.report_id.clone();
		if let Err(e) = self.push(batch) {
			warn!(
				target: "delivery_progress",
				report_id = %report_id,
				error = %e,
				"Dropping delivery progress report batch"
			);
		}
	}
}

/// Consumer end, drained by the report uploader
pub struct ReportConsumer {
	receiver: Receiver<DeliveryProgressReportBatch>,
}

impl ReportConsumer {
	pub fn try_recv(&self) -> Result<DeliveryProgressReportBatch, ReportBufferError> {
		self.receiver.try_recv().map_err(|e| match e {
			TryRecvError::Empty => ReportBufferError::Empty,
			TryRecvError::Disconnected => ReportBufferError::Disconnected,
		})
	}

	/// Wait up to `timeout` for the next batch
	pub fn recv_timeout(&self, timeout: Duration) -> Result<DeliveryProgressReportBatch, ReportBufferError> {
		self.receiver.recv_timeout(timeout).map_err(|e| match e {
			RecvTimeoutError::Timeout => ReportBufferError::Empty,
			RecvTimeoutError::Disconnected => ReportBufferError::Disconnected,
		})
	}

	/// Up to `max_count` batches, fewer if the buffer runs empty
	pub fn drain(&self, max_count: usize) -> Vec<DeliveryProgressReportBatch> {
		let mut batches = Vec::new();
		while batches.len() < max_count {
			match self.try_recv() {
				Ok(batch) => batches.push(batch),
				Err(_) => break,
			}
		}
		batches
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ReportBufferError {
	#[error("Report buffer is full")]
	Full,
	#[error("Report buffer is empty")]
	Empty,
	#[error("Report buffer disconnected")]
	Disconnected,
}

#[cfg(test)]
mod tests {
	use super::*;

	fn create_test_batch(report_id: &str) -> DeliveryProgressReportBatch {
		DeliveryProgressReportBatch {
			report_id: report_id.to_string(),
			..Default::default()
		}
	}

	#[test]
	fn test_accept_and_drain() {
		let (producer, consumer) = ReportBuffer::new(4).split();

		producer.accept(create_test_batch("r1"));
		producer.accept(create_test_batch("r2"));

		let drained = consumer.drain(10);
		assert_eq!(drained.len(), 2);
		assert_eq!(drained[0].report_id, "r1");
		assert!(consumer.drain(10).is_empty());
	}

	#[test]
	fn test_full_buffer_drops_batch() {
		let (producer, consumer) = ReportBuffer::new(1).split();

		producer.push(create_test_batch("r1")).unwrap();
		assert!(matches!(producer.push(create_test_batch("r2")), Err(ReportBufferError::Full)));

		producer.accept(create_test_batch("r3"));
		let drained = consumer.drain(10);
		assert_eq!(drained.len(), 1);
		assert_eq!(drained[0].report_id, "r1");
	}

	#[test]
	fn test_zero_capacity_still_buffers_one_batch() {
		let (producer, consumer) = ReportBuffer::new(0).split();

		producer.accept(create_test_batch("r1"));

		assert_eq!(consumer.try_recv().unwrap().report_id, "r1");
	}

	#[test]
	fn test_disconnected_consumer() {
		let (producer, consumer) = ReportBuffer::new(1).split();
		drop(consumer);

		assert!(matches!(producer.push(create_test_batch("r1")), Err(ReportBufferError::Disconnected)));
	}
}
