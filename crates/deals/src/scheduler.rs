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

use std::{
	sync::{
		Arc,
		atomic::{AtomicBool, Ordering},
	},
	thread::{self, JoinHandle},
	time::{Duration, Instant},
};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::config::DealsConfig;
use crate::progress::DeliveryProgressService;
use crate::service::LineItemService;

/// How often the worker wakes up to check for shutdown
const TICK: Duration = Duration::from_millis(100);

/// Configuration for the PacingScheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	/// Interval between plan advances (seconds)
	pub plan_advance_interval_secs: u64,
	/// Interval between report window rotations (seconds)
	pub report_interval_secs: u64,
}

impl From<&DealsConfig> for SchedulerConfig {
	fn from(config: &DealsConfig) -> Self {
		Self {
			plan_advance_interval_secs: config.plan_advance_interval_secs,
			report_interval_secs: config.report_interval_secs,
		}
	}
}

/// PacingScheduler - drives the periodic pacing and reporting work
///
/// Runs on its own thread, decoupled from auction threads:
/// - every plan advance interval, moves line items whose plan ended
///   onto the next schedule and tracks the new plans in delivery
///   progress
/// - every report interval, rotates the delivery progress window
///
/// The scheduler does NOT:
/// - Refresh line item metadata from the planner
/// - Upload reports; finished windows go to the stats sink
pub struct PacingScheduler {
	thread_handle: Option<JoinHandle<()>>,
	shutdown: Arc<AtomicBool>,
}

impl PacingScheduler {
	pub fn start(
		config: SchedulerConfig,
		line_item_service: Arc<LineItemService>,
		progress_service: Arc<DeliveryProgressService>,
	) -> Result<Self, SchedulerError> {
		let shutdown = Arc::new(AtomicBool::new(false));
		let shutdown_clone = shutdown.clone();

		let thread_handle = thread::Builder::new()
			.name("pacing-scheduler".to_string())
			.spawn(move || {
				info!(target: "scheduler", "Pacing scheduler started");
				Self::run_loop(&config, &line_item_service, &progress_service, &shutdown_clone);
				info!(target: "scheduler", "Pacing scheduler stopped");
			})
			.map_err(SchedulerError::Spawn)?;

		Ok(Self {
			thread_handle: Some(thread_handle),
			shutdown,
		})
	}

	fn run_loop(
		config: &SchedulerConfig,
		line_item_service: &LineItemService,
		progress_service: &DeliveryProgressService,
		shutdown: &AtomicBool,
	) {
		let advance_interval = Duration::from_secs(config.plan_advance_interval_secs);
		let report_interval = Duration::from_secs(config.report_interval_secs);
		let mut last_advance = Instant::now();
		let mut last_report = Instant::now();

		while !shutdown.load(Ordering::Relaxed) {
			thread::sleep(TICK);

			if last_advance.elapsed() >= advance_interval {
				last_advance = Instant::now();
				let now = Utc::now();
				let start = Instant::now();
				line_item_service.advance_to_next_plan(now);
				progress_service.process_delivery_progress_update();
				debug!(
					target: "scheduler",
					elapsed_ms = start.elapsed().as_millis(),
					"Delivery plans advanced"
				);
			}

			if last_report.elapsed() >= report_interval {
				last_report = Instant::now();
				progress_service.create_delivery_progress_reports(Utc::now());
			}
		}
	}

	pub fn shutdown(mut self) {
		info!(target: "scheduler", "Shutting down pacing scheduler");
		self.stop();
	}

	fn stop(&mut self) {
		self.shutdown.store(true, Ordering::Relaxed);

		if let Some(handle) = self.thread_handle.take()
			&& let Err(e) = handle.join()
		{
			warn!(target: "scheduler", error = ?e, "Pacing scheduler thread panicked");
		}
	}
}

impl Drop for PacingScheduler {
	fn drop(&mut self) {
		self.stop();
	}
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
	#[error("Failed to spawn scheduler thread: {0}")]
	Spawn(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use super::*;
	use crate::bidder::StaticBidderCatalog;
	use crate::currency::StaticRatesConverter;
	use crate::progress::{DeliveryStatsSink, ReportBuffer};

	#[test]
	fn test_scheduler_rotates_windows_and_stops() {
		let config = DealsConfig::default();
		let line_item_service = Arc::new(LineItemService::new(
			&config,
			Arc::new(StaticBidderCatalog::new(["rubicon"])),
			Arc::new(StaticRatesConverter::new("USD", &HashMap::new())),
		));
		let (producer, consumer) = ReportBuffer::new(64).split();
		let sink: Arc<dyn DeliveryStatsSink> = Arc::new(producer);
		let progress_service = Arc::new(DeliveryProgressService::new(
			&config,
			line_item_service.clone(),
			sink,
			Utc::now(),
		));

		let scheduler = PacingScheduler::start(
			SchedulerConfig {
				plan_advance_interval_secs: 0,
				report_interval_secs: 0,
			},
			line_item_service,
			progress_service,
		)
		.unwrap();

		thread::sleep(Duration::from_millis(350));
		scheduler.shutdown();

		assert!(!consumer.drain(100).is_empty());
	}
}
