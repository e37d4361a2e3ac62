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

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use pacer_sdk::{DeliveryProgressReport, LineItemStatusSnapshot};
use tracing::{debug, info};

use super::delivery_progress::DeliveryProgress;
use super::report::DeliveryProgressReportFactory;
use super::sink::DeliveryStatsSink;
use crate::config::DealsConfig;
use crate::service::LineItemService;
use crate::txn_log::TxnLog;

/// Double-buffered delivery progress
///
/// Auctions record into `current`, the open reporting window. On each
/// report tick the window is swapped for a fresh one, merged into the
/// long-lived `overall` aggregate and handed to the stats sink.
///
/// Design principles:
/// - The swap holds the lock only for the pointer exchange; auctions
///   that grabbed the old window finish recording into it
/// - `overall` only grows through merges and shrinks through TTL
///   cleanup, never through recording
pub struct DeliveryProgressService {
	line_item_service: Arc<LineItemService>,
	report_factory: DeliveryProgressReportFactory,
	sink: Arc<dyn DeliveryStatsSink>,
	current: RwLock<Arc<DeliveryProgress>>,
	overall: Arc<DeliveryProgress>,
	line_item_status_ttl: Duration,
	cached_plans_number: usize,
	report_batch_size: usize,
}

impl DeliveryProgressService {
	pub fn new(
		config: &DealsConfig,
		line_item_service: Arc<LineItemService>,
		sink: Arc<dyn DeliveryStatsSink>,
		now: DateTime<Utc>,
	) -> Self {
		let ttl_secs = i64::try_from(config.line_item_status_ttl_secs).unwrap_or(i64::MAX);
		Self {
			report_factory: DeliveryProgressReportFactory::new(config, line_item_service.clone()),
			current: RwLock::new(Arc::new(DeliveryProgress::new(now, line_item_service.clone()))),
			overall: Arc::new(DeliveryProgress::new(now, line_item_service.clone())),
			line_item_service,
			sink,
			line_item_status_ttl: Duration::try_seconds(ttl_secs).unwrap_or(Duration::MAX),
			cached_plans_number: config.cached_plans_number,
			report_batch_size: config.report_batch_size,
		}
	}

	/// The open reporting window
	pub fn current(&self) -> Arc<DeliveryProgress> {
		self.current
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	pub fn overall(&self) -> &DeliveryProgress {
		&self.overall
	}

	/// Account for a finished auction
	///
	/// Every line item served as a top match spends one token of its
	/// active plan; the consumed class is then counted in the window.
	pub fn process_auction_event(&self, txn_log: &TxnLog, account_id: &str) {
		let plan_id_to_class: HashMap<String, i32> = txn_log
			.line_items_sent_to_client_as_top_match
			.iter()
			.filter_map(|line_item_id| self.line_item_service.get_line_item_by_id(line_item_id))
			.filter_map(|line_item| line_item.inc_spent_token())
			.map(|spend| (spend.plan_id, spend.priority_class))
			.collect();

		self.with_current(|current| {
			current.record_transaction_log(txn_log, &plan_id_to_class, account_id)
		});
	}

	pub fn process_line_item_win_event(&self, line_item_id: &str) {
		self.with_current(|current| current.record_win_event(line_item_id));
	}

	/// Track every line item's active plan in both windows
	pub fn process_delivery_progress_update(&self) {
		self.with_current(|current| {
			for line_item in self.line_item_service.line_items() {
				if line_item.active_plan().is_none() {
					continue;
				}
				self.overall.merge_plan_from_line_item(&line_item);
				current.merge_plan_from_line_item(&line_item);
			}
		});
	}

	/// Close the open window, fold it into the aggregate and hand it
	/// to the stats sink
	pub fn create_delivery_progress_reports(&self, now: DateTime<Utc>) {
		let finished = self.rotate(now);
		self.hand_off(&finished);
		self.overall
			.clean_line_item_statuses(now, self.line_item_status_ttl, self.cached_plans_number);
	}

	/// Cumulative report including the open window
	pub fn get_overall_delivery_progress_report(&self, now: DateTime<Utc>) -> DeliveryProgressReport {
		let overall = self.overall.copy_with_original_plans();
		overall.merge_from(&self.current());
		self.report_factory
			.from_delivery_progress(&overall, Some(now), true)
	}

	pub fn get_line_item_status_report(&self, line_item_id: &str) -> Option<LineItemStatusSnapshot> {
		self.report_factory.line_item_status_report(line_item_id)
	}

	/// Hand off the open window so nothing recorded is lost
	pub fn shutdown(&self, now: DateTime<Utc>) {
		let finished = self.rotate(now);
		self.hand_off(&finished);
		info!(target: "delivery_progress", "Delivery progress flushed on shutdown");
	}

	pub fn invalidate_line_item_statuses(&self, line_item_ids: &[String]) {
		self.current().invalidate_line_item_statuses(line_item_ids);
		self.overall.invalidate_line_item_statuses(line_item_ids);
	}

	pub fn invalidate_all(&self) {
		self.current().invalidate_all();
		self.overall.invalidate_all();
	}

	/// Record into the open window while holding its read lock
	///
	/// Rotation takes the write lock, so it waits for in-flight
	/// recorders and a rotated window is complete when handed off.
	fn with_current<R>(&self, record: impl FnOnce(&DeliveryProgress) -> R) -> R {
		let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
		record(&current)
	}

	fn rotate(&self, now: DateTime<Utc>) -> Arc<DeliveryProgress> {
		let fresh = Arc::new(DeliveryProgress::new(now, self.line_item_service.clone()));
		let finished = {
			let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
			mem::replace(&mut *current, fresh)
		};
		finished.mark_ended(now);
		finished
	}

	fn hand_off(&self, finished: &DeliveryProgress) {
		self.overall.merge_from(finished);

		let batch = self.report_factory.batch_from_delivery_progress(
			finished,
			Some(self.overall.as_ref()),
			None,
			self.report_batch_size,
			false,
		);
		info!(
			target: "delivery_progress",
			report_id = %batch.report_id,
			reports = batch.reports.len(),
			client_auctions = finished.requests(),
			"Delivery progress window closed"
		);
		debug!(
			target: "delivery_progress",
			line_items = finished.line_item_statuses().len(),
			"Overall delivery progress updated"
		);
		self.sink.accept(batch);
	}
}
