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

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use super::status::{LineItemStatus, StatusCounter, WIN_EVENT_TYPE};
use crate::lineitem::LineItem;
use crate::service::LineItemService;
use crate::txn_log::TxnLog;

/// Delivery counters for one reporting window, or the overall aggregate
///
/// Every auction folds its transaction log in with atomic adds, so any
/// number of auctions may record into the same window concurrently.
/// Statuses are created on first touch with the identity the registry
/// has for the line item at that moment.
///
/// Design principles:
/// - Recording never blocks on another recorder
/// - Windows are merged by addition, never by overwrite
/// - Only the window copy of a plan is touched here; the line item's
///   own plan is spent by the caller
pub struct DeliveryProgress {
	start_time_stamp: DateTime<Utc>,
	end_time_stamp: OnceLock<DateTime<Utc>>,
	requests: AtomicU64,
	requests_per_account: DashMap<String, AtomicU64>,
	line_item_statuses: DashMap<String, Arc<LineItemStatus>>,
	/// line item -> competitor -> times lost to it
	lost_to: DashMap<String, DashMap<String, AtomicU64>>,
	line_item_service: Arc<LineItemService>,
}

impl DeliveryProgress {
	pub fn new(start_time_stamp: DateTime<Utc>, line_item_service: Arc<LineItemService>) -> Self {
		Self {
			start_time_stamp,
			end_time_stamp: OnceLock::new(),
			requests: AtomicU64::new(0),
			requests_per_account: DashMap::new(),
			line_item_statuses: DashMap::new(),
			lost_to: DashMap::new(),
			line_item_service,
		}
	}

	pub fn start_time_stamp(&self) -> DateTime<Utc> {
		self.start_time_stamp
	}

	pub fn end_time_stamp(&self) -> Option<DateTime<Utc>> {
		self.end_time_stamp.get().copied()
	}

	/// Close the window; only the first call takes effect
	pub fn mark_ended(&self, now: DateTime<Utc>) {
		let _ = self.end_time_stamp.set(now);
	}

	pub fn requests(&self) -> u64 {
		self.requests.load(Ordering::Relaxed)
	}

	pub fn account_requests(&self, account_id: &str) -> Option<u64> {
		self.requests_per_account
			.get(account_id)
			.map(|count| count.load(Ordering::Relaxed))
	}

	pub fn line_item_status(&self, line_item_id: &str) -> Option<Arc<LineItemStatus>> {
		self.line_item_statuses
			.get(line_item_id)
			.map(|status| status.value().clone())
	}

	/// Statuses ordered by line item id
	pub fn line_item_statuses(&self) -> Vec<Arc<LineItemStatus>> {
		let mut statuses: Vec<Arc<LineItemStatus>> = self
			.line_item_statuses
			.iter()
			.map(|entry| entry.value().clone())
			.collect();
		statuses.sort_by(|a, b| a.line_item_id().cmp(b.line_item_id()));
		statuses
	}

	/// Competitors the line item lost to, with counts
	pub fn lost_to(&self, line_item_id: &str) -> Vec<(String, u64)> {
		self.lost_to
			.get(line_item_id)
			.map(|competitors| {
				competitors
					.iter()
					.map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
					.collect()
			})
			.unwrap_or_default()
	}

	/// Fold one auction into the window
	///
	/// `plan_id_to_class` holds the token class each line item's own
	/// plan consumed for the serves recorded in `txn_log`.
	pub fn record_transaction_log(
		&self,
		txn_log: &TxnLog,
		plan_id_to_class: &HashMap<String, i32>,
		account_id: &str,
	) {
		self.requests_per_account
			.entry(account_id.to_string())
			.or_default()
			.fetch_add(1, Ordering::Relaxed);
		self.requests.fetch_add(1, Ordering::Relaxed);

		let sets = [
			(&txn_log.line_items_sent_to_client_as_top_match, StatusCounter::SentToClientAsTopMatch),
			(&txn_log.line_items_sent_to_client, StatusCounter::SentToClient),
			(&txn_log.line_items_matched_domain_targeting, StatusCounter::DomainMatched),
			(&txn_log.line_items_matched_whole_targeting, StatusCounter::TargetMatched),
			(&txn_log.line_items_matched_targeting_fcapped, StatusCounter::TargetMatchedButFcapped),
			(
				&txn_log.line_items_matched_targeting_fcap_lookup_failed,
				StatusCounter::TargetMatchedButFcapLookupFailed,
			),
			(&txn_log.line_items_pacing_deferred, StatusCounter::PacingDeferred),
			(&txn_log.line_items_response_invalidated, StatusCounter::ReceivedFromBidderInvalidated),
		];
		for (line_item_ids, counter) in sets {
			self.increment_all(line_item_ids, counter);
		}

		let per_source = [
			(&txn_log.line_items_sent_to_bidder, StatusCounter::SentToBidder),
			(&txn_log.line_items_sent_to_bidder_as_top_match, StatusCounter::SentToBidderAsTopMatch),
			(&txn_log.line_items_received_from_bidder, StatusCounter::ReceivedFromBidder),
		];
		for (by_source, counter) in per_source {
			for line_item_ids in by_source.values() {
				self.increment_all(line_item_ids, counter);
			}
		}

		for line_item_id in &txn_log.line_items_sent_to_client_as_top_match {
			self.record_token_spend(line_item_id, plan_id_to_class);
		}

		for lost in [&txn_log.lost_matching_to_line_items, &txn_log.lost_auction_to_line_items] {
			for (line_item_id, competitors) in lost {
				self.record_lost_to(line_item_id, competitors);
			}
		}
	}

	pub fn record_win_event(&self, line_item_id: &str) {
		self.status(line_item_id).record_event(WIN_EVENT_TYPE);
	}

	/// Add every counter, plan spend and lost-to count of `other`
	pub fn merge_from(&self, other: &DeliveryProgress) {
		self.requests.fetch_add(other.requests(), Ordering::Relaxed);

		for entry in other.requests_per_account.iter() {
			self.requests_per_account
				.entry(entry.key().clone())
				.or_default()
				.fetch_add(entry.value().load(Ordering::Relaxed), Ordering::Relaxed);
		}

		for status in other.line_item_statuses() {
			self.status(status.line_item_id()).merge(&status);
		}

		for entry in other.lost_to.iter() {
			let competitors = self.lost_to.entry(entry.key().clone()).or_default();
			for competitor in entry.value().iter() {
				competitors
					.entry(competitor.key().clone())
					.or_default()
					.fetch_add(competitor.value().load(Ordering::Relaxed), Ordering::Relaxed);
			}
		}
	}

	/// Track the line item's active plan in this window
	pub fn merge_plan_from_line_item(&self, line_item: &LineItem) {
		let Some(plan) = line_item.active_plan() else {
			return;
		};
		self.status(line_item.line_item_id()).merge_plan(&plan);
	}

	/// Drop statuses of line items that are gone or ended more than
	/// `ttl` ago, then cap the plans kept per line item
	pub fn clean_line_item_statuses(&self, now: DateTime<Utc>, ttl: Duration, max_plans: usize) {
		self.line_item_statuses.retain(|line_item_id, _| {
			self.line_item_service
				.get_line_item_by_id(line_item_id)
				.is_some_and(|line_item| now - line_item.end_time_stamp() <= ttl)
		});

		for status in self.line_item_statuses() {
			status.retain_latest_plans(max_plans);
		}
	}

	/// Copy whose statuses share this window's plans
	///
	/// Used to build an overall view that includes the open window
	/// without touching the long-lived aggregate.
	pub fn copy_with_original_plans(&self) -> DeliveryProgress {
		let copy = DeliveryProgress::new(self.start_time_stamp, self.line_item_service.clone());
		if let Some(end) = self.end_time_stamp() {
			copy.mark_ended(end);
		}
		copy.requests.store(self.requests(), Ordering::Relaxed);

		for entry in self.requests_per_account.iter() {
			copy.requests_per_account.insert(
				entry.key().clone(),
				AtomicU64::new(entry.value().load(Ordering::Relaxed)),
			);
		}

		for status in self.line_item_statuses() {
			copy.line_item_statuses.insert(
				status.line_item_id().to_string(),
				Arc::new(status.copy_with_original_plans()),
			);
		}

		for entry in self.lost_to.iter() {
			let competitors = DashMap::new();
			for competitor in entry.value().iter() {
				competitors.insert(
					competitor.key().clone(),
					AtomicU64::new(competitor.value().load(Ordering::Relaxed)),
				);
			}
			copy.lost_to.insert(entry.key().clone(), competitors);
		}

		copy
	}

	pub fn invalidate_line_item_statuses(&self, line_item_ids: &[String]) {
		for line_item_id in line_item_ids {
			self.line_item_statuses.remove(line_item_id);
			self.lost_to.remove(line_item_id);
		}
	}

	pub fn invalidate_all(&self) {
		self.line_item_statuses.clear();
		self.lost_to.clear();
	}

	fn status(&self, line_item_id: &str) -> Arc<LineItemStatus> {
		if let Some(status) = self.line_item_statuses.get(line_item_id) {
			return status.value().clone();
		}

		let created = match self.line_item_service.get_line_item_by_id(line_item_id) {
			Some(line_item) => LineItemStatus::from_line_item(&line_item),
			None => LineItemStatus::new(line_item_id),
		};
		self.line_item_statuses
			.entry(line_item_id.to_string())
			.or_insert_with(|| Arc::new(created))
			.value()
			.clone()
	}

	fn increment_all(&self, line_item_ids: &HashSet<String>, counter: StatusCounter) {
		for line_item_id in line_item_ids {
			self.status(line_item_id).increment(counter);
		}
	}

	fn record_token_spend(&self, line_item_id: &str, plan_id_to_class: &HashMap<String, i32>) {
		let Some(active_plan) = self
			.line_item_service
			.get_line_item_by_id(line_item_id)
			.and_then(|line_item| line_item.active_plan())
		else {
			return;
		};

		let window_plan = self
			.status(line_item_id)
			.delivery_plan_or_insert_with(active_plan.plan_id(), || active_plan.without_spent());
		if let Some(priority_class) = plan_id_to_class.get(window_plan.plan_id()) {
			window_plan.record_spent_token(*priority_class);
		}
	}

	fn record_lost_to(&self, line_item_id: &str, competitors: &HashSet<String>) {
		let lost_to = self.lost_to.entry(line_item_id.to_string()).or_default();
		for competitor in competitors {
			lost_to
				.entry(competitor.clone())
				.or_default()
				.fetch_add(1, Ordering::Relaxed);
		}
	}
}

impl std::fmt::Debug for DeliveryProgress {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DeliveryProgress")
			.field("start_time_stamp", &self.start_time_stamp)
			.field("end_time_stamp", &self.end_time_stamp())
			.field("requests", &self.requests())
			.field("line_items", &self.line_item_statuses.len())
			.finish()
	}
}
