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

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};

use dashmap::DashMap;

use crate::lineitem::{DeliveryPlan, LineItem};

/// Event type recorded when a line item wins an auction
pub const WIN_EVENT_TYPE: &str = "win";

/// Per line item counters tracked in a delivery progress window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCounter {
	DomainMatched,
	TargetMatched,
	TargetMatchedButFcapped,
	TargetMatchedButFcapLookupFailed,
	PacingDeferred,
	SentToBidder,
	SentToBidderAsTopMatch,
	ReceivedFromBidder,
	ReceivedFromBidderInvalidated,
	SentToClient,
	SentToClientAsTopMatch,
}

impl StatusCounter {
	pub const ALL: [StatusCounter; 11] = [
		StatusCounter::DomainMatched,
		StatusCounter::TargetMatched,
		StatusCounter::TargetMatchedButFcapped,
		StatusCounter::TargetMatchedButFcapLookupFailed,
		StatusCounter::PacingDeferred,
		StatusCounter::SentToBidder,
		StatusCounter::SentToBidderAsTopMatch,
		StatusCounter::ReceivedFromBidder,
		StatusCounter::ReceivedFromBidderInvalidated,
		StatusCounter::SentToClient,
		StatusCounter::SentToClientAsTopMatch,
	];

	fn index(self) -> usize {
		self as usize
	}
}

/// Delivery state of one line item within a progress window
///
/// Identity fields are captured from the registry when the status is
/// first created, so a line item removed mid-window is still reported
/// under its source and deal.
///
/// Design principles:
/// - Counters only ever grow, by atomic add
/// - Plans are window copies; the list is replaced entry by entry and a
///   plan is never shared with another window
#[derive(Debug)]
pub struct LineItemStatus {
	line_item_id: String,
	source: Option<String>,
	deal_id: Option<String>,
	ext_line_item_id: Option<String>,
	account_id: Option<String>,
	counters: [AtomicU64; StatusCounter::ALL.len()],
	events: DashMap<String, AtomicU64>,
	delivery_plans: RwLock<Vec<Arc<DeliveryPlan>>>,
}

impl LineItemStatus {
	/// Status for a line item the registry no longer knows
	pub fn new(line_item_id: impl Into<String>) -> Self {
		Self {
			line_item_id: line_item_id.into(),
			source: None,
			deal_id: None,
			ext_line_item_id: None,
			account_id: None,
			counters: Default::default(),
			events: DashMap::new(),
			delivery_plans: RwLock::new(Vec::new()),
		}
	}

	pub fn from_line_item(line_item: &LineItem) -> Self {
		Self {
			source: Some(line_item.source().to_string()),
			deal_id: line_item.deal_id().map(str::to_string),
			ext_line_item_id: line_item.ext_line_item_id().map(str::to_string),
			account_id: Some(line_item.account_id().to_string()),
			..Self::new(line_item.line_item_id())
		}
	}

	/// Same identity, no counters
	fn empty_copy(&self) -> Self {
		Self {
			source: self.source.clone(),
			deal_id: self.deal_id.clone(),
			ext_line_item_id: self.ext_line_item_id.clone(),
			account_id: self.account_id.clone(),
			..Self::new(self.line_item_id.clone())
		}
	}

	/// Same identity and plans, counters copied
	///
	/// Plans are shared with `self`; that is safe as long as the copy is
	/// only merged into, which replaces plans instead of mutating them.
	pub fn copy_with_original_plans(&self) -> Self {
		let copy = self.empty_copy();
		copy.merge_counters(self);
		*copy.plans_mut() = self.delivery_plans();
		copy
	}

	pub fn line_item_id(&self) -> &str {
		&self.line_item_id
	}

	pub fn source(&self) -> Option<&str> {
		self.source.as_deref()
	}

	pub fn deal_id(&self) -> Option<&str> {
		self.deal_id.as_deref()
	}

	pub fn ext_line_item_id(&self) -> Option<&str> {
		self.ext_line_item_id.as_deref()
	}

	pub fn account_id(&self) -> Option<&str> {
		self.account_id.as_deref()
	}

	pub fn increment(&self, counter: StatusCounter) {
		self.add(counter, 1);
	}

	pub fn add(&self, counter: StatusCounter, count: u64) {
		self.counters[counter.index()].fetch_add(count, Ordering::Relaxed);
	}

	pub fn get(&self, counter: StatusCounter) -> u64 {
		self.counters[counter.index()].load(Ordering::Relaxed)
	}

	pub fn record_event(&self, event_type: &str) {
		self.add_event(event_type, 1);
	}

	fn add_event(&self, event_type: &str, count: u64) {
		self.events
			.entry(event_type.to_string())
			.or_default()
			.fetch_add(count, Ordering::Relaxed);
	}

	pub fn event_count(&self, event_type: &str) -> u64 {
		self.events
			.get(event_type)
			.map_or(0, |count| count.load(Ordering::Relaxed))
	}

	/// Event counts ordered by event type
	pub fn events(&self) -> Vec<(String, u64)> {
		let mut events: Vec<(String, u64)> = self
			.events
			.iter()
			.map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
			.collect();
		events.sort();
		events
	}

	pub fn delivery_plans(&self) -> Vec<Arc<DeliveryPlan>> {
		self.delivery_plans
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	pub fn delivery_plan(&self, plan_id: &str) -> Option<Arc<DeliveryPlan>> {
		self.delivery_plans
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.iter()
			.find(|plan| plan.plan_id() == plan_id)
			.cloned()
	}

	/// Window copy of the plan, created from `make` when missing
	pub fn delivery_plan_or_insert_with(
		&self,
		plan_id: &str,
		make: impl FnOnce() -> DeliveryPlan,
	) -> Arc<DeliveryPlan> {
		let mut plans = self.plans_mut();
		if let Some(plan) = plans.iter().find(|plan| plan.plan_id() == plan_id) {
			return plan.clone();
		}
		let plan = Arc::new(make());
		plans.push(plan.clone());
		plan
	}

	/// Track `plan` in this window
	///
	/// A new plan is added without spend. A newer revision of a tracked
	/// plan takes the new schedule and keeps the spend counted so far.
	pub fn merge_plan(&self, plan: &DeliveryPlan) {
		let mut plans = self.plans_mut();
		match plans.iter().position(|current| current.plan_id() == plan.plan_id()) {
			None => plans.push(Arc::new(plan.without_spent())),
			Some(index) if plans[index].is_superseded_by(plan) => {
				let updated = plans[index].with_schedule_of(plan);
				plans[index] = Arc::new(updated);
			}
			Some(_) => {}
		}
	}

	/// Add counters, events and plan spend of `other` into this status
	pub fn merge(&self, other: &LineItemStatus) {
		self.merge_counters(other);

		let other_plans = other.delivery_plans();
		let mut plans = self.plans_mut();
		for plan in other_plans {
			match plans.iter().position(|current| current.plan_id() == plan.plan_id()) {
				Some(index) => {
					let merged = plans[index].merged_spent_with(&plan);
					plans[index] = Arc::new(merged);
				}
				None => plans.push(Arc::new(plan.as_ref().clone())),
			}
		}
	}

	fn merge_counters(&self, other: &LineItemStatus) {
		for counter in StatusCounter::ALL {
			self.add(counter, other.get(counter));
		}
		for (event_type, count) in other.events() {
			self.add_event(&event_type, count);
		}
	}

	/// Keep at most `max_plans` plans, dropping the earliest-ending ones
	pub fn retain_latest_plans(&self, max_plans: usize) {
		let mut plans = self.plans_mut();
		if plans.len() <= max_plans {
			return;
		}
		plans.sort_by_key(|plan| std::cmp::Reverse(plan.end_time_stamp()));
		plans.truncate(max_plans);
	}

	fn plans_mut(&self) -> RwLockWriteGuard<'_, Vec<Arc<DeliveryPlan>>> {
		self.delivery_plans
			.write()
			.unwrap_or_else(PoisonError::into_inner)
	}
}
