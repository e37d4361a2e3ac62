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

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use pacer_sdk::{DeliverySchedule, LineItemMetaData};
use serde_json::Value;
use tracing::debug;

use super::plan::DeliveryPlan;
use crate::targeting::TargetingDefinition;

/// `ready_at` value meaning "never ready"
const NEVER: i64 = i64::MIN;

/// Token consumed by a serve, as reported to delivery progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSpend {
	pub plan_id: String,
	pub priority_class: i32,
}

/// Registered line item: immutable metadata plus live pacing state
///
/// Metadata, normalized price and parsed targeting never change after
/// construction; a metadata refresh builds a new `LineItem` that
/// inherits the pacing state. The active plan and `ready_at` are
/// updated in place by spends and plan transitions.
///
/// Design principles:
/// - Token spend is lock-free (atomic CAS on the plan's tokens)
/// - Plan transitions take the write lock, so at most one thread
///   replaces the active plan
/// - `ready_at` is a millisecond instant in an atomic, `NEVER` when the
///   line item cannot serve under the current plan
#[derive(Debug)]
pub struct LineItem {
	metadata: LineItemMetaData,
	cpm: Option<f64>,
	targeting: Option<TargetingDefinition>,
	active_plan: RwLock<Option<Arc<DeliveryPlan>>>,
	ready_at: AtomicI64,
}

impl LineItem {
	/// Build a freshly registered line item
	///
	/// The schedule covering `now` becomes the active plan and the line
	/// item is ready immediately; without one it is never ready.
	pub fn new(
		metadata: LineItemMetaData,
		cpm: Option<f64>,
		targeting: Option<TargetingDefinition>,
		now: DateTime<Utc>,
	) -> Self {
		let plan = active_schedule(&metadata, now).map(DeliveryPlan::from_schedule);
		let ready_at = plan.as_ref().map(|_| now);
		Self::assemble(metadata, cpm, targeting, plan.map(Arc::new), ready_at)
	}

	/// Build the replacement for a metadata refresh
	///
	/// - same plan, newer `updatedTimeStamp`: new totals, spend kept,
	///   `ready_at` recomputed
	/// - same plan, unchanged: plan and `ready_at` carried over
	/// - different plan: fresh plan, ready now
	/// - no plan covering `now`: never ready
	pub fn with_updated_metadata(
		&self,
		metadata: LineItemMetaData,
		cpm: Option<f64>,
		targeting: Option<TargetingDefinition>,
		now: DateTime<Utc>,
	) -> Self {
		let current = self.active_plan();
		let (plan, ready_at) = match (active_schedule(&metadata, now), current) {
			(None, _) => (None, None),
			(Some(schedule), Some(current)) if current.plan_id() == schedule.plan_id => {
				if current.is_updated_by(schedule) {
					let updated = current.with_updated_schedule(schedule);
					let ready_at = updated.ready_at_after_spend();
					(Some(Arc::new(updated)), ready_at)
				} else {
					(Some(current), self.ready_at())
				}
			}
			(Some(schedule), _) => (Some(Arc::new(DeliveryPlan::from_schedule(schedule))), Some(now)),
		};

		Self::assemble(metadata, cpm, targeting, plan, ready_at)
	}

	fn assemble(
		metadata: LineItemMetaData,
		cpm: Option<f64>,
		targeting: Option<TargetingDefinition>,
		plan: Option<Arc<DeliveryPlan>>,
		ready_at: Option<DateTime<Utc>>,
	) -> Self {
		Self {
			metadata,
			cpm,
			targeting,
			active_plan: RwLock::new(plan),
			ready_at: AtomicI64::new(to_millis(ready_at)),
		}
	}

	pub fn metadata(&self) -> &LineItemMetaData {
		&self.metadata
	}

	pub fn line_item_id(&self) -> &str {
		&self.metadata.line_item_id
	}

	pub fn ext_line_item_id(&self) -> Option<&str> {
		self.metadata.ext_line_item_id.as_deref()
	}

	pub fn deal_id(&self) -> Option<&str> {
		self.metadata.deal_id.as_deref()
	}

	pub fn account_id(&self) -> &str {
		&self.metadata.account_id
	}

	pub fn source(&self) -> &str {
		&self.metadata.source
	}

	pub fn relative_priority(&self) -> Option<i32> {
		self.metadata.relative_priority
	}

	/// Price in the ad-server currency
	pub fn cpm(&self) -> Option<f64> {
		self.cpm
	}

	pub fn end_time_stamp(&self) -> DateTime<Utc> {
		self.metadata.end_time_stamp
	}

	pub fn fcap_ids(&self) -> impl Iterator<Item = &str> {
		self.metadata
			.frequency_caps
			.iter()
			.map(|fcap| fcap.fcap_id.as_str())
	}

	pub fn targeting(&self) -> Option<&TargetingDefinition> {
		self.targeting.as_ref()
	}

	pub fn raw_targeting(&self) -> Option<&Value> {
		self.metadata.targeting.as_ref()
	}

	pub fn active_plan(&self) -> Option<Arc<DeliveryPlan>> {
		self.active_plan
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	pub fn ready_at(&self) -> Option<DateTime<Utc>> {
		from_millis(self.ready_at.load(Ordering::Acquire))
	}

	/// `ready_at` has been reached; a never-ready line item is not ready
	pub fn is_ready_at(&self, now: DateTime<Utc>) -> bool {
		self.ready_at().is_some_and(|ready_at| ready_at <= now)
	}

	/// `true` when the active plan has tokens left or there is no plan
	pub fn has_unspent_tokens(&self) -> bool {
		self.active_plan()
			.is_none_or(|plan| plan.highest_unspent_class().is_some())
	}

	pub fn highest_unspent_tokens_class(&self) -> Option<i32> {
		self.active_plan()
			.and_then(|plan| plan.highest_unspent_class())
	}

	pub fn spent_tokens(&self) -> Option<u64> {
		self.active_plan().map(|plan| plan.spent_tokens())
	}

	pub fn delivery_rate_millis(&self) -> Option<i64> {
		self.active_plan()
			.and_then(|plan| plan.delivery_rate_millis())
	}

	/// The active plan exists and covers `now`
	pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
		self.active_plan().is_some_and(|plan| plan.is_active_at(now))
	}

	/// Consume one token for a serve and move `ready_at` forward
	///
	/// Runs under the plan read lock so a concurrent plan transition
	/// never sees its `ready_at` overwritten by the outgoing plan.
	pub fn inc_spent_token(&self) -> Option<TokenSpend> {
		let active_plan = self
			.active_plan
			.read()
			.unwrap_or_else(PoisonError::into_inner);
		let plan = active_plan.as_ref()?;
		let priority_class = plan.inc_spent_token()?;
		self.ready_at
			.store(to_millis(plan.ready_at_after_spend()), Ordering::Release);

		Some(TokenSpend {
			plan_id: plan.plan_id().to_string(),
			priority_class,
		})
	}

	/// Switch to the schedule covering `now` once the active plan ends
	///
	/// While the planner is unresponsive, the outgoing plan is merged
	/// into the incoming one so undelivered tokens are not lost.
	pub fn advance_to_next_plan(&self, now: DateTime<Utc>, is_planner_responsive: bool) {
		let mut active_plan = self
			.active_plan
			.write()
			.unwrap_or_else(PoisonError::into_inner);

		if active_plan.as_ref().is_some_and(|plan| plan.is_active_at(now)) {
			return;
		}

		let next = active_schedule(&self.metadata, now).map(DeliveryPlan::from_schedule);
		let next = match (next, active_plan.as_ref()) {
			(Some(next), Some(previous)) if !is_planner_responsive => {
				Some(next.merged_with_previous(previous))
			}
			(next, _) => next,
		};

		if next.is_none() && active_plan.is_none() {
			return;
		}

		let ready_at = next.as_ref().map(|_| now);
		debug!(
			target: "line_item",
			line_item_id = %self.metadata.line_item_id,
			plan_id = next.as_ref().map(|plan| plan.plan_id()).unwrap_or_default(),
			"Advanced to next delivery plan"
		);
		*active_plan = next.map(Arc::new);
		self.ready_at.store(to_millis(ready_at), Ordering::Release);
	}
}

fn active_schedule(metadata: &LineItemMetaData, now: DateTime<Utc>) -> Option<&DeliverySchedule> {
	metadata
		.delivery_schedules
		.iter()
		.find(|schedule| schedule.start_time_stamp <= now && now < schedule.end_time_stamp)
}

fn to_millis(instant: Option<DateTime<Utc>>) -> i64 {
	instant.map_or(NEVER, |instant| instant.timestamp_millis())
}

fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
	if millis == NEVER {
		return None;
	}
	DateTime::from_timestamp_millis(millis)
}

#[cfg(test)]
mod tests {
	use std::thread;

	use chrono::{Duration, TimeZone};
	use pacer_sdk::Token;

	use super::*;

	fn at(hour: u32, minute: u32) -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2026, 5, 1, hour, minute, 0).unwrap()
	}

	fn create_test_schedule(
		plan_id: &str,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
		tokens: &[(i32, u64)],
	) -> DeliverySchedule {
		DeliverySchedule {
			plan_id: plan_id.to_string(),
			start_time_stamp: start,
			end_time_stamp: end,
			updated_time_stamp: at(9, 0),
			tokens: tokens
				.iter()
				.map(|(priority_class, total)| Token::new(*priority_class, *total))
				.collect(),
		}
	}

	fn create_test_metadata(schedules: Vec<DeliverySchedule>) -> LineItemMetaData {
		LineItemMetaData {
			line_item_id: "li1".to_string(),
			ext_line_item_id: Some("ext1".to_string()),
			account_id: "acc".to_string(),
			source: "rubicon".to_string(),
			start_time_stamp: at(0, 0),
			end_time_stamp: at(23, 0),
			status: "active".to_string(),
			delivery_schedules: schedules,
			..Default::default()
		}
	}

	fn create_test_line_item(tokens: &[(i32, u64)], now: DateTime<Utc>) -> LineItem {
		let schedule = create_test_schedule("p1", at(10, 0), at(12, 0), tokens);
		LineItem::new(create_test_metadata(vec![schedule]), Some(1.0), None, now)
	}

	#[test]
	fn test_new_line_item_is_ready_now() {
		let line_item = create_test_line_item(&[(1, 100)], at(10, 30));

		assert_eq!(line_item.ready_at(), Some(at(10, 30)));
		assert!(line_item.is_ready_at(at(10, 30)));
		assert_eq!(line_item.active_plan().unwrap().plan_id(), "p1");
	}

	#[test]
	fn test_line_item_without_active_plan_is_never_ready() {
		let line_item = create_test_line_item(&[(1, 100)], at(8, 0));

		assert!(line_item.active_plan().is_none());
		assert_eq!(line_item.ready_at(), None);
		assert!(!line_item.is_ready_at(at(23, 0)));
		assert!(line_item.has_unspent_tokens());
	}

	#[test]
	fn test_spend_moves_ready_at_forward() {
		let line_item = create_test_line_item(&[(1, 100)], at(10, 0));

		let spend = line_item.inc_spent_token().unwrap();
		assert_eq!(
			spend,
			TokenSpend {
				plan_id: "p1".to_string(),
				priority_class: 1
			}
		);
		assert_eq!(line_item.ready_at(), Some(at(10, 0) + Duration::seconds(72)));
		assert!(!line_item.is_ready_at(at(10, 1)));
		assert!(line_item.is_ready_at(at(10, 2)));
	}

	#[test]
	fn test_exhausted_plan_is_never_ready() {
		let line_item = create_test_line_item(&[(1, 1)], at(10, 0));

		assert!(line_item.inc_spent_token().is_some());
		assert!(line_item.inc_spent_token().is_none());
		assert!(!line_item.has_unspent_tokens());
		assert_eq!(line_item.ready_at(), None);
	}

	#[test]
	fn test_updated_metadata_keeps_spend_and_recomputes_ready_at() {
		let line_item = create_test_line_item(&[(1, 100)], at(10, 0));
		for _ in 0..10 {
			line_item.inc_spent_token();
		}

		let mut schedule = create_test_schedule("p1", at(10, 0), at(12, 0), &[(1, 200)]);
		schedule.updated_time_stamp = at(10, 15);
		let updated = line_item.with_updated_metadata(
			create_test_metadata(vec![schedule]),
			Some(1.0),
			None,
			at(10, 20),
		);

		assert_eq!(updated.spent_tokens(), Some(10));
		assert_eq!(updated.ready_at(), Some(at(10, 6)));
	}

	#[test]
	fn test_unchanged_metadata_keeps_plan_and_ready_at() {
		let line_item = create_test_line_item(&[(1, 100)], at(10, 0));
		line_item.inc_spent_token();

		let schedule = create_test_schedule("p1", at(10, 0), at(12, 0), &[(1, 100)]);
		let updated = line_item.with_updated_metadata(
			create_test_metadata(vec![schedule]),
			Some(1.0),
			None,
			at(10, 30),
		);

		assert!(Arc::ptr_eq(
			&updated.active_plan().unwrap(),
			&line_item.active_plan().unwrap()
		));
		assert_eq!(updated.ready_at(), line_item.ready_at());
	}

	#[test]
	fn test_new_plan_in_metadata_is_ready_now() {
		let line_item = create_test_line_item(&[(1, 100)], at(10, 0));
		line_item.inc_spent_token();

		let schedule = create_test_schedule("p2", at(10, 0), at(12, 0), &[(1, 100)]);
		let updated = line_item.with_updated_metadata(
			create_test_metadata(vec![schedule]),
			Some(1.0),
			None,
			at(10, 30),
		);

		assert_eq!(updated.spent_tokens(), Some(0));
		assert_eq!(updated.ready_at(), Some(at(10, 30)));
	}

	#[test]
	fn test_advance_switches_plan_when_expired() {
		let schedules = vec![
			create_test_schedule("p1", at(10, 0), at(11, 0), &[(1, 100)]),
			create_test_schedule("p2", at(11, 0), at(12, 0), &[(1, 50)]),
		];
		let line_item = LineItem::new(create_test_metadata(schedules), None, None, at(10, 0));
		line_item.inc_spent_token();

		line_item.advance_to_next_plan(at(10, 30), true);
		assert_eq!(line_item.active_plan().unwrap().plan_id(), "p1");

		line_item.advance_to_next_plan(at(11, 5), true);
		let plan = line_item.active_plan().unwrap();
		assert_eq!(plan.plan_id(), "p2");
		assert_eq!(plan.spent_tokens(), 0);
		assert_eq!(line_item.ready_at(), Some(at(11, 5)));
	}

	#[test]
	fn test_advance_merges_previous_plan_when_planner_unresponsive() {
		let schedules = vec![
			create_test_schedule("p1", at(10, 0), at(11, 0), &[(1, 100), (3, 300), (4, 400), (5, 500)]),
			create_test_schedule("p2", at(11, 0), at(12, 0), &[(1, 100), (2, 200), (3, 300), (4, 400)]),
		];
		let line_item = LineItem::new(create_test_metadata(schedules), None, None, at(10, 0));
		for _ in 0..240 {
			line_item.inc_spent_token();
		}

		line_item.advance_to_next_plan(at(11, 0), false);

		let plan = line_item.active_plan().unwrap();
		let tokens: Vec<(i32, u64, u64)> = plan
			.tokens()
			.iter()
			.map(|token| (token.priority_class(), token.total(), token.spent()))
			.collect();
		assert_eq!(plan.plan_id(), "p2");
		assert_eq!(
			tokens,
			vec![
				(1, 200, 100),
				(2, 200, 0),
				(3, 600, 140),
				(4, 800, 0),
				(5, 500, 0)
			]
		);
	}

	#[test]
	fn test_advance_without_next_plan_clears_state() {
		let line_item = create_test_line_item(&[(1, 100)], at(10, 0));

		line_item.advance_to_next_plan(at(12, 0), true);

		assert!(line_item.active_plan().is_none());
		assert_eq!(line_item.ready_at(), None);
	}

	fn spend_concurrently(
		line_item: &Arc<LineItem>,
		threads: usize,
		attempts: usize,
	) -> Vec<thread::JoinHandle<usize>> {
		(0..threads)
			.map(|_| {
				let line_item = Arc::clone(line_item);
				thread::spawn(move || {
					(0..attempts)
						.filter(|_| line_item.inc_spent_token().is_some())
						.count()
				})
			})
			.collect()
	}

	fn join_granted(handles: Vec<thread::JoinHandle<usize>>) -> u64 {
		handles
			.into_iter()
			.map(|handle| handle.join().unwrap() as u64)
			.sum()
	}

	#[test]
	fn test_spends_racing_metadata_refresh_are_kept() {
		let original = Arc::new(create_test_line_item(&[(1, 1_000_000)], at(10, 0)));
		let handles = spend_concurrently(&original, 4, 2_000);

		let mut latest = Arc::clone(&original);
		for revision in 1..=200i64 {
			let mut schedule = create_test_schedule("p1", at(10, 0), at(12, 0), &[(1, 1_000_000)]);
			schedule.updated_time_stamp = at(9, 0) + Duration::seconds(revision);
			latest = Arc::new(latest.with_updated_metadata(
				create_test_metadata(vec![schedule]),
				Some(1.0),
				None,
				at(10, 30),
			));
		}

		let granted = join_granted(handles);
		assert_eq!(latest.spent_tokens(), Some(granted));
		assert_eq!(original.spent_tokens(), Some(granted));
	}

	#[test]
	fn test_spends_racing_unresponsive_plan_advance_are_kept() {
		let schedules = vec![
			create_test_schedule("p1", at(10, 0), at(11, 0), &[(1, 1_000_000)]),
			create_test_schedule("p2", at(11, 0), at(12, 0), &[(1, 1_000_000), (2, 10)]),
		];
		let line_item = Arc::new(LineItem::new(create_test_metadata(schedules), None, None, at(10, 0)));
		let handles = spend_concurrently(&line_item, 4, 2_000);

		line_item.advance_to_next_plan(at(11, 0), false);

		let granted = join_granted(handles);
		let plan = line_item.active_plan().unwrap();
		assert_eq!(plan.plan_id(), "p2");
		assert_eq!(plan.spent_tokens(), granted);
	}

	#[test]
	fn test_ready_at_follows_incoming_plan_after_racing_advance() {
		let schedules = vec![
			create_test_schedule("p1", at(10, 0), at(11, 0), &[(1, 1_000_000)]),
			create_test_schedule("p2", at(11, 0), at(12, 0), &[(1, 1_000)]),
		];
		let line_item = Arc::new(LineItem::new(create_test_metadata(schedules), None, None, at(10, 0)));
		let handles = spend_concurrently(&line_item, 4, 200);

		line_item.advance_to_next_plan(at(11, 5), true);
		join_granted(handles);

		assert_eq!(line_item.active_plan().unwrap().plan_id(), "p2");
		// p1 spends would put ready_at shortly after 10:00
		assert!(line_item.ready_at().is_some_and(|ready_at| ready_at >= at(11, 0)));
	}
}
