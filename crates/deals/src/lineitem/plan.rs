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

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use pacer_sdk::DeliverySchedule;

use super::token::DeliveryToken;

/// One delivery schedule of a line item with its spend state
///
/// Tokens are kept ordered by priority class, lower class first, so
/// spending always drains the most important allotment before the next.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryPlan {
	plan_id: String,
	start_time_stamp: DateTime<Utc>,
	end_time_stamp: DateTime<Utc>,
	updated_time_stamp: DateTime<Utc>,
	tokens: Vec<DeliveryToken>,
}

impl DeliveryPlan {
	pub fn from_schedule(schedule: &DeliverySchedule) -> Self {
		let mut tokens: Vec<DeliveryToken> =
			schedule.tokens.iter().map(DeliveryToken::from_token).collect();
		tokens.sort_by_key(DeliveryToken::priority_class);

		Self {
			plan_id: schedule.plan_id.clone(),
			start_time_stamp: schedule.start_time_stamp,
			end_time_stamp: schedule.end_time_stamp,
			updated_time_stamp: schedule.updated_time_stamp,
			tokens,
		}
	}

	pub fn plan_id(&self) -> &str {
		&self.plan_id
	}

	pub fn start_time_stamp(&self) -> DateTime<Utc> {
		self.start_time_stamp
	}

	pub fn end_time_stamp(&self) -> DateTime<Utc> {
		self.end_time_stamp
	}

	pub fn updated_time_stamp(&self) -> DateTime<Utc> {
		self.updated_time_stamp
	}

	pub fn tokens(&self) -> &[DeliveryToken] {
		&self.tokens
	}

	/// `start <= now < end`
	pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
		self.start_time_stamp <= now && now < self.end_time_stamp
	}

	/// The schedule carries the same plan with newer content
	pub fn is_updated_by(&self, schedule: &DeliverySchedule) -> bool {
		schedule.plan_id == self.plan_id && schedule.updated_time_stamp > self.updated_time_stamp
	}

	/// `other` is the same plan with newer content
	pub fn is_superseded_by(&self, other: &DeliveryPlan) -> bool {
		other.plan_id == self.plan_id && other.updated_time_stamp > self.updated_time_stamp
	}

	pub fn total_tokens(&self) -> u64 {
		self.tokens.iter().map(DeliveryToken::total).sum()
	}

	pub fn spent_tokens(&self) -> u64 {
		self.tokens.iter().map(DeliveryToken::spent).sum()
	}

	pub fn unspent_tokens(&self) -> u64 {
		self.tokens.iter().map(DeliveryToken::unspent).sum()
	}

	pub fn spent_in_class(&self, priority_class: i32) -> u64 {
		self.token(priority_class).map_or(0, DeliveryToken::spent)
	}

	/// Lowest-numbered class that still has unspent tokens
	pub fn highest_unspent_class(&self) -> Option<i32> {
		self.tokens
			.iter()
			.find(|token| token.unspent() > 0)
			.map(DeliveryToken::priority_class)
	}

	/// Milliseconds between two serves when the plan is delivered evenly
	pub fn delivery_rate_millis(&self) -> Option<i64> {
		let total = i64::try_from(self.total_tokens()).ok().filter(|total| *total > 0)?;
		let window = (self.end_time_stamp - self.start_time_stamp).num_milliseconds();
		Some(window / total)
	}

	/// Earliest instant the next serve is allowed, `None` once exhausted
	pub fn ready_at_after_spend(&self) -> Option<DateTime<Utc>> {
		if self.unspent_tokens() == 0 {
			return None;
		}
		let rate = self.delivery_rate_millis()?;
		let spent = i64::try_from(self.spent_tokens()).ok()?;
		let offset = spent.checked_mul(rate)?;
		Some(self.start_time_stamp + Duration::milliseconds(offset))
	}

	/// Spend one token of the highest-priority class that has any left
	pub fn inc_spent_token(&self) -> Option<i32> {
		self.tokens
			.iter()
			.find(|token| token.try_spend())
			.map(DeliveryToken::priority_class)
	}

	/// Count a spend on a reporting copy; `false` if the class is unknown
	pub fn record_spent_token(&self, priority_class: i32) -> bool {
		match self.token(priority_class) {
			Some(token) => {
				token.record_spent(1);
				true
			}
			None => false,
		}
	}

	/// Take totals and window from the schedule, keeping spend per class
	pub fn with_updated_schedule(&self, schedule: &DeliverySchedule) -> Self {
		self.with_schedule_of(&Self::from_schedule(schedule))
	}

	/// Take totals and window from `newer`, keeping this plan's spend
	///
	/// Classes known to both revisions keep counting into this plan's
	/// spend counters, so spends still landing on this revision are not
	/// lost.
	pub fn with_schedule_of(&self, newer: &DeliveryPlan) -> Self {
		let tokens = newer
			.tokens
			.iter()
			.map(|token| match self.token(token.priority_class()) {
				Some(current) => current.revised(token.total()),
				None => DeliveryToken::new(token.priority_class(), token.total()),
			})
			.collect();

		Self {
			tokens,
			..newer.clone()
		}
	}

	/// Copy of the plan with every counter reset
	pub fn without_spent(&self) -> Self {
		Self {
			tokens: self.tokens.iter().map(DeliveryToken::without_spent).collect(),
			..self.clone()
		}
	}

	/// Carry an outgoing plan into this one
	///
	/// Used when the planner is unreachable: totals add up per class,
	/// spend carries over and classes known only to `previous` are kept,
	/// so the undelivered remainder of the outgoing plan is not lost.
	/// The outgoing plan's spend counters stay live in the result.
	pub fn merged_with_previous(&self, previous: &DeliveryPlan) -> Self {
		let mut tokens: BTreeMap<i32, DeliveryToken> = previous
			.tokens
			.iter()
			.map(|token| (token.priority_class(), token.revised(token.total())))
			.collect();

		for token in &self.tokens {
			match tokens.get_mut(&token.priority_class()) {
				Some(carried) => {
					if token.spent() > 0 {
						carried.record_spent(token.spent());
					}
					*carried = carried.revised(carried.total() + token.total());
				}
				None => {
					tokens.insert(token.priority_class(), token.revised(token.total()));
				}
			}
		}

		Self {
			tokens: tokens.into_values().collect(),
			..self.clone()
		}
	}

	/// Combine two window copies of the same plan
	///
	/// Spend adds up per class; schedule and totals come from the more
	/// recently updated copy.
	pub fn merged_spent_with(&self, other: &DeliveryPlan) -> Self {
		let (newer, older) = if other.updated_time_stamp > self.updated_time_stamp {
			(other, self)
		} else {
			(self, other)
		};

		Self {
			tokens: merge_spent(&newer.tokens, &older.tokens),
			..newer.clone()
		}
	}

	fn token(&self, priority_class: i32) -> Option<&DeliveryToken> {
		self.tokens
			.iter()
			.find(|token| token.priority_class() == priority_class)
	}
}

fn merge_spent(primary: &[DeliveryToken], secondary: &[DeliveryToken]) -> Vec<DeliveryToken> {
	let mut merged: BTreeMap<i32, (u64, u64)> = primary
		.iter()
		.map(|token| (token.priority_class(), (token.total(), token.spent())))
		.collect();

	for token in secondary {
		merged
			.entry(token.priority_class())
			.and_modify(|(_, spent)| *spent += token.spent())
			.or_insert((token.total(), token.spent()));
	}

	merged
		.into_iter()
		.map(|(priority_class, (total, spent))| DeliveryToken::with_spent(priority_class, total, spent))
		.collect()
}

#[cfg(test)]
mod tests {
	use chrono::TimeZone;
	use pacer_sdk::Token;

	use super::*;

	fn at(hour: u32, minute: u32) -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2026, 5, 1, hour, minute, 0).unwrap()
	}

	fn create_test_schedule(plan_id: &str, tokens: &[(i32, u64)]) -> DeliverySchedule {
		DeliverySchedule {
			plan_id: plan_id.to_string(),
			start_time_stamp: at(10, 0),
			end_time_stamp: at(12, 0),
			updated_time_stamp: at(9, 0),
			tokens: tokens
				.iter()
				.map(|(priority_class, total)| Token::new(*priority_class, *total))
				.collect(),
		}
	}

	fn spend(plan: &DeliveryPlan, count: usize) {
		for _ in 0..count {
			plan.inc_spent_token();
		}
	}

	fn summary(plan: &DeliveryPlan) -> Vec<(i32, u64, u64)> {
		plan.tokens()
			.iter()
			.map(|token| (token.priority_class(), token.total(), token.spent()))
			.collect()
	}

	#[test]
	fn test_active_window_is_half_open() {
		let plan = DeliveryPlan::from_schedule(&create_test_schedule("p1", &[(1, 100)]));

		assert!(!plan.is_active_at(at(9, 59)));
		assert!(plan.is_active_at(at(10, 0)));
		assert!(plan.is_active_at(at(11, 59)));
		assert!(!plan.is_active_at(at(12, 0)));
	}

	#[test]
	fn test_spend_drains_lowest_class_first() {
		let plan = DeliveryPlan::from_schedule(&create_test_schedule("p1", &[(3, 1), (1, 2)]));

		assert_eq!(plan.highest_unspent_class(), Some(1));
		assert_eq!(plan.inc_spent_token(), Some(1));
		assert_eq!(plan.inc_spent_token(), Some(1));
		assert_eq!(plan.highest_unspent_class(), Some(3));
		assert_eq!(plan.inc_spent_token(), Some(3));
		assert_eq!(plan.inc_spent_token(), None);
		assert_eq!(plan.highest_unspent_class(), None);
	}

	#[test]
	fn test_ready_at_follows_even_delivery() {
		let plan = DeliveryPlan::from_schedule(&create_test_schedule("p1", &[(1, 100)]));
		assert_eq!(plan.delivery_rate_millis(), Some(72_000));

		spend(&plan, 1);
		assert_eq!(plan.ready_at_after_spend(), Some(at(10, 0) + Duration::seconds(72)));

		spend(&plan, 9);
		assert_eq!(plan.ready_at_after_spend(), Some(at(10, 12)));

		spend(&plan, 90);
		assert_eq!(plan.ready_at_after_spend(), None);
	}

	#[test]
	fn test_plan_without_tokens_has_no_rate() {
		let plan = DeliveryPlan::from_schedule(&create_test_schedule("p1", &[]));

		assert_eq!(plan.delivery_rate_millis(), None);
		assert_eq!(plan.ready_at_after_spend(), None);
		assert_eq!(plan.highest_unspent_class(), None);
	}

	#[test]
	fn test_updated_schedule_keeps_spent() {
		let plan = DeliveryPlan::from_schedule(&create_test_schedule("p1", &[(1, 100)]));
		spend(&plan, 10);

		let mut schedule = create_test_schedule("p1", &[(1, 200)]);
		schedule.updated_time_stamp = at(10, 30);
		assert!(plan.is_updated_by(&schedule));

		let updated = plan.with_updated_schedule(&schedule);
		assert_eq!(summary(&updated), vec![(1, 200, 10)]);
		assert_eq!(updated.ready_at_after_spend(), Some(at(10, 6)));
	}

	#[test]
	fn test_spend_on_superseded_revision_reaches_update() {
		let plan = DeliveryPlan::from_schedule(&create_test_schedule("p1", &[(1, 100), (2, 10)]));
		spend(&plan, 4);

		let mut schedule = create_test_schedule("p1", &[(1, 200), (3, 5)]);
		schedule.updated_time_stamp = at(10, 30);
		let updated = plan.with_updated_schedule(&schedule);
		spend(&plan, 2);

		assert_eq!(summary(&updated), vec![(1, 200, 6), (3, 5, 0)]);
	}

	#[test]
	fn test_merge_with_previous_adds_totals_and_keeps_spent() {
		let previous = DeliveryPlan::from_schedule(&create_test_schedule(
			"p1",
			&[(1, 100), (3, 300), (4, 400), (5, 500)],
		));
		spend(&previous, 240);

		let next = DeliveryPlan::from_schedule(&create_test_schedule(
			"p2",
			&[(1, 100), (2, 200), (3, 300), (4, 400)],
		));

		let merged = next.merged_with_previous(&previous);
		assert_eq!(merged.plan_id(), "p2");
		assert_eq!(
			summary(&merged),
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
	fn test_spend_on_outgoing_plan_reaches_merged_plan() {
		let previous = DeliveryPlan::from_schedule(&create_test_schedule("p1", &[(1, 10), (5, 10)]));
		let next = DeliveryPlan::from_schedule(&create_test_schedule("p2", &[(1, 10)]));

		let merged = next.merged_with_previous(&previous);
		spend(&previous, 12);

		assert_eq!(summary(&merged), vec![(1, 20, 10), (5, 10, 2)]);
		assert_eq!(merged.spent_tokens(), 12);
	}

	#[test]
	fn test_merge_spent_takes_newer_schedule() {
		let older = DeliveryPlan::from_schedule(&create_test_schedule("p1", &[(1, 100), (2, 50)]));
		spend(&older, 3);

		let mut schedule = create_test_schedule("p1", &[(1, 150)]);
		schedule.updated_time_stamp = at(9, 30);
		let newer = DeliveryPlan::from_schedule(&schedule);
		spend(&newer, 2);

		let merged = older.merged_spent_with(&newer);
		assert_eq!(merged.updated_time_stamp(), at(9, 30));
		assert_eq!(summary(&merged), vec![(1, 150, 5), (2, 50, 0)]);
	}

	#[test]
	fn test_record_spent_token_on_copy() {
		let plan = DeliveryPlan::from_schedule(&create_test_schedule("p1", &[(1, 1)])).without_spent();

		assert!(plan.record_spent_token(1));
		assert!(plan.record_spent_token(1));
		assert!(!plan.record_spent_token(9));
		assert_eq!(plan.spent_tokens(), 2);
	}
}
