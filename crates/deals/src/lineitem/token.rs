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

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use pacer_sdk::Token;

/// Per-priority-class allotment of serves within one delivery plan
///
/// `spent` is the only mutable part and is advanced with a CAS loop so
/// that concurrent spenders can never push it beyond `total`. Revisions
/// of the same plan share one counter, so a spend that lands on a
/// superseded revision still counts in the live one.
#[derive(Debug)]
pub struct DeliveryToken {
	priority_class: i32,
	total: u64,
	spent: Arc<AtomicU64>,
}

impl DeliveryToken {
	pub fn new(priority_class: i32, total: u64) -> Self {
		Self::with_spent(priority_class, total, 0)
	}

	pub fn with_spent(priority_class: i32, total: u64, spent: u64) -> Self {
		Self {
			priority_class,
			total,
			spent: Arc::new(AtomicU64::new(spent)),
		}
	}

	/// Same class with a new total, sharing this token's spend counter
	pub fn revised(&self, total: u64) -> Self {
		Self {
			priority_class: self.priority_class,
			total,
			spent: Arc::clone(&self.spent),
		}
	}

	/// Both tokens count into the same spend counter
	pub fn shares_spent_with(&self, other: &DeliveryToken) -> bool {
		Arc::ptr_eq(&self.spent, &other.spent)
	}

	pub fn from_token(token: &Token) -> Self {
		Self::new(token.priority_class, token.total)
	}

	pub fn priority_class(&self) -> i32 {
		self.priority_class
	}

	pub fn total(&self) -> u64 {
		self.total
	}

	pub fn spent(&self) -> u64 {
		self.spent.load(Ordering::Acquire)
	}

	pub fn unspent(&self) -> u64 {
		self.total.saturating_sub(self.spent())
	}

	/// Take one serve from the allotment; `false` once it is exhausted
	pub fn try_spend(&self) -> bool {
		let total = self.total;
		self.spent
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |spent| {
				(spent < total).then_some(spent + 1)
			})
			.is_ok()
	}

	/// Unbounded increment, used for reporting copies of a plan
	pub fn record_spent(&self, count: u64) {
		self.spent.fetch_add(count, Ordering::AcqRel);
	}

	/// Copy with the counter reset
	pub fn without_spent(&self) -> Self {
		Self::new(self.priority_class, self.total)
	}
}

/// Snapshot with its own counter; use [`DeliveryToken::revised`] to
/// keep counting into the same one
impl Clone for DeliveryToken {
	fn clone(&self) -> Self {
		Self::with_spent(self.priority_class, self.total, self.spent())
	}
}

impl PartialEq for DeliveryToken {
	fn eq(&self, other: &Self) -> bool {
		self.priority_class == other.priority_class
			&& self.total == other.total
			&& self.spent() == other.spent()
	}
}
