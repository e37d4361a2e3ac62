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

use serde::Serialize;

/// Per-auction transaction log
///
/// A mutable scratch record owned by one auction. Matching writes the
/// outcome of every candidate line item here; once the auction is over
/// the log is folded into the delivery progress counters and dropped.
///
/// Sets are keyed by line item id, so one auction contributes at most
/// one increment per line item to each counter no matter how many
/// impressions it contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TxnLog {
	pub line_items_matched_domain_targeting: HashSet<String>,
	pub line_items_matched_whole_targeting: HashSet<String>,
	pub line_items_matched_targeting_fcapped: HashSet<String>,
	pub line_items_matched_targeting_fcap_lookup_failed: HashSet<String>,
	pub line_items_pacing_deferred: HashSet<String>,
	pub line_items_ready_to_serve: HashSet<String>,
	pub line_items_sent_to_client: HashSet<String>,
	pub line_items_sent_to_client_as_top_match: HashSet<String>,
	pub line_items_response_invalidated: HashSet<String>,
	/// source -> line items offered to that bidder
	pub line_items_sent_to_bidder: HashMap<String, HashSet<String>>,
	/// source -> line items offered to that bidder as the top match
	pub line_items_sent_to_bidder_as_top_match: HashMap<String, HashSet<String>>,
	/// source -> line items the bidder answered with
	pub line_items_received_from_bidder: HashMap<String, HashSet<String>>,
	/// line item -> line items ranked ahead of it during matching
	pub lost_matching_to_line_items: HashMap<String, HashSet<String>>,
	/// line item -> line items that beat it in the auction
	pub lost_auction_to_line_items: HashMap<String, HashSet<String>>,
}

impl TxnLog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn record_sent_to_bidder(&mut self, source: &str, line_item_id: &str) {
		self.line_items_sent_to_bidder
			.entry(source.to_string())
			.or_default()
			.insert(line_item_id.to_string());
	}

	pub fn record_sent_to_bidder_as_top_match(&mut self, source: &str, line_item_id: &str) {
		self.line_items_sent_to_bidder_as_top_match
			.entry(source.to_string())
			.or_default()
			.insert(line_item_id.to_string());
	}

	pub fn record_received_from_bidder(&mut self, source: &str, line_item_id: &str) {
		self.line_items_received_from_bidder
			.entry(source.to_string())
			.or_default()
			.insert(line_item_id.to_string());
	}

	/// Whether the line item was already the top match for any bidder
	/// on an earlier impression of this auction
	pub fn is_top_match_for_any_bidder(&self, line_item_id: &str) -> bool {
		self.line_items_sent_to_bidder_as_top_match
			.values()
			.any(|ids| ids.contains(line_item_id))
	}

	pub fn record_lost_matching_to(&mut self, line_item_id: &str, winners: HashSet<String>) {
		self.lost_matching_to_line_items
			.insert(line_item_id.to_string(), winners);
	}

	pub fn record_lost_auction_to(&mut self, line_item_id: &str, winners: HashSet<String>) {
		self.lost_auction_to_line_items
			.entry(line_item_id.to_string())
			.or_default()
			.extend(winners);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_top_match_lookup_spans_all_bidders() {
		let mut txn_log = TxnLog::new();
		txn_log.record_sent_to_bidder_as_top_match("rubicon", "li1");

		assert!(txn_log.is_top_match_for_any_bidder("li1"));
		assert!(!txn_log.is_top_match_for_any_bidder("li2"));
	}

	#[test]
	fn test_sent_to_bidder_is_a_set_per_source() {
		let mut txn_log = TxnLog::new();
		txn_log.record_sent_to_bidder("rubicon", "li1");
		txn_log.record_sent_to_bidder("rubicon", "li1");
		txn_log.record_sent_to_bidder("appnexus", "li1");

		assert_eq!(txn_log.line_items_sent_to_bidder["rubicon"].len(), 1);
		assert_eq!(txn_log.line_items_sent_to_bidder.len(), 2);
	}

	#[test]
	fn test_lost_auction_accumulates() {
		let mut txn_log = TxnLog::new();
		txn_log.record_lost_auction_to("li2", HashSet::from(["li1".to_string()]));
		txn_log.record_lost_auction_to("li2", HashSet::from(["li3".to_string()]));

		assert_eq!(txn_log.lost_auction_to_line_items["li2"].len(), 2);
	}
}
