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

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use pacer_sdk::Imp;
use rand::seq::SliceRandom;
use tracing::debug;

use crate::bidder::{BidderAliases, BidderCatalog, imp_bidders};
use crate::lineitem::LineItem;
use crate::targeting::RequestContext;
use crate::txn_log::TxnLog;
use crate::types::{AuctionContext, MatchLineItemsResult};

/// Selects and ranks the line items offered for one impression
///
/// The matcher is stateless apart from its configuration: the candidate
/// line items come from the registry and every per-auction effect is
/// recorded in the auction's txn log.
///
/// Pipeline, each stage may drop a candidate:
/// - bidder scope (impression bidders and request aliases)
/// - targeting
/// - frequency caps (a failed cap lookup drops capped line items)
/// - unspent tokens and `ready_at`, unless pacing is bypassed
/// - per-source ranking, top-match dedup, deal dedup and truncation
pub struct LineItemMatcher {
	max_deals_per_bidder: usize,
	bidder_catalog: Arc<dyn BidderCatalog>,
}

impl LineItemMatcher {
	pub fn new(max_deals_per_bidder: usize, bidder_catalog: Arc<dyn BidderCatalog>) -> Self {
		Self {
			max_deals_per_bidder,
			bidder_catalog,
		}
	}

	/// Match account line items against an impression
	///
	/// With `bidder` set, only line items that can be offered to that
	/// bidder are considered; otherwise every bidder of the impression.
	pub fn match_line_items(
		&self,
		candidates: &[Arc<LineItem>],
		context: &mut AuctionContext<'_>,
		imp: &Imp,
		bidder: Option<&str>,
		now: DateTime<Utc>,
	) -> MatchLineItemsResult {
		let bid_request = context.bid_request;
		let aliases = BidderAliases::from_request(bid_request);
		let bidders: HashSet<&str> = match bidder {
			Some(bidder) => HashSet::from([bidder]),
			None => imp_bidders(imp, self.bidder_catalog.as_ref(), &aliases),
		};

		let txn_log = &mut context.txn_log;
		let matched: Vec<Arc<LineItem>> = candidates
			.iter()
			.filter(|line_item| aliases.is_source_in_scope(line_item.source(), &bidders))
			.filter(|line_item| {
				let Some(targeting) = line_item.targeting() else {
					debug!(
						target: "matcher",
						line_item_id = %line_item.line_item_id(),
						"Line item targeting was not defined or has incorrect format"
					);
					return false;
				};
				let mut request_context = RequestContext::new(bid_request, imp, txn_log);
				targeting.matches(&mut request_context)
			})
			.cloned()
			.collect();

		let mut by_source: BTreeMap<String, Vec<Arc<LineItem>>> = BTreeMap::new();
		for line_item in matched {
			let line_item_id = line_item.line_item_id();
			txn_log
				.line_items_matched_whole_targeting
				.insert(line_item_id.to_string());

			if !is_not_frequency_capped(context.fcap_ids.as_deref(), &line_item, txn_log) {
				continue;
			}
			if !context.ignore_pacing && !is_pacing_allowed(&line_item, now, txn_log) {
				continue;
			}

			txn_log
				.line_items_ready_to_serve
				.insert(line_item_id.to_string());
			by_source
				.entry(line_item.source().to_string())
				.or_default()
				.push(line_item);
		}

		let mut line_items = Vec::new();
		for (source, group) in by_source {
			let selected = self.select_for_source(group, txn_log, imp);
			let Some(top) = selected.first() else {
				continue;
			};

			txn_log.record_sent_to_bidder_as_top_match(&source, top.line_item_id());
			for line_item in &selected {
				txn_log.record_sent_to_bidder(&source, line_item.line_item_id());
			}
			line_items.extend(selected);
		}

		MatchLineItemsResult { line_items }
	}

	/// Rank one source's candidates and cut them down to what is offered
	fn select_for_source(
		&self,
		mut line_items: Vec<Arc<LineItem>>,
		txn_log: &mut TxnLog,
		imp: &Imp,
	) -> Vec<Arc<LineItem>> {
		// Shuffle first so equal-ranked line items rotate between auctions
		line_items.shuffle(&mut rand::thread_rng());
		line_items.sort_by(|left, right| compare_line_items(left, right));

		let already_top = line_items
			.iter()
			.take_while(|line_item| txn_log.is_top_match_for_any_bidder(line_item.line_item_id()))
			.count();
		for line_item in line_items.drain(..already_top) {
			debug!(
				target: "matcher",
				line_item_id = %line_item.line_item_id(),
				imp_id = %imp.id,
				"Line item dropped because it was top match in another imp"
			);
		}

		for (rank, line_item) in line_items.iter().enumerate().skip(1) {
			let winners = line_items[..rank]
				.iter()
				.map(|winner| winner.line_item_id().to_string())
				.collect();
			txn_log.record_lost_matching_to(line_item.line_item_id(), winners);
		}

		let mut deal_ids = HashSet::new();
		line_items.retain(|line_item| deal_ids.insert(line_item.deal_id().map(str::to_string)));

		if line_items.len() > self.max_deals_per_bidder {
			for line_item in line_items.drain(self.max_deals_per_bidder..) {
				debug!(
					target: "matcher",
					line_item_id = %line_item.line_item_id(),
					max_deals_per_bidder = self.max_deals_per_bidder,
					"Line item dropped by max deals per bidder limit"
				);
			}
		}

		line_items
	}
}

/// Ranking order, best first
///
/// Highest unspent priority class ascending, then relative priority
/// ascending, then CPM descending; missing values always rank last.
pub fn compare_line_items(left: &LineItem, right: &LineItem) -> Ordering {
	nulls_last(
		left.highest_unspent_tokens_class(),
		right.highest_unspent_tokens_class(),
		|l, r| l.cmp(&r),
	)
	.then_with(|| nulls_last(left.relative_priority(), right.relative_priority(), |l, r| l.cmp(&r)))
	.then_with(|| nulls_last(left.cpm(), right.cpm(), |l, r| r.total_cmp(&l)))
}

fn nulls_last<T>(left: Option<T>, right: Option<T>, compare: impl FnOnce(T, T) -> Ordering) -> Ordering {
	match (left, right) {
		(Some(left), Some(right)) => compare(left, right),
		(Some(_), None) => Ordering::Less,
		(None, Some(_)) => Ordering::Greater,
		(None, None) => Ordering::Equal,
	}
}

/// `false` when the line item is capped or its caps cannot be checked
fn is_not_frequency_capped(
	capped_fcap_ids: Option<&[String]>,
	line_item: &LineItem,
	txn_log: &mut TxnLog,
) -> bool {
	let mut fcap_ids = line_item.fcap_ids().peekable();
	if fcap_ids.peek().is_none() {
		return true;
	}

	let line_item_id = line_item.line_item_id();
	let Some(capped_fcap_ids) = capped_fcap_ids else {
		txn_log
			.line_items_matched_targeting_fcap_lookup_failed
			.insert(line_item_id.to_string());
		debug!(
			target: "matcher",
			line_item_id = %line_item_id,
			source = %line_item.source(),
			"Failed to match fcap for line item because of bad response from user data service"
		);
		return false;
	};

	match fcap_ids.find(|fcap_id| capped_fcap_ids.iter().any(|capped| capped == fcap_id)) {
		Some(fcap_id) => {
			txn_log
				.line_items_matched_targeting_fcapped
				.insert(line_item_id.to_string());
			debug!(
				target: "matcher",
				line_item_id = %line_item_id,
				source = %line_item.source(),
				fcap_id = %fcap_id,
				"Matched line item is frequency capped"
			);
			false
		}
		None => true,
	}
}

/// Token and `ready_at` gates; a rejection counts as pacing-deferred
fn is_pacing_allowed(line_item: &LineItem, now: DateTime<Utc>, txn_log: &mut TxnLog) -> bool {
	let line_item_id = line_item.line_item_id();

	if !line_item.has_unspent_tokens() {
		txn_log
			.line_items_pacing_deferred
			.insert(line_item_id.to_string());
		debug!(
			target: "matcher",
			line_item_id = %line_item_id,
			source = %line_item.source(),
			"Matched line item does not have unspent tokens to be served"
		);
		return false;
	}

	if !line_item.is_ready_at(now) {
		txn_log
			.line_items_pacing_deferred
			.insert(line_item_id.to_string());
		debug!(
			target: "matcher",
			line_item_id = %line_item_id,
			source = %line_item.source(),
			ready_at = %line_item
				.ready_at()
				.map_or_else(|| "never".to_string(), |ready_at| ready_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
			now = %now.to_rfc3339_opts(SecondsFormat::Millis, true),
			"Matched line item not ready to serve"
		);
		return false;
	}

	true
}

#[cfg(test)]
mod tests {
	use chrono::{Duration, TimeZone};
	use pacer_sdk::{BidRequest, DeliverySchedule, FrequencyCap, LineItemMetaData, Token};
	use serde_json::json;

	use super::*;
	use crate::bidder::StaticBidderCatalog;
	use crate::targeting::parse_targeting_definition;

	fn now() -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2026, 5, 1, 10, 30, 0).unwrap()
	}

	fn create_test_line_item(id: &str, deal_id: &str, cpm: f64, class: i32) -> Arc<LineItem> {
		let targeting = json!({"adunit.mediatype": {"$intersects": ["banner"]}});
		let metadata = LineItemMetaData {
			line_item_id: id.to_string(),
			deal_id: Some(deal_id.to_string()),
			account_id: "acc".to_string(),
			source: "rubicon".to_string(),
			start_time_stamp: now() - Duration::hours(1),
			end_time_stamp: now() + Duration::hours(1),
			status: "active".to_string(),
			delivery_schedules: vec![DeliverySchedule {
				plan_id: format!("{id}-plan"),
				start_time_stamp: now() - Duration::hours(1),
				end_time_stamp: now() + Duration::hours(1),
				updated_time_stamp: now() - Duration::hours(2),
				tokens: vec![Token::new(class, 100)],
			}],
			targeting: Some(targeting.clone()),
			..Default::default()
		};
		let definition = parse_targeting_definition(&targeting, Some(id)).ok();
		Arc::new(LineItem::new(metadata, Some(cpm), definition, now() - Duration::minutes(1)))
	}

	fn create_test_request() -> BidRequest {
		BidRequest {
			id: "req1".to_string(),
			imp: vec![create_test_imp("imp1"), create_test_imp("imp2")],
			..Default::default()
		}
	}

	fn create_test_imp(id: &str) -> Imp {
		Imp {
			id: id.to_string(),
			banner: Some(Default::default()),
			ext: Some(json!({"prebid": {"bidder": {"rubicon": {}}}})),
			..Default::default()
		}
	}

	fn create_test_matcher(max_deals_per_bidder: usize) -> LineItemMatcher {
		LineItemMatcher::new(
			max_deals_per_bidder,
			Arc::new(StaticBidderCatalog::new(["rubicon", "appnexus"])),
		)
	}

	#[test]
	fn test_higher_cpm_wins_within_priority_class() {
		let matcher = create_test_matcher(3);
		let candidates = vec![
			create_test_line_item("L1", "d1", 5.0, 1),
			create_test_line_item("L2", "d2", 10.0, 1),
		];
		let request = create_test_request();
		let mut context = AuctionContext::new(&request, "acc");

		let result = matcher.match_line_items(&candidates, &mut context, &request.imp[0], None, now());

		assert_eq!(result.line_item_ids(), vec!["L2", "L1"]);
		assert!(context.txn_log.lost_matching_to_line_items["L1"].contains("L2"));
	}

	#[test]
	fn test_lower_priority_class_ranks_first() {
		let matcher = create_test_matcher(3);
		let candidates = vec![
			create_test_line_item("L1", "d1", 10.0, 2),
			create_test_line_item("L2", "d2", 1.0, 1),
		];
		let request = create_test_request();
		let mut context = AuctionContext::new(&request, "acc");

		let result = matcher.match_line_items(&candidates, &mut context, &request.imp[0], None, now());

		assert_eq!(result.line_item_ids(), vec!["L2", "L1"]);
	}

	#[test]
	fn test_deal_ids_are_unique_per_source() {
		let matcher = create_test_matcher(3);
		let candidates = vec![
			create_test_line_item("L1", "d1", 5.0, 1),
			create_test_line_item("L2", "d1", 10.0, 1),
		];
		let request = create_test_request();
		let mut context = AuctionContext::new(&request, "acc");

		let result = matcher.match_line_items(&candidates, &mut context, &request.imp[0], None, now());

		assert_eq!(result.line_item_ids(), vec!["L2"]);
	}

	#[test]
	fn test_top_match_is_not_repeated_across_imps() {
		let matcher = create_test_matcher(3);
		let candidates = vec![
			create_test_line_item("L1", "d1", 5.0, 1),
			create_test_line_item("L2", "d2", 10.0, 1),
		];
		let request = create_test_request();
		let mut context = AuctionContext::new(&request, "acc");

		let first = matcher.match_line_items(&candidates, &mut context, &request.imp[0], None, now());
		let second = matcher.match_line_items(&candidates, &mut context, &request.imp[1], None, now());

		assert_eq!(first.line_item_ids(), vec!["L2", "L1"]);
		assert_eq!(second.line_item_ids(), vec!["L1"]);
		assert_eq!(
			context.txn_log.line_items_sent_to_bidder_as_top_match["rubicon"],
			HashSet::from(["L1".to_string(), "L2".to_string()])
		);
	}

	#[test]
	fn test_truncates_to_max_deals_per_bidder() {
		let matcher = create_test_matcher(1);
		let candidates = vec![
			create_test_line_item("L1", "d1", 1.0, 1),
			create_test_line_item("L2", "d2", 2.0, 1),
			create_test_line_item("L3", "d3", 3.0, 1),
		];
		let request = create_test_request();
		let mut context = AuctionContext::new(&request, "acc");

		let result = matcher.match_line_items(&candidates, &mut context, &request.imp[0], None, now());

		assert_eq!(result.line_item_ids(), vec!["L3"]);
		assert_eq!(context.txn_log.line_items_ready_to_serve.len(), 3);
		assert_eq!(context.txn_log.line_items_sent_to_bidder["rubicon"].len(), 1);
	}

	#[test]
	fn test_failed_fcap_lookup_drops_capped_line_items() {
		let matcher = create_test_matcher(3);
		let capped = {
			let line_item = create_test_line_item("L1", "d1", 5.0, 1);
			let mut metadata = line_item.metadata().clone();
			metadata.frequency_caps = vec![FrequencyCap {
				fcap_id: "fcap1".to_string(),
				..Default::default()
			}];
			Arc::new(line_item.with_updated_metadata(
				metadata,
				line_item.cpm(),
				line_item.targeting().cloned(),
				now(),
			))
		};
		let candidates = vec![capped, create_test_line_item("L2", "d2", 1.0, 1)];
		let request = create_test_request();

		let mut context = AuctionContext::new(&request, "acc").with_fcap_ids(None);
		let result = matcher.match_line_items(&candidates, &mut context, &request.imp[0], None, now());
		assert_eq!(result.line_item_ids(), vec!["L2"]);
		assert!(
			context
				.txn_log
				.line_items_matched_targeting_fcap_lookup_failed
				.contains("L1")
		);

		let mut context =
			AuctionContext::new(&request, "acc").with_fcap_ids(Some(vec!["fcap1".to_string()]));
		let result = matcher.match_line_items(&candidates, &mut context, &request.imp[0], None, now());
		assert_eq!(result.line_item_ids(), vec!["L2"]);
		assert!(context.txn_log.line_items_matched_targeting_fcapped.contains("L1"));
	}

	#[test]
	fn test_pacing_gate_and_bypass() {
		let matcher = create_test_matcher(3);
		let line_item = create_test_line_item("L1", "d1", 5.0, 1);
		while line_item.inc_spent_token().is_some() {}
		let candidates = vec![line_item];
		let request = create_test_request();

		let mut context = AuctionContext::new(&request, "acc");
		let result = matcher.match_line_items(&candidates, &mut context, &request.imp[0], None, now());
		assert!(result.is_empty());
		assert!(context.txn_log.line_items_pacing_deferred.contains("L1"));

		let mut context = AuctionContext::new(&request, "acc").with_ignore_pacing(true);
		let result = matcher.match_line_items(&candidates, &mut context, &request.imp[0], None, now());
		assert_eq!(result.line_item_ids(), vec!["L1"]);
	}

	#[test]
	fn test_line_item_ahead_of_schedule_is_deferred() {
		let matcher = create_test_matcher(3);
		let line_item = create_test_line_item("L1", "d1", 5.0, 1);
		for _ in 0..60 {
			line_item.inc_spent_token();
		}
		let candidates = vec![line_item];
		let request = create_test_request();
		let mut context = AuctionContext::new(&request, "acc");

		let result = matcher.match_line_items(&candidates, &mut context, &request.imp[0], None, now());

		assert!(result.is_empty());
		assert!(context.txn_log.line_items_pacing_deferred.contains("L1"));
		assert!(context.txn_log.line_items_matched_whole_targeting.contains("L1"));
	}

	#[test]
	fn test_bidder_scope() {
		let matcher = create_test_matcher(3);
		let candidates = vec![create_test_line_item("L1", "d1", 5.0, 1)];
		let request = create_test_request();

		let mut context = AuctionContext::new(&request, "acc");
		let result =
			matcher.match_line_items(&candidates, &mut context, &request.imp[0], Some("appnexus"), now());
		assert!(result.is_empty());

		let mut context = AuctionContext::new(&request, "acc");
		let result =
			matcher.match_line_items(&candidates, &mut context, &request.imp[0], Some("rubicon"), now());
		assert_eq!(result.line_item_ids(), vec!["L1"]);
	}

	#[test]
	fn test_comparator_puts_missing_values_last() {
		let with_cpm = create_test_line_item("L1", "d1", 1.0, 1);
		let without_cpm = {
			let metadata = with_cpm.metadata().clone();
			LineItem::new(metadata, None, None, now())
		};

		assert_eq!(compare_line_items(&with_cpm, &without_cpm), Ordering::Less);
		assert_eq!(compare_line_items(&without_cpm, &with_cpm), Ordering::Greater);
	}
}
