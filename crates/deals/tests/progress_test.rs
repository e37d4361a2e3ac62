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

//! End-to-end delivery progress tests
//!
//! Auctions are matched through the line item service, accounted in
//! the delivery progress service and handed to a report buffer the way
//! the binary wires them.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use chrono::{DateTime, Duration, TimeZone, Utc};
use pacer_deals::{
	AuctionContext, DealsConfig, DeliveryProgressService, LineItemService, ReportBuffer,
	ReportBufferError, ReportConsumer, StaticBidderCatalog, StaticRatesConverter,
};
use pacer_sdk::{BidRequest, DeliverySchedule, Imp, LineItemMetaData, Price, Site, Token};
use serde_json::json;

fn now() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2026, 5, 1, 10, 0, 0).unwrap()
}

fn create_test_record(id: &str, cpm: f64) -> LineItemMetaData {
	LineItemMetaData {
		line_item_id: id.to_string(),
		deal_id: Some(format!("deal-{id}")),
		account_id: "1001".to_string(),
		source: "rubicon".to_string(),
		price: Some(Price::new(cpm, "USD")),
		start_time_stamp: now() - Duration::hours(1),
		end_time_stamp: now() + Duration::hours(1),
		status: "active".to_string(),
		delivery_schedules: vec![DeliverySchedule {
			plan_id: format!("{id}-plan"),
			start_time_stamp: now() - Duration::hours(1),
			end_time_stamp: now() + Duration::hours(1),
			updated_time_stamp: now() - Duration::hours(2),
			tokens: vec![Token::new(1, 100)],
		}],
		targeting: Some(json!({
			"$and": [
				{"adunit.mediatype": {"$intersects": ["banner"]}},
				{"site.domain": {"$in": ["sports.com"]}}
			]
		})),
		..Default::default()
	}
}

fn create_test_request() -> BidRequest {
	BidRequest {
		id: "auction".to_string(),
		imp: vec![Imp {
			id: "imp1".to_string(),
			banner: Some(Default::default()),
			ext: Some(json!({"prebid": {"bidder": {"rubicon": {}}}})),
			..Default::default()
		}],
		site: Some(Site {
			domain: Some("sports.com".to_string()),
			..Default::default()
		}),
		..Default::default()
	}
}

struct Harness {
	line_items: Arc<LineItemService>,
	progress: DeliveryProgressService,
	reports: ReportConsumer,
}

fn create_harness() -> Harness {
	let config = DealsConfig::default();
	let line_items = Arc::new(LineItemService::new(
		&config,
		Arc::new(StaticBidderCatalog::new(["rubicon"])),
		Arc::new(StaticRatesConverter::new("USD", &HashMap::new())),
	));
	line_items.update_line_items(
		vec![create_test_record("L1", 10.0), create_test_record("L2", 5.0)],
		true,
		now(),
	);

	let (producer, reports) = ReportBuffer::new(4).split();
	let progress = DeliveryProgressService::new(&config, line_items.clone(), Arc::new(producer), now());
	progress.process_delivery_progress_update();

	Harness {
		line_items,
		progress,
		reports,
	}
}

/// Run one auction where the top match is served to the client
fn run_auction(harness: &Harness, at: DateTime<Utc>) -> String {
	let request = create_test_request();
	let mut context = AuctionContext::new(&request, "1001");
	let result = harness
		.line_items
		.find_matching_line_items(&mut context, &request.imp[0], at);

	let winner = result.line_item_ids()[0].to_string();
	context.txn_log.record_received_from_bidder("rubicon", &winner);
	context.txn_log.line_items_sent_to_client.insert(winner.clone());
	context
		.txn_log
		.line_items_sent_to_client_as_top_match
		.insert(winner.clone());
	harness
		.progress
		.process_auction_event(&context.txn_log, "1001");
	winner
}

#[test]
fn test_window_report_reaches_the_buffer() {
	let harness = create_harness();
	for _ in 0..3 {
		assert_eq!(run_auction(&harness, now()), "L1");
	}
	harness.progress.process_line_item_win_event("L1");

	let later = now() + Duration::minutes(5);
	harness.progress.create_delivery_progress_reports(later);

	let batch = harness.reports.try_recv().unwrap();
	assert_eq!(batch.data_window_end_time_stamp.as_deref(), Some("2026-05-01T10:05:00.000Z"));
	assert_eq!(batch.reports.len(), 1);

	let report = &batch.reports[0];
	assert_eq!(report.client_auctions, 3);
	assert_eq!(report.data_window_start_time_stamp.as_deref(), Some("2026-05-01T10:00:00.000Z"));
	assert_eq!(report.line_item_status.len(), 2);

	let winner = &report.line_item_status[0];
	assert_eq!(winner.line_item_id, "L1");
	assert_eq!(winner.deal_id.as_deref(), Some("deal-L1"));
	assert_eq!(winner.account_auctions, Some(3));
	assert_eq!(winner.domain_matched, 3);
	assert_eq!(winner.target_matched, 3);
	assert_eq!(winner.sent_to_bidder_as_top_match, 3);
	assert_eq!(winner.received_from_bidder, 3);
	assert_eq!(winner.sent_to_client_as_top_match, 3);
	assert_eq!(winner.events[0].event_type, "win");
	assert_eq!(winner.events[0].count, 1);
	let token = &winner.delivery_schedule[0].tokens[0];
	assert_eq!((token.total, token.spent, token.total_spent), (100, 3, Some(3)));
	assert_eq!(winner.ready_at, None);

	let loser = &report.line_item_status[1];
	assert_eq!(loser.line_item_id, "L2");
	assert_eq!(loser.sent_to_client_as_top_match, 0);
	assert_eq!(loser.lost_to_line_items.len(), 1);
	assert_eq!(loser.lost_to_line_items[0].line_item_id, "L1");
	assert_eq!(loser.lost_to_line_items[0].line_item_source.as_deref(), Some("rubicon"));
	assert_eq!(loser.lost_to_line_items[0].count, 3);

	assert!(matches!(harness.reports.try_recv(), Err(ReportBufferError::Empty)));
}

#[test]
fn test_next_window_only_counts_new_spend() {
	let harness = create_harness();
	run_auction(&harness, now());
	run_auction(&harness, now());
	harness
		.progress
		.create_delivery_progress_reports(now() + Duration::minutes(5));
	harness.reports.try_recv().unwrap();

	harness.progress.process_delivery_progress_update();
	run_auction(&harness, now() + Duration::minutes(6));
	harness
		.progress
		.create_delivery_progress_reports(now() + Duration::minutes(10));

	let batch = harness.reports.try_recv().unwrap();
	let report = &batch.reports[0];
	assert_eq!(report.client_auctions, 1);
	let winner = &report.line_item_status[0];
	let token = &winner.delivery_schedule[0].tokens[0];
	assert_eq!((token.spent, token.total_spent), (1, Some(3)));
}

#[test]
fn test_overall_report_includes_open_window() {
	let harness = create_harness();
	for _ in 0..3 {
		run_auction(&harness, now());
	}

	let report = harness
		.progress
		.get_overall_delivery_progress_report(now());

	assert_eq!(report.client_auctions, 3);
	assert_eq!(report.data_window_start_time_stamp, None);
	let winner = &report.line_item_status[0];
	assert_eq!(winner.line_item_id, "L1");
	assert_eq!(winner.spent_tokens, Some(3));
	assert_eq!(winner.pacing_frequency, Some(72_000));
	// three serves at a 72s rate from a 09:00 plan start
	assert_eq!(winner.ready_at.as_deref(), Some("2026-05-01T09:03:36.000Z"));

	let snapshot = harness.progress.get_line_item_status_report("L1").unwrap();
	assert_eq!(snapshot.spent_tokens, Some(3));
	assert_eq!(snapshot.account_id.as_deref(), Some("1001"));
	assert!(harness.progress.get_line_item_status_report("missing").is_none());
}

#[test]
fn test_shutdown_flushes_open_window() {
	let harness = create_harness();
	run_auction(&harness, now());

	harness.progress.shutdown(now() + Duration::seconds(30));

	let batch = harness.reports.try_recv().unwrap();
	assert_eq!(batch.reports[0].client_auctions, 1);
}

#[test]
fn test_spends_racing_registry_refresh_are_counted() {
	let harness = create_harness();

	let granted: usize = thread::scope(|scope| {
		let spenders: Vec<_> = (0..4)
			.map(|_| {
				scope.spawn(|| {
					(0..50)
						.filter(|_| {
							harness
								.line_items
								.get_line_item_by_id("L1")
								.and_then(|line_item| line_item.inc_spent_token())
								.is_some()
						})
						.count()
				})
			})
			.collect();

		for revision in 1..=300 {
			let mut record = create_test_record("L1", 10.0);
			record.delivery_schedules[0].updated_time_stamp += Duration::seconds(revision);
			harness
				.line_items
				.update_line_items(vec![record, create_test_record("L2", 5.0)], true, now());
		}

		spenders.into_iter().map(|spender| spender.join().unwrap()).sum()
	});

	let line_item = harness.line_items.get_line_item_by_id("L1").unwrap();
	assert_eq!(line_item.spent_tokens(), Some(granted as u64));
}
