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

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use pacer_sdk::{Imp, LineItemMetaData};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bidder::BidderCatalog;
use crate::config::DealsConfig;
use crate::currency::CurrencyConverter;
use crate::lineitem::LineItem;
use crate::matcher::LineItemMatcher;
use crate::targeting::{TargetingDefinition, parse_targeting_definition};
use crate::types::{AuctionContext, LineItemError, MatchLineItemsResult};

/// Registry of line items and entry point for matching
///
/// The registry maps line item id to an immutable `Arc<LineItem>`.
/// Metadata refreshes replace whole entries, so an auction holding a
/// line item never observes a half-applied update; pacing state lives
/// inside the line item and is carried over on replacement.
///
/// Design principles:
/// - Matching only reads the registry and never blocks on a refresh
/// - A malformed record or targeting rule affects only its line item
/// - While the planner is unresponsive the registry keeps serving the
///   last known line items
pub struct LineItemService {
	line_items: DashMap<String, Arc<LineItem>>,
	matcher: LineItemMatcher,
	currency_converter: Arc<dyn CurrencyConverter>,
	ad_server_currency: String,
	is_planner_responsive: AtomicBool,
}

impl LineItemService {
	pub fn new(
		config: &DealsConfig,
		bidder_catalog: Arc<dyn BidderCatalog>,
		currency_converter: Arc<dyn CurrencyConverter>,
	) -> Self {
		Self {
			line_items: DashMap::new(),
			matcher: LineItemMatcher::new(config.max_deals_per_bidder, bidder_catalog),
			currency_converter,
			ad_server_currency: config.ad_server_currency.clone(),
			is_planner_responsive: AtomicBool::new(true),
		}
	}

	pub fn get_line_item_by_id(&self, line_item_id: &str) -> Option<Arc<LineItem>> {
		self.line_items
			.get(line_item_id)
			.map(|entry| Arc::clone(entry.value()))
	}

	/// Snapshot of every registered line item
	pub fn line_items(&self) -> Vec<Arc<LineItem>> {
		self.line_items
			.iter()
			.map(|entry| Arc::clone(entry.value()))
			.collect()
	}

	pub fn line_item_ids(&self) -> HashSet<String> {
		self.line_items.iter().map(|entry| entry.key().clone()).collect()
	}

	/// The account has a line item with a plan covering `now`
	pub fn account_has_deals(&self, account_id: &str, now: DateTime<Utc>) -> bool {
		!account_id.is_empty()
			&& self.line_items.iter().any(|entry| {
				let line_item = entry.value();
				line_item.account_id() == account_id && line_item.is_active_at(now)
			})
	}

	/// Line items to offer for an impression, across all its bidders
	pub fn find_matching_line_items(
		&self,
		context: &mut AuctionContext<'_>,
		imp: &Imp,
		now: DateTime<Utc>,
	) -> MatchLineItemsResult {
		self.find_matching(context, imp, None, now)
	}

	/// Line items to offer for an impression to a single bidder
	pub fn find_matching_line_items_for_bidder(
		&self,
		context: &mut AuctionContext<'_>,
		imp: &Imp,
		bidder: &str,
		now: DateTime<Utc>,
	) -> MatchLineItemsResult {
		self.find_matching(context, imp, Some(bidder), now)
	}

	fn find_matching(
		&self,
		context: &mut AuctionContext<'_>,
		imp: &Imp,
		bidder: Option<&str>,
		now: DateTime<Utc>,
	) -> MatchLineItemsResult {
		let account_id = context.account_id.trim();
		if account_id.is_empty() {
			return MatchLineItemsResult::empty();
		}

		let candidates: Vec<Arc<LineItem>> = self
			.line_items
			.iter()
			.filter(|entry| entry.value().account_id() == account_id)
			.map(|entry| Arc::clone(entry.value()))
			.collect();
		if candidates.is_empty() {
			debug!(target: "line_item_service", account_id = %account_id, "There are no line items for account");
			return MatchLineItemsResult::empty();
		}

		self.matcher
			.match_line_items(&candidates, context, imp, bidder, now)
	}

	pub fn is_planner_responsive(&self) -> bool {
		self.is_planner_responsive.load(Ordering::Acquire)
	}

	pub fn update_is_planner_responsive(&self, is_planner_responsive: bool) {
		self.is_planner_responsive
			.store(is_planner_responsive, Ordering::Release);
	}

	/// Apply a full Planner response
	///
	/// Only a responsive planner's response changes the registry:
	/// inactive or expired records and expired registry entries are
	/// removed, then every active record is inserted or merged into its
	/// existing entry. Line items absent from the response are kept.
	pub fn update_line_items(
		&self,
		records: Vec<LineItemMetaData>,
		is_planner_responsive: bool,
		now: DateTime<Utc>,
	) {
		self.update_is_planner_responsive(is_planner_responsive);
		if !is_planner_responsive {
			return;
		}

		self.remove_inactive_line_items(&records, now);

		for record in records {
			if !record.is_active_status() || is_expired(now, record.end_time_stamp) {
				continue;
			}
			if let Err(e) = self.update_line_item(record, now) {
				warn!(target: "line_item_service", error = %e, "Skipping malformed line item record");
			}
		}
	}

	fn remove_inactive_line_items(&self, records: &[LineItemMetaData], now: DateTime<Utc>) {
		let mut to_remove: HashSet<String> = records
			.iter()
			.filter(|record| !record.is_active_status() || is_expired(now, record.end_time_stamp))
			.map(|record| record.line_item_id.clone())
			.collect();
		to_remove.extend(
			self.line_items
				.iter()
				.filter(|entry| is_expired(now, entry.value().end_time_stamp()))
				.map(|entry| entry.key().clone()),
		);

		to_remove.retain(|line_item_id| self.line_items.remove(line_item_id).is_some());
		if !to_remove.is_empty() {
			info!(
				target: "line_item_service",
				line_item_ids = %join_ids(&to_remove),
				"Line items were dropped as expired or inactive"
			);
		}
	}

	fn update_line_item(&self, record: LineItemMetaData, now: DateTime<Utc>) -> Result<(), LineItemError> {
		validate_record(&record)?;
		let cpm = self.normalized_cpm(&record)?;
		let targeting = make_targeting(&record);

		match self.line_items.entry(record.line_item_id.clone()) {
			Entry::Occupied(mut entry) => {
				let updated = entry
					.get()
					.with_updated_metadata(record, cpm, targeting, now);
				entry.insert(Arc::new(updated));
			}
			Entry::Vacant(entry) => {
				info!(
					target: "line_item_service",
					line_item_id = %record.line_item_id,
					account_id = %record.account_id,
					source = %record.source,
					"Line item registered"
				);
				entry.insert(Arc::new(LineItem::new(record, cpm, targeting, now)));
			}
		}
		Ok(())
	}

	/// Price converted into the ad-server currency
	fn normalized_cpm(&self, record: &LineItemMetaData) -> Result<Option<f64>, LineItemError> {
		let Some(price) = &record.price else {
			return Ok(None);
		};
		if price.currency.eq_ignore_ascii_case(&self.ad_server_currency) {
			return Ok(Some(price.cpm));
		}

		self.currency_converter
			.convert(price.cpm, &price.currency, &self.ad_server_currency)
			.map(Some)
			.map_err(|source| LineItemError::Currency {
				line_item_id: record.line_item_id.clone(),
				source,
			})
	}

	pub fn invalidate_line_items_by_ids(&self, line_item_ids: &[String]) {
		for line_item_id in line_item_ids {
			self.line_items.remove(line_item_id);
		}
		info!(
			target: "line_item_service",
			line_item_ids = %line_item_ids.join(", "),
			"Line items were removed"
		);
	}

	pub fn invalidate_line_items(&self) {
		let removed = self.line_item_ids();
		self.line_items.clear();
		info!(
			target: "line_item_service",
			line_item_ids = %join_ids(&removed),
			"Line items were removed"
		);
	}

	/// Move every line item whose plan has ended onto its next plan
	pub fn advance_to_next_plan(&self, now: DateTime<Utc>) {
		let is_planner_responsive = self.is_planner_responsive();
		for line_item in self.line_items() {
			line_item.advance_to_next_plan(now, is_planner_responsive);
		}
	}
}

/// Decode a Planner response, skipping records that fail to decode
pub fn decode_line_item_records(json: &str) -> Result<Vec<LineItemMetaData>, LineItemError> {
	let elements: Vec<Value> = serde_json::from_str(json)?;

	let records = elements
		.into_iter()
		.enumerate()
		.filter_map(|(index, element)| match serde_json::from_value(element) {
			Ok(record) => Some(record),
			Err(e) => {
				warn!(target: "line_item_service", index, error = %e, "Skipping undecodable line item record");
				None
			}
		})
		.collect();
	Ok(records)
}

fn validate_record(record: &LineItemMetaData) -> Result<(), LineItemError> {
	let line_item_id = &record.line_item_id;
	if line_item_id.is_empty() {
		return Err(LineItemError::EmptyId);
	}
	if record.account_id.is_empty() {
		return Err(LineItemError::MissingAccount(line_item_id.clone()));
	}
	if record.source.is_empty() {
		return Err(LineItemError::MissingSource(line_item_id.clone()));
	}
	if record.end_time_stamp < record.start_time_stamp {
		return Err(LineItemError::InvalidWindow(line_item_id.clone()));
	}
	Ok(())
}

/// A rule that fails to parse leaves the line item without targeting
fn make_targeting(record: &LineItemMetaData) -> Option<TargetingDefinition> {
	let Some(node) = &record.targeting else {
		warn!(
			target: "line_item_service",
			line_item_id = %record.line_item_id,
			"Line item has no targeting definition"
		);
		return None;
	};

	match parse_targeting_definition(node, Some(&record.line_item_id)) {
		Ok(definition) => Some(definition),
		Err(e) => {
			warn!(
				target: "line_item_service",
				line_item_id = %record.line_item_id,
				account_id = %record.account_id,
				source = %record.source,
				error = %e,
				"Line item targeting parsing failed"
			);
			None
		}
	}
}

fn is_expired(now: DateTime<Utc>, end_time_stamp: DateTime<Utc>) -> bool {
	now > end_time_stamp
}

fn join_ids(ids: &HashSet<String>) -> String {
	let mut ids: Vec<&str> = ids.iter().map(String::as_str).collect();
	ids.sort_unstable();
	ids.join(", ")
}
