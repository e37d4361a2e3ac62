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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Delivery progress report for one reporting window (or the overall
/// aggregate) as uploaded to the delivery stats service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryProgressReport {
	pub report_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub instance_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub region: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub vendor: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub report_time_stamp: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data_window_start_time_stamp: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data_window_end_time_stamp: Option<String>,
	pub client_auctions: u64,
	#[serde(default)]
	pub line_item_status: Vec<LineItemStatusReport>,
}

/// A window report split into several uploads sharing one report id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryProgressReportBatch {
	pub report_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data_window_end_time_stamp: Option<String>,
	pub reports: Vec<DeliveryProgressReport>,
}

/// Per line item counters within a delivery progress report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemStatusReport {
	pub line_item_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub line_item_source: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deal_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ext_line_item_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub account_auctions: Option<u64>,
	pub domain_matched: u64,
	pub target_matched: u64,
	pub target_matched_but_fcapped: u64,
	pub target_matched_but_fcap_lookup_failed: u64,
	pub pacing_deferred: u64,
	pub sent_to_bidder: u64,
	pub sent_to_bidder_as_top_match: u64,
	pub received_from_bidder: u64,
	pub received_from_bidder_invalidated: u64,
	pub sent_to_client: u64,
	pub sent_to_client_as_top_match: u64,
	#[serde(default)]
	pub lost_to_line_items: Vec<LostToLineItemReport>,
	#[serde(default)]
	pub events: Vec<EventReport>,
	#[serde(default)]
	pub delivery_schedule: Vec<DeliveryScheduleReport>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ready_at: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub spent_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pacing_frequency: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LostToLineItemReport {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub line_item_source: Option<String>,
	pub line_item_id: String,
	pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReport {
	#[serde(rename = "type")]
	pub event_type: String,
	pub count: u64,
}

/// Delivery plan as reported: schedule window plus token usage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryScheduleReport {
	pub plan_id: String,
	pub plan_start_time_stamp: String,
	pub plan_expiration_time_stamp: String,
	pub plan_updated_time_stamp: String,
	pub tokens: Vec<TokenReport>,
}

/// Token usage of one priority class
///
/// `spent` covers the reported window; `total_spent` is the lifetime
/// spend from the overall aggregate when known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenReport {
	#[serde(rename = "class")]
	pub priority_class: i32,
	pub total: u64,
	pub spent: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub total_spent: Option<u64>,
}

/// Administrative view of a single line item's pacing state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemStatusSnapshot {
	pub line_item_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub account_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delivery_schedule: Option<DeliveryScheduleReport>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ready_to_serve_timestamp: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub spent_tokens: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pacing_frequency: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub target: Option<Value>,
}
