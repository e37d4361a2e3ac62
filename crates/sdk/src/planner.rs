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

/// Status value marking a line item as eligible for delivery
pub const LINE_ITEM_STATUS_ACTIVE: &str = "active";

/// Line item record delivered by the Planner
///
/// One record describes a guaranteed-delivery contract together with
/// every delivery schedule (pacing plan) known for it. Records are
/// pushed as a full list on each metadata refresh.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemMetaData {
	pub line_item_id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ext_line_item_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deal_id: Option<String>,
	#[serde(default)]
	pub sizes: Vec<LineItemSize>,
	#[serde(default)]
	pub account_id: String,
	#[serde(default)]
	pub source: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub price: Option<Price>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub relative_priority: Option<i32>,
	pub start_time_stamp: DateTime<Utc>,
	pub end_time_stamp: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_time_stamp: Option<DateTime<Utc>>,
	#[serde(default)]
	pub status: String,
	#[serde(default)]
	pub frequency_caps: Vec<FrequencyCap>,
	#[serde(default)]
	pub delivery_schedules: Vec<DeliverySchedule>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub targeting: Option<Value>,
}

impl LineItemMetaData {
	pub fn is_active_status(&self) -> bool {
		self.status == LINE_ITEM_STATUS_ACTIVE
	}
}

/// CPM price in a given currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
	pub cpm: f64,
	pub currency: String,
}

impl Price {
	pub fn new(cpm: f64, currency: impl Into<String>) -> Self {
		Self {
			cpm,
			currency: currency.into(),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineItemSize {
	pub w: i64,
	pub h: i64,
}

/// Frequency cap declared on a line item
///
/// Only `fcap_id` is consulted by matching; the other fields describe
/// the cap to the external user-data store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyCap {
	pub fcap_id: String,
	#[serde(default)]
	pub count: u64,
	#[serde(default)]
	pub periods: u64,
	#[serde(default)]
	pub period_type: String,
}

/// One pacing plan version for a line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverySchedule {
	pub plan_id: String,
	pub start_time_stamp: DateTime<Utc>,
	pub end_time_stamp: DateTime<Utc>,
	pub updated_time_stamp: DateTime<Utc>,
	#[serde(default)]
	pub tokens: Vec<Token>,
}

/// Token allotment for one priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
	#[serde(rename = "class")]
	pub priority_class: i32,
	pub total: u64,
}

impl Token {
	pub fn new(priority_class: i32, total: u64) -> Self {
		Self {
			priority_class,
			total,
		}
	}
}
