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

use pacer_sdk::BidRequest;

use crate::currency::CurrencyError;
use crate::lineitem::LineItem;
use crate::txn_log::TxnLog;

/// Per-auction input to line-item matching
///
/// Borrowed for the duration of one auction. The txn log is owned and
/// accumulates bookkeeping across every impression of the auction so
/// that a line item is top match for at most one impression per source.
#[derive(Debug)]
pub struct AuctionContext<'a> {
	pub bid_request: &'a BidRequest,
	/// Account the request belongs to; blank means no deals
	pub account_id: String,
	/// Frequency caps the user has reached; `None` when the lookup failed
	pub fcap_ids: Option<Vec<String>>,
	/// Debug override that disables the pacing gates
	pub ignore_pacing: bool,
	pub txn_log: TxnLog,
}

impl<'a> AuctionContext<'a> {
	pub fn new(bid_request: &'a BidRequest, account_id: impl Into<String>) -> Self {
		Self {
			bid_request,
			account_id: account_id.into(),
			fcap_ids: Some(Vec::new()),
			ignore_pacing: false,
			txn_log: TxnLog::new(),
		}
	}

	pub fn with_fcap_ids(mut self, fcap_ids: Option<Vec<String>>) -> Self {
		self.fcap_ids = fcap_ids;
		self
	}

	pub fn with_ignore_pacing(mut self, ignore_pacing: bool) -> Self {
		self.ignore_pacing = ignore_pacing;
		self
	}
}

/// Line items selected for one impression, best first within each source
#[derive(Debug, Clone, Default)]
pub struct MatchLineItemsResult {
	pub line_items: Vec<Arc<LineItem>>,
}

impl MatchLineItemsResult {
	pub fn empty() -> Self {
		Self::default()
	}

	pub fn is_empty(&self) -> bool {
		self.line_items.is_empty()
	}

	pub fn line_item_ids(&self) -> Vec<&str> {
		self.line_items.iter().map(|line_item| line_item.line_item_id()).collect()
	}
}

/// Rejected line-item metadata record
#[derive(Debug, thiserror::Error)]
pub enum LineItemError {
	#[error("Line item id is empty")]
	EmptyId,
	#[error("Line item {0} has no account id")]
	MissingAccount(String),
	#[error("Line item {0} has no source")]
	MissingSource(String),
	#[error("Line item {0} ends before it starts")]
	InvalidWindow(String),
	#[error("Line item {line_item_id} price could not be converted: {source}")]
	Currency {
		line_item_id: String,
		#[source]
		source: CurrencyError,
	},
	#[error("Line item record could not be decoded: {0}")]
	Decode(#[from] serde_json::Error),
}
