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

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// Logging configuration constants
/// Default log level (can be overridden by RUST_LOG environment variable)
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log directory component name
pub const LOG_COMPONENT_NAME: &str = "deals";

/// Default console output enabled (can be overridden by LOG_TO_CONSOLE environment variable)
pub const DEFAULT_LOG_TO_CONSOLE: bool = false;

/// Environment variable prefix for `DealsConfig` fields
pub const ENV_PREFIX: &str = "DEALS";

// Matching configuration constants
/// Maximum line items offered to one bidder for one impression
pub const DEFAULT_MAX_DEALS_PER_BIDDER: usize = 3;

/// Currency every line-item price is normalized into
pub const DEFAULT_AD_SERVER_CURRENCY: &str = "USD";

/// Bidder adapters known to this host
pub const DEFAULT_BIDDERS: [&str; 4] = ["appnexus", "openx", "pubmatic", "rubicon"];

// Delivery progress configuration constants
/// Line-item statuses ended longer ago than this are dropped from the overall report
pub const DEFAULT_LINE_ITEM_STATUS_TTL_SECS: u64 = 2 * 60 * 60;

/// Delivery plans kept per line item in the overall report
pub const DEFAULT_CACHED_PLANS_NUMBER: usize = 20;

/// Competitors listed per line item in lost-to reports
pub const DEFAULT_COMPETITORS_NUMBER: usize = 10;

/// Line-item statuses per report in a batch
pub const DEFAULT_REPORT_BATCH_SIZE: usize = 100;

// Scheduling configuration constants
/// Interval between plan advancement passes
pub const DEFAULT_PLAN_ADVANCE_INTERVAL_SECS: u64 = 60;

/// Length of one reporting window
pub const DEFAULT_REPORT_INTERVAL_SECS: u64 = 15 * 60;

/// Finished reporting windows buffered for the reporting sink
pub const DEFAULT_REPORT_BUFFER_CAPACITY: usize = 64;

/// Deals engine configuration
///
/// Every field has a default, so an empty environment yields a usable
/// configuration. `currency_rates` maps a currency code to the value
/// of one unit in `ad_server_currency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DealsConfig {
	pub max_deals_per_bidder: usize,
	pub ad_server_currency: String,
	pub bidders: Vec<String>,
	pub deprecated_bidders: Vec<String>,
	pub line_item_status_ttl_secs: u64,
	pub cached_plans_number: usize,
	pub competitors_number: usize,
	pub report_batch_size: usize,
	pub plan_advance_interval_secs: u64,
	pub report_interval_secs: u64,
	pub report_buffer_capacity: usize,
	/// Planner response used to populate the registry at startup
	pub line_items_file: Option<String>,
	pub host_id: Option<String>,
	pub region: Option<String>,
	pub vendor: Option<String>,
	pub currency_rates: HashMap<String, f64>,
}

impl Default for DealsConfig {
	fn default() -> Self {
		Self {
			max_deals_per_bidder: DEFAULT_MAX_DEALS_PER_BIDDER,
			ad_server_currency: DEFAULT_AD_SERVER_CURRENCY.to_string(),
			bidders: DEFAULT_BIDDERS.iter().map(|bidder| bidder.to_string()).collect(),
			deprecated_bidders: Vec::new(),
			line_item_status_ttl_secs: DEFAULT_LINE_ITEM_STATUS_TTL_SECS,
			cached_plans_number: DEFAULT_CACHED_PLANS_NUMBER,
			competitors_number: DEFAULT_COMPETITORS_NUMBER,
			report_batch_size: DEFAULT_REPORT_BATCH_SIZE,
			plan_advance_interval_secs: DEFAULT_PLAN_ADVANCE_INTERVAL_SECS,
			report_interval_secs: DEFAULT_REPORT_INTERVAL_SECS,
			report_buffer_capacity: DEFAULT_REPORT_BUFFER_CAPACITY,
			line_items_file: None,
			host_id: None,
			region: None,
			vendor: None,
			currency_rates: HashMap::new(),
		}
	}
}

impl DealsConfig {
	/// Load configuration from environment variables
	pub fn from_env() -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(Self::environment())
			.build()?;

		cfg.try_deserialize()
	}

	/// Load configuration from file, overridden by environment variables
	pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
		let cfg = config::Config::builder()
			.add_source(config::File::with_name(path))
			.add_source(Self::environment())
			.build()?;

		cfg.try_deserialize()
	}

	fn environment() -> config::Environment {
		config::Environment::with_prefix(ENV_PREFIX)
			.try_parsing(true)
			.list_separator(",")
			.with_list_parse_key("bidders")
			.with_list_parse_key("deprecated_bidders")
	}
}
