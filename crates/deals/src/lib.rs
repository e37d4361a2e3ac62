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

//! Pacer Deals
//!
//! Line item matching and pacing for guaranteed deals in real-time
//! bidding. Given an auction request, the engine finds the line items
//! whose targeting matches each impression, ranks them per bidder and
//! applies frequency caps and token-bucket pacing, while keeping
//! delivery progress counters for periodic reporting.
//!
//! Architecture:
//! - Concurrent line item registry refreshed from planner metadata
//! - Targeting rules parsed once into expression trees
//! - Lock-free token spend and delivery counters shared by auctions
//! - Double-buffered delivery progress with bounded report hand-off
//! - Background scheduler for plan advance and window rotation

pub mod bidder;
pub mod config;
pub mod currency;
pub mod lineitem;
pub mod logging;
pub mod matcher;
pub mod progress;
pub mod scheduler;
pub mod service;
pub mod targeting;
pub mod txn_log;
pub mod types;

pub use bidder::{BidderAliases, BidderCatalog, StaticBidderCatalog};
pub use config::DealsConfig;
pub use currency::{CurrencyConverter, CurrencyError, StaticRatesConverter};
pub use lineitem::{DeliveryPlan, DeliveryToken, LineItem, TokenSpend};
pub use matcher::LineItemMatcher;
pub use progress::{
	DeliveryProgress, DeliveryProgressReportFactory, DeliveryProgressService, DeliveryStatsSink,
	LineItemStatus, ReportBuffer, ReportBufferError, ReportConsumer, ReportProducer,
};
pub use scheduler::{PacingScheduler, SchedulerConfig, SchedulerError};
pub use service::{LineItemService, decode_line_item_records};
pub use targeting::{TargetingDefinition, TargetingSyntaxError, parse_targeting_definition};
pub use txn_log::TxnLog;
pub use types::*;
