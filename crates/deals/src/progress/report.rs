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
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pacer_sdk::{
	DeliveryProgressReport, DeliveryProgressReportBatch, DeliveryScheduleReport, EventReport,
	LineItemStatusReport, LineItemStatusSnapshot, LostToLineItemReport, TokenReport,
};
use tracing::info;
use uuid::Uuid;

use super::delivery_progress::DeliveryProgress;
use super::status::{LineItemStatus, StatusCounter};
use crate::config::DealsConfig;
use crate::lineitem::DeliveryPlan;
use crate::service::LineItemService;

const TIME_STAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// `yyyy-MM-ddTHH:mm:ss.SSSZ` in UTC
pub fn format_time_stamp(time_stamp: DateTime<Utc>) -> String {
	time_stamp.format(TIME_STAMP_FORMAT).to_string()
}

/// Builds delivery progress reports from window or overall counters
///
/// Window reports describe what happened between two rotations and
/// leave out line items that had no delivery schedule in the window.
/// Overall reports describe the live pacing state and carry the
/// registry's `readyAt`, spent tokens and delivery rate.
pub struct DeliveryProgressReportFactory {
	host_id: Option<String>,
	region: Option<String>,
	vendor: Option<String>,
	competitors_number: usize,
	line_item_service: Arc<LineItemService>,
}

impl DeliveryProgressReportFactory {
	pub fn new(config: &DealsConfig, line_item_service: Arc<LineItemService>) -> Self {
		Self {
			host_id: config.host_id.clone(),
			region: config.region.clone(),
			vendor: config.vendor.clone(),
			competitors_number: config.competitors_number,
			line_item_service,
		}
	}

	pub fn from_delivery_progress(
		&self,
		progress: &DeliveryProgress,
		now: Option<DateTime<Utc>>,
		is_overall: bool,
	) -> DeliveryProgressReport {
		let statuses = progress.line_item_statuses();
		DeliveryProgressReport {
			line_item_status: self.line_item_status_reports(progress, &statuses, Some(progress), is_overall),
			..self.report_header(Uuid::new_v4().to_string(), progress, now, is_overall)
		}
	}

	/// Split a report into uploads of at most `batch_size` line items
	///
	/// All reports of a batch share one report id. Spent totals per
	/// token class are taken from `overall` when given.
	pub fn batch_from_delivery_progress(
		&self,
		progress: &DeliveryProgress,
		overall: Option<&DeliveryProgress>,
		now: Option<DateTime<Utc>>,
		batch_size: usize,
		is_overall: bool,
	) -> DeliveryProgressReportBatch {
		let report_id = Uuid::new_v4().to_string();
		let statuses = progress.line_item_statuses();

		let reports: Vec<DeliveryProgressReport> = statuses
			.chunks(batch_size.max(1))
			.map(|chunk| DeliveryProgressReport {
				line_item_status: self.line_item_status_reports(progress, chunk, overall, is_overall),
				..self.report_header(report_id.clone(), progress, now, is_overall)
			})
			.collect();

		log_not_reported_line_items(&statuses, &reports);

		DeliveryProgressReportBatch {
			data_window_end_time_stamp: progress
				.end_time_stamp()
				.filter(|_| !is_overall)
				.map(format_time_stamp),
			report_id,
			reports,
		}
	}

	/// Stamp a report with the time it is actually sent
	pub fn with_report_time_stamp(
		&self,
		report: DeliveryProgressReport,
		now: DateTime<Utc>,
	) -> DeliveryProgressReport {
		DeliveryProgressReport {
			report_time_stamp: Some(format_time_stamp(now)),
			..report
		}
	}

	/// Administrative view of one registered line item
	pub fn line_item_status_report(&self, line_item_id: &str) -> Option<LineItemStatusSnapshot> {
		let line_item = self.line_item_service.get_line_item_by_id(line_item_id)?;
		let active_plan = line_item.active_plan();

		Some(LineItemStatusSnapshot {
			line_item_id: line_item_id.to_string(),
			account_id: Some(line_item.account_id().to_string()),
			delivery_schedule: active_plan.as_deref().map(|plan| to_delivery_schedule(plan, None)),
			ready_to_serve_timestamp: line_item.ready_at(),
			spent_tokens: active_plan.as_ref().map(|plan| plan.spent_tokens()),
			pacing_frequency: active_plan.as_ref().and_then(|plan| plan.delivery_rate_millis()),
			target: line_item.raw_targeting().cloned(),
		})
	}

	fn report_header(
		&self,
		report_id: String,
		progress: &DeliveryProgress,
		now: Option<DateTime<Utc>>,
		is_overall: bool,
	) -> DeliveryProgressReport {
		let window_time_stamp = |time_stamp: Option<DateTime<Utc>>| {
			if is_overall {
				None
			} else {
				time_stamp.map(format_time_stamp)
			}
		};

		DeliveryProgressReport {
			report_id,
			instance_id: self.host_id.clone(),
			region: self.region.clone(),
			vendor: self.vendor.clone(),
			report_time_stamp: now.map(format_time_stamp),
			data_window_start_time_stamp: window_time_stamp(Some(progress.start_time_stamp())),
			data_window_end_time_stamp: window_time_stamp(progress.end_time_stamp()),
			client_auctions: progress.requests(),
			line_item_status: Vec::new(),
		}
	}

	fn line_item_status_reports(
		&self,
		progress: &DeliveryProgress,
		statuses: &[Arc<LineItemStatus>],
		overall: Option<&DeliveryProgress>,
		is_overall: bool,
	) -> Vec<LineItemStatusReport> {
		statuses
			.iter()
			.filter_map(|status| {
				let overall_status = overall.and_then(|overall| overall.line_item_status(status.line_item_id()));
				self.to_line_item_status_report(progress, status, overall_status.as_deref(), is_overall)
			})
			.collect()
	}

	fn to_line_item_status_report(
		&self,
		progress: &DeliveryProgress,
		status: &LineItemStatus,
		overall_status: Option<&LineItemStatus>,
		is_overall: bool,
	) -> Option<LineItemStatusReport> {
		let line_item = self.line_item_service.get_line_item_by_id(status.line_item_id());
		if is_overall && line_item.is_none() {
			return None;
		}

		let active_plan = line_item.as_ref().and_then(|line_item| line_item.active_plan());
		let delivery_schedule = delivery_schedules(status, overall_status, active_plan.as_deref());
		if delivery_schedule.is_empty() && !is_overall {
			return None;
		}

		let registry = line_item.as_deref();
		let account_id = status
			.account_id()
			.or_else(|| registry.map(|line_item| line_item.account_id()));

		Some(LineItemStatusReport {
			line_item_id: status.line_item_id().to_string(),
			line_item_source: status
				.source()
				.or_else(|| registry.map(|line_item| line_item.source()))
				.map(str::to_string),
			deal_id: status
				.deal_id()
				.or_else(|| registry.and_then(|line_item| line_item.deal_id()))
				.map(str::to_string),
			ext_line_item_id: status
				.ext_line_item_id()
				.or_else(|| registry.and_then(|line_item| line_item.ext_line_item_id()))
				.map(str::to_string),
			account_auctions: account_id.and_then(|account_id| progress.account_requests(account_id)),
			domain_matched: status.get(StatusCounter::DomainMatched),
			target_matched: status.get(StatusCounter::TargetMatched),
			target_matched_but_fcapped: status.get(StatusCounter::TargetMatchedButFcapped),
			target_matched_but_fcap_lookup_failed: status.get(StatusCounter::TargetMatchedButFcapLookupFailed),
			pacing_deferred: status.get(StatusCounter::PacingDeferred),
			sent_to_bidder: status.get(StatusCounter::SentToBidder),
			sent_to_bidder_as_top_match: status.get(StatusCounter::SentToBidderAsTopMatch),
			received_from_bidder: status.get(StatusCounter::ReceivedFromBidder),
			received_from_bidder_invalidated: status.get(StatusCounter::ReceivedFromBidderInvalidated),
			sent_to_client: status.get(StatusCounter::SentToClient),
			sent_to_client_as_top_match: status.get(StatusCounter::SentToClientAsTopMatch),
			lost_to_line_items: self.lost_to_line_items(progress, status.line_item_id()),
			events: status
				.events()
				.into_iter()
				.map(|(event_type, count)| EventReport { event_type, count })
				.collect(),
			delivery_schedule,
			ready_at: registry
				.filter(|_| is_overall)
				.and_then(|line_item| line_item.ready_at())
				.map(format_time_stamp),
			spent_tokens: active_plan
				.as_ref()
				.filter(|_| is_overall)
				.map(|plan| plan.spent_tokens()),
			pacing_frequency: active_plan
				.as_ref()
				.filter(|_| is_overall)
				.and_then(|plan| plan.delivery_rate_millis()),
		})
	}

	/// Competitors ordered by count, most frequent first
	///
	/// Order among equal counts is unspecified.
	fn lost_to_line_items(&self, progress: &DeliveryProgress, line_item_id: &str) -> Vec<LostToLineItemReport> {
		let mut lost_to = progress.lost_to(line_item_id);
		lost_to.sort_by(|a, b| b.1.cmp(&a.1));
		lost_to
			.into_iter()
			.take(self.competitors_number)
			.map(|(competitor_id, count)| LostToLineItemReport {
				line_item_source: self
					.line_item_service
					.get_line_item_by_id(&competitor_id)
					.map(|line_item| line_item.source().to_string()),
				line_item_id: competitor_id,
				count,
			})
			.collect()
	}
}

/// Window plans of the status, or the line item's active plan without
/// spend when the window tracked none
fn delivery_schedules(
	status: &LineItemStatus,
	overall_status: Option<&LineItemStatus>,
	active_plan: Option<&DeliveryPlan>,
) -> Vec<DeliveryScheduleReport> {
	let mut plans = status.delivery_plans();
	plans.sort_by(|a, b| a.plan_id().cmp(b.plan_id()));

	let schedules: Vec<DeliveryScheduleReport> = plans
		.iter()
		.map(|plan| {
			let overall_plan = overall_status.and_then(|overall| overall.delivery_plan(plan.plan_id()));
			to_delivery_schedule(plan, overall_plan.as_deref())
		})
		.collect();

	if schedules.is_empty()
		&& let Some(active_plan) = active_plan
	{
		return vec![to_delivery_schedule(&active_plan.without_spent(), None)];
	}
	schedules
}

fn to_delivery_schedule(plan: &DeliveryPlan, overall_plan: Option<&DeliveryPlan>) -> DeliveryScheduleReport {
	let total_spent: HashMap<i32, u64> = overall_plan
		.map(|overall| {
			overall
				.tokens()
				.iter()
				.map(|token| (token.priority_class(), token.spent()))
				.collect()
		})
		.unwrap_or_default();

	DeliveryScheduleReport {
		plan_id: plan.plan_id().to_string(),
		plan_start_time_stamp: format_time_stamp(plan.start_time_stamp()),
		plan_expiration_time_stamp: format_time_stamp(plan.end_time_stamp()),
		plan_updated_time_stamp: format_time_stamp(plan.updated_time_stamp()),
		tokens: plan
			.tokens()
			.iter()
			.map(|token| TokenReport {
				priority_class: token.priority_class(),
				total: token.total(),
				spent: token.spent(),
				total_spent: total_spent.get(&token.priority_class()).copied(),
			})
			.collect(),
	}
}

fn log_not_reported_line_items(statuses: &[Arc<LineItemStatus>], reports: &[DeliveryProgressReport]) {
	let reported: HashSet<&str> = reports
		.iter()
		.flat_map(|report| report.line_item_status.iter())
		.map(|status| status.line_item_id.as_str())
		.collect();

	let not_reported: Vec<&str> = statuses
		.iter()
		.map(|status| status.line_item_id())
		.filter(|line_item_id| !reported.contains(line_item_id))
		.collect();

	if !not_reported.is_empty() {
		info!(
			target: "delivery_progress",
			line_item_ids = %not_reported.join(", "),
			"Line items will not be reported, no active delivery schedule during report window"
		);
	}
}
