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

//! Deals service entry point
//!
//! This binary wires up the matching and pacing components:
//! - Line item registry (optionally bootstrapped from a metadata file)
//! - Delivery progress service with a bounded report buffer
//! - Pacing scheduler (plan advance, window rotation)
//! - Report drain (logs finished report batches)

use std::sync::{
	Arc,
	atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use pacer_sdk::DeliveryProgressReportBatch;
use tokio::signal;
use tracing::{debug, info, warn};

use pacer_deals::{
	DealsConfig, DeliveryProgressService, LineItemService, PacingScheduler, ReportBuffer,
	ReportBufferError, ReportConsumer, SchedulerConfig, StaticBidderCatalog, StaticRatesConverter,
	decode_line_item_records,
};

#[tokio::main]
async fn main() -> Result<()> {
	pacer_deals::logging::init_logging()?;

	let config = DealsConfig::from_env().unwrap_or_else(|e| {
		info!(target: "server", error = %e, "Using default configuration");
		DealsConfig::default()
	});

	info!(target: "server", "Starting Pacer Deals");
	info!(target: "server", "Max deals per bidder: {}", config.max_deals_per_bidder);
	info!(target: "server", "Ad server currency: {}", config.ad_server_currency);
	info!(target: "server", "Report interval: {}s", config.report_interval_secs);

	// Phase 1: line item registry
	info!(target: "server", "Initializing line item registry...");
	let bidder_catalog = StaticBidderCatalog::new(config.bidders.iter().cloned())
		.with_deprecated(config.deprecated_bidders.iter().cloned());
	let currency_converter = StaticRatesConverter::new(&config.ad_server_currency, &config.currency_rates);
	let line_item_service = Arc::new(LineItemService::new(
		&config,
		Arc::new(bidder_catalog),
		Arc::new(currency_converter),
	));

	if let Some(path) = &config.line_items_file {
		let json = tokio::fs::read_to_string(path)
			.await
			.with_context(|| format!("Failed to read line items file: {path}"))?;
		let records = decode_line_item_records(&json).context("Failed to decode line items file")?;
		info!(target: "server", path = %path, records = records.len(), "Bootstrapping line items");
		line_item_service.update_line_items(records, true, Utc::now());
	}

	// Phase 2: delivery progress and report buffer
	info!(target: "server", "Creating report buffer...");
	let (report_producer, report_consumer) = ReportBuffer::new(config.report_buffer_capacity).split();
	let progress_service = Arc::new(DeliveryProgressService::new(
		&config,
		line_item_service.clone(),
		Arc::new(report_producer),
		Utc::now(),
	));

	// Phase 3: report drain
	info!(target: "server", "Starting report drain...");
	let draining = Arc::new(AtomicBool::new(true));
	let drain_handle = {
		let draining = draining.clone();
		tokio::task::spawn_blocking(move || {
			while draining.load(Ordering::Relaxed) {
				match report_consumer.recv_timeout(Duration::from_millis(500)) {
					Ok(batch) => log_report_batch(&batch),
					Err(ReportBufferError::Disconnected) => break,
					Err(_) => {}
				}
			}
			report_consumer
		})
	};

	// Phase 4: pacing scheduler
	info!(target: "server", "Starting pacing scheduler...");
	let scheduler = PacingScheduler::start(
		SchedulerConfig::from(&config),
		line_item_service.clone(),
		progress_service.clone(),
	)
	.context("Failed to start pacing scheduler")?;

	signal::ctrl_c()
		.await
		.context("Failed to listen for shutdown signal")?;

	info!(target: "server", "Shutting down components...");
	scheduler.shutdown();
	progress_service.shutdown(Utc::now());

	draining.store(false, Ordering::Relaxed);
	let report_consumer = drain_handle.await.context("Report drain task failed")?;
	flush_reports(&report_consumer);

	info!(target: "server", "Shutdown complete");
	Ok(())
}

fn flush_reports(consumer: &ReportConsumer) {
	for batch in consumer.drain(usize::MAX) {
		log_report_batch(&batch);
	}
}

fn log_report_batch(batch: &DeliveryProgressReportBatch) {
	info!(
		target: "server",
		report_id = %batch.report_id,
		reports = batch.reports.len(),
		window_end = batch.data_window_end_time_stamp.as_deref().unwrap_or_default(),
		"Delivery progress report batch ready"
	);
	match serde_json::to_string(batch) {
		Ok(body) => debug!(target: "server", body = %body, "Delivery progress report batch"),
		Err(e) => warn!(target: "server", error = %e, "Failed to encode report batch"),
	}
}
