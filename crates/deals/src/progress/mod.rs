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

//! Delivery progress accounting and reporting
//!
//! Auctions fold their transaction logs into the open window of
//! [`DeliveryProgressService`]. Finished windows are merged into the
//! overall aggregate and turned into report batches for a
//! [`DeliveryStatsSink`].

mod delivery_progress;
mod report;
mod service;
mod sink;
mod status;

pub use delivery_progress::DeliveryProgress;
pub use report::{DeliveryProgressReportFactory, format_time_stamp};
pub use service::DeliveryProgressService;
pub use sink::{DeliveryStatsSink, ReportBuffer, ReportBufferError, ReportConsumer, ReportProducer};
pub use status::{LineItemStatus, StatusCounter, WIN_EVENT_TYPE};
