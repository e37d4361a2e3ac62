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

use pacer_sdk::{BidRequest, Format, Imp, User};
use serde_json::Value;

use super::syntax::TargetingCategory;
use crate::txn_log::TxnLog;

const EXT_PREBID_BIDDER: &str = "prebid.bidder";
const EXT_CONTEXT_DATA: &str = "context.data";
const AD_SLOT_PATHS: [&str; 4] = [
	"context.data.pbadslot",
	"context.data.adserver.adslot",
	"data.pbadslot",
	"data.adserver.adslot",
];

/// Latitude/longitude of the device
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoLocation {
	pub lat: f64,
	pub lon: f64,
}

/// Read-side view of one (bid request, impression) pair
///
/// Every lookup returns all candidate values found for a category;
/// a leaf expression matches when any candidate satisfies it. A
/// category that cannot be resolved yields no candidates and therefore
/// never matches.
///
/// The context also carries the auction's transaction log so that
/// expressions with reporting side effects (domain matches) can record
/// them while the tree itself stays immutable.
pub struct RequestContext<'a> {
	bid_request: &'a BidRequest,
	imp: &'a Imp,
	txn_log: &'a mut TxnLog,
}

impl<'a> RequestContext<'a> {
	pub fn new(bid_request: &'a BidRequest, imp: &'a Imp, txn_log: &'a mut TxnLog) -> Self {
		Self {
			bid_request,
			imp,
			txn_log,
		}
	}

	pub fn txn_log_mut(&mut self) -> &mut TxnLog {
		self.txn_log
	}

	/// Single string attribute lookup
	pub fn lookup_string(&self, category: &TargetingCategory) -> Vec<&'a str> {
		let request = self.bid_request;
		let site = request.site.as_ref();
		let publisher_domain = site
			.and_then(|site| site.publisher.as_ref())
			.and_then(|publisher| publisher.domain.as_deref());

		match category {
			TargetingCategory::Domain => site
				.and_then(|site| site.domain.as_deref())
				.into_iter()
				.chain(publisher_domain)
				.collect(),
			TargetingCategory::PublisherDomain => publisher_domain.into_iter().collect(),
			TargetingCategory::Referrer => site
				.and_then(|site| site.page.as_deref())
				.into_iter()
				.collect(),
			TargetingCategory::AppBundle => request
				.app
				.as_ref()
				.and_then(|app| app.bundle.as_deref())
				.into_iter()
				.collect(),
			TargetingCategory::AdSlot => AD_SLOT_PATHS
				.iter()
				.filter_map(|path| at_path(self.imp.ext.as_ref(), path))
				.filter_map(Value::as_str)
				.collect(),
			TargetingCategory::DeviceGeoExt(path) => at_path(self.device_geo_ext(), path)
				.and_then(Value::as_str)
				.into_iter()
				.collect(),
			TargetingCategory::DeviceExt(path) => at_path(self.device_ext(), path)
				.and_then(Value::as_str)
				.into_iter()
				.collect(),
			TargetingCategory::BidderParam(path) => self
				.bidder_param(path)
				.and_then(Value::as_str)
				.into_iter()
				.collect(),
			TargetingCategory::UserFirstPartyData(path) => {
				let user = request.user.as_ref();
				user.and_then(|user| user_string_attribute(user, path))
					.into_iter()
					.chain(at_path(self.user_ext_data(), path).and_then(Value::as_str))
					.collect()
			}
			TargetingCategory::SiteFirstPartyData(path) => self
				.site_first_party_data(path)
				.into_iter()
				.filter_map(Value::as_str)
				.collect(),
			_ => Vec::new(),
		}
	}

	/// Single integer attribute lookup
	pub fn lookup_integer(&self, category: &TargetingCategory) -> Vec<i64> {
		let request = self.bid_request;
		let user_time = request
			.user
			.as_ref()
			.and_then(|user| user.ext.as_ref())
			.and_then(|ext| ext.time);

		match category {
			TargetingCategory::PagePosition => self
				.imp
				.banner
				.as_ref()
				.and_then(|banner| banner.pos)
				.into_iter()
				.collect(),
			TargetingCategory::DayOfWeek => user_time.and_then(|time| time.userdow).into_iter().collect(),
			TargetingCategory::Hour => user_time.and_then(|time| time.userhour).into_iter().collect(),
			TargetingCategory::BidderParam(path) => self
				.bidder_param(path)
				.and_then(Value::as_i64)
				.into_iter()
				.collect(),
			TargetingCategory::UserFirstPartyData(path) => {
				let user = request.user.as_ref();
				user.and_then(|user| user_integer_attribute(user, path))
					.into_iter()
					.chain(at_path(self.user_ext_data(), path).and_then(Value::as_i64))
					.collect()
			}
			TargetingCategory::SiteFirstPartyData(path) => self
				.site_first_party_data(path)
				.into_iter()
				.filter_map(Value::as_i64)
				.collect(),
			_ => Vec::new(),
		}
	}

	/// Multi-valued string lookup; a scalar counts as a one-element list
	pub fn lookup_strings(&self, category: &TargetingCategory) -> Vec<&'a str> {
		match category {
			TargetingCategory::MediaType => self.media_types(),
			TargetingCategory::UserSegment(source) => self.segments(source),
			TargetingCategory::BidderParam(path) => node_to_strings(self.bidder_param(path)),
			TargetingCategory::UserFirstPartyData(path) => {
				node_to_strings(at_path(self.user_ext_data(), path))
			}
			TargetingCategory::SiteFirstPartyData(path) => self
				.site_first_party_data(path)
				.into_iter()
				.flat_map(|node| node_to_strings(Some(node)))
				.collect(),
			_ => Vec::new(),
		}
	}

	/// Multi-valued integer lookup; a scalar counts as a one-element list
	pub fn lookup_integers(&self, category: &TargetingCategory) -> Vec<i64> {
		match category {
			TargetingCategory::BidderParam(path) => node_to_integers(self.bidder_param(path)),
			TargetingCategory::UserFirstPartyData(path) => {
				node_to_integers(at_path(self.user_ext_data(), path))
			}
			TargetingCategory::SiteFirstPartyData(path) => self
				.site_first_party_data(path)
				.into_iter()
				.flat_map(|node| node_to_integers(Some(node)))
				.collect(),
			_ => Vec::new(),
		}
	}

	/// Banner formats of the impression
	pub fn lookup_sizes(&self) -> &'a [Format] {
		let imp = self.imp;
		imp.banner
			.as_ref()
			.map(|banner| banner.format.as_slice())
			.unwrap_or_default()
	}

	pub fn lookup_geo_location(&self) -> Option<GeoLocation> {
		let geo = self.bid_request.device.as_ref()?.geo.as_ref()?;
		Some(GeoLocation {
			lat: geo.lat?,
			lon: geo.lon?,
		})
	}

	fn device_ext(&self) -> Option<&'a Value> {
		let request = self.bid_request;
		request.device.as_ref().and_then(|device| device.ext.as_ref())
	}

	fn device_geo_ext(&self) -> Option<&'a Value> {
		let request = self.bid_request;
		request
			.device
			.as_ref()
			.and_then(|device| device.geo.as_ref())
			.and_then(|geo| geo.ext.as_ref())
	}

	fn user_ext_data(&self) -> Option<&'a Value> {
		let request = self.bid_request;
		request
			.user
			.as_ref()
			.and_then(|user| user.ext.as_ref())
			.and_then(|ext| ext.data.as_ref())
	}

	fn bidder_param(&self, path: &str) -> Option<&'a Value> {
		let imp = self.imp;
		at_path(imp.ext.as_ref(), &format!("{EXT_PREBID_BIDDER}.{path}"))
	}

	/// Impression context data first, then site and app ext data
	fn site_first_party_data(&self, path: &str) -> Vec<&'a Value> {
		let request = self.bid_request;
		let imp = self.imp;
		let site_data = request
			.site
			.as_ref()
			.and_then(|site| site.ext.as_ref())
			.and_then(|ext| ext.get("data"));
		let app_data = request
			.app
			.as_ref()
			.and_then(|app| app.ext.as_ref())
			.and_then(|ext| ext.get("data"));

		[
			at_path(imp.ext.as_ref(), &format!("{EXT_CONTEXT_DATA}.{path}")),
			at_path(site_data, path),
			at_path(app_data, path),
		]
		.into_iter()
		.flatten()
		.collect()
	}

	fn media_types(&self) -> Vec<&'a str> {
		let imp = self.imp;
		let mut media_types = Vec::with_capacity(3);
		if imp.banner.is_some() {
			media_types.push("banner");
		}
		if imp.video.is_some() {
			media_types.push("video");
		}
		if imp.native.is_some() {
			media_types.push("native");
		}
		media_types
	}

	fn segments(&self, source: &str) -> Vec<&'a str> {
		let request = self.bid_request;
		request
			.user
			.iter()
			.flat_map(|user| user.data.iter())
			.filter(|data| data.id.as_deref() == Some(source))
			.flat_map(|data| data.segment.iter())
			.filter_map(|segment| segment.id.as_deref())
			.collect()
	}
}

/// Resolve a dot-separated path inside a JSON tree
fn at_path<'v>(root: Option<&'v Value>, path: &str) -> Option<&'v Value> {
	let pointer = format!("/{}", path.replace('.', "/"));
	root?.pointer(&pointer).filter(|value| !value.is_null())
}

fn node_to_strings(node: Option<&Value>) -> Vec<&str> {
	match node {
		Some(Value::String(value)) => vec![value.as_str()],
		Some(Value::Array(values)) => values.iter().filter_map(Value::as_str).collect(),
		_ => Vec::new(),
	}
}

fn node_to_integers(node: Option<&Value>) -> Vec<i64> {
	match node {
		Some(Value::Array(values)) => values.iter().filter_map(Value::as_i64).collect(),
		Some(value) => value.as_i64().into_iter().collect(),
		None => Vec::new(),
	}
}

fn is_top_level(path: &str) -> bool {
	!path.contains('.')
}

fn user_string_attribute<'u>(user: &'u User, path: &str) -> Option<&'u str> {
	if !is_top_level(path) {
		return None;
	}
	let value = match path {
		"id" => &user.id,
		"buyeruid" => &user.buyeruid,
		"gender" => &user.gender,
		"keywords" => &user.keywords,
		"customdata" => &user.customdata,
		_ => return None,
	};
	value.as_deref()
}

fn user_integer_attribute(user: &User, path: &str) -> Option<i64> {
	match path {
		"yob" => user.yob,
		_ => None,
	}
}
