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

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// OpenRTB bid request
///
/// Only the attributes consulted by line-item targeting are modeled.
/// Extension objects stay as raw JSON so that targeting can address
/// arbitrary publisher or vendor paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BidRequest {
	pub id: String,
	#[serde(default)]
	pub imp: Vec<Imp>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub site: Option<Site>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app: Option<App>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub device: Option<Device>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user: Option<User>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ext: Option<Value>,
}

/// Impression within a bid request
///
/// `ext.prebid.bidder` carries the per-bidder parameters and therefore
/// names the bidders the impression is offered to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Imp {
	pub id: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub banner: Option<Banner>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub video: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub native: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ext: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Banner {
	#[serde(default)]
	pub format: Vec<Format>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub pos: Option<i64>,
}

/// Creative dimensions accepted by a banner slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Format {
	pub w: i64,
	pub h: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Site {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub domain: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub page: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub publisher: Option<Publisher>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ext: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Publisher {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub domain: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct App {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub bundle: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ext: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub geo: Option<Geo>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ext: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Geo {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lat: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lon: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ext: Option<Value>,
}

/// End user of the device
///
/// String and integer top-level attributes are addressable by
/// user first-party-data targeting in addition to `ext.data`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub buyeruid: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub yob: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gender: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub keywords: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub customdata: Option<String>,
	#[serde(default)]
	pub data: Vec<Data>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ext: Option<ExtUser>,
}

/// Third-party audience data attached to the user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Data {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	#[serde(default)]
	pub segment: Vec<Segment>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Segment {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtUser {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub time: Option<ExtUserTime>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

/// User-local time of the request, filled in by upstream enrichment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtUserTime {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub userdow: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub userhour: Option<i64>,
}
