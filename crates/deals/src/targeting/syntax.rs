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

use std::fmt;

/// Boolean combinator keys of the targeting grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOperator {
	And,
	Or,
	Not,
}

impl BooleanOperator {
	pub fn from_key(key: &str) -> Option<Self> {
		match key {
			"$and" => Some(Self::And),
			"$or" => Some(Self::Or),
			"$not" => Some(Self::Not),
			_ => None,
		}
	}
}

/// Matching function keys of the targeting grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchingFunction {
	Matches,
	In,
	Intersects,
	Within,
}

impl MatchingFunction {
	pub fn from_key(key: &str) -> Option<Self> {
		match key {
			"$matches" => Some(Self::Matches),
			"$in" => Some(Self::In),
			"$intersects" => Some(Self::Intersects),
			"$within" => Some(Self::Within),
			_ => None,
		}
	}

	pub fn key(&self) -> &'static str {
		match self {
			Self::Matches => "$matches",
			Self::In => "$in",
			Self::Intersects => "$intersects",
			Self::Within => "$within",
		}
	}
}

impl fmt::Display for MatchingFunction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.key())
	}
}

/// Shape of the value a category resolves to, which decides the
/// matching functions it accepts and how operands are parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryKind {
	/// Creative sizes, `$intersects` with `{w, h}` objects
	Sizes,
	/// Multi-valued strings, `$intersects` only
	StringSet,
	/// Single string, `$matches` or `$in`
	Text,
	/// Single integer, `$in` integers
	Integer,
	/// Free-form extension attribute, `$in` strings
	ExtText,
	/// Device location, `$within` a geo region
	Geo,
	/// Arbitrary JSON attribute; operand type picked from the literal
	Typed,
}

impl CategoryKind {
	/// Matching functions accepted for this kind, in message order
	pub fn functions(&self) -> &'static [MatchingFunction] {
		use MatchingFunction::*;
		match self {
			Self::Sizes | Self::StringSet => &[Intersects],
			Self::Text => &[Matches, In],
			Self::Integer | Self::ExtText => &[In],
			Self::Geo => &[Within],
			Self::Typed => &[Matches, In, Intersects],
		}
	}
}

/// Request attribute a targeting rule is evaluated against
///
/// Path-carrying variants address nested JSON attributes using a
/// dot-separated path (e.g. `bidp.rubicon.siteId` carries
/// `rubicon.siteId`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetingCategory {
	Size,
	MediaType,
	AdSlot,
	Domain,
	PublisherDomain,
	Referrer,
	AppBundle,
	DeviceGeoExt(String),
	DeviceExt(String),
	PagePosition,
	Location,
	BidderParam(String),
	UserSegment(String),
	DayOfWeek,
	Hour,
	UserFirstPartyData(String),
	SiteFirstPartyData(String),
}

const DEVICE_GEO_EXT_PREFIX: &str = "device.geo.ext.";
const DEVICE_EXT_PREFIX: &str = "device.ext.";
const BIDDER_PARAM_PREFIX: &str = "bidp.";
const USER_SEGMENT_PREFIX: &str = "user.segment.";
const USER_FIRST_PARTY_DATA_PREFIX: &str = "ufpd.";
const SITE_FIRST_PARTY_DATA_PREFIX: &str = "sfpd.";

impl TargetingCategory {
	/// Resolve a JSON key into a category, `None` when it is not one
	pub fn from_key(key: &str) -> Option<Self> {
		let category = match key {
			"adunit.size" => Self::Size,
			"adunit.mediatype" => Self::MediaType,
			"adunit.adslot" => Self::AdSlot,
			"site.domain" => Self::Domain,
			"site.publisher.domain" => Self::PublisherDomain,
			"site.referrer" => Self::Referrer,
			"app.bundle" => Self::AppBundle,
			"pos" => Self::PagePosition,
			"geo.distance" => Self::Location,
			"user.ext.time.userdow" => Self::DayOfWeek,
			"user.ext.time.userhour" => Self::Hour,
			_ => return Self::from_prefixed_key(key),
		};
		Some(category)
	}

	fn from_prefixed_key(key: &str) -> Option<Self> {
		let prefixed: [(&str, fn(String) -> Self); 6] = [
			(DEVICE_GEO_EXT_PREFIX, Self::DeviceGeoExt),
			(DEVICE_EXT_PREFIX, Self::DeviceExt),
			(BIDDER_PARAM_PREFIX, Self::BidderParam),
			(USER_SEGMENT_PREFIX, Self::UserSegment),
			(USER_FIRST_PARTY_DATA_PREFIX, Self::UserFirstPartyData),
			(SITE_FIRST_PARTY_DATA_PREFIX, Self::SiteFirstPartyData),
		];

		prefixed.into_iter().find_map(|(prefix, build)| {
			key.strip_prefix(prefix)
				.filter(|path| !path.is_empty())
				.map(|path| build(path.to_string()))
		})
	}

	pub fn kind(&self) -> CategoryKind {
		match self {
			Self::Size => CategoryKind::Sizes,
			Self::MediaType | Self::UserSegment(_) => CategoryKind::StringSet,
			Self::AdSlot | Self::Domain | Self::PublisherDomain | Self::Referrer | Self::AppBundle => {
				CategoryKind::Text
			}
			Self::DeviceGeoExt(_) | Self::DeviceExt(_) => CategoryKind::ExtText,
			Self::PagePosition | Self::DayOfWeek | Self::Hour => CategoryKind::Integer,
			Self::Location => CategoryKind::Geo,
			Self::BidderParam(_) | Self::UserFirstPartyData(_) | Self::SiteFirstPartyData(_) => {
				CategoryKind::Typed
			}
		}
	}

	/// Nested attribute path for path-carrying categories
	pub fn path(&self) -> Option<&str> {
		match self {
			Self::DeviceGeoExt(path)
			| Self::DeviceExt(path)
			| Self::BidderParam(path)
			| Self::UserSegment(path)
			| Self::UserFirstPartyData(path)
			| Self::SiteFirstPartyData(path) => Some(path),
			_ => None,
		}
	}
}

impl fmt::Display for TargetingCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Size => f.write_str("adunit.size"),
			Self::MediaType => f.write_str("adunit.mediatype"),
			Self::AdSlot => f.write_str("adunit.adslot"),
			Self::Domain => f.write_str("site.domain"),
			Self::PublisherDomain => f.write_str("site.publisher.domain"),
			Self::Referrer => f.write_str("site.referrer"),
			Self::AppBundle => f.write_str("app.bundle"),
			Self::DeviceGeoExt(path) => write!(f, "{DEVICE_GEO_EXT_PREFIX}{path}"),
			Self::DeviceExt(path) => write!(f, "{DEVICE_EXT_PREFIX}{path}"),
			Self::PagePosition => f.write_str("pos"),
			Self::Location => f.write_str("geo.distance"),
			Self::BidderParam(path) => write!(f, "{BIDDER_PARAM_PREFIX}{path}"),
			Self::UserSegment(path) => write!(f, "{USER_SEGMENT_PREFIX}{path}"),
			Self::DayOfWeek => f.write_str("user.ext.time.userdow"),
			Self::Hour => f.write_str("user.ext.time.userhour"),
			Self::UserFirstPartyData(path) => write!(f, "{USER_FIRST_PARTY_DATA_PREFIX}{path}"),
			Self::SiteFirstPartyData(path) => write!(f, "{SITE_FIRST_PARTY_DATA_PREFIX}{path}"),
		}
	}
}
