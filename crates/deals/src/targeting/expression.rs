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

use pacer_sdk::Format;

use super::context::{GeoLocation, RequestContext};
use super::syntax::TargetingCategory;

const EARTH_RADIUS_MILES: f64 = 3958.8;
const WILDCARD: char = '*';

/// Position of the `*` wildcard in a `$matches` operand
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPattern {
	Equals,
	StartsWith,
	EndsWith,
	Contains,
}

/// Circle on the earth surface used by `$within`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoRegion {
	pub lat: f64,
	pub lon: f64,
	pub radius_miles: f64,
}

impl GeoRegion {
	fn contains(&self, location: GeoLocation) -> bool {
		haversine_miles(self.lat, self.lon, location.lat, location.lon) <= self.radius_miles
	}
}

/// Node of a parsed targeting tree
///
/// The tree is immutable once built, so one definition can be evaluated
/// concurrently for any number of impressions. String operands are
/// stored lowercased; comparisons lowercase the looked-up side.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetingExpression {
	And(Vec<TargetingExpression>),
	Or(Vec<TargetingExpression>),
	Not(Box<TargetingExpression>),
	Matches {
		category: TargetingCategory,
		pattern: StringPattern,
		value: String,
	},
	InStrings {
		category: TargetingCategory,
		values: Vec<String>,
	},
	InIntegers {
		category: TargetingCategory,
		values: Vec<i64>,
	},
	IntersectsStrings {
		category: TargetingCategory,
		values: Vec<String>,
	},
	IntersectsIntegers {
		category: TargetingCategory,
		values: Vec<i64>,
	},
	IntersectsSizes {
		category: TargetingCategory,
		values: Vec<Format>,
	},
	Within {
		category: TargetingCategory,
		region: GeoRegion,
	},
	/// Domain matcher that records a hit in the auction's txn log
	DomainMetricAware {
		expression: Box<TargetingExpression>,
		line_item_id: Option<String>,
	},
}

impl TargetingExpression {
	/// Build a `$matches` leaf from its raw operand
	pub fn matches(category: TargetingCategory, raw: &str) -> Self {
		let starts = raw.starts_with(WILDCARD);
		let ends = raw.len() > 1 && raw.ends_with(WILDCARD);
		let pattern = match (starts, ends) {
			(true, true) => StringPattern::Contains,
			(true, false) => StringPattern::EndsWith,
			(false, true) => StringPattern::StartsWith,
			(false, false) => StringPattern::Equals,
		};
		let value = raw.trim_start_matches(WILDCARD).trim_end_matches(WILDCARD);

		Self::Matches {
			category,
			pattern,
			value: value.to_lowercase(),
		}
	}

	pub fn in_strings(category: TargetingCategory, values: Vec<String>) -> Self {
		Self::InStrings {
			category,
			values: lowercase_all(values),
		}
	}

	pub fn intersects_strings(category: TargetingCategory, values: Vec<String>) -> Self {
		Self::IntersectsStrings {
			category,
			values: lowercase_all(values),
		}
	}

	/// Evaluate the tree against one (request, impression) pair
	///
	/// `And`/`Or` short-circuit; an empty `And` is true and an empty `Or`
	/// is false.
	pub fn matches_request(&self, context: &mut RequestContext<'_>) -> bool {
		match self {
			Self::And(children) => children.iter().all(|child| child.matches_request(context)),
			Self::Or(children) => children.iter().any(|child| child.matches_request(context)),
			Self::Not(child) => !child.matches_request(context),
			Self::Matches {
				category,
				pattern,
				value,
			} => context
				.lookup_string(category)
				.into_iter()
				.any(|candidate| pattern_matches(*pattern, value, &candidate.to_lowercase())),
			Self::InStrings { category, values } => context
				.lookup_string(category)
				.into_iter()
				.any(|candidate| contains_ignore_case(values, candidate)),
			Self::InIntegers { category, values } => context
				.lookup_integer(category)
				.into_iter()
				.any(|candidate| values.contains(&candidate)),
			Self::IntersectsStrings { category, values } => context
				.lookup_strings(category)
				.into_iter()
				.any(|candidate| contains_ignore_case(values, candidate)),
			Self::IntersectsIntegers { category, values } => context
				.lookup_integers(category)
				.into_iter()
				.any(|candidate| values.contains(&candidate)),
			Self::IntersectsSizes { values, .. } => {
				context.lookup_sizes().iter().any(|size| values.contains(size))
			}
			Self::Within { region, .. } => context
				.lookup_geo_location()
				.is_some_and(|location| region.contains(location)),
			Self::DomainMetricAware {
				expression,
				line_item_id,
			} => {
				let matched = expression.matches_request(context);
				if matched && let Some(line_item_id) = line_item_id {
					context
						.txn_log_mut()
						.line_items_matched_domain_targeting
						.insert(line_item_id.clone());
				}
				matched
			}
		}
	}
}

fn lowercase_all(values: Vec<String>) -> Vec<String> {
	values.into_iter().map(|value| value.to_lowercase()).collect()
}

fn contains_ignore_case(values: &[String], candidate: &str) -> bool {
	let candidate = candidate.to_lowercase();
	values.iter().any(|value| *value == candidate)
}

fn pattern_matches(pattern: StringPattern, value: &str, candidate: &str) -> bool {
	match pattern {
		StringPattern::Equals => candidate == value,
		StringPattern::StartsWith => candidate.starts_with(value),
		StringPattern::EndsWith => candidate.ends_with(value),
		StringPattern::Contains => candidate.contains(value),
	}
}

fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
	let d_lat = (lat2 - lat1).to_radians();
	let d_lon = (lon2 - lon1).to_radians();
	let a = (d_lat / 2.0).sin().powi(2)
		+ lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
	2.0 * EARTH_RADIUS_MILES * a.sqrt().asin()
}
