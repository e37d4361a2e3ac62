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

use pacer_sdk::{BidRequest, Imp};
use serde_json::Value;

/// Knowledge of the bidder adapters configured on this host
pub trait BidderCatalog: Send + Sync {
	fn is_valid_name(&self, name: &str) -> bool;
	fn is_deprecated_name(&self, name: &str) -> bool;
}

/// Bidder catalog built from fixed name lists
#[derive(Debug, Clone, Default)]
pub struct StaticBidderCatalog {
	valid: HashSet<String>,
	deprecated: HashSet<String>,
}

impl StaticBidderCatalog {
	pub fn new<I, S>(valid: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			valid: valid.into_iter().map(Into::into).collect(),
			deprecated: HashSet::new(),
		}
	}

	pub fn with_deprecated<I, S>(mut self, deprecated: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.deprecated = deprecated.into_iter().map(Into::into).collect();
		self
	}
}

impl BidderCatalog for StaticBidderCatalog {
	fn is_valid_name(&self, name: &str) -> bool {
		self.valid.contains(name)
	}

	fn is_deprecated_name(&self, name: &str) -> bool {
		self.deprecated.contains(name)
	}
}

/// Request-scoped bidder aliases from `ext.prebid.aliases`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BidderAliases {
	aliases: HashMap<String, String>,
}

impl BidderAliases {
	pub fn from_request(bid_request: &BidRequest) -> Self {
		let aliases = bid_request
			.ext
			.as_ref()
			.and_then(|ext| ext.pointer("/prebid/aliases"))
			.and_then(Value::as_object)
			.map(|aliases| {
				aliases
					.iter()
					.filter_map(|(alias, bidder)| Some((alias.clone(), bidder.as_str()?.to_string())))
					.collect()
			})
			.unwrap_or_default();

		Self { aliases }
	}

	pub fn is_alias_defined(&self, name: &str) -> bool {
		self.aliases.contains_key(name)
	}

	/// Bidder an alias stands for, or the name itself
	pub fn resolve_bidder<'a>(&'a self, name: &'a str) -> &'a str {
		self.aliases.get(name).map_or(name, String::as_str)
	}

	/// A line item of `source` may be offered to one of `bidders`
	///
	/// Matches the bidder itself, the bidder the source is an alias of,
	/// or any alias in the set that resolves to the source.
	pub fn is_source_in_scope(&self, source: &str, bidders: &HashSet<&str>) -> bool {
		bidders.contains(source)
			|| bidders.contains(self.resolve_bidder(source))
			|| bidders
				.iter()
				.any(|bidder| self.aliases.get(*bidder).is_some_and(|target| target == source))
	}
}

/// Bidders an impression is offered to, filtered through the catalog
pub fn imp_bidders<'a>(
	imp: &'a Imp,
	catalog: &dyn BidderCatalog,
	aliases: &BidderAliases,
) -> HashSet<&'a str> {
	imp.ext
		.as_ref()
		.and_then(|ext| ext.pointer("/prebid/bidder"))
		.and_then(Value::as_object)
		.into_iter()
		.flat_map(|bidders| bidders.keys())
		.map(String::as_str)
		.filter(|bidder| {
			!catalog.is_deprecated_name(bidder)
				&& (catalog.is_valid_name(bidder) || aliases.is_alias_defined(bidder))
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn create_test_request() -> BidRequest {
		BidRequest {
			id: "req1".to_string(),
			ext: Some(json!({"prebid": {"aliases": {"rubiAlias": "rubicon", "bad": 1}}})),
			..Default::default()
		}
	}

	#[test]
	fn test_aliases_from_request() {
		let aliases = BidderAliases::from_request(&create_test_request());

		assert!(aliases.is_alias_defined("rubiAlias"));
		assert!(!aliases.is_alias_defined("bad"));
		assert_eq!(aliases.resolve_bidder("rubiAlias"), "rubicon");
		assert_eq!(aliases.resolve_bidder("appnexus"), "appnexus");
	}

	#[test]
	fn test_source_scope_through_aliases() {
		let aliases = BidderAliases::from_request(&create_test_request());

		let plain = HashSet::from(["rubicon"]);
		assert!(aliases.is_source_in_scope("rubicon", &plain));
		assert!(aliases.is_source_in_scope("rubiAlias", &plain));
		assert!(!aliases.is_source_in_scope("appnexus", &plain));

		let aliased = HashSet::from(["rubiAlias"]);
		assert!(aliases.is_source_in_scope("rubicon", &aliased));
	}

	#[test]
	fn test_imp_bidders_filtered_by_catalog() {
		let catalog = StaticBidderCatalog::new(["rubicon", "appnexus", "oldbidder"])
			.with_deprecated(["oldbidder"]);
		let aliases = BidderAliases::from_request(&create_test_request());
		let imp = Imp {
			id: "imp1".to_string(),
			ext: Some(json!({"prebid": {"bidder": {
				"rubicon": {}, "rubiAlias": {}, "oldbidder": {}, "unknown": {}
			}}})),
			..Default::default()
		};

		let bidders = imp_bidders(&imp, &catalog, &aliases);
		assert_eq!(bidders, HashSet::from(["rubicon", "rubiAlias"]));
	}
}
