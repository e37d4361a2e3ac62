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

//! Line-item targeting
//!
//! A targeting definition is a JSON tree of boolean operators over
//! category matchers, e.g.
//!
//! ```json
//! {"$and": [
//!   {"adunit.mediatype": {"$intersects": ["banner"]}},
//!   {"site.domain": {"$matches": "*sport*"}}
//! ]}
//! ```
//!
//! It is parsed once when a line item is registered and then evaluated
//! for every (request, impression) pair. Evaluation never allocates
//! shared state and never fails: a missing attribute is a non-match.

mod context;
mod expression;
mod parser;
mod syntax;

pub use context::{GeoLocation, RequestContext};
pub use expression::{GeoRegion, StringPattern, TargetingExpression};
pub use parser::parse_targeting_definition;
pub use syntax::{BooleanOperator, CategoryKind, MatchingFunction, TargetingCategory};

use thiserror::Error;

/// Rejected targeting definition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct TargetingSyntaxError {
	pub line_item_id: Option<String>,
	pub message: String,
}

impl TargetingSyntaxError {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			line_item_id: None,
			message: message.into(),
		}
	}

	pub fn with_line_item(mut self, line_item_id: impl Into<String>) -> Self {
		self.line_item_id = Some(line_item_id.into());
		self
	}
}

/// Parsed, immutable targeting tree of one line item
#[derive(Debug, Clone, PartialEq)]
pub struct TargetingDefinition {
	pub root: TargetingExpression,
}

impl TargetingDefinition {
	pub fn matches(&self, context: &mut RequestContext<'_>) -> bool {
		self.root.matches_request(context)
	}
}
