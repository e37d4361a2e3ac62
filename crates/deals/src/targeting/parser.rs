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
use serde_json::{Map, Value};

use super::expression::{GeoRegion, TargetingExpression};
use super::syntax::{BooleanOperator, CategoryKind, MatchingFunction, TargetingCategory};
use super::{TargetingDefinition, TargetingSyntaxError};

type ParseResult<T> = Result<T, TargetingSyntaxError>;

/// Parse a JSON targeting definition into an evaluable tree
///
/// Parsing is pure: the same JSON always yields an equal tree. Any
/// error is reported with the owning line item id attached.
pub fn parse_targeting_definition(
	node: &Value,
	line_item_id: Option<&str>,
) -> ParseResult<TargetingDefinition> {
	let parser = Parser { line_item_id };
	parser
		.parse_node(node)
		.map(|root| TargetingDefinition { root })
		.map_err(|error| match line_item_id {
			Some(id) => error.with_line_item(id),
			None => error,
		})
}

struct Parser<'a> {
	line_item_id: Option<&'a str>,
}

impl Parser<'_> {
	fn parse_node(&self, node: &Value) -> ParseResult<TargetingExpression> {
		let (key, value) = single_element(node)?;

		if let Some(operator) = BooleanOperator::from_key(key) {
			return self.parse_boolean_operator(operator, value);
		}
		match TargetingCategory::from_key(key) {
			Some(category) => self.parse_category(category, value),
			None => Err(TargetingSyntaxError::new(format!(
				"Expected either boolean operator or targeting category, got {key}"
			))),
		}
	}

	fn parse_boolean_operator(
		&self,
		operator: BooleanOperator,
		value: &Value,
	) -> ParseResult<TargetingExpression> {
		match operator {
			BooleanOperator::And => Ok(TargetingExpression::And(
				parse_array(value, |node| self.parse_node(node))?,
			)),
			BooleanOperator::Or => Ok(TargetingExpression::Or(
				parse_array(value, |node| self.parse_node(node))?,
			)),
			BooleanOperator::Not => Ok(TargetingExpression::Not(Box::new(self.parse_node(value)?))),
		}
	}

	fn parse_category(
		&self,
		category: TargetingCategory,
		value: &Value,
	) -> ParseResult<TargetingExpression> {
		let (function, operand) = compatible_function(value, category.kind().functions())?;

		let expression = match (category.kind(), function) {
			(CategoryKind::Sizes, _) => TargetingExpression::IntersectsSizes {
				category,
				values: parse_array(operand, parse_size)?,
			},
			(CategoryKind::StringSet, _) => {
				TargetingExpression::intersects_strings(category, parse_array(operand, parse_string)?)
			}
			(CategoryKind::Integer, _) => TargetingExpression::InIntegers {
				category,
				values: parse_array(operand, parse_integer)?,
			},
			(CategoryKind::ExtText, _) => {
				TargetingExpression::in_strings(category, parse_array(operand, parse_string)?)
			}
			(CategoryKind::Geo, _) => TargetingExpression::Within {
				category,
				region: parse_geo_region(operand)?,
			},
			(_, MatchingFunction::Matches) => {
				TargetingExpression::matches(category, &parse_string(operand)?)
			}
			(CategoryKind::Text, _) => {
				TargetingExpression::in_strings(category, parse_array(operand, parse_string)?)
			}
			(_, function) => parse_typed_array(category, function, operand)?,
		};

		Ok(self.with_domain_metric(expression))
	}

	/// Domain matchers additionally record the hit for reporting
	fn with_domain_metric(&self, expression: TargetingExpression) -> TargetingExpression {
		let is_domain = matches!(
			&expression,
			TargetingExpression::Matches { category, .. } | TargetingExpression::InStrings { category, .. }
				if matches!(category, TargetingCategory::Domain | TargetingCategory::PublisherDomain)
		);
		if !is_domain {
			return expression;
		}

		TargetingExpression::DomainMetricAware {
			expression: Box::new(expression),
			line_item_id: self.line_item_id.map(str::to_string),
		}
	}
}

/// Typed categories pick integers or strings from the first literal
fn parse_typed_array(
	category: TargetingCategory,
	function: MatchingFunction,
	operand: &Value,
) -> ParseResult<TargetingExpression> {
	let integers = match expect_array(operand)?.first() {
		None | Some(Value::String(_)) => false,
		Some(Value::Number(_)) => true,
		Some(other) => {
			return Err(TargetingSyntaxError::new(format!(
				"Expected integer or string, got {}",
				node_type(other)
			)));
		}
	};

	let expression = match (function, integers) {
		(MatchingFunction::In, true) => TargetingExpression::InIntegers {
			category,
			values: parse_array(operand, parse_integer)?,
		},
		(MatchingFunction::In, false) => {
			TargetingExpression::in_strings(category, parse_array(operand, parse_string)?)
		}
		(_, true) => TargetingExpression::IntersectsIntegers {
			category,
			values: parse_array(operand, parse_integer)?,
		},
		(_, false) => {
			TargetingExpression::intersects_strings(category, parse_array(operand, parse_string)?)
		}
	};
	Ok(expression)
}

/// Validate the function object of a category against its accepted set
fn compatible_function<'v>(
	value: &'v Value,
	accepted: &[MatchingFunction],
) -> ParseResult<(MatchingFunction, &'v Value)> {
	let (key, operand) = single_element(value)?;
	let function = MatchingFunction::from_key(key).ok_or_else(|| {
		TargetingSyntaxError::new(format!("Expected matching function, got {key}"))
	})?;

	if accepted.contains(&function) {
		return Ok((function, operand));
	}

	let message = match accepted {
		[only] => format!("Expected {only} matching function, got {key}"),
		_ => {
			let names: Vec<&str> = accepted.iter().map(MatchingFunction::key).collect();
			format!("Expected one of {} matching functions, got {key}", names.join(", "))
		}
	};
	Err(TargetingSyntaxError::new(message))
}

fn expect_object(value: &Value) -> ParseResult<&Map<String, Value>> {
	value.as_object().ok_or_else(|| {
		TargetingSyntaxError::new(format!("Expected object, got {}", node_type(value)))
	})
}

fn single_element(value: &Value) -> ParseResult<(&str, &Value)> {
	let object = expect_object(value)?;
	match object.iter().next() {
		Some((key, value)) if object.len() == 1 => Ok((key.as_str(), value)),
		_ => Err(TargetingSyntaxError::new(format!(
			"Expected only one element in the object, got {}",
			object.len()
		))),
	}
}

fn expect_array(value: &Value) -> ParseResult<&Vec<Value>> {
	value.as_array().ok_or_else(|| {
		TargetingSyntaxError::new(format!("Expected array, got {}", node_type(value)))
	})
}

fn parse_array<T>(
	value: &Value,
	mut parse: impl FnMut(&Value) -> ParseResult<T>,
) -> ParseResult<Vec<T>> {
	expect_array(value)?.iter().map(&mut parse).collect()
}

fn parse_string(value: &Value) -> ParseResult<String> {
	let text = value.as_str().ok_or_else(|| {
		TargetingSyntaxError::new(format!("Expected string, got {}", node_type(value)))
	})?;
	if text.is_empty() {
		return Err(TargetingSyntaxError::new("String value could not be empty"));
	}
	Ok(text.to_string())
}

fn parse_integer(value: &Value) -> ParseResult<i64> {
	value.as_i64().ok_or_else(|| {
		TargetingSyntaxError::new(format!("Expected integer, got {}", node_type(value)))
	})
}

fn parse_size(value: &Value) -> ParseResult<Format> {
	let object = expect_object(value)?;
	match (integer_field(object, "w"), integer_field(object, "h")) {
		(Some(w), Some(h)) => Ok(Format { w, h }),
		_ => Err(TargetingSyntaxError::new(
			"Height and width in size definition could not be null or missing",
		)),
	}
}

fn parse_geo_region(value: &Value) -> ParseResult<GeoRegion> {
	let object = expect_object(value)?;
	let field = |name: &str| object.get(name).and_then(Value::as_f64);
	match (field("lat"), field("lon"), field("radiusMiles")) {
		(Some(lat), Some(lon), Some(radius_miles)) => Ok(GeoRegion {
			lat,
			lon,
			radius_miles,
		}),
		_ => Err(TargetingSyntaxError::new(
			"Lat, lon and radiusMiles in geo region definition could not be null or missing",
		)),
	}
}

fn integer_field(object: &Map<String, Value>, name: &str) -> Option<i64> {
	object.get(name).and_then(Value::as_i64)
}

fn node_type(value: &Value) -> &'static str {
	match value {
		Value::Null => "NULL",
		Value::Bool(_) => "BOOLEAN",
		Value::Number(_) => "NUMBER",
		Value::String(_) => "STRING",
		Value::Array(_) => "ARRAY",
		Value::Object(_) => "OBJECT",
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::targeting::expression::StringPattern;

	fn parse_error(node: Value) -> String {
		parse_targeting_definition(&node, None).unwrap_err().message
	}

	#[test]
	fn test_parse_full_definition() {
		let node = json!({"$and": [
			{"adunit.size": {"$intersects": [{"w": 300, "h": 250}]}},
			{"adunit.mediatype": {"$intersects": ["Banner"]}},
			{"site.referrer": {"$matches": "*sport*"}},
			{"$or": [
				{"pos": {"$in": [1, 3]}},
				{"$not": {"app.bundle": {"$in": ["com.example"]}}}
			]},
			{"geo.distance": {"$within": {"lat": 50.4, "lon": 30.5, "radiusMiles": 20}}},
			{"bidp.rubicon.siteId": {"$in": [123]}},
			{"ufpd.sport": {"$intersects": ["hockey"]}},
			{"sfpd.buildings": {"$intersects": [1, 2]}}
		]});

		let definition = parse_targeting_definition(&node, Some("li1")).unwrap();
		let TargetingExpression::And(children) = &definition.root else {
			panic!("expected $and root");
		};
		assert_eq!(children.len(), 8);
		assert_eq!(
			children[1],
			TargetingExpression::IntersectsStrings {
				category: TargetingCategory::MediaType,
				values: vec!["banner".to_string()],
			}
		);
		assert_eq!(
			children[2],
			TargetingExpression::Matches {
				category: TargetingCategory::Referrer,
				pattern: StringPattern::Contains,
				value: "sport".to_string(),
			}
		);
		assert!(matches!(children[5], TargetingExpression::InIntegers { .. }));
		assert!(matches!(children[6], TargetingExpression::IntersectsStrings { .. }));
		assert!(matches!(children[7], TargetingExpression::IntersectsIntegers { .. }));
	}

	#[test]
	fn test_parse_is_idempotent() {
		let node = json!({"$or": [
			{"site.domain": {"$matches": "*example*"}},
			{"user.segment.rubicon": {"$intersects": ["1", "2"]}}
		]});

		let first = parse_targeting_definition(&node, Some("li1")).unwrap();
		let second = parse_targeting_definition(&node, Some("li1")).unwrap();
		assert_eq!(first, second);
	}

	#[test]
	fn test_domain_leaves_are_wrapped_for_reporting() {
		let node = json!({"site.domain": {"$in": ["example.com"]}});

		let definition = parse_targeting_definition(&node, Some("li1")).unwrap();
		assert!(matches!(
			definition.root,
			TargetingExpression::DomainMetricAware { ref line_item_id, .. }
				if line_item_id.as_deref() == Some("li1")
		));
	}

	#[test]
	fn test_syntax_error_messages() {
		let cases = [
			(json!({"$and": [], "$or": []}), "Expected only one element in the object, got 2"),
			(json!([]), "Expected object, got ARRAY"),
			(json!({"$and": {}}), "Expected array, got OBJECT"),
			(json!({"unknown": {}}), "Expected either boolean operator or targeting category, got unknown"),
			(json!({"site.domain": {"$abc": "x"}}), "Expected matching function, got $abc"),
			(json!({"adunit.size": {"$in": []}}), "Expected $intersects matching function, got $in"),
			(
				json!({"site.referrer": {"$intersects": []}}),
				"Expected one of $matches, $in matching functions, got $intersects",
			),
			(json!({"bidp.rubicon.flag": {"$in": [true]}}), "Expected integer or string, got BOOLEAN"),
			(json!({"site.domain": {"$matches": ""}}), "String value could not be empty"),
			(json!({"pos": {"$in": ["1"]}}), "Expected integer, got STRING"),
			(json!({"device.geo.ext.vendor.zone": {"$in": [7]}}), "Expected string, got NUMBER"),
			(
				json!({"adunit.size": {"$intersects": [{"w": 300}]}}),
				"Height and width in size definition could not be null or missing",
			),
			(
				json!({"geo.distance": {"$within": {"lat": 1.0, "lon": 2.0}}}),
				"Lat, lon and radiusMiles in geo region definition could not be null or missing",
			),
		];

		for (node, expected) in cases {
			assert_eq!(parse_error(node), expected);
		}
	}

	#[test]
	fn test_error_carries_line_item_id() {
		let node = json!({"unknown": {}});

		let error = parse_targeting_definition(&node, Some("li7")).unwrap_err();
		assert_eq!(error.line_item_id.as_deref(), Some("li7"));
	}

	#[test]
	fn test_typed_empty_array_defaults_to_strings() {
		let node = json!({"ufpd.sport": {"$in": []}});

		let definition = parse_targeting_definition(&node, None).unwrap();
		assert_eq!(
			definition.root,
			TargetingExpression::InStrings {
				category: TargetingCategory::UserFirstPartyData("sport".to_string()),
				values: Vec::new(),
			}
		);
	}
}
