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

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CurrencyError {
	#[error("No conversion rate for currency {0}")]
	UnknownCurrency(String),
	#[error("Invalid conversion rate {rate} for currency {currency}")]
	InvalidRate { currency: String, rate: f64 },
}

/// Converts line-item prices into the ad-server currency
pub trait CurrencyConverter: Send + Sync {
	fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64, CurrencyError>;
}

/// Converter backed by a fixed rate table
///
/// Each rate is the value of one unit of the currency expressed in the
/// base currency; the base itself always has rate 1. Currency codes are
/// compared case-insensitively.
#[derive(Debug, Clone)]
pub struct StaticRatesConverter {
	base: String,
	rates: HashMap<String, f64>,
}

impl StaticRatesConverter {
	pub fn new(base: &str, rates: &HashMap<String, f64>) -> Self {
		Self {
			base: base.to_uppercase(),
			rates: rates
				.iter()
				.map(|(currency, rate)| (currency.to_uppercase(), *rate))
				.collect(),
		}
	}

	fn rate(&self, currency: &str) -> Result<f64, CurrencyError> {
		if currency == self.base {
			return Ok(1.0);
		}
		let rate = *self
			.rates
			.get(currency)
			.ok_or_else(|| CurrencyError::UnknownCurrency(currency.to_string()))?;
		if !rate.is_finite() || rate <= 0.0 {
			return Err(CurrencyError::InvalidRate {
				currency: currency.to_string(),
				rate,
			});
		}
		Ok(rate)
	}
}

impl CurrencyConverter for StaticRatesConverter {
	fn convert(&self, amount: f64, from: &str, to: &str) -> Result<f64, CurrencyError> {
		let from = from.to_uppercase();
		let to = to.to_uppercase();
		if from == to {
			return Ok(amount);
		}
		Ok(amount * self.rate(&from)? / self.rate(&to)?)
	}
}
