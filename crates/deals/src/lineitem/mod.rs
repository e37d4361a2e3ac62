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

//! Line items and their pacing model
//!
//! A line item owns at most one active [`DeliveryPlan`] at a time. The
//! plan splits the serves allowed within its window into priority
//! classes of [`DeliveryToken`]s; every serve consumes one token and
//! pushes the line item's `ready_at` forward so delivery spreads evenly
//! across the window.

mod line_item;
mod plan;
mod token;

pub use line_item::{LineItem, TokenSpend};
pub use plan::DeliveryPlan;
pub use token::DeliveryToken;
