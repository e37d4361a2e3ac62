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

//! Pacer SDK - wire types shared with the deals engine's collaborators
//!
//! This crate provides the typed structures exchanged at the edges of
//! the line-item matching and pacing engine:
//! - the OpenRTB bid request subset read by targeting
//! - line-item metadata records delivered by the Planner
//! - delivery progress reports consumed by the reporting sink
//!
//! The SDK is designed to be lightweight and embeddable:
//! - No background threads
//! - No runtime initialization
//! - No environment or configuration loading

pub mod openrtb;
pub mod planner;
pub mod report;

pub use openrtb::*;
pub use planner::*;
pub use report::*;
