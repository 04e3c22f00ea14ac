// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker for callers that need a machine-parseable payload rather
/// than free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonObject,
}

/// Immutable value created per generation call. Higher layers clone it
/// with fields overridden when they force a sub-strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub id: Uuid,
    pub prompt: String,
    pub model: Option<String>,
    pub response_format: Option<ResponseFormat>,
    pub use_parallel: bool,
    pub use_fastest: bool,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            model: None,
            response_format: None,
            use_parallel: false,
            use_fastest: false,
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn with_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    pub fn parallel(mut self) -> Self {
        self.use_parallel = true;
        self
    }

    pub fn fastest(mut self) -> Self {
        self.use_fastest = true;
        self
    }

    pub fn wants_structured(&self) -> bool {
        matches!(self.response_format, Some(ResponseFormat::JsonObject))
    }
}
