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

/// Outcome of one model call or one strategy execution. Expected
/// failures resolve to `success: false` with a populated `error`;
/// they are never raised to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub model: String,
    pub content: String,
    pub latency_secs: f64,
    pub success: bool,
    pub error: Option<String>,
    pub quality_score: Option<f64>,
}

impl GenerationResult {
    pub fn ok(model: impl Into<String>, content: impl Into<String>, latency_secs: f64) -> Self {
        Self {
            model: model.into(),
            content: content.into(),
            latency_secs,
            success: true,
            error: None,
            quality_score: None,
        }
    }

    pub fn failure(model: impl Into<String>, error: impl Into<String>, latency_secs: f64) -> Self {
        Self {
            model: model.into(),
            content: String::new(),
            latency_secs,
            success: false,
            error: Some(error.into()),
            quality_score: None,
        }
    }

    /// Synthetic result for the case where no model could even be
    /// attempted.
    pub fn unavailable() -> Self {
        Self {
            model: "none".to_string(),
            content: String::new(),
            latency_secs: 0.0,
            success: false,
            error: Some("service temporarily unavailable".to_string()),
            quality_score: None,
        }
    }
}

/// Quality judgement produced by the response evaluator. Scores live
/// on [1, 5]; anything unparseable degrades to the neutral 3.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub score: f64,
    pub reasoning: String,
}

impl Evaluation {
    pub fn clamped(score: f64, reasoning: impl Into<String>) -> Self {
        Self {
            score: score.clamp(1.0, 5.0),
            reasoning: reasoning.into(),
        }
    }

    pub fn neutral() -> Self {
        Self {
            score: 3.0,
            reasoning: "no reasoning available".to_string(),
        }
    }
}
