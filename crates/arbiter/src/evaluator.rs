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

use crate::client::GenerationClient;
use crate::registry::{ModelDescriptor, ModelRegistry};
use llm_contracts::{Evaluation, ModelRole};
use std::sync::Arc;
use tracing::{debug, warn};

/// Prefix of every scoring prompt; lets transports and tests tell
/// evaluation traffic apart from generation traffic.
pub const SCORING_PROMPT_PREFIX: &str = "Rate the quality of the following response";

/// Scores a generated text through a secondary model call. Never
/// errors: any transport or parse failure degrades to the neutral
/// score of 3.0.
pub struct ResponseEvaluator {
    client: Arc<dyn GenerationClient>,
    registry: Arc<ModelRegistry>,
}

impl ResponseEvaluator {
    pub fn new(client: Arc<dyn GenerationClient>, registry: Arc<ModelRegistry>) -> Self {
        Self { client, registry }
    }

    pub async fn evaluate(&self, prompt: &str, response_text: &str) -> Evaluation {
        let Some(model) = self.scoring_model().await else {
            warn!("No model available for evaluation, returning neutral score");
            return Evaluation::neutral();
        };

        let scoring_prompt = format!(
            "{SCORING_PROMPT_PREFIX} to the given request on a scale from 1 to 5, \
             where 1 is unusable and 5 is excellent. Reply with the number first, \
             then a one-sentence justification.\n\nRequest:\n{prompt}\n\nResponse:\n{response_text}"
        );

        let result = self.client.call(&model, &scoring_prompt, None).await;
        if !result.success {
            warn!(
                model = model.name.as_str(),
                "Evaluation call failed, returning neutral score"
            );
            return Evaluation::neutral();
        }

        match parse_score(&result.content) {
            Some((score, reasoning)) => {
                debug!(score, "Parsed evaluation score");
                Evaluation::clamped(score, reasoning)
            }
            None => {
                warn!("Evaluation response carried no numeric score");
                Evaluation::neutral()
            }
        }
    }

    /// Evaluation traffic stays off the serving path when a reserve
    /// tier exists.
    async fn scoring_model(&self) -> Option<ModelDescriptor> {
        if let Some(model) = self.registry.fastest(ModelRole::Reserve).await {
            return Some(model);
        }
        self.registry.fastest(ModelRole::Primary).await
    }
}

/// Extracts the first numeric token from evaluator output. Returns
/// the raw (unclamped) score and the remaining text as reasoning.
fn parse_score(text: &str) -> Option<(f64, String)> {
    for token in text.split(|c: char| c.is_whitespace() || c == ':' || c == ',') {
        let cleaned = token.trim_matches(|c: char| !c.is_ascii_digit() && c != '.' && c != '-');
        if cleaned.is_empty() {
            continue;
        }
        let candidate = cleaned.trim_end_matches('.');
        if let Ok(score) = candidate.parse::<f64>() {
            let reasoning = text.trim().to_string();
            return Some((score, reasoning));
        }
    }
    None
}
