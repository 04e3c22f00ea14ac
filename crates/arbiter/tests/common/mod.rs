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

use std::collections::HashMap;
use std::sync::{Mutex, Once};

use arbiter::evaluator::SCORING_PROMPT_PREFIX;
use arbiter::{GenerationClient, ModelDescriptor};
use async_trait::async_trait;
use llm_contracts::{GenerationResult, ResponseFormat};

static TRACING: Once = Once::new();

/// Honours `RUST_LOG` when set; quiet otherwise.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Per-model scripted behaviour for a [`MockClient`].
#[derive(Clone)]
pub enum Behaviour {
    Reply(String),
    Fail(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub model: String,
    pub scoring: bool,
}

/// Deterministic client: generation calls follow the per-model script,
/// evaluation calls all get the same fixed verdict.
pub struct MockClient {
    behaviours: HashMap<String, Behaviour>,
    score_reply: String,
    calls: Mutex<Vec<CallRecord>>,
}

impl MockClient {
    pub fn new(behaviours: Vec<(&str, Behaviour)>) -> Self {
        Self {
            behaviours: behaviours
                .into_iter()
                .map(|(m, b)| (m.to_string(), b))
                .collect(),
            score_reply: "4 clear and correct".to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_score_reply(mut self, reply: &str) -> Self {
        self.score_reply = reply.to_string();
        self
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.calls.lock().unwrap().clone()
    }

    pub fn generation_calls(&self, model: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| !c.scoring && c.model == model)
            .count()
    }
}

#[async_trait]
impl GenerationClient for MockClient {
    async fn call(
        &self,
        model: &ModelDescriptor,
        prompt: &str,
        _format: Option<&ResponseFormat>,
    ) -> GenerationResult {
        let scoring = prompt.starts_with(SCORING_PROMPT_PREFIX);
        self.calls.lock().unwrap().push(CallRecord {
            model: model.name.clone(),
            scoring,
        });
        if scoring {
            return GenerationResult::ok(&model.name, self.score_reply.clone(), 0.05);
        }
        match self.behaviours.get(&model.name) {
            Some(Behaviour::Reply(content)) => {
                GenerationResult::ok(&model.name, content.clone(), 0.1)
            }
            Some(Behaviour::Fail(error)) => {
                GenerationResult::failure(&model.name, error.clone(), 0.1)
            }
            None => GenerationResult::failure(&model.name, "unscripted model", 0.1),
        }
    }
}
