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

//! Execution strategies over the registry: single generation with a
//! fallback chain, and a two-model parallel race judged by the
//! evaluator. Expected failures stay inside `GenerationResult`; the
//! executor never raises them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use llm_contracts::{GenerationRequest, GenerationResult, ModelRole};
use tracing::{debug, info, warn};

use crate::client::GenerationClient;
use crate::evaluator::ResponseEvaluator;
use crate::registry::{ModelDescriptor, ModelRegistry};
use crate::validation::{attempt_repair, extract_json};

/// Hard ceiling on a parallel race before degrading to single mode.
pub const PARALLEL_TIMEOUT: Duration = Duration::from_secs(90);
/// Ceiling on one evaluator call when judging race winners.
pub const EVALUATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives every failed model attempt, including the ones a later
/// chain entry rescues.
#[async_trait]
pub trait AttemptObserver: Send + Sync {
    async fn failed_attempt(&self, request: &GenerationRequest, result: &GenerationResult);
}

/// Runs requests against concrete models on behalf of the adaptive
/// layer. Holds no per-request state.
pub struct StrategyExecutor {
    registry: Arc<ModelRegistry>,
    client: Arc<dyn GenerationClient>,
    evaluator: Arc<ResponseEvaluator>,
    observer: Option<Arc<dyn AttemptObserver>>,
}

impl StrategyExecutor {
    pub fn new(
        registry: Arc<ModelRegistry>,
        client: Arc<dyn GenerationClient>,
        evaluator: Arc<ResponseEvaluator>,
    ) -> Self {
        Self {
            registry,
            client,
            evaluator,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn AttemptObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Entry point used when no adaptive decision overrides the mode.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        if request.use_parallel {
            self.generate_parallel(request).await
        } else {
            self.generate_single(request).await
        }
    }

    /// Walks a fallback chain: the chosen head model first, then every
    /// enabled fallback-role model in registry order. Returns the first
    /// success, otherwise the last failure seen.
    pub async fn generate_single(&self, request: &GenerationRequest) -> GenerationResult {
        let chain = self.build_chain(request).await;
        if chain.is_empty() {
            warn!("No enabled models available; returning placeholder result");
            return GenerationResult::unavailable();
        }

        let mut last_failure: Option<GenerationResult> = None;
        for (position, model) in chain.iter().enumerate() {
            if position > 0 {
                info!(
                    model = %model.name,
                    position,
                    "Falling back to next model in chain"
                );
            }
            let result = self.attempt(model, request).await;
            if result.success {
                return result;
            }
            warn!(
                model = %model.name,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Model attempt failed"
            );
            last_failure = Some(result);
        }
        last_failure.unwrap_or_else(GenerationResult::unavailable)
    }

    /// Races the two fastest primaries and lets the evaluator pick the
    /// winner. Fewer than two candidates, or a race timeout, degrades
    /// to the single-mode chain.
    pub async fn generate_parallel(&self, request: &GenerationRequest) -> GenerationResult {
        let candidates = self
            .registry
            .fastest_models(ModelRole::Primary, 2)
            .await;
        if candidates.len() < 2 {
            debug!(
                available = candidates.len(),
                "Not enough primaries for a race; degrading to single mode"
            );
            return self.generate_single(request).await;
        }

        let (first, second) = (&candidates[0], &candidates[1]);
        debug!(first = %first.name, second = %second.name, "Racing two primaries");
        let race = futures::future::join(
            self.attempt(first, request),
            self.attempt(second, request),
        );
        let (a, b) = match tokio::time::timeout(PARALLEL_TIMEOUT, race).await {
            Ok(results) => results,
            Err(_) => {
                warn!(
                    timeout_secs = PARALLEL_TIMEOUT.as_secs(),
                    "Parallel race timed out; degrading to single mode"
                );
                return self.generate_single(request).await;
            }
        };

        let mut valid: Vec<GenerationResult> =
            [a, b].into_iter().filter(|r| r.success).collect();
        match valid.len() {
            0 => {
                warn!("Both race participants failed; degrading to single mode");
                self.generate_single(request).await
            }
            1 => valid.pop().unwrap_or_else(GenerationResult::unavailable),
            _ => self.judge(request, valid).await,
        }
    }

    /// One bounded evaluator call per candidate; an evaluator that is
    /// slow or broken costs the candidate nothing beyond the neutral
    /// score.
    async fn judge(
        &self,
        request: &GenerationRequest,
        mut candidates: Vec<GenerationResult>,
    ) -> GenerationResult {
        for candidate in candidates.iter_mut() {
            let score = match tokio::time::timeout(
                EVALUATION_TIMEOUT,
                self.evaluator.evaluate(&request.prompt, &candidate.content),
            )
            .await
            {
                Ok(evaluation) => evaluation.score,
                Err(_) => {
                    warn!(model = %candidate.model, "Evaluation timed out; scoring neutral");
                    3.0
                }
            };
            candidate.quality_score = Some(score);
        }

        let best = candidates
            .into_iter()
            .max_by(|a, b| {
                a.quality_score
                    .partial_cmp(&b.quality_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or_else(GenerationResult::unavailable);
        info!(
            model = %best.model,
            score = best.quality_score.unwrap_or(3.0),
            "Race winner selected"
        );
        best
    }

    /// One model call plus structured-output validation and registry
    /// stat accounting. Used by the adaptive layer for consensus calls
    /// as well as by both modes here.
    pub(crate) async fn attempt(
        &self,
        model: &ModelDescriptor,
        request: &GenerationRequest,
    ) -> GenerationResult {
        let started = Instant::now();
        let mut result = self
            .client
            .call(model, &request.prompt, request.response_format.as_ref())
            .await;
        if result.latency_secs <= 0.0 {
            result.latency_secs = started.elapsed().as_secs_f64();
        }

        if result.success && request.wants_structured() {
            match extract_json(&result.content).or_else(|| attempt_repair(&result.content)) {
                Some(payload) => result.content = payload,
                None => {
                    result.success = false;
                    result.error =
                        Some("structured response failed JSON validation".to_string());
                }
            }
        }

        self.registry
            .update_stats(&result.model, result.success, result.latency_secs)
            .await;
        if !result.success {
            if let Some(observer) = &self.observer {
                observer.failed_attempt(request, &result).await;
            }
        }
        result
    }

    /// Head of the chain: an explicitly requested model when it exists
    /// and is enabled, else the fastest primary when the request asks
    /// for speed, else the first primary in registry order. Tail: every
    /// enabled fallback-role model not already in the chain.
    async fn build_chain(&self, request: &GenerationRequest) -> Vec<ModelDescriptor> {
        let mut chain: Vec<ModelDescriptor> = Vec::new();

        if let Some(name) = &request.model {
            match self.registry.get(name).await {
                Some(model) if model.enabled => chain.push(model),
                _ => warn!(
                    model = %name,
                    "Requested model unknown or disabled; using defaults"
                ),
            }
        }

        if chain.is_empty() {
            if request.use_fastest {
                if let Some(model) = self.registry.fastest(ModelRole::Primary).await {
                    chain.push(model);
                }
            }
        }
        if chain.is_empty() {
            if let Some(model) = self
                .registry
                .models(Some(ModelRole::Primary))
                .await
                .into_iter()
                .next()
            {
                chain.push(model);
            }
        }

        for fallback in self.registry.models(Some(ModelRole::Fallback)).await {
            if chain.iter().all(|m| m.name != fallback.name) {
                chain.push(fallback);
            }
        }
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llm_contracts::{OrchestratorConfig, ResponseFormat};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted client: replies per model name, counts calls.
    struct ScriptedClient {
        replies: HashMap<String, Result<String, String>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<(&str, Result<&str, &str>)>) -> Self {
            Self {
                replies: replies
                    .into_iter()
                    .map(|(m, r)| {
                        (
                            m.to_string(),
                            r.map(str::to_string).map_err(str::to_string),
                        )
                    })
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedClient {
        async fn call(
            &self,
            model: &ModelDescriptor,
            _prompt: &str,
            _format: Option<&ResponseFormat>,
        ) -> GenerationResult {
            self.calls.lock().unwrap().push(model.name.clone());
            match self.replies.get(&model.name) {
                Some(Ok(content)) => GenerationResult::ok(&model.name, content.clone(), 0.1),
                Some(Err(error)) => GenerationResult::failure(&model.name, error.clone(), 0.1),
                None => GenerationResult::failure(&model.name, "no script entry", 0.1),
            }
        }
    }

    fn executor_with(
        yaml: &str,
        client: Arc<ScriptedClient>,
    ) -> (StrategyExecutor, Arc<ModelRegistry>) {
        let config = OrchestratorConfig::from_yaml_str(yaml).unwrap();
        let registry = Arc::new(ModelRegistry::from_config(&config).unwrap());
        let evaluator = Arc::new(ResponseEvaluator::new(
            client.clone(),
            registry.clone(),
        ));
        (
            StrategyExecutor::new(registry.clone(), client, evaluator),
            registry,
        )
    }

    const CHAIN_CONFIG: &str = r#"
default_provider: local
providers:
  local:
    models:
      - name: prime
      - name: backup-one
      - name: backup-two
roles:
  primary: [prime]
  fallback: [backup-one, backup-two]
"#;

    #[tokio::test]
    async fn test_single_returns_first_success_without_fallback() {
        let client = Arc::new(ScriptedClient::new(vec![("prime", Ok("answer"))]));
        let (executor, _) = executor_with(CHAIN_CONFIG, client.clone());
        let result = executor
            .generate_single(&GenerationRequest::new("hello"))
            .await;
        assert!(result.success);
        assert_eq!(result.model, "prime");
        assert_eq!(client.calls(), vec!["prime"]);
    }

    #[tokio::test]
    async fn test_single_walks_fallback_chain_in_order() {
        let client = Arc::new(ScriptedClient::new(vec![
            ("prime", Err("boom")),
            ("backup-one", Err("down")),
            ("backup-two", Ok("rescued")),
        ]));
        let (executor, registry) = executor_with(CHAIN_CONFIG, client.clone());
        let result = executor
            .generate_single(&GenerationRequest::new("hello"))
            .await;
        assert!(result.success);
        assert_eq!(result.model, "backup-two");
        assert_eq!(client.calls(), vec!["prime", "backup-one", "backup-two"]);

        // Every attempt was accounted, not just the success.
        assert_eq!(registry.get("prime").await.unwrap().error_count, 1);
        assert_eq!(registry.get("backup-two").await.unwrap().success_count, 1);
    }

    struct RecordingObserver {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AttemptObserver for RecordingObserver {
        async fn failed_attempt(&self, _request: &GenerationRequest, result: &GenerationResult) {
            self.seen.lock().unwrap().push((
                result.model.clone(),
                result.error.clone().unwrap_or_default(),
            ));
        }
    }

    #[tokio::test]
    async fn test_every_failed_attempt_reaches_the_observer() {
        let client = Arc::new(ScriptedClient::new(vec![
            ("prime", Err("boom")),
            ("backup-one", Err("down")),
            ("backup-two", Ok("rescued")),
        ]));
        let observer = Arc::new(RecordingObserver {
            seen: Mutex::new(Vec::new()),
        });
        let (executor, _) = executor_with(CHAIN_CONFIG, client);
        let executor = executor.with_observer(observer.clone());

        let result = executor
            .generate_single(&GenerationRequest::new("hello"))
            .await;
        assert!(result.success);

        // The rescue did not hide the two earlier failures.
        let seen = observer.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("prime".to_string(), "boom".to_string()),
                ("backup-one".to_string(), "down".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_single_exhausted_chain_reports_last_failure() {
        let client = Arc::new(ScriptedClient::new(vec![
            ("prime", Err("first")),
            ("backup-one", Err("middle")),
            ("backup-two", Err("last")),
        ]));
        let (executor, _) = executor_with(CHAIN_CONFIG, client);
        let result = executor
            .generate_single(&GenerationRequest::new("hello"))
            .await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("last"));
    }

    #[tokio::test]
    async fn test_single_with_no_models_is_unavailable() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let (executor, registry) = executor_with(CHAIN_CONFIG, client);
        for name in ["prime", "backup-one", "backup-two"] {
            registry.disable(name).await;
        }
        let result = executor
            .generate_single(&GenerationRequest::new("hello"))
            .await;
        assert!(!result.success);
        assert_eq!(result.model, "none");
    }

    #[tokio::test]
    async fn test_requested_model_heads_the_chain() {
        let client = Arc::new(ScriptedClient::new(vec![("backup-two", Ok("direct"))]));
        let (executor, _) = executor_with(CHAIN_CONFIG, client.clone());
        let request = GenerationRequest::new("hello").with_model("backup-two");
        let result = executor.generate_single(&request).await;
        assert!(result.success);
        // Head served; the chain never reached other models.
        assert_eq!(client.calls(), vec!["backup-two"]);
    }

    #[tokio::test]
    async fn test_structured_request_extracts_fenced_json() {
        let client = Arc::new(ScriptedClient::new(vec![(
            "prime",
            Ok("Here you go:\n```json\n{\"a\": 1}\n```"),
        )]));
        let (executor, _) = executor_with(CHAIN_CONFIG, client);
        let request =
            GenerationRequest::new("emit json").with_format(ResponseFormat::JsonObject);
        let result = executor.generate_single(&request).await;
        assert!(result.success);
        assert_eq!(result.content, "{\"a\": 1}");
    }

    #[tokio::test]
    async fn test_structured_request_falls_back_on_invalid_json() {
        let client = Arc::new(ScriptedClient::new(vec![
            ("prime", Ok("no json here at all")),
            ("backup-one", Ok("{\"ok\": true}")),
        ]));
        let (executor, _) = executor_with(CHAIN_CONFIG, client.clone());
        let request =
            GenerationRequest::new("emit json").with_format(ResponseFormat::JsonObject);
        let result = executor.generate_single(&request).await;
        assert!(result.success);
        assert_eq!(result.model, "backup-one");
        assert_eq!(client.calls(), vec!["prime", "backup-one"]);
    }

    const RACE_CONFIG: &str = r#"
default_provider: local
providers:
  local:
    models:
      - name: racer-a
      - name: racer-b
      - name: judge-mini
roles:
  primary: [racer-a, racer-b]
  reserve: [judge-mini]
"#;

    #[tokio::test]
    async fn test_parallel_races_two_primaries_and_judges() {
        let client = Arc::new(ScriptedClient::new(vec![
            ("racer-a", Ok("short")),
            ("racer-b", Ok("a longer and better answer")),
            ("judge-mini", Ok("4")),
        ]));
        let (executor, _) = executor_with(RACE_CONFIG, client.clone());
        let result = executor
            .generate_parallel(&GenerationRequest::new("hello"))
            .await;
        assert!(result.success);
        assert!(result.quality_score.is_some());
        // Both racers ran, plus two judge calls.
        let calls = client.calls();
        assert_eq!(calls.iter().filter(|c| *c == "racer-a").count(), 1);
        assert_eq!(calls.iter().filter(|c| *c == "racer-b").count(), 1);
        assert_eq!(calls.iter().filter(|c| *c == "judge-mini").count(), 2);
    }

    #[tokio::test]
    async fn test_parallel_single_survivor_skips_judging() {
        let client = Arc::new(ScriptedClient::new(vec![
            ("racer-a", Err("down")),
            ("racer-b", Ok("still here")),
        ]));
        let (executor, _) = executor_with(RACE_CONFIG, client.clone());
        let result = executor
            .generate_parallel(&GenerationRequest::new("hello"))
            .await;
        assert!(result.success);
        assert_eq!(result.model, "racer-b");
        assert!(result.quality_score.is_none());
        assert!(!client.calls().contains(&"judge-mini".to_string()));
    }

    #[tokio::test]
    async fn test_parallel_degrades_with_one_primary() {
        let client = Arc::new(ScriptedClient::new(vec![("racer-a", Ok("solo"))]));
        let (executor, registry) = executor_with(RACE_CONFIG, client.clone());
        registry.disable("racer-b").await;
        let result = executor
            .generate_parallel(&GenerationRequest::new("hello"))
            .await;
        assert!(result.success);
        assert_eq!(result.model, "racer-a");
        assert_eq!(client.calls(), vec!["racer-a"]);
    }
}
