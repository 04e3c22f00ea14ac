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

//! Facade wiring the registry, router, evaluator, executor, adaptive
//! layer and error learning into one entry point. Callers construct it
//! from configuration plus a [`GenerationClient`] and use
//! [`Orchestrator::generate`] for everything.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use llm_contracts::{GenerationRequest, GenerationResult, LLMResult, OrchestratorConfig};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::adaptive::{self, AdaptiveStats, AdaptiveStrategyManager};
use crate::client::GenerationClient;
use crate::evaluator::ResponseEvaluator;
use crate::learning::{ErrorLearningSystem, LearningStats};
use crate::registry::ModelRegistry;
use crate::router::{RequestRouter, RoutingStats};
use crate::strategy::{AttemptObserver, StrategyExecutor};

/// Snapshot of orchestrator health for callers that expose a status
/// surface.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub enabled_models: usize,
    pub total_models: usize,
    /// Enabled count per role, keyed by role name.
    pub enabled_by_role: HashMap<String, usize>,
    pub disabled_models: Vec<String>,
    pub active_mitigations: usize,
}

/// Feeds failed model attempts into the error learning system with
/// the router supplying the task type. Installed as the executor's
/// attempt observer, so chain failures a fallback rescues still count.
struct LearningBridge {
    router: Arc<RequestRouter>,
    learning: Arc<ErrorLearningSystem>,
}

#[async_trait]
impl AttemptObserver for LearningBridge {
    async fn failed_attempt(&self, request: &GenerationRequest, result: &GenerationResult) {
        let task_type = self.router.analyze(request).task_type;
        let analysis = self
            .learning
            .analyze(&request.prompt, &result.model, Some(result), None, task_type)
            .await;
        debug!(
            model = %result.model,
            error_type = analysis.error_type.as_str(),
            "Attempt failure recorded"
        );
    }
}

pub struct Orchestrator {
    registry: Arc<ModelRegistry>,
    router: Arc<RequestRouter>,
    adaptive: Arc<AdaptiveStrategyManager>,
    learning: Arc<ErrorLearningSystem>,
}

impl Orchestrator {
    pub fn new(
        config: &OrchestratorConfig,
        client: Arc<dyn GenerationClient>,
    ) -> LLMResult<Self> {
        let registry = Arc::new(ModelRegistry::from_config(config)?);
        let evaluator = Arc::new(ResponseEvaluator::new(client.clone(), registry.clone()));
        let router = Arc::new(RequestRouter::new(registry.clone()));
        let learning = Arc::new(ErrorLearningSystem::new(registry.clone()));
        let bridge = Arc::new(LearningBridge {
            router: router.clone(),
            learning: learning.clone(),
        });
        let executor = Arc::new(
            StrategyExecutor::new(registry.clone(), client, evaluator.clone())
                .with_observer(bridge),
        );
        let adaptive = Arc::new(AdaptiveStrategyManager::new(
            executor,
            router.clone(),
            evaluator,
        ));
        info!("Orchestrator initialised");
        Ok(Self {
            registry,
            router,
            adaptive,
            learning,
        })
    }

    /// One request end to end: adaptive strategy execution, routing
    /// feedback, and error learning. Per-attempt failures reach the
    /// learning system through the executor's observer; this path adds
    /// the cases no attempt covers, a request that never reached a
    /// model and a scored response under its task's quality floor.
    /// Expected failures come back inside the result, never as `Err`.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let result = self.adaptive.generate(request).await;
        self.router
            .learn(request, &result, result.quality_score)
            .await;
        if !result.success {
            if result.model == "none" {
                let task_type = self.router.analyze(request).task_type;
                self.learning
                    .analyze(&request.prompt, &result.model, Some(&result), None, task_type)
                    .await;
            }
            warn!(
                model = %result.model,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Generation failed"
            );
        } else if let Some(score) = result.quality_score {
            let task_type = self.router.analyze(request).task_type;
            let floor = adaptive::quality_floor(task_type);
            if score < floor {
                let message = format!("low quality score {:.1} below acceptance threshold", score);
                let analysis = self
                    .learning
                    .analyze(
                        &request.prompt,
                        &result.model,
                        Some(&result),
                        Some(&message),
                        task_type,
                    )
                    .await;
                warn!(
                    model = %result.model,
                    score,
                    floor,
                    remediation = %analysis.remediation,
                    "Low-quality response recorded"
                );
            }
        }
        result
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn learning(&self) -> &Arc<ErrorLearningSystem> {
        &self.learning
    }

    pub async fn routing_stats(&self) -> RoutingStats {
        self.router.routing_stats().await
    }

    pub async fn adaptive_stats(&self) -> AdaptiveStats {
        self.adaptive.adaptive_stats().await
    }

    pub async fn learning_stats(&self) -> LearningStats {
        self.learning.learning_stats().await
    }

    pub async fn health(&self) -> HealthReport {
        let snapshot = self.registry.snapshot().await;
        let enabled = snapshot.iter().filter(|m| m.enabled).count();
        let mut enabled_by_role: HashMap<String, usize> = HashMap::new();
        for model in snapshot.iter().filter(|m| m.enabled) {
            *enabled_by_role
                .entry(model.role.as_str().to_string())
                .or_insert(0) += 1;
        }
        let disabled = snapshot
            .iter()
            .filter(|m| !m.enabled)
            .map(|m| m.name.clone())
            .collect();
        HealthReport {
            healthy: enabled > 0,
            enabled_models: enabled,
            total_models: snapshot.len(),
            enabled_by_role,
            disabled_models: disabled,
            active_mitigations: self.learning.active_mitigations().await.len(),
        }
    }
}
