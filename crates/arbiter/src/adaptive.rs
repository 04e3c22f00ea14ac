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

//! Adaptive strategy selection. Each task type carries a rule naming
//! its preferred strategies and quality floors; per-(strategy, task)
//! history accumulates in the background and, when a strategy
//! underperforms its floors, an override swings that task type to the
//! best-measured alternative. Decisions are cached briefly per prompt
//! so repeated requests skip re-deciding.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use llm_contracts::{
    ComplexityLevel, GenerationRequest, GenerationResult, ModelRole, StrategyType, TaskType,
};
use lru::LruCache;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::evaluator::ResponseEvaluator;
use crate::perf::PerformanceRecord;
use crate::router::{RequestAnalysis, RequestRouter};
use crate::strategy::{StrategyExecutor, EVALUATION_TIMEOUT};

const DECISION_CACHE_SIZE: usize = 512;
/// Cached decisions older than this are re-decided.
const DECISION_STALENESS: Duration = Duration::from_secs(10);
/// Sliding window of recent outcomes kept per task type.
const RECENT_WINDOW: usize = 20;
/// Outcomes required before an adaptation can fire for a task type.
const MIN_SAMPLES_FOR_ADAPTATION: usize = 5;
/// History an alternative strategy needs before it can be adopted.
const MIN_SAMPLES_FOR_CANDIDATE: u64 = 3;
const ADAPTATION_COOLDOWN: Duration = Duration::from_secs(300);
/// Fixed trigger floors; the per-task rule floors only shape the
/// preferred strategy list, not when adaptation fires.
const TRIGGER_SUCCESS_FLOOR: f64 = 0.7;
const TRIGGER_QUALITY_FLOOR: f64 = 3.0;
const HIGH_LATENCY_SECS: f64 = 30.0;
/// Rules at or above this success floor count as reliability-critical
/// and escalate to a verifying strategy.
const HIGH_RELIABILITY_FLOOR: f64 = 0.85;
const CONSENSUS_SIZE: usize = 3;
const IMPROVE_ROUNDS: usize = 2;
/// Responses shorter than this are not worth a background evaluation.
const MIN_EVAL_CONTENT: usize = 20;

/// Per-task preferences and the floors below which adaptation fires.
struct StrategyRule {
    preferred: &'static [StrategyType],
    min_success_rate: f64,
    min_quality: f64,
}

fn rule_for(task: TaskType) -> StrategyRule {
    use StrategyType::*;
    let (preferred, min_success_rate, min_quality): (&'static [StrategyType], f64, f64) =
        match task {
            TaskType::CodeGeneration => (&[Parallel, Iterative], 0.8, 3.5),
            TaskType::CodeReview => (&[Parallel, Consensus], 0.85, 3.5),
            TaskType::Analysis => (&[Consensus, Parallel], 0.8, 3.5),
            TaskType::QuestionAnswering => (&[Single, Fallback], 0.7, 3.0),
            TaskType::Summarisation => (&[Single, Parallel], 0.7, 3.0),
            TaskType::Translation => (&[Single, Parallel], 0.75, 3.0),
            TaskType::Mathematics => (&[Consensus, Parallel], 0.85, 4.0),
            TaskType::LogicalReasoning => (&[Consensus, Iterative], 0.8, 3.5),
            TaskType::CreativeWriting => (&[Single, Iterative], 0.6, 3.0),
            TaskType::ChatConversation => (&[Single, Fallback], 0.6, 2.5),
            TaskType::JsonGeneration => (&[Parallel, Iterative], 0.9, 3.5),
            TaskType::TechnicalWriting => (&[Single, Iterative], 0.7, 3.0),
            TaskType::Unknown => (&[Single, Fallback], 0.6, 2.5),
        };
    StrategyRule {
        preferred,
        min_success_rate,
        min_quality,
    }
}

/// Quality floor responses for this task type are expected to meet;
/// scored results below it are worth error-learning even on success.
pub(crate) fn quality_floor(task: TaskType) -> f64 {
    rule_for(task).min_quality
}

/// Why an adaptation fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptationTrigger {
    LowSuccessRate,
    LowQuality,
    HighLatency,
}

/// One recorded strategy switch for a task type.
#[derive(Debug, Clone, Serialize)]
pub struct AdaptationContext {
    pub task_type: TaskType,
    pub trigger: AdaptationTrigger,
    pub from_strategy: StrategyType,
    pub to_strategy: StrategyType,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdaptiveStats {
    pub total_decisions: u64,
    pub cache_hits: u64,
    /// Keyed `strategy/task`.
    pub strategy_performance: HashMap<String, PerformanceRecord>,
    /// Task types currently swung away from their rule default.
    pub overrides: HashMap<String, StrategyType>,
    pub adaptations: Vec<AdaptationContext>,
}

#[derive(Debug, Clone)]
struct StrategySample {
    strategy: StrategyType,
    success: bool,
    latency_secs: f64,
    score: Option<f64>,
}

#[derive(Clone)]
struct CachedDecision {
    strategy: StrategyType,
    decided_at: Instant,
}

#[derive(Default)]
struct AdaptiveState {
    performance: HashMap<(StrategyType, TaskType), PerformanceRecord>,
    recent: HashMap<TaskType, VecDeque<StrategySample>>,
    overrides: HashMap<TaskType, StrategyType>,
    adaptations: Vec<AdaptationContext>,
    last_adaptation: HashMap<TaskType, DateTime<Utc>>,
    total_decisions: u64,
    cache_hits: u64,
}

/// Chooses and runs a strategy per request, learning from outcomes in
/// the background.
pub struct AdaptiveStrategyManager {
    executor: Arc<StrategyExecutor>,
    router: Arc<RequestRouter>,
    evaluator: Arc<ResponseEvaluator>,
    state: Arc<RwLock<AdaptiveState>>,
    decision_cache: Arc<Mutex<LruCache<(String, TaskType, ComplexityLevel), CachedDecision>>>,
}

impl AdaptiveStrategyManager {
    pub fn new(
        executor: Arc<StrategyExecutor>,
        router: Arc<RequestRouter>,
        evaluator: Arc<ResponseEvaluator>,
    ) -> Self {
        let capacity =
            NonZeroUsize::new(DECISION_CACHE_SIZE).expect("decision cache capacity is non-zero");
        Self {
            executor,
            router,
            evaluator,
            state: Arc::new(RwLock::new(AdaptiveState::default())),
            decision_cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Full adaptive path: classify, decide, execute, then learn from
    /// the outcome off the request path.
    pub async fn generate(&self, request: &GenerationRequest) -> GenerationResult {
        let analysis = self.router.analyze(request);
        let strategy = self.decide(request, &analysis).await;
        info!(
            task = analysis.task_type.as_str(),
            ?strategy,
            "Strategy selected"
        );
        let result = self.execute(strategy, request).await;
        self.spawn_learning(strategy, analysis.task_type, request, result.clone());
        result
    }

    /// Cache first, override second, rule table last.
    async fn decide(
        &self,
        request: &GenerationRequest,
        analysis: &RequestAnalysis,
    ) -> StrategyType {
        let task = analysis.task_type;
        let key = (
            format!("{:x}", md5::compute(&request.prompt)),
            task,
            analysis.complexity,
        );
        let cached = self
            .decision_cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(&key).cloned())
            .filter(|hit| hit.decided_at.elapsed() < DECISION_STALENESS);
        {
            let mut state = self.state.write().await;
            state.total_decisions += 1;
            if cached.is_some() {
                state.cache_hits += 1;
            }
        }
        if let Some(hit) = cached {
            debug!(task = task.as_str(), strategy = ?hit.strategy, "Decision cache hit");
            return hit.strategy;
        }

        let strategy = {
            let state = self.state.read().await;
            match state.overrides.get(&task) {
                Some(over) => *over,
                None => choose_by_rule(request, analysis),
            }
        };
        if let Ok(mut cache) = self.decision_cache.lock() {
            cache.put(
                key,
                CachedDecision {
                    strategy,
                    decided_at: Instant::now(),
                },
            );
        }
        strategy
    }

    async fn execute(
        &self,
        strategy: StrategyType,
        request: &GenerationRequest,
    ) -> GenerationResult {
        match strategy {
            StrategyType::Single | StrategyType::Fallback => self.routed_single(request).await,
            StrategyType::Parallel => self.executor.generate_parallel(request).await,
            StrategyType::Consensus => self.consensus(request).await,
            StrategyType::Iterative => self.iterative(request).await,
        }
    }

    /// Single execution with the router's pick heading the chain. The
    /// chain itself still provides the fallbacks.
    async fn routed_single(&self, request: &GenerationRequest) -> GenerationResult {
        match self.router.route(request).await {
            Ok(decision) => {
                let mut routed = request.clone();
                routed.model = Some(decision.model);
                self.executor.generate_single(&routed).await
            }
            Err(err) => {
                warn!(error = %err, "Routing failed; using chain defaults");
                self.executor.generate_single(request).await
            }
        }
    }

    /// Asks up to three fastest primaries sequentially and keeps the
    /// answer the evaluator rates highest. Degrades to a parallel race
    /// when fewer than three primaries are enabled.
    async fn consensus(&self, request: &GenerationRequest) -> GenerationResult {
        let panel = self
            .executor
            .registry()
            .fastest_models(ModelRole::Primary, CONSENSUS_SIZE)
            .await;
        if panel.len() < CONSENSUS_SIZE {
            debug!(
                available = panel.len(),
                "Consensus panel too small; degrading to parallel"
            );
            return self.executor.generate_parallel(request).await;
        }

        let mut candidates = Vec::with_capacity(panel.len());
        for model in &panel {
            let result = self.executor.attempt(model, request).await;
            if result.success {
                candidates.push(result);
            } else {
                warn!(model = %model.name, "Consensus participant failed");
            }
        }

        match candidates.len() {
            0 => {
                warn!("All consensus participants failed; degrading to single mode");
                self.executor.generate_single(request).await
            }
            1 => candidates
                .pop()
                .unwrap_or_else(GenerationResult::unavailable),
            _ => {
                for candidate in candidates.iter_mut() {
                    candidate.quality_score =
                        Some(self.bounded_score(&request.prompt, &candidate.content).await);
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
                    "Consensus winner selected"
                );
                best
            }
        }
    }

    /// Generates once, then asks for bounded improvement passes and
    /// keeps a new draft only when it scores strictly higher. Stops at
    /// the first non-improvement.
    async fn iterative(&self, request: &GenerationRequest) -> GenerationResult {
        let mut best = self.routed_single(request).await;
        if !best.success {
            return best;
        }
        let mut best_score = self.bounded_score(&request.prompt, &best.content).await;

        for round in 1..=IMPROVE_ROUNDS {
            let improvement_prompt = format!(
                "Improve this response to the request below. Return only the \
                 improved response.\n\nRequest:\n{}\n\nCurrent response:\n{}",
                request.prompt, best.content
            );
            let mut draft_request = request.clone();
            draft_request.prompt = improvement_prompt;
            let draft = self.routed_single(&draft_request).await;
            if !draft.success {
                debug!(round, "Improvement draft failed; keeping current best");
                break;
            }
            let draft_score = self.bounded_score(&request.prompt, &draft.content).await;
            if draft_score > best_score {
                debug!(round, best_score, draft_score, "Draft accepted");
                best = draft;
                best_score = draft_score;
            } else {
                debug!(round, best_score, draft_score, "Draft rejected; stopping");
                break;
            }
        }
        best.quality_score = Some(best_score);
        best
    }

    async fn bounded_score(&self, prompt: &str, content: &str) -> f64 {
        match tokio::time::timeout(EVALUATION_TIMEOUT, self.evaluator.evaluate(prompt, content))
            .await
        {
            Ok(evaluation) => evaluation.score,
            Err(_) => {
                warn!("Evaluation timed out; scoring neutral");
                3.0
            }
        }
    }

    /// Detached learning: score the outcome when nothing scored it yet,
    /// record the sample, and re-check the adaptation triggers. The
    /// request path never waits on this.
    fn spawn_learning(
        &self,
        strategy: StrategyType,
        task: TaskType,
        request: &GenerationRequest,
        result: GenerationResult,
    ) {
        let evaluator = self.evaluator.clone();
        let state = self.state.clone();
        let prompt = request.prompt.clone();
        tokio::spawn(async move {
            let score = match result.quality_score {
                Some(score) => Some(score),
                None if result.success && result.content.len() > MIN_EVAL_CONTENT => {
                    match tokio::time::timeout(
                        EVALUATION_TIMEOUT,
                        evaluator.evaluate(&prompt, &result.content),
                    )
                    .await
                    {
                        Ok(evaluation) => Some(evaluation.score),
                        Err(_) => None,
                    }
                }
                None => None,
            };
            record_outcome(
                &state,
                strategy,
                task,
                result.success,
                result.latency_secs,
                score,
            )
            .await;
        });
    }

    /// Synchronous variant of the learning step, used by callers that
    /// need the outcome recorded before continuing.
    pub async fn record_outcome(
        &self,
        strategy: StrategyType,
        task: TaskType,
        success: bool,
        latency_secs: f64,
        score: Option<f64>,
    ) {
        record_outcome(&self.state, strategy, task, success, latency_secs, score).await;
    }

    pub async fn adaptive_stats(&self) -> AdaptiveStats {
        let state = self.state.read().await;
        AdaptiveStats {
            total_decisions: state.total_decisions,
            cache_hits: state.cache_hits,
            strategy_performance: state
                .performance
                .iter()
                .map(|((strategy, task), record)| {
                    (
                        format!("{:?}/{}", strategy, task.as_str()).to_lowercase(),
                        record.clone(),
                    )
                })
                .collect(),
            overrides: state
                .overrides
                .iter()
                .map(|(task, strategy)| (task.as_str().to_string(), *strategy))
                .collect(),
            adaptations: state.adaptations.clone(),
        }
    }
}

/// Rule-table decision for a task with no override in force. An
/// explicit parallel request always escalates; so do structured
/// output, accuracy-sensitive complex work, and reliability-critical
/// task types that are not latency-sensitive.
fn choose_by_rule(request: &GenerationRequest, analysis: &RequestAnalysis) -> StrategyType {
    let rule = rule_for(analysis.task_type);
    let escalate = request.use_parallel
        || analysis.structured_output
        || (analysis.requires_accuracy && analysis.complexity >= ComplexityLevel::Complex)
        || (rule.min_success_rate >= HIGH_RELIABILITY_FLOOR && !analysis.requires_speed);

    if escalate {
        if rule.preferred.contains(&StrategyType::Consensus) {
            StrategyType::Consensus
        } else {
            StrategyType::Parallel
        }
    } else if analysis.complexity == ComplexityLevel::Simple && analysis.requires_speed {
        StrategyType::Single
    } else {
        rule.preferred[0]
    }
}

async fn record_outcome(
    state: &Arc<RwLock<AdaptiveState>>,
    strategy: StrategyType,
    task: TaskType,
    success: bool,
    latency_secs: f64,
    score: Option<f64>,
) {
    let mut state = state.write().await;
    state
        .performance
        .entry((strategy, task))
        .or_default()
        .record(success, latency_secs, score);
    let window = state.recent.entry(task).or_default();
    window.push_back(StrategySample {
        strategy,
        success,
        latency_secs,
        score,
    });
    while window.len() > RECENT_WINDOW {
        window.pop_front();
    }
    maybe_adapt(&mut state, task);
}

/// Checks the current strategy's recent window against the fixed
/// trigger floors and swings the task to the best-measured alternative
/// when one is breached. At most one adaptation per task per cooldown.
fn maybe_adapt(state: &mut AdaptiveState, task: TaskType) {
    let rule = rule_for(task);
    let current = state
        .overrides
        .get(&task)
        .copied()
        .unwrap_or(rule.preferred[0]);

    if let Some(last) = state.last_adaptation.get(&task) {
        let elapsed = Utc::now().signed_duration_since(*last);
        if elapsed.num_seconds() < ADAPTATION_COOLDOWN.as_secs() as i64 {
            return;
        }
    }

    let samples: Vec<&StrategySample> = state
        .recent
        .get(&task)
        .map(|window| window.iter().filter(|s| s.strategy == current).collect())
        .unwrap_or_default();
    if samples.len() < MIN_SAMPLES_FOR_ADAPTATION {
        return;
    }

    let successes = samples.iter().filter(|s| s.success).count();
    let success_rate = successes as f64 / samples.len() as f64;
    let scored: Vec<f64> = samples.iter().filter_map(|s| s.score).collect();
    let avg_score = if scored.is_empty() {
        None
    } else {
        Some(scored.iter().sum::<f64>() / scored.len() as f64)
    };
    let avg_latency =
        samples.iter().map(|s| s.latency_secs).sum::<f64>() / samples.len() as f64;

    let trigger = if success_rate < TRIGGER_SUCCESS_FLOOR {
        Some(AdaptationTrigger::LowSuccessRate)
    } else if avg_score.is_some_and(|s| s < TRIGGER_QUALITY_FLOOR) {
        Some(AdaptationTrigger::LowQuality)
    } else if avg_latency > HIGH_LATENCY_SECS {
        Some(AdaptationTrigger::HighLatency)
    } else {
        None
    };
    let Some(trigger) = trigger else {
        return;
    };

    // Best alternative with enough history, by weighted score.
    let replacement = rule
        .preferred
        .iter()
        .chain(std::iter::once(&StrategyType::Fallback))
        .filter(|s| **s != current)
        .filter_map(|s| {
            state
                .performance
                .get(&(*s, task))
                .filter(|r| r.sample_count >= MIN_SAMPLES_FOR_CANDIDATE)
                .map(|r| (*s, r.weighted_score()))
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    let Some((to_strategy, _)) = replacement else {
        debug!(
            task = task.as_str(),
            ?trigger,
            "Adaptation triggered but no measured alternative exists"
        );
        return;
    };

    info!(
        task = task.as_str(),
        ?trigger,
        from = ?current,
        to = ?to_strategy,
        success_rate,
        "Adapting strategy for task type"
    );
    let now = Utc::now();
    state.overrides.insert(task, to_strategy);
    state.last_adaptation.insert(task, now);
    state.adaptations.push(AdaptationContext {
        task_type: task,
        trigger,
        from_strategy: current,
        to_strategy,
        occurred_at: now,
    });
}
