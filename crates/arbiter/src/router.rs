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

//! Request routing: classifies an incoming prompt into a task type and
//! complexity level, scores the enabled candidate models against that
//! analysis, and decides between single and parallel execution. Observed
//! outcomes are fed back through [`RequestRouter::learn`] so the scoring
//! shifts from static heuristics to measured performance.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use llm_contracts::{
    ComplexityLevel, ExecutionMode, GenerationRequest, GenerationResult, LLMError, LLMResult,
    ModelRole, TaskType,
};
use lru::LruCache;
use regex::Regex;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::perf::PerformanceRecord;
use crate::registry::{is_high_capability, ModelDescriptor, ModelRegistry};

/// Analyses are cheap but requests repeat; a small cache keyed on the
/// prompt hash keeps repeated classification out of the hot path.
const ANALYSIS_CACHE_SIZE: usize = 256;

/// Keyword hits and a structural pattern per classifiable task type.
/// Each keyword hit contributes 0.3 and a pattern match 0.4; domain
/// bonuses on top are computed in `domain_bonus`.
struct TaskRule {
    task: TaskType,
    keywords: &'static [&'static str],
    pattern: &'static str,
}

const KEYWORD_WEIGHT: f64 = 0.3;
const PATTERN_WEIGHT: f64 = 0.4;
const CLASSIFICATION_FLOOR: f64 = 0.2;

const TASK_RULES: &[TaskRule] = &[
    TaskRule {
        task: TaskType::CodeGeneration,
        keywords: &[
            "write a function",
            "implement",
            "script",
            "program",
            "code for",
            "snippet",
        ],
        pattern: r"(?i)\b(write|create|implement|generate|build)\b.*\b(function|class|method|script|program|module)\b",
    },
    TaskRule {
        task: TaskType::CodeReview,
        keywords: &[
            "review",
            "refactor",
            "bug",
            "fix this",
            "code smell",
            "improve this code",
        ],
        pattern: r"(?i)\b(review|refactor|debug|fix|optimise|optimize)\b.*\b(code|function|implementation)\b",
    },
    TaskRule {
        task: TaskType::Analysis,
        keywords: &[
            "analyse",
            "analyze",
            "compare",
            "evaluate",
            "assessment",
            "pros and cons",
        ],
        pattern: r"(?i)\b(analyse|analyze|compare|evaluate|assess|examine)\b",
    },
    TaskRule {
        task: TaskType::QuestionAnswering,
        keywords: &[
            "what is",
            "who is",
            "when did",
            "where is",
            "why does",
            "how does",
            "explain",
        ],
        pattern: r"(?i)^\s*(what|who|when|where|why|how|which|does|is|are|can)\b",
    },
    TaskRule {
        task: TaskType::Summarisation,
        keywords: &[
            "summarise",
            "summarize",
            "summary",
            "key points",
            "brief overview",
            "tl;dr",
        ],
        pattern: r"(?i)\b(summarise|summarize|summary|condense)\b",
    },
    TaskRule {
        task: TaskType::Translation,
        keywords: &[
            "translate",
            "translation",
            "in french",
            "in german",
            "in spanish",
        ],
        pattern: r"(?i)\btranslat(e|ed|ion)\b|\binto (french|german|spanish|japanese|chinese|english)\b",
    },
    TaskRule {
        task: TaskType::Mathematics,
        keywords: &[
            "calculate",
            "solve",
            "equation",
            "sum of",
            "how many",
            "percentage",
        ],
        pattern: r"(?i)\b(calculate|solve|equation|integral|derivative|probability)\b",
    },
    TaskRule {
        task: TaskType::LogicalReasoning,
        keywords: &[
            "puzzle",
            "deduce",
            "logical",
            "premise",
            "therefore",
            "prove that",
        ],
        pattern: r"(?i)\b(deduce|deduction|syllogism|premise|prove)\b",
    },
    TaskRule {
        task: TaskType::CreativeWriting,
        keywords: &[
            "story",
            "poem",
            "imagine",
            "creative",
            "fictional",
            "once upon",
        ],
        pattern: r"(?i)\b(story|poem|haiku|fiction|screenplay)\b",
    },
    TaskRule {
        task: TaskType::ChatConversation,
        keywords: &[
            "hello",
            "hi there",
            "thanks",
            "how are you",
            "nice to",
            "chat",
        ],
        pattern: r"(?i)^\s*(hi|hello|hey|thanks|thank you|good morning|good evening)\b",
    },
    TaskRule {
        task: TaskType::JsonGeneration,
        keywords: &[
            "json",
            "schema",
            "structured output",
            "key-value",
            "serialise",
            "serialize",
        ],
        pattern: r"(?i)\bjson\b|\bschema\b|structured (output|data)",
    },
    TaskRule {
        task: TaskType::TechnicalWriting,
        keywords: &[
            "documentation",
            "readme",
            "user guide",
            "technical document",
            "api docs",
            "tutorial",
        ],
        pattern: r"(?i)\b(documentation|readme|user guide|api reference|changelog)\b",
    },
];

lazy_static! {
    static ref TASK_PATTERNS: Vec<(TaskType, Regex)> = TASK_RULES
        .iter()
        .map(|rule| {
            (
                rule.task,
                Regex::new(rule.pattern).expect("task rule pattern must compile"),
            )
        })
        .collect();
}

const LANGUAGE_NAMES: &[&str] = &[
    "python",
    "rust",
    "javascript",
    "typescript",
    "java",
    "golang",
    "ruby",
    "kotlin",
    "c++",
    "c#",
];

const CODE_MARKERS: &[&str] = &[
    "```", "def ", "fn ", "class ", "function", "=>", "import ", "#include",
];

/// Wording that marks a request as correctness-sensitive even when the
/// task type alone would not.
const PRECISION_KEYWORDS: &[&str] = &[
    "exact",
    "precise",
    "accurate",
    "verify",
    "step by step",
    "double-check",
];

const CREATIVITY_KEYWORDS: &[&str] = &[
    "creative",
    "imaginative",
    "brainstorm",
    "original",
    "inventive",
];

/// Requests estimated below this many tokens are treated as
/// latency-sensitive.
const SPEED_TOKEN_CEILING: u32 = 100;

const TECHNICAL_TERMS: &[&str] = &[
    "algorithm",
    "architecture",
    "concurrency",
    "distributed",
    "optimisation",
    "optimization",
    "database",
    "encryption",
    "protocol",
    "compiler",
    "kernel",
    "asynchronous",
];

/// What the classifier concluded about a single request. Cached per
/// prompt hash, so the same prompt always yields the same analysis.
#[derive(Debug, Clone, Serialize)]
pub struct RequestAnalysis {
    pub task_type: TaskType,
    pub complexity: ComplexityLevel,
    /// Classifier confidence in [0, 1].
    pub confidence: f64,
    /// Keywords from the winning rule that the prompt actually hit.
    pub keywords: Vec<String>,
    /// Rough token estimate, clamped to [10, 8000].
    pub estimated_tokens: u32,
    pub structured_output: bool,
    pub requires_speed: bool,
    pub requires_accuracy: bool,
    pub requires_creativity: bool,
}

/// Outcome of routing one request: the model to use, how to run it,
/// and why.
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub model: String,
    pub mode: ExecutionMode,
    pub score: f64,
    pub alternatives: Vec<String>,
    pub reasoning: String,
    pub analysis: RequestAnalysis,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoutingStats {
    pub total_requests: u64,
    pub requests_by_task: HashMap<String, u64>,
    /// Keyed `model/task`; only pairs that have been observed at
    /// least once appear.
    pub model_performance: HashMap<String, PerformanceRecord>,
}

/// Scores candidate models per request and learns from outcomes.
pub struct RequestRouter {
    registry: Arc<ModelRegistry>,
    performance: RwLock<HashMap<(String, TaskType), PerformanceRecord>>,
    task_counts: RwLock<HashMap<TaskType, u64>>,
    total_requests: RwLock<u64>,
    analysis_cache: Mutex<LruCache<String, RequestAnalysis>>,
}

impl RequestRouter {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        let capacity =
            NonZeroUsize::new(ANALYSIS_CACHE_SIZE).expect("analysis cache capacity is non-zero");
        Self {
            registry,
            performance: RwLock::new(HashMap::new()),
            task_counts: RwLock::new(HashMap::new()),
            total_requests: RwLock::new(0),
            analysis_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Classifies the request, consulting the analysis cache first.
    /// The key covers the response format: the same prompt analyses
    /// differently when structured output is demanded.
    pub fn analyze(&self, request: &GenerationRequest) -> RequestAnalysis {
        let key = format!(
            "{:x}",
            md5::compute(format!("{}|{}", request.prompt, request.wants_structured()))
        );
        if let Ok(mut cache) = self.analysis_cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return hit.clone();
            }
        }
        let analysis = analyse_request(request);
        debug!(
            task = analysis.task_type.as_str(),
            complexity = ?analysis.complexity,
            confidence = analysis.confidence,
            "Request analysed"
        );
        if let Ok(mut cache) = self.analysis_cache.lock() {
            cache.put(key, analysis.clone());
        }
        analysis
    }

    /// Picks the best-scoring candidate for the request. Primary models
    /// are preferred; when none is enabled the whole registry is
    /// considered before giving up.
    pub async fn route(&self, request: &GenerationRequest) -> LLMResult<RoutingDecision> {
        let analysis = self.analyze(request);

        let mut candidates = self.registry.models(Some(ModelRole::Primary)).await;
        if candidates.is_empty() {
            warn!("No enabled primary models; widening candidate pool to all roles");
            candidates = self.registry.models(None).await;
        }
        if candidates.is_empty() {
            return Err(LLMError::ModelNotFound(
                "no enabled models available for routing".to_string(),
            ));
        }

        let performance = self.performance.read().await;
        let mut scored: Vec<(f64, String, String)> = candidates
            .iter()
            .map(|model| {
                let record = performance.get(&(model.name.clone(), analysis.task_type));
                let (score, basis) = score_model(model, &analysis, record);
                (score, model.name.clone(), basis)
            })
            .collect();
        drop(performance);

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let (score, model, basis) = scored[0].clone();
        let alternatives: Vec<String> = scored.iter().skip(1).take(2).map(|s| s.1.clone()).collect();

        let mode = choose_mode(&analysis);
        let reasoning = format!(
            "task {} ({:?}, confidence {:.2}); {} scored {:.2} via {}; mode {:?}",
            analysis.task_type.as_str(),
            analysis.complexity,
            analysis.confidence,
            model,
            score,
            basis,
            mode,
        );
        debug!(model = %model, score, ?mode, "Routing decision made");

        {
            let mut total = self.total_requests.write().await;
            *total += 1;
        }
        {
            let mut counts = self.task_counts.write().await;
            *counts.entry(analysis.task_type).or_insert(0) += 1;
        }

        Ok(RoutingDecision {
            model,
            mode,
            score,
            alternatives,
            reasoning,
            analysis,
        })
    }

    /// Feeds an observed outcome back into per-(model, task) history.
    /// `score` is an optional quality score in [1, 5].
    pub async fn learn(
        &self,
        request: &GenerationRequest,
        result: &GenerationResult,
        score: Option<f64>,
    ) {
        if result.model == "none" {
            return;
        }
        let analysis = self.analyze(request);
        let mut performance = self.performance.write().await;
        let record = performance
            .entry((result.model.clone(), analysis.task_type))
            .or_default();
        record.record(result.success, result.latency_secs, score);
        debug!(
            model = %result.model,
            task = analysis.task_type.as_str(),
            success = result.success,
            samples = record.sample_count,
            "Routing history updated"
        );
    }

    pub async fn routing_stats(&self) -> RoutingStats {
        let total_requests = *self.total_requests.read().await;
        let requests_by_task = self
            .task_counts
            .read()
            .await
            .iter()
            .map(|(task, count)| (task.as_str().to_string(), *count))
            .collect();
        let model_performance = self
            .performance
            .read()
            .await
            .iter()
            .map(|((model, task), record)| (format!("{}/{}", model, task.as_str()), record.clone()))
            .collect();
        RoutingStats {
            total_requests,
            requests_by_task,
            model_performance,
        }
    }
}

fn analyse_request(request: &GenerationRequest) -> RequestAnalysis {
    let prompt = request.prompt.as_str();
    let lowered = prompt.to_lowercase();
    let structured = request.wants_structured();

    let (task_type, best_score, keywords) = classify_task(&lowered, structured);
    let complexity = assess_complexity(prompt, &lowered);
    let estimated_tokens = estimate_tokens(prompt, &lowered);

    let confidence = if task_type == TaskType::Unknown {
        0.1
    } else {
        best_score.clamp(0.1, 1.0)
    };

    let requires_accuracy = matches!(
        task_type,
        TaskType::CodeGeneration
            | TaskType::CodeReview
            | TaskType::Mathematics
            | TaskType::JsonGeneration
            | TaskType::Analysis
    ) || PRECISION_KEYWORDS.iter().any(|k| lowered.contains(k));
    let requires_speed = request.use_fastest || estimated_tokens < SPEED_TOKEN_CEILING;
    let requires_creativity = matches!(
        task_type,
        TaskType::CreativeWriting | TaskType::ChatConversation
    ) || CREATIVITY_KEYWORDS.iter().any(|k| lowered.contains(k));

    RequestAnalysis {
        task_type,
        complexity,
        confidence,
        keywords,
        estimated_tokens,
        structured_output: structured,
        requires_speed,
        requires_accuracy,
        requires_creativity,
    }
}

/// Highest-scoring rule wins when it clears the floor; prompts that
/// score below it but above zero default to chat, and a prompt hitting
/// nothing at all stays unclassified.
fn classify_task(lowered: &str, structured: bool) -> (TaskType, f64, Vec<String>) {
    let mut best: Option<(TaskType, f64)> = None;
    for (rule, (task, pattern)) in TASK_RULES.iter().zip(TASK_PATTERNS.iter()) {
        debug_assert_eq!(rule.task, *task);
        let mut score = 0.0;
        for keyword in rule.keywords {
            if lowered.contains(keyword) {
                score += KEYWORD_WEIGHT;
            }
        }
        if pattern.is_match(lowered) {
            score += PATTERN_WEIGHT;
        }
        score += domain_bonus(rule.task, lowered, structured);
        if score > 0.0 && best.map_or(true, |(_, b)| score > b) {
            best = Some((rule.task, score));
        }
    }

    match best {
        Some((task, score)) if score > CLASSIFICATION_FLOOR => {
            let keywords = TASK_RULES
                .iter()
                .find(|r| r.task == task)
                .map(|r| {
                    r.keywords
                        .iter()
                        .filter(|k| lowered.contains(*k))
                        .map(|k| k.to_string())
                        .collect()
                })
                .unwrap_or_default();
            (task, score, keywords)
        }
        Some((_, score)) => (TaskType::ChatConversation, score, Vec::new()),
        None => (TaskType::Unknown, 0.0, Vec::new()),
    }
}

/// Extra signal beyond keywords that strongly marks a domain.
fn domain_bonus(task: TaskType, lowered: &str, structured: bool) -> f64 {
    match task {
        TaskType::JsonGeneration => {
            let mut bonus = 0.0;
            if structured {
                bonus += 0.4;
            }
            if lowered.contains('{') || lowered.contains("json") {
                bonus += 0.25;
            }
            bonus
        }
        TaskType::CodeGeneration => {
            if LANGUAGE_NAMES.iter().any(|l| lowered.contains(l)) {
                0.25
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

fn assess_complexity(prompt: &str, lowered: &str) -> ComplexityLevel {
    let mut score = 0u32;
    let chars = prompt.chars().count();
    if chars > 1000 {
        score += 2;
    } else if chars > 500 {
        score += 1;
    }
    let sentences = prompt
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count();
    if sentences > 5 {
        score += 1;
    }
    let long_words = prompt
        .split_whitespace()
        .filter(|w| w.chars().count() > 7)
        .count();
    if long_words > 10 {
        score += 1;
    }
    if TECHNICAL_TERMS.iter().any(|t| lowered.contains(t)) {
        score += 1;
    }
    match score {
        0 => ComplexityLevel::Simple,
        1 => ComplexityLevel::Moderate,
        2 => ComplexityLevel::Complex,
        _ => ComplexityLevel::VeryComplex,
    }
}

/// Character-count heuristic: code-dense prompts tokenize shorter.
fn estimate_tokens(prompt: &str, lowered: &str) -> u32 {
    let divisor = if CODE_MARKERS.iter().any(|m| lowered.contains(m)) {
        3
    } else {
        4
    };
    ((prompt.chars().count() / divisor) as u32).clamp(10, 8000)
}

/// Base score 1.0 until the (model, task) pair has history, after
/// which the measured blend replaces it; task-fit bonuses apply either
/// way. Capped at 2.0.
fn score_model(
    model: &ModelDescriptor,
    analysis: &RequestAnalysis,
    record: Option<&PerformanceRecord>,
) -> (f64, String) {
    let (mut score, mut basis) = match record {
        Some(r) if r.sample_count >= 1 => (
            r.weighted_score(),
            format!("history ({} samples)", r.sample_count),
        ),
        _ => (1.0, "static heuristics".to_string()),
    };

    if analysis.requires_accuracy && is_high_capability(&model.name) {
        score += 0.2;
        basis.push_str(" + accuracy fit");
    }
    if analysis.requires_speed && model.speed_estimate() <= 2.5 {
        score += 0.2;
        basis.push_str(" + speed fit");
    }
    if analysis.requires_creativity && model.temperature >= 0.8 {
        score += 0.1;
        basis.push_str(" + creativity fit");
    }
    match analysis.complexity {
        ComplexityLevel::VeryComplex if is_high_capability(&model.name) => {
            score += 0.1;
            basis.push_str(" + complexity fit");
        }
        ComplexityLevel::Complex if is_high_capability(&model.name) => {
            score += 0.05;
            basis.push_str(" + complexity fit");
        }
        _ => {}
    }

    (score.min(2.0), basis)
}

fn choose_mode(analysis: &RequestAnalysis) -> ExecutionMode {
    if analysis.structured_output
        || analysis.complexity == ComplexityLevel::VeryComplex
        || (analysis.requires_accuracy && analysis.confidence > 0.7)
    {
        ExecutionMode::Parallel
    } else {
        ExecutionMode::Single
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_contracts::{OrchestratorConfig, ResponseFormat};

    fn router_from(yaml: &str) -> RequestRouter {
        let config = OrchestratorConfig::from_yaml_str(yaml).unwrap();
        let registry = Arc::new(ModelRegistry::from_config(&config).unwrap());
        RequestRouter::new(registry)
    }

    fn simple_router() -> RequestRouter {
        router_from(
            r#"
default_provider: local
providers:
  local:
    models:
      - name: gpt-4o
      - name: claude-sonnet
      - name: phi-mini
roles:
  primary: [gpt-4o, claude-sonnet]
  reserve: [phi-mini]
"#,
        )
    }

    #[test]
    fn test_classification_is_deterministic() {
        let router = simple_router();
        let request = GenerationRequest::new("Write a function to add two numbers");
        let first = router.analyze(&request);
        let second = router.analyze(&request);
        assert_eq!(first.task_type, second.task_type);
        assert_eq!(first.complexity, second.complexity);
        assert!((first.confidence - second.confidence).abs() < f64::EPSILON);
    }

    #[test]
    fn test_code_generation_classification() {
        let router = simple_router();
        let analysis =
            router.analyze(&GenerationRequest::new("Write a function to add two numbers"));
        assert_eq!(analysis.task_type, TaskType::CodeGeneration);
        assert!(analysis.requires_accuracy);
        assert!(analysis.confidence > 0.5);
    }

    #[test]
    fn test_structured_request_boosts_json_generation() {
        let router = simple_router();
        let request = GenerationRequest::new("Produce the inventory as json")
            .with_format(ResponseFormat::JsonObject);
        let analysis = router.analyze(&request);
        assert_eq!(analysis.task_type, TaskType::JsonGeneration);
        assert!(analysis.structured_output);
    }

    #[test]
    fn test_chat_keyword_classifies_as_chat() {
        let router = simple_router();
        let analysis = router.analyze(&GenerationRequest::new("ok then, chat"));
        assert_eq!(analysis.task_type, TaskType::ChatConversation);
    }

    #[test]
    fn test_analysis_task_requires_accuracy() {
        let router = simple_router();
        let analysis = router.analyze(&GenerationRequest::new(
            "Compare the two architectures and evaluate their trade-offs",
        ));
        assert_eq!(analysis.task_type, TaskType::Analysis);
        assert!(analysis.requires_accuracy);
    }

    #[test]
    fn test_precision_keywords_force_accuracy() {
        let router = simple_router();
        let analysis =
            router.analyze(&GenerationRequest::new("hello, give me the exact spelling"));
        assert_eq!(analysis.task_type, TaskType::ChatConversation);
        assert!(analysis.requires_accuracy);
    }

    #[test]
    fn test_short_prompts_require_speed() {
        let router = simple_router();
        let short = router.analyze(&GenerationRequest::new("hello there"));
        assert!(short.estimated_tokens < SPEED_TOKEN_CEILING);
        assert!(short.requires_speed);

        let long_prompt = "Describe the migration plan in detail. ".repeat(20);
        let long = router.analyze(&GenerationRequest::new(long_prompt));
        assert!(long.estimated_tokens >= SPEED_TOKEN_CEILING);
        assert!(!long.requires_speed);

        let forced = router.analyze(
            &GenerationRequest::new("Describe the rollback plan in detail. ".repeat(20))
                .fastest(),
        );
        assert!(forced.requires_speed);
    }

    #[test]
    fn test_creativity_flag_covers_chat_and_keywords() {
        let router = simple_router();
        let chat = router.analyze(&GenerationRequest::new("hi there, how are you"));
        assert!(chat.requires_creativity);

        let keyword = router.analyze(&GenerationRequest::new(
            "Brainstorm names for the migration tooling project",
        ));
        assert!(keyword.requires_creativity);
    }

    #[test]
    fn test_no_signal_is_unknown() {
        let (task, score, keywords) = classify_task("zzz qqq", false);
        assert_eq!(task, TaskType::Unknown);
        assert_eq!(score, 0.0);
        assert!(keywords.is_empty());
    }

    #[test]
    fn test_complexity_scales_with_length_and_terms() {
        let short = assess_complexity("Hi", "hi");
        assert_eq!(short, ComplexityLevel::Simple);

        let technical = "Design the database architecture for a distributed system. \
            Consider the encryption protocol. Outline the concurrency model. \
            Describe the asynchronous replication path. Explain failure recovery. \
            Add monitoring guidance.";
        let level = assess_complexity(technical, &technical.to_lowercase());
        assert!(level >= ComplexityLevel::Complex);
    }

    #[test]
    fn test_token_estimate_clamped() {
        assert_eq!(estimate_tokens("hi", "hi"), 10);
        let huge = "word ".repeat(20_000);
        assert_eq!(estimate_tokens(&huge, &huge), 8000);
    }

    #[test]
    fn test_mode_decision_structured_goes_parallel() {
        let router = simple_router();
        let request = GenerationRequest::new("emit json").with_format(ResponseFormat::JsonObject);
        let analysis = router.analyze(&request);
        assert_eq!(choose_mode(&analysis), ExecutionMode::Parallel);
    }

    #[test]
    fn test_mode_decision_simple_chat_stays_single() {
        let router = simple_router();
        let analysis = router.analyze(&GenerationRequest::new("hello there"));
        assert_eq!(choose_mode(&analysis), ExecutionMode::Single);
    }

    #[tokio::test]
    async fn test_route_prefers_history_over_base_score() {
        let router = simple_router();
        let request = GenerationRequest::new("Write a function to add two numbers");

        // Seed strong history for one primary on this task type.
        let good = GenerationResult::ok("claude-sonnet".to_string(), "fn add".to_string(), 0.5);
        for _ in 0..3 {
            router.learn(&request, &good, Some(4.8)).await;
        }

        let decision = router.route(&request).await.unwrap();
        assert_eq!(decision.model, "claude-sonnet");
        assert!(decision.score > 1.2);
        assert!(!decision.alternatives.is_empty());
    }

    #[tokio::test]
    async fn test_route_with_no_models_errors() {
        let router = simple_router();
        for name in ["gpt-4o", "claude-sonnet", "phi-mini"] {
            router.registry.disable(name).await;
        }
        let err = router
            .route(&GenerationRequest::new("anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::ModelNotFound(_)));
    }

    #[tokio::test]
    async fn test_routing_stats_reflect_traffic() {
        let router = simple_router();
        let request = GenerationRequest::new("Write a function to add two numbers");
        router.route(&request).await.unwrap();
        router.route(&request).await.unwrap();
        let result = GenerationResult::ok("gpt-4o".to_string(), "done".to_string(), 1.0);
        router.learn(&request, &result, None).await;

        let stats = router.routing_stats().await;
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.requests_by_task.get("code_generation"), Some(&2));
        assert_eq!(
            stats
                .model_performance
                .get("gpt-4o/code_generation")
                .map(|r| r.sample_count),
            Some(1)
        );
    }

    #[tokio::test]
    async fn test_failed_placeholder_results_are_not_learned() {
        let router = simple_router();
        let request = GenerationRequest::new("hello");
        router
            .learn(&request, &GenerationResult::unavailable(), None)
            .await;
        assert!(router.routing_stats().await.model_performance.is_empty());
    }
}
