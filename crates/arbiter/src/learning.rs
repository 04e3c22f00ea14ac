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

//! Error learning: failed generations are classified against a rule
//! table, recorded into bounded history, and aggregated into pattern
//! statistics. Recurring patterns activate mitigations, up to disabling
//! a model that keeps failing hard, and enough recent history yields
//! insights about where the system is weakest.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use llm_contracts::{ErrorPattern, ErrorType, GenerationResult, TaskType};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::ModelRegistry;

/// Bounded record of past errors; oldest entries fall off first.
const HISTORY_CAP: usize = 1000;
/// Pattern occurrences before a mitigation activates.
const MITIGATION_OCCURRENCES: u64 = 3;
/// Per-model error count before disabling is considered.
const DISABLE_ERROR_COUNT: u64 = 5;
/// Mean severity a model must exceed before it is disabled.
const DISABLE_SEVERITY: f64 = 0.6;
/// Classification confidence below which the generic rule applies.
const MIN_CONFIDENCE: f64 = 0.3;
const HIGH_LATENCY_SECS: f64 = 30.0;
/// Insight generation needs this much total and recent history.
const INSIGHT_MIN_TOTAL: u64 = 10;
const INSIGHT_MIN_RECENT: usize = 5;
const INSIGHT_WINDOW_HOURS: i64 = 24;
/// An identical insight within this window is suppressed.
const INSIGHT_SUPPRESSION_HOURS: i64 = 6;
const INSIGHT_LOG_CAP: usize = 50;

/// One classification rule. The first keyword is the strongest signal
/// for the rule; the rest match slightly weaker.
struct ErrorRule {
    error_type: ErrorType,
    pattern: Option<ErrorPattern>,
    keywords: &'static [&'static str],
    severity: f64,
    remediation: &'static str,
    prevention: &'static str,
}

const PRIMARY_KEYWORD_CONFIDENCE: f64 = 0.9;
const KEYWORD_CONFIDENCE: f64 = 0.8;

const ERROR_RULES: &[ErrorRule] = &[
    ErrorRule {
        error_type: ErrorType::RateLimit,
        pattern: Some(ErrorPattern::ModelOverload),
        keywords: &["rate limit", "too many requests", "429", "quota exceeded"],
        severity: 0.7,
        remediation: "back off and route the retry to a different model",
        prevention: "spread sustained traffic across more than one model",
    },
    ErrorRule {
        error_type: ErrorType::Timeout,
        pattern: Some(ErrorPattern::ModelOverload),
        keywords: &["timed out", "timeout", "deadline exceeded"],
        severity: 0.6,
        remediation: "retry on a faster model or shorten the prompt",
        prevention: "estimate prompt size before dispatch and prefer fast models",
    },
    ErrorRule {
        error_type: ErrorType::ApiError,
        pattern: Some(ErrorPattern::ContextTooLong),
        keywords: &[
            "context length",
            "maximum context",
            "token limit",
            "input too long",
        ],
        severity: 0.6,
        remediation: "truncate the prompt to the model's context window",
        prevention: "chunk long inputs before generation",
    },
    ErrorRule {
        error_type: ErrorType::ContentPolicy,
        pattern: Some(ErrorPattern::SensitiveContent),
        keywords: &["content policy", "safety system", "refused", "cannot assist"],
        severity: 0.8,
        remediation: "rephrase the request without the flagged content",
        prevention: "screen prompts for sensitive content before dispatch",
    },
    ErrorRule {
        error_type: ErrorType::Formatting,
        pattern: Some(ErrorPattern::UnsupportedFormat),
        keywords: &[
            "failed json validation",
            "invalid json",
            "malformed",
            "parse error",
        ],
        severity: 0.5,
        remediation: "restate the required output format and retry",
        prevention: "state the exact output schema in the prompt",
    },
    ErrorRule {
        error_type: ErrorType::Network,
        pattern: None,
        keywords: &["connection", "unreachable", "reset by peer", "dns"],
        severity: 0.5,
        remediation: "retry after a short delay",
        prevention: "monitor provider connectivity",
    },
    ErrorRule {
        error_type: ErrorType::ApiError,
        pattern: Some(ErrorPattern::ResourceExhausted),
        keywords: &[
            "overloaded",
            "out of memory",
            "capacity",
            "resource exhausted",
        ],
        severity: 0.7,
        remediation: "shed load or defer non-urgent requests",
        prevention: "cap concurrent requests per model",
    },
    ErrorRule {
        error_type: ErrorType::ApiError,
        pattern: Some(ErrorPattern::ModelOverload),
        keywords: &["internal server error", "bad gateway", "503", "500"],
        severity: 0.6,
        remediation: "retry against a different model",
        prevention: "keep at least one fallback model enabled",
    },
    ErrorRule {
        error_type: ErrorType::Incomplete,
        pattern: Some(ErrorPattern::ComplexQuery),
        keywords: &["truncated", "cut off", "incomplete response"],
        severity: 0.4,
        remediation: "split the request into smaller steps",
        prevention: "decompose complex requests before dispatch",
    },
    ErrorRule {
        error_type: ErrorType::Irrelevant,
        pattern: Some(ErrorPattern::AmbiguousRequest),
        keywords: &["off topic", "irrelevant", "did not address"],
        severity: 0.4,
        remediation: "restate the request with explicit constraints",
        prevention: "add concrete acceptance criteria to vague prompts",
    },
    ErrorRule {
        error_type: ErrorType::Hallucination,
        pattern: Some(ErrorPattern::AmbiguousRequest),
        keywords: &["fabricated", "hallucin", "made up", "not grounded"],
        severity: 0.6,
        remediation: "ask for sources and re-verify the answer",
        prevention: "ground prompts with reference material",
    },
    ErrorRule {
        error_type: ErrorType::LowQuality,
        pattern: Some(ErrorPattern::ComplexQuery),
        keywords: &["low quality", "quality score", "poorly rated"],
        severity: 0.4,
        remediation: "escalate to a stronger strategy or model",
        prevention: "state acceptance criteria in the prompt",
    },
];

/// Soft countermeasure tied to a pattern. `DisableModel` is the only
/// hard action; everything else is advisory and recorded for callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationAction {
    ReduceLoad,
    TruncateContext,
    SimplifyPrompt,
    EnforceFormat,
    FilterContent,
    ClarifyRequest,
    DisableModel,
}

fn soft_action(pattern: ErrorPattern) -> MitigationAction {
    match pattern {
        ErrorPattern::ModelOverload | ErrorPattern::ResourceExhausted => {
            MitigationAction::ReduceLoad
        }
        ErrorPattern::ContextTooLong => MitigationAction::TruncateContext,
        ErrorPattern::ComplexQuery => MitigationAction::SimplifyPrompt,
        ErrorPattern::UnsupportedFormat => MitigationAction::EnforceFormat,
        ErrorPattern::SensitiveContent => MitigationAction::FilterContent,
        ErrorPattern::AmbiguousRequest => MitigationAction::ClarifyRequest,
    }
}

/// What the classifier concluded about one failure.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorAnalysis {
    /// Identifier of the history entry this analysis created; pass it
    /// to [`ErrorLearningSystem::retry_succeeded`] when a retry
    /// resolves the failure.
    pub record_id: Uuid,
    pub error_type: ErrorType,
    pub pattern: Option<ErrorPattern>,
    pub severity: f64,
    pub confidence: f64,
    pub remediation: String,
    /// Set when this failure activated or escalated a mitigation.
    pub mitigation: Option<MitigationAction>,
}

/// One entry in the bounded error history.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    /// Prompt the failing generation was asked for.
    pub prompt: String,
    pub model: String,
    /// Response content, when the failure carried one.
    pub response: Option<String>,
    pub task_type: TaskType,
    pub error_type: ErrorType,
    pub pattern: Option<ErrorPattern>,
    pub severity: f64,
    pub message: String,
    /// Set once a later retry resolved this failure.
    pub retry_succeeded: bool,
}

/// A mitigation currently in force for a pattern.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveMitigation {
    pub pattern: ErrorPattern,
    pub action: MitigationAction,
    pub applied_at: DateTime<Utc>,
    pub occurrences: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningInsight {
    pub category: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningStats {
    pub total_errors: u64,
    pub history_len: usize,
    pub errors_by_type: HashMap<String, u64>,
    pub errors_by_model: HashMap<String, u64>,
    pub pattern_occurrences: HashMap<String, u64>,
    pub active_mitigations: usize,
    pub insights: usize,
    pub disabled_models: Vec<String>,
    pub retries_succeeded: u64,
}

#[derive(Debug, Default)]
struct PatternStats {
    occurrences: u64,
    affected_models: HashSet<String>,
    affected_tasks: HashSet<TaskType>,
    avg_severity: f64,
    last_seen: Option<DateTime<Utc>>,
}

impl PatternStats {
    fn record(&mut self, model: &str, task: TaskType, severity: f64, at: DateTime<Utc>) {
        self.occurrences += 1;
        self.affected_models.insert(model.to_string());
        self.affected_tasks.insert(task);
        let n = self.occurrences as f64;
        self.avg_severity = (self.avg_severity * (n - 1.0) + severity) / n;
        self.last_seen = Some(at);
    }
}

#[derive(Default)]
struct ModelErrors {
    count: u64,
    severity_sum: f64,
}

#[derive(Default)]
struct LearningState {
    history: VecDeque<ErrorRecord>,
    total_errors: u64,
    by_type: HashMap<ErrorType, u64>,
    by_model: HashMap<String, ModelErrors>,
    by_task: HashMap<TaskType, u64>,
    patterns: HashMap<ErrorPattern, PatternStats>,
    active: HashMap<ErrorPattern, ActiveMitigation>,
    insights: VecDeque<LearningInsight>,
    disabled_models: Vec<String>,
    retries_succeeded: u64,
}

/// Classifies failures and feeds the consequences back into the
/// registry.
pub struct ErrorLearningSystem {
    registry: Arc<ModelRegistry>,
    state: RwLock<LearningState>,
}

impl ErrorLearningSystem {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            registry,
            state: RwLock::new(LearningState::default()),
        }
    }

    /// Classifies one failure, records it, and applies any mitigation
    /// the accumulated history now justifies. Classification reads the
    /// caller's error message, the response's error field, and the
    /// response content together, so content-borne defects (fabricated
    /// claims, truncation) classify even without an error string.
    pub async fn analyze(
        &self,
        prompt: &str,
        model: &str,
        response: Option<&GenerationResult>,
        error_message: Option<&str>,
        task_type: TaskType,
    ) -> ErrorAnalysis {
        let mut message = String::new();
        if let Some(text) = error_message {
            message.push_str(text);
        }
        if let Some(result) = response {
            if let Some(error) = &result.error {
                if !message.is_empty() {
                    message.push_str("; ");
                }
                message.push_str(error);
            }
            if !result.content.is_empty() {
                if !message.is_empty() {
                    message.push(' ');
                }
                message.push_str(&result.content);
            }
        }
        if message.is_empty() {
            message.push_str("unknown error");
        }
        let (rule, confidence) = classify(&message, response);
        debug!(
            error_type = rule.error_type.as_str(),
            confidence,
            model,
            "Failure classified"
        );

        let now = Utc::now();
        let record_id = Uuid::new_v4();
        let record = ErrorRecord {
            id: record_id,
            occurred_at: now,
            prompt: prompt.to_string(),
            model: model.to_string(),
            response: response
                .map(|r| r.content.clone())
                .filter(|c| !c.is_empty()),
            task_type,
            error_type: rule.error_type,
            pattern: rule.pattern,
            severity: rule.severity,
            message,
            retry_succeeded: false,
        };

        let mut state = self.state.write().await;
        state.total_errors += 1;
        *state.by_type.entry(rule.error_type).or_insert(0) += 1;
        *state.by_task.entry(task_type).or_insert(0) += 1;
        {
            let model_errors = state.by_model.entry(model.to_string()).or_default();
            model_errors.count += 1;
            model_errors.severity_sum += rule.severity;
        }
        if let Some(pattern) = rule.pattern {
            state
                .patterns
                .entry(pattern)
                .or_default()
                .record(model, task_type, rule.severity, now);
        }
        state.history.push_back(record);
        while state.history.len() > HISTORY_CAP {
            state.history.pop_front();
        }

        let mitigation = self.apply_mitigation(&mut state, rule, model).await;
        generate_insights(&mut state);

        ErrorAnalysis {
            record_id,
            error_type: rule.error_type,
            pattern: rule.pattern,
            severity: rule.severity,
            confidence,
            remediation: rule.remediation.to_string(),
            mitigation,
        }
    }

    /// Activates a soft mitigation once a pattern recurs, and disables
    /// the model outright when it keeps failing with high severity.
    /// Mitigations are idempotent per pattern; disabling upgrades an
    /// existing soft entry.
    async fn apply_mitigation(
        &self,
        state: &mut LearningState,
        rule: &ErrorRule,
        model: &str,
    ) -> Option<MitigationAction> {
        let pattern = rule.pattern?;
        let occurrences = state.patterns.get(&pattern).map_or(0, |s| s.occurrences);
        if occurrences < MITIGATION_OCCURRENCES {
            return None;
        }

        let model_errors = state.by_model.get(model);
        let should_disable = model != "none"
            && model_errors.is_some_and(|e| {
                e.count >= DISABLE_ERROR_COUNT
                    && e.severity_sum / e.count as f64 > DISABLE_SEVERITY
            })
            && !state.disabled_models.iter().any(|m| m == model);
        if should_disable {
            warn!(model, pattern = pattern.as_str(), "Disabling persistently failing model");
            self.registry.disable(model).await;
            state.disabled_models.push(model.to_string());
            state.active.insert(
                pattern,
                ActiveMitigation {
                    pattern,
                    action: MitigationAction::DisableModel,
                    applied_at: Utc::now(),
                    occurrences,
                },
            );
            return Some(MitigationAction::DisableModel);
        }

        if state.active.contains_key(&pattern) {
            return None;
        }
        let action = soft_action(pattern);
        info!(
            pattern = pattern.as_str(),
            ?action,
            occurrences,
            "Activating mitigation for recurring error pattern"
        );
        state.active.insert(
            pattern,
            ActiveMitigation {
                pattern,
                action,
                applied_at: Utc::now(),
                occurrences,
            },
        );
        Some(action)
    }

    /// Marks a recorded failure as resolved by a retry. Unknown ids
    /// are ignored; the entry may have aged out of the history.
    pub async fn retry_succeeded(&self, record_id: Uuid) {
        let mut state = self.state.write().await;
        let found = match state.history.iter_mut().find(|r| r.id == record_id) {
            Some(record) => {
                record.retry_succeeded = true;
                true
            }
            None => false,
        };
        if found {
            state.retries_succeeded += 1;
            debug!(%record_id, "Failure resolved by retry");
        } else {
            debug!(%record_id, "Retry marker for unknown or evicted record");
        }
    }

    /// Prompt-shape advice derived from the observed patterns plus the
    /// rule table's prevention notes.
    pub async fn prevention_recommendations(
        &self,
        prompt: &str,
        task_type: TaskType,
    ) -> Vec<String> {
        let state = self.state.read().await;
        let mut recommendations = Vec::new();
        for (pattern, stats) in &state.patterns {
            if stats.occurrences < MITIGATION_OCCURRENCES {
                continue;
            }
            if !stats.affected_tasks.contains(&task_type) {
                continue;
            }
            if let Some(rule) = ERROR_RULES.iter().find(|r| r.pattern == Some(*pattern)) {
                recommendations.push(rule.prevention.to_string());
            }
        }
        if prompt.chars().count() > 4000
            && state
                .patterns
                .get(&ErrorPattern::ContextTooLong)
                .is_some_and(|s| s.occurrences > 0)
        {
            recommendations
                .push("this prompt is long; consider splitting it before dispatch".to_string());
        }
        recommendations.sort();
        recommendations.dedup();
        recommendations
    }

    pub async fn active_mitigations(&self) -> Vec<ActiveMitigation> {
        self.state.read().await.active.values().cloned().collect()
    }

    pub async fn insights(&self) -> Vec<LearningInsight> {
        self.state.read().await.insights.iter().cloned().collect()
    }

    pub async fn learning_stats(&self) -> LearningStats {
        let state = self.state.read().await;
        LearningStats {
            total_errors: state.total_errors,
            history_len: state.history.len(),
            errors_by_type: state
                .by_type
                .iter()
                .map(|(t, n)| (t.as_str().to_string(), *n))
                .collect(),
            errors_by_model: state
                .by_model
                .iter()
                .map(|(m, e)| (m.clone(), e.count))
                .collect(),
            pattern_occurrences: state
                .patterns
                .iter()
                .map(|(p, s)| (p.as_str().to_string(), s.occurrences))
                .collect(),
            active_mitigations: state.active.len(),
            insights: state.insights.len(),
            disabled_models: state.disabled_models.clone(),
            retries_succeeded: state.retries_succeeded,
        }
    }
}

/// Best rule by keyword confidence over the combined error text, with
/// response-shape boosts for keywordless failures. Falls back to a
/// generic low-confidence invalid-response classification.
fn classify(message: &str, response: Option<&GenerationResult>) -> (&'static ErrorRule, f64) {
    let lowered = message.to_lowercase();
    let mut best: Option<(&'static ErrorRule, f64)> = None;
    for rule in ERROR_RULES {
        let mut confidence: f64 = 0.0;
        for (i, keyword) in rule.keywords.iter().enumerate() {
            if lowered.contains(keyword) {
                let strength = if i == 0 {
                    PRIMARY_KEYWORD_CONFIDENCE
                } else {
                    KEYWORD_CONFIDENCE
                };
                confidence = confidence.max(strength);
            }
        }
        if rule.error_type == ErrorType::ApiError && response.is_some_and(|r| !r.success) {
            confidence += 0.3;
        }
        if rule.error_type == ErrorType::Timeout
            && response.is_some_and(|r| r.latency_secs > HIGH_LATENCY_SECS)
        {
            confidence += 0.4;
        }
        let confidence = confidence.min(1.0);
        if best.map_or(true, |(_, b)| confidence > b) {
            best = Some((rule, confidence));
        }
    }

    match best {
        Some((rule, confidence)) if confidence > MIN_CONFIDENCE => (rule, confidence),
        _ => (&GENERIC_RULE, MIN_CONFIDENCE),
    }
}

static GENERIC_RULE: ErrorRule = ErrorRule {
    error_type: ErrorType::InvalidResponse,
    pattern: None,
    keywords: &[],
    severity: 0.3,
    remediation: "manual investigation required; no rule matched this failure",
    prevention: "",
};

/// Summarising insights once enough history exists: the most
/// error-prone model and task, and the dominant pattern. Descriptions
/// are stable so the suppression window can catch repeats.
fn generate_insights(state: &mut LearningState) {
    if state.total_errors < INSIGHT_MIN_TOTAL {
        return;
    }
    let window_start = Utc::now() - ChronoDuration::hours(INSIGHT_WINDOW_HOURS);
    let recent = state
        .history
        .iter()
        .filter(|r| r.occurred_at > window_start)
        .count();
    if recent < INSIGHT_MIN_RECENT {
        return;
    }

    let mut candidates: Vec<(String, String)> = Vec::new();
    if let Some((model, _)) = state
        .by_model
        .iter()
        .filter(|(m, _)| m.as_str() != "none")
        .max_by_key(|(_, e)| e.count)
    {
        candidates.push((
            "error_prone_model".to_string(),
            format!("model {} accounts for the most recorded errors", model),
        ));
    }
    if let Some((task, _)) = state.by_task.iter().max_by_key(|(_, n)| **n) {
        candidates.push((
            "error_prone_task".to_string(),
            format!(
                "task type {} accounts for the most recorded errors",
                task.as_str()
            ),
        ));
    }
    if let Some((pattern, _)) = state.patterns.iter().max_by_key(|(_, s)| s.occurrences) {
        candidates.push((
            "dominant_pattern".to_string(),
            format!("{} is the dominant error pattern", pattern.as_str()),
        ));
    }

    let suppression_start = Utc::now() - ChronoDuration::hours(INSIGHT_SUPPRESSION_HOURS);
    for (category, description) in candidates {
        let duplicate = state.insights.iter().any(|i| {
            i.category == category
                && i.description == description
                && i.created_at > suppression_start
        });
        if duplicate {
            continue;
        }
        info!(category = %category, %description, "Learning insight generated");
        state.insights.push_back(LearningInsight {
            category,
            description,
            created_at: Utc::now(),
        });
        while state.insights.len() > INSIGHT_LOG_CAP {
            state.insights.pop_front();
        }
    }
}
