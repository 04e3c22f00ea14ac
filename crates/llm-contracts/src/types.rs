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
use thiserror::Error;

/// Tier a model is assigned to; controls selection order. Models are
/// never removed from the registry - `enabled` is the soft-delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Primary,
    Duplicate,
    Reserve,
    Fallback,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Primary => "primary",
            ModelRole::Duplicate => "duplicate",
            ModelRole::Reserve => "reserve",
            ModelRole::Fallback => "fallback",
        }
    }
}

impl From<String> for ModelRole {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "primary" => ModelRole::Primary,
            "duplicate" => ModelRole::Duplicate,
            "reserve" => ModelRole::Reserve,
            _ => ModelRole::Fallback,
        }
    }
}

/// Closed classification of a request's intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    CodeGeneration,
    CodeReview,
    Analysis,
    QuestionAnswering,
    Summarisation,
    Translation,
    Mathematics,
    LogicalReasoning,
    CreativeWriting,
    ChatConversation,
    JsonGeneration,
    TechnicalWriting,
    Unknown,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::CodeGeneration => "code_generation",
            TaskType::CodeReview => "code_review",
            TaskType::Analysis => "analysis",
            TaskType::QuestionAnswering => "question_answering",
            TaskType::Summarisation => "summarisation",
            TaskType::Translation => "translation",
            TaskType::Mathematics => "mathematics",
            TaskType::LogicalReasoning => "logical_reasoning",
            TaskType::CreativeWriting => "creative_writing",
            TaskType::ChatConversation => "chat_conversation",
            TaskType::JsonGeneration => "json_generation",
            TaskType::TechnicalWriting => "technical_writing",
            TaskType::Unknown => "unknown",
        }
    }

    pub fn all_classifiable() -> &'static [TaskType] {
        &[
            TaskType::CodeGeneration,
            TaskType::CodeReview,
            TaskType::Analysis,
            TaskType::QuestionAnswering,
            TaskType::Summarisation,
            TaskType::Translation,
            TaskType::Mathematics,
            TaskType::LogicalReasoning,
            TaskType::CreativeWriting,
            TaskType::ChatConversation,
            TaskType::JsonGeneration,
            TaskType::TechnicalWriting,
        ]
    }
}

/// Ordered complexity levels derived from the request text.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl ComplexityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplexityLevel::Simple => "simple",
            ComplexityLevel::Moderate => "moderate",
            ComplexityLevel::Complex => "complex",
            ComplexityLevel::VeryComplex => "very_complex",
        }
    }
}

/// Coarse execution pattern chosen by the adaptive layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Single,
    Parallel,
    Fallback,
    Consensus,
    Iterative,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyType::Single => "single",
            StrategyType::Parallel => "parallel",
            StrategyType::Fallback => "fallback",
            StrategyType::Consensus => "consensus",
            StrategyType::Iterative => "iterative",
        }
    }
}

/// The strategy executor's own low-level execution choice, distinct
/// from the adaptive layer's [`StrategyType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Single,
    Parallel,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Single => "single",
            ExecutionMode::Parallel => "parallel",
        }
    }
}

/// Classified error kind for a failed or low-quality generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ApiError,
    Timeout,
    RateLimit,
    ContentPolicy,
    InvalidResponse,
    LowQuality,
    Hallucination,
    Incomplete,
    Irrelevant,
    Formatting,
    Network,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ApiError => "api_error",
            ErrorType::Timeout => "timeout",
            ErrorType::RateLimit => "rate_limit",
            ErrorType::ContentPolicy => "content_policy",
            ErrorType::InvalidResponse => "invalid_response",
            ErrorType::LowQuality => "low_quality",
            ErrorType::Hallucination => "hallucination",
            ErrorType::Incomplete => "incomplete",
            ErrorType::Irrelevant => "irrelevant",
            ErrorType::Formatting => "formatting",
            ErrorType::Network => "network",
        }
    }
}

/// Higher-level recurring failure cause inferred from one or more
/// error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPattern {
    ModelOverload,
    ContextTooLong,
    ComplexQuery,
    UnsupportedFormat,
    SensitiveContent,
    AmbiguousRequest,
    ResourceExhausted,
}

impl ErrorPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorPattern::ModelOverload => "model_overload",
            ErrorPattern::ContextTooLong => "context_too_long",
            ErrorPattern::ComplexQuery => "complex_query",
            ErrorPattern::UnsupportedFormat => "unsupported_format",
            ErrorPattern::SensitiveContent => "sensitive_content",
            ErrorPattern::AmbiguousRequest => "ambiguous_request",
            ErrorPattern::ResourceExhausted => "resource_exhausted",
        }
    }
}

#[derive(Debug, Error)]
pub enum LLMError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialisation error: {0}")]
    Serialisation(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Timeout error")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type LLMResult<T> = Result<T, LLMError>;
