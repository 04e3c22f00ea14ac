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

//! Adaptive orchestration for language-model backends: request
//! classification, scored model selection, strategy execution
//! (single / parallel / fallback / consensus / iterative) and an
//! error-pattern learning loop that feeds observed outcomes back into
//! future decisions.

pub mod adaptive;
pub mod client;
pub mod evaluator;
pub mod learning;
pub mod orchestrator;
pub mod perf;
pub mod registry;
pub mod router;
pub mod strategy;
pub mod validation;

pub use adaptive::{AdaptationContext, AdaptationTrigger, AdaptiveStats, AdaptiveStrategyManager};
pub use client::GenerationClient;
pub use evaluator::ResponseEvaluator;
pub use learning::{
    ActiveMitigation, ErrorAnalysis, ErrorLearningSystem, ErrorRecord, LearningInsight,
    LearningStats, MitigationAction,
};
pub use orchestrator::{HealthReport, Orchestrator};
pub use perf::PerformanceRecord;
pub use registry::{ModelDescriptor, ModelRegistry};
pub use router::{RequestAnalysis, RequestRouter, RoutingDecision, RoutingStats};
pub use strategy::{AttemptObserver, StrategyExecutor};
pub use validation::{attempt_repair, extract_json, is_valid_json};
