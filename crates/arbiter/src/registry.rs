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

use indexmap::IndexMap;
use llm_contracts::{LLMError, LLMResult, ModelEntry, ModelRole, OrchestratorConfig};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Name patterns that mark a model as high-capability; such models
/// are preferred for the `primary` role.
const HIGH_CAPABILITY_PATTERNS: &[&str] = &["opus", "gpt-4", "sonnet", "70b", "405b", "large"];
/// Very-small size markers; excluded from `duplicate` and assumed
/// fast when no latency has been measured yet.
const SMALL_MARKERS: &[&str] = &["mini", "tiny", "haiku", "small", "1b", "3b"];
/// Very-large size markers; excluded from `duplicate` and assumed
/// slow until measured.
const LARGE_MARKERS: &[&str] = &["405b", "opus", "large"];
/// Reliability-oriented name patterns preferred for `reserve`.
const RESERVE_PATTERNS: &[&str] = &["instruct", "stable", "turbo"];

const PRIMARY_CAP: usize = 5;

/// One registered model. Owned exclusively by the registry and
/// mutated only through registry operations; never destroyed during
/// the process lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct ModelDescriptor {
    pub name: String,
    pub role: ModelRole,
    pub max_tokens: u32,
    pub context_window: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub enabled: bool,
    pub last_response_time: Option<f64>,
    pub success_count: u64,
    pub error_count: u64,
}

impl ModelDescriptor {
    fn from_entry(entry: &ModelEntry, role: ModelRole) -> Self {
        Self {
            name: entry.name.clone(),
            role,
            max_tokens: entry.max_tokens,
            context_window: entry.context_window,
            temperature: entry.temperature,
            top_p: entry.top_p,
            enabled: true,
            last_response_time: None,
            success_count: 0,
            error_count: 0,
        }
    }

    /// Ordering key for speed: measured latency when available,
    /// otherwise a static size heuristic so untested models are
    /// still orderable.
    pub fn speed_estimate(&self) -> f64 {
        self.last_response_time
            .unwrap_or_else(|| static_speed_estimate(&self.name))
    }
}

fn static_speed_estimate(name: &str) -> f64 {
    let lowered = name.to_lowercase();
    if SMALL_MARKERS.iter().any(|m| lowered.contains(m)) {
        2.0
    } else if LARGE_MARKERS.iter().any(|m| lowered.contains(m)) {
        15.0
    } else {
        5.0
    }
}

fn matches_any(name: &str, patterns: &[&str]) -> bool {
    let lowered = name.to_lowercase();
    patterns.iter().any(|p| lowered.contains(p))
}

/// Shared with the router's scoring bonuses.
pub(crate) fn is_high_capability(name: &str) -> bool {
    matches_any(name, HIGH_CAPABILITY_PATTERNS)
}

/// Holds every configured model keyed by name, in configuration
/// order. Registry order matters: fallback chains walk it as-is.
pub struct ModelRegistry {
    models: RwLock<IndexMap<String, ModelDescriptor>>,
}

impl ModelRegistry {
    pub fn from_config(config: &OrchestratorConfig) -> LLMResult<Self> {
        let entries: Vec<&ModelEntry> = config
            .providers
            .values()
            .flat_map(|p| p.models.iter())
            .collect();
        if entries.is_empty() {
            return Err(LLMError::Configuration(
                "no models configured for any provider".to_string(),
            ));
        }

        let mut models = IndexMap::with_capacity(entries.len());
        match &config.roles {
            Some(roles) => {
                for entry in &entries {
                    let role = if roles.primary.contains(&entry.name) {
                        ModelRole::Primary
                    } else if roles.duplicate.contains(&entry.name) {
                        ModelRole::Duplicate
                    } else if roles.reserve.contains(&entry.name) {
                        ModelRole::Reserve
                    } else {
                        ModelRole::Fallback
                    };
                    models.insert(entry.name.clone(), ModelDescriptor::from_entry(entry, role));
                }
            }
            None => {
                let assignments = assign_roles(&entries);
                for (entry, role) in entries.iter().zip(assignments) {
                    models.insert(entry.name.clone(), ModelDescriptor::from_entry(entry, role));
                }
            }
        }

        info!(
            total = models.len(),
            "Model registry initialised from configuration"
        );
        Ok(Self {
            models: RwLock::new(models),
        })
    }

    /// Enabled models, optionally restricted to one role, in
    /// registry order.
    pub async fn models(&self, role: Option<ModelRole>) -> Vec<ModelDescriptor> {
        self.models
            .read()
            .await
            .values()
            .filter(|m| m.enabled && role.map_or(true, |r| m.role == r))
            .cloned()
            .collect()
    }

    pub async fn get(&self, name: &str) -> Option<ModelDescriptor> {
        self.models.read().await.get(name).cloned()
    }

    /// Lowest speed estimate among enabled models of the role.
    pub async fn fastest(&self, role: ModelRole) -> Option<ModelDescriptor> {
        self.fastest_models(role, 1).await.into_iter().next()
    }

    /// Up to `count` enabled models of the role, fastest first.
    pub async fn fastest_models(&self, role: ModelRole, count: usize) -> Vec<ModelDescriptor> {
        let mut candidates = self.models(Some(role)).await;
        candidates.sort_by(|a, b| {
            a.speed_estimate()
                .partial_cmp(&b.speed_estimate())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(count);
        candidates
    }

    pub async fn update_stats(&self, name: &str, success: bool, latency_secs: f64) {
        let mut models = self.models.write().await;
        match models.get_mut(name) {
            Some(model) => {
                if success {
                    model.success_count += 1;
                } else {
                    model.error_count += 1;
                }
                model.last_response_time = Some(latency_secs);
                debug!(
                    model = name,
                    success,
                    latency_secs,
                    "Registry stats updated"
                );
            }
            None => warn!(model = name, "Stats update for unknown model ignored"),
        }
    }

    pub async fn enable(&self, name: &str) {
        self.set_enabled(name, true).await;
    }

    pub async fn disable(&self, name: &str) {
        self.set_enabled(name, false).await;
    }

    pub async fn is_enabled(&self, name: &str) -> bool {
        self.models
            .read()
            .await
            .get(name)
            .map(|m| m.enabled)
            .unwrap_or(false)
    }

    async fn set_enabled(&self, name: &str, enabled: bool) {
        let mut models = self.models.write().await;
        match models.get_mut(name) {
            Some(model) => {
                model.enabled = enabled;
                info!(model = name, enabled, "Model availability changed");
            }
            None => warn!(
                model = name,
                enabled, "Enable/disable for unknown model ignored"
            ),
        }
    }

    /// Full snapshot for reporting; includes disabled models.
    pub async fn snapshot(&self) -> Vec<ModelDescriptor> {
        self.models.read().await.values().cloned().collect()
    }
}

/// Partitions models into roles when configuration carries no
/// explicit assignment. First-come over provider iteration order;
/// no model lands in two roles.
fn assign_roles(entries: &[&ModelEntry]) -> Vec<ModelRole> {
    let mut roles: Vec<Option<ModelRole>> = vec![None; entries.len()];

    // Primary: pattern matches first, then fill from the remainder.
    let mut primary_count = 0;
    for (i, entry) in entries.iter().enumerate() {
        if primary_count >= PRIMARY_CAP {
            break;
        }
        if matches_any(&entry.name, HIGH_CAPABILITY_PATTERNS) {
            roles[i] = Some(ModelRole::Primary);
            primary_count += 1;
        }
    }
    for slot in roles.iter_mut() {
        if primary_count >= PRIMARY_CAP {
            break;
        }
        if slot.is_none() {
            *slot = Some(ModelRole::Primary);
            primary_count += 1;
        }
    }

    // Duplicate: mid-sized models, excluding extreme size markers.
    for (i, entry) in entries.iter().enumerate() {
        if roles[i].is_none()
            && !matches_any(&entry.name, SMALL_MARKERS)
            && !matches_any(&entry.name, LARGE_MARKERS)
        {
            roles[i] = Some(ModelRole::Duplicate);
        }
    }

    // Reserve: reliability-oriented names from whatever is left.
    for (i, entry) in entries.iter().enumerate() {
        if roles[i].is_none() && matches_any(&entry.name, RESERVE_PATTERNS) {
            roles[i] = Some(ModelRole::Reserve);
        }
    }

    roles
        .into_iter()
        .map(|r| r.unwrap_or(ModelRole::Fallback))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_contracts::OrchestratorConfig;

    fn config_from(yaml: &str) -> OrchestratorConfig {
        OrchestratorConfig::from_yaml_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn test_explicit_roles_respected() {
        let config = config_from(
            r#"
default_provider: local
providers:
  local:
    models:
      - name: alpha
      - name: beta
      - name: gamma
roles:
  primary: [alpha]
  fallback: [beta, gamma]
"#,
        );
        let registry = ModelRegistry::from_config(&config).unwrap();
        assert_eq!(registry.get("alpha").await.unwrap().role, ModelRole::Primary);
        assert_eq!(registry.get("beta").await.unwrap().role, ModelRole::Fallback);
        assert_eq!(registry.models(Some(ModelRole::Primary)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_heuristic_assignment_prefers_capability_patterns() {
        let config = config_from(
            r#"
default_provider: local
providers:
  local:
    models:
      - name: llama3-405b
      - name: gpt-4o
      - name: qwen-7b
      - name: phi-mini
      - name: mistral-7b-instruct
      - name: claude-sonnet
      - name: gemma-2b-tiny
      - name: yi-9b
"#,
        );
        let registry = ModelRegistry::from_config(&config).unwrap();
        let primaries = registry.models(Some(ModelRole::Primary)).await;
        assert_eq!(primaries.len(), 5);
        let names: Vec<&str> = primaries.iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"llama3-405b"));
        assert!(names.contains(&"gpt-4o"));
        assert!(names.contains(&"claude-sonnet"));

        // No model may carry two roles; everything is assigned once.
        let all = registry.snapshot().await;
        assert_eq!(all.len(), 8);
    }

    #[tokio::test]
    async fn test_fastest_prefers_measured_latency() {
        let config = config_from(
            r#"
default_provider: local
providers:
  local:
    models:
      - name: big-slow-405b
      - name: medium-7b
roles:
  primary: [big-slow-405b, medium-7b]
"#,
        );
        let registry = ModelRegistry::from_config(&config).unwrap();

        // Untested: static heuristic orders the mid-sized model first.
        let fastest = registry.fastest(ModelRole::Primary).await.unwrap();
        assert_eq!(fastest.name, "medium-7b");

        // A measured call beats the heuristic.
        registry.update_stats("big-slow-405b", true, 0.4).await;
        let fastest = registry.fastest(ModelRole::Primary).await.unwrap();
        assert_eq!(fastest.name, "big-slow-405b");
    }

    #[tokio::test]
    async fn test_unknown_model_operations_are_noops() {
        let config = config_from(
            r#"
default_provider: local
providers:
  local:
    models:
      - name: only
"#,
        );
        let registry = ModelRegistry::from_config(&config).unwrap();
        assert!(registry.get("missing").await.is_none());
        registry.disable("missing").await;
        registry.update_stats("missing", true, 1.0).await;
        assert!(registry.get("only").await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_disable_is_soft_delete() {
        let config = config_from(
            r#"
default_provider: local
providers:
  local:
    models:
      - name: one
      - name: two
"#,
        );
        let registry = ModelRegistry::from_config(&config).unwrap();
        registry.disable("one").await;
        assert!(!registry.is_enabled("one").await);
        assert!(registry.get("one").await.is_some());
        assert_eq!(registry.models(None).await.len(), 1);
        registry.enable("one").await;
        assert_eq!(registry.models(None).await.len(), 2);
    }

    #[test]
    fn test_empty_config_is_an_error() {
        let config = config_from(
            r#"
default_provider: local
providers: {}
"#,
        );
        assert!(ModelRegistry::from_config(&config).is_err());
    }
}
