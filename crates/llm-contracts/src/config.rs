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

use crate::types::{LLMError, LLMResult};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Model descriptors grouped by provider, plus optional explicit
/// role assignments. Provider iteration order is preserved because
/// automatic role partitioning is first-come over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub providers: IndexMap<String, ProviderModels>,
    pub default_provider: String,
    #[serde(default)]
    pub roles: Option<RoleAssignments>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModels {
    pub models: Vec<ModelEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

/// Explicit role -> model-name lists. When absent, the registry
/// partitions models with name-substring heuristics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleAssignments {
    #[serde(default)]
    pub primary: Vec<String>,
    #[serde(default)]
    pub duplicate: Vec<String>,
    #[serde(default)]
    pub reserve: Vec<String>,
    #[serde(default)]
    pub fallback: Vec<String>,
}

fn default_max_tokens() -> u32 {
    4096
}
fn default_context_window() -> u32 {
    8192
}
fn default_temperature() -> f32 {
    0.7
}
fn default_top_p() -> f32 {
    0.9
}

impl OrchestratorConfig {
    /// Parses YAML after resolving `${NAME}` / `${NAME:default}`
    /// environment references in the raw text.
    pub fn from_yaml_str(raw: &str) -> LLMResult<Self> {
        let resolved = resolve_env_vars(raw);
        serde_yaml::from_str(&resolved)
            .map_err(|e| LLMError::Configuration(format!("Failed to parse configuration: {e}")))
    }

    pub fn model_count(&self) -> usize {
        self.providers.values().map(|p| p.models.len()).sum()
    }
}

/// Substitutes `${NAME}` with the environment value (empty when
/// unset) and `${NAME:default}` with the value or the given default.
pub fn resolve_env_vars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let inner = &after[..end];
                let (name, default) = match inner.split_once(':') {
                    Some((n, d)) => (n, Some(d)),
                    None => (inner, None),
                };
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => out.push_str(default.unwrap_or("")),
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference; emit verbatim.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
