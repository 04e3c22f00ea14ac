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

use serde_json::Value;
use tracing::{debug, warn};

pub fn is_valid_json(text: &str) -> bool {
    serde_json::from_str::<Value>(text).is_ok()
}

/// Pulls a JSON payload out of raw model output, trying in order:
/// whole-text parse, fenced code blocks, then a bracket-balanced scan
/// from the first `{` or `[`.
pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if is_valid_json(trimmed) {
        debug!("Entire text parsed as JSON");
        return Some(trimmed.to_string());
    }

    for (language, block) in extract_code_blocks(text) {
        if language.as_deref() == Some("json") || language.is_none() {
            let candidate = block.trim();
            if is_valid_json(candidate) {
                debug!("Extracted JSON from fenced code block");
                return Some(candidate.to_string());
            }
        }
    }

    if let Some(candidate) = find_balanced(text, '{', '}') {
        if is_valid_json(&candidate) {
            debug!("Extracted JSON object via balanced scan");
            return Some(candidate);
        }
        warn!("Balanced object candidate failed to parse");
    }

    if let Some(candidate) = find_balanced(text, '[', ']') {
        if is_valid_json(&candidate) {
            debug!("Extracted JSON array via balanced scan");
            return Some(candidate);
        }
        warn!("Balanced array candidate failed to parse");
    }

    None
}

/// Last-resort repair: appends the closing brackets missing from the
/// raw bracket tally. Returns the repaired text only when it parses.
pub fn attempt_repair(text: &str) -> Option<String> {
    let start = text.find(['{', '['])?;
    let fragment = text[start..].trim_end();

    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for ch in fragment.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => stack.push(ch),
            '}' | ']' if !in_string => {
                stack.pop();
            }
            _ => {}
        }
    }

    if stack.is_empty() {
        return None;
    }

    let mut repaired = fragment.to_string();
    if in_string {
        repaired.push('"');
    }
    for open in stack.into_iter().rev() {
        repaired.push(match open {
            '{' => '}',
            _ => ']',
        });
    }

    if is_valid_json(&repaired) {
        debug!("Repaired truncated JSON by appending closers");
        Some(repaired)
    } else {
        None
    }
}

/// Fenced-block scanner shared with extraction; returns (language
/// tag, body) pairs.
pub fn extract_code_blocks(text: &str) -> Vec<(Option<String>, String)> {
    let mut blocks = Vec::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        if let Some(tag) = line.trim().strip_prefix("```") {
            let language = {
                let tag = tag.trim();
                if tag.is_empty() {
                    None
                } else {
                    Some(tag.to_string())
                }
            };
            let mut body = String::new();
            for inner in lines.by_ref() {
                if inner.trim().starts_with("```") {
                    break;
                }
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(inner);
            }
            blocks.push((language, body));
        }
    }
    blocks
}

fn find_balanced(text: &str, open: char, close: char) -> Option<String> {
    let mut balance = 0i32;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' if start.is_some() => in_string = !in_string,
            c if c == open && !in_string => {
                if balance == 0 {
                    start = Some(i);
                }
                balance += 1;
            }
            c if c == close && !in_string => {
                balance -= 1;
                if balance == 0 {
                    if let Some(s) = start {
                        return Some(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_whole_text_extraction() {
        let extracted = extract_json(r#"{"key": "value"}"#).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&extracted).unwrap(),
            json!({"key": "value"})
        );
    }

    #[test]
    fn test_fenced_block_round_trip() {
        let original = json!({"a": 1, "nested": {"b": [1, 2, 3]}});
        let wrapped = format!(
            "Here you go:\n```json\n{}\n```\nHope that helps.",
            serde_json::to_string_pretty(&original).unwrap()
        );
        let extracted = extract_json(&wrapped).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&extracted).unwrap(), original);
    }

    #[test]
    fn test_untagged_fence_accepted() {
        let wrapped = "```\n{\"x\": true}\n```";
        let extracted = extract_json(wrapped).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&extracted).unwrap(),
            json!({"x": true})
        );
    }

    #[test]
    fn test_balanced_scan_in_prose() {
        let text = r#"The result is {"count": 42, "label": "a {nested} brace"} as requested."#;
        let extracted = extract_json(text).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&extracted).unwrap()["count"],
            42
        );
    }

    #[test]
    fn test_array_extraction() {
        let text = "Values: [1, 2, 3] end";
        let extracted = extract_json(text).unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&extracted).unwrap(),
            json!([1, 2, 3])
        );
    }

    #[test]
    fn test_plain_text_yields_none() {
        assert!(extract_json("no structured payload here").is_none());
    }

    #[test]
    fn test_repair_appends_missing_closers() {
        let truncated = r#"{"items": [{"id": 1}, {"id": 2}"#;
        let repaired = attempt_repair(truncated).unwrap();
        let value: Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["items"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_repair_declines_hopeless_input() {
        assert!(attempt_repair("not json at all").is_none());
        assert!(attempt_repair(r#"{"complete": true}"#).is_none());
    }
}
