// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::{Matcher, MatcherError};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One field constraint: the event value at `path` must be one of `allowed`
#[derive(Debug, Clone, PartialEq)]
struct FieldRule {
    path: Vec<String>,
    allowed: Vec<Value>,
}

type Pattern = Vec<FieldRule>;

/// Exact-value JSON matcher.
///
/// A pattern is a JSON object whose leaves are arrays of allowed scalar
/// values; nested objects address nested event fields. An event matches
/// when every leaf field is present and holds one of the allowed values
/// (or, for array-valued event fields, contains one).
///
/// ```json
/// {"source": ["billing"], "detail": {"state": ["failed", "timeout"]}}
/// ```
#[derive(Debug, Clone, Default)]
pub struct ExactMatcher {
    patterns: BTreeMap<String, Vec<Pattern>>,
}

impl ExactMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct ids with at least one pattern
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.patterns.contains_key(id)
    }
}

impl Matcher for ExactMatcher {
    fn add_pattern(&mut self, id: &str, pattern: &str) -> Result<(), MatcherError> {
        let value: Value = serde_json::from_str(pattern)
            .map_err(|e| MatcherError::InvalidPattern(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(MatcherError::InvalidPattern(
                "pattern must be a JSON object".to_string(),
            ));
        };

        let mut rules = Vec::new();
        compile(&fields, &mut Vec::new(), &mut rules)?;
        if rules.is_empty() {
            return Err(MatcherError::InvalidPattern(
                "pattern has no fields".to_string(),
            ));
        }

        self.patterns.entry(id.to_string()).or_default().push(rules);
        Ok(())
    }

    fn delete_patterns(&mut self, id: &str) -> Result<(), MatcherError> {
        self.patterns.remove(id);
        Ok(())
    }

    fn matches_for_event(&self, event: &[u8]) -> Result<Vec<String>, MatcherError> {
        let value: Value =
            serde_json::from_slice(event).map_err(|e| MatcherError::InvalidEvent(e.to_string()))?;
        if !value.is_object() {
            return Err(MatcherError::InvalidEvent(
                "event must be a JSON object".to_string(),
            ));
        }

        Ok(self
            .patterns
            .iter()
            .filter(|(_, patterns)| patterns.iter().any(|p| satisfies(p, &value)))
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn copy(&self) -> Self {
        self.clone()
    }
}

fn compile(
    fields: &Map<String, Value>,
    path: &mut Vec<String>,
    rules: &mut Vec<FieldRule>,
) -> Result<(), MatcherError> {
    for (name, value) in fields {
        path.push(name.clone());
        match value {
            Value::Object(nested) => compile(nested, path, rules)?,
            Value::Array(allowed) => {
                if allowed.is_empty() {
                    return Err(MatcherError::InvalidPattern(format!(
                        "field {} has no allowed values",
                        path.join(".")
                    )));
                }
                if let Some(bad) = allowed.iter().find(|v| v.is_array() || v.is_object()) {
                    return Err(MatcherError::InvalidPattern(format!(
                        "field {} allows non-scalar value {bad}",
                        path.join(".")
                    )));
                }
                rules.push(FieldRule {
                    path: path.clone(),
                    allowed: allowed.clone(),
                });
            }
            other => {
                return Err(MatcherError::InvalidPattern(format!(
                    "field {} must be an array of values, got {other}",
                    path.join(".")
                )));
            }
        }
        path.pop();
    }
    Ok(())
}

fn satisfies(pattern: &[FieldRule], event: &Value) -> bool {
    pattern.iter().all(|rule| {
        let mut current = event;
        for segment in &rule.path {
            match current.get(segment) {
                Some(next) => current = next,
                None => return false,
            }
        }
        match current {
            Value::Array(items) => items.iter().any(|item| rule.allowed.contains(item)),
            scalar => rule.allowed.contains(scalar),
        }
    })
}

#[cfg(test)]
#[path = "exact_tests.rs"]
mod tests;
