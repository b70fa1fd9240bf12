//! Heuristic quality assessment of stage outputs
//!
//! Used when a stage processor does not supply its own metrics. The scores are
//! cheap structural and lexical signals, not a judgement of correctness.

use cairn_core::Metrics;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const VAGUE_WORDS: &[&str] = &[
    "maybe", "perhaps", "possibly", "probably", "somehow", "something", "etc", "various",
    "several", "tbd", "todo", "unclear", "stuff", "things",
];

const NONDETERMINISTIC_WORDS: &[&str] = &[
    "random", "randomly", "sometimes", "occasionally", "usually", "approximately", "roughly",
    "might", "may", "either", "arbitrary", "whatever",
];

/// Each flagged word costs this much of the score per unit of word ratio
const DEFAULT_PENALTY: f64 = 5.0;

/// Scores a JSON output on the four quality components
#[derive(Debug, Clone)]
pub struct HeuristicAssessor {
    vague_words: HashSet<String>,
    nondeterministic_words: HashSet<String>,
    penalty: f64,
}

impl Default for HeuristicAssessor {
    fn default() -> Self {
        Self {
            vague_words: VAGUE_WORDS.iter().map(|w| w.to_string()).collect(),
            nondeterministic_words: NONDETERMINISTIC_WORDS
                .iter()
                .map(|w| w.to_string())
                .collect(),
            penalty: DEFAULT_PENALTY,
        }
    }
}

impl HeuristicAssessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add words that lower the clarity score
    pub fn with_vague_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vague_words
            .extend(words.into_iter().map(|w| w.into().to_lowercase()));
        self
    }

    /// Add words that lower the determinism score
    pub fn with_nondeterministic_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.nondeterministic_words
            .extend(words.into_iter().map(|w| w.into().to_lowercase()));
        self
    }

    pub fn with_penalty(mut self, penalty: f64) -> Self {
        self.penalty = penalty.max(0.0);
        self
    }

    pub fn assess(&self, output: &Value) -> Metrics {
        let mut words = Vec::new();
        collect_words(output, &mut words);

        let metrics = Metrics::new(
            completeness(output),
            self.word_score(&words, &self.vague_words),
            self.word_score(&words, &self.nondeterministic_words),
            consistency(output),
        );

        debug!(
            completeness = metrics.completeness,
            clarity = metrics.clarity,
            determinism = metrics.determinism,
            consistency = metrics.consistency,
            words = words.len(),
            "Assessed output"
        );
        metrics
    }

    fn word_score(&self, words: &[String], flagged: &HashSet<String>) -> f64 {
        if words.is_empty() {
            return 1.0;
        }
        let hits = words.iter().filter(|w| flagged.contains(*w)).count();
        let ratio = hits as f64 / words.len() as f64;
        (1.0 - ratio * self.penalty).clamp(0.0, 1.0)
    }
}

/// Assess with the default word lists
pub fn assess(output: &Value) -> Metrics {
    HeuristicAssessor::default().assess(output)
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn fraction_present<'a>(values: impl ExactSizeIterator<Item = &'a Value>) -> f64 {
    let total = values.len();
    if total == 0 {
        return 0.0;
    }
    let present = values.filter(|v| is_present(v)).count();
    present as f64 / total as f64
}

fn completeness(output: &Value) -> f64 {
    match output {
        Value::Array(items) => fraction_present(items.iter()),
        Value::Object(map) => fraction_present(map.values()),
        other if is_present(other) => 1.0,
        _ => 0.0,
    }
}

fn collect_words(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(
            s.split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .map(str::to_lowercase),
        ),
        Value::Array(items) => items.iter().for_each(|v| collect_words(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_words(v, out)),
        _ => {}
    }
}

fn shape(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "bool".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(_) => "array".to_string(),
        Value::Object(map) => {
            let mut keys: Vec<&str> = map.keys().map(String::as_str).collect();
            keys.sort_unstable();
            format!("object:{}", keys.join(","))
        }
    }
}

fn collect_array_scores(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Array(items) => {
            if items.len() >= 2 {
                let mut counts: HashMap<String, usize> = HashMap::new();
                for item in items {
                    *counts.entry(shape(item)).or_default() += 1;
                }
                let majority = counts.values().copied().max().unwrap_or(0);
                out.push(majority as f64 / items.len() as f64);
            }
            items.iter().for_each(|v| collect_array_scores(v, out));
        }
        Value::Object(map) => map.values().for_each(|v| collect_array_scores(v, out)),
        _ => {}
    }
}

/// How uniform list elements are; outputs without lists score 1.0
fn consistency(output: &Value) -> f64 {
    let mut scores = Vec::new();
    collect_array_scores(output, &mut scores);
    if scores.is_empty() {
        1.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_well_formed_output_scores_high() {
        let metrics = assess(&json!({
            "title": "Todo service",
            "steps": ["define schema", "write handlers"]
        }));
        assert_eq!(metrics.completeness, 1.0);
        assert_eq!(metrics.clarity, 1.0);
        assert_eq!(metrics.determinism, 1.0);
        assert_eq!(metrics.consistency, 1.0);
    }

    #[test]
    fn test_completeness_counts_empty_fields() {
        let metrics = assess(&json!({"a": "x", "b": ""}));
        assert!((metrics.completeness - 0.5).abs() < 1e-9);

        assert_eq!(assess(&Value::Null).completeness, 0.0);
        assert_eq!(assess(&json!([])).completeness, 0.0);
        assert_eq!(assess(&json!("text")).completeness, 1.0);
        assert_eq!(assess(&json!(42)).completeness, 1.0);
    }

    #[test]
    fn test_vague_wording_lowers_clarity() {
        let metrics = assess(&json!("maybe do something etc"));
        assert!(metrics.clarity < 0.5);
        assert_eq!(metrics.determinism, 1.0);
    }

    #[test]
    fn test_nondeterministic_wording_lowers_determinism() {
        let metrics = assess(&json!(["retry randomly", "sometimes skip the cache"]));
        assert!(metrics.determinism < 1.0);
        assert_eq!(metrics.clarity, 1.0);
    }

    #[test]
    fn test_mixed_lists_lower_consistency() {
        let metrics = assess(&json!([1, "two", 3]));
        assert!((metrics.consistency - 2.0 / 3.0).abs() < 1e-9);

        let objects = assess(&json!([{"id": 1}, {"id": 2}, {"name": "x"}, {"id": 4}]));
        assert!((objects.consistency - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_custom_words() {
        let assessor = HeuristicAssessor::new().with_vague_words(["Later"]);
        let metrics = assessor.assess(&json!("ship it later"));
        assert!(metrics.clarity < 1.0);

        let lenient = HeuristicAssessor::new().with_penalty(0.0);
        assert_eq!(lenient.assess(&json!("maybe maybe maybe")).clarity, 1.0);
    }
}
