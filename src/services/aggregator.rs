//! Result aggregation: selecting or merging one answer from N candidate
//! worker results under a named strategy.

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::models::{AggregationConfig, SubagentResult};

/// The named rule used to pick or merge one answer from several candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationStrategy {
    /// Arg-max by worker-reported confidence.
    BestConfidence,
    /// First surviving result in input order.
    FirstSuccess,
    /// Majority vote over action signatures, best-confidence fallback.
    Consensus,
    /// Shape-aware merge; degrades to best-confidence where no semantically
    /// sound merge exists.
    WeightedMerge,
}

impl AggregationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BestConfidence => "best_confidence",
            Self::FirstSuccess => "first_success",
            Self::Consensus => "consensus",
            Self::WeightedMerge => "weighted_merge",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "best_confidence" => Some(Self::BestConfidence),
            "first_success" => Some(Self::FirstSuccess),
            "consensus" => Some(Self::Consensus),
            "weighted_merge" => Some(Self::WeightedMerge),
            _ => None,
        }
    }
}

impl std::fmt::Display for AggregationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pure selection/merge over candidate worker results.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    config: AggregationConfig,
}

impl ResultAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    /// Aggregate `results` under `strategy`.
    ///
    /// Returns `None` only for empty input. Results are first filtered to
    /// successes at or above the configured minimum confidence; when none
    /// survive, the literal first input result is returned (even a failed
    /// one) so callers always get something to report.
    pub fn aggregate(
        &self,
        results: &[SubagentResult],
        strategy: AggregationStrategy,
    ) -> Option<SubagentResult> {
        if results.is_empty() {
            return None;
        }

        let candidates: Vec<&SubagentResult> = results
            .iter()
            .filter(|r| r.success && r.confidence >= self.config.min_confidence)
            .collect();

        if candidates.is_empty() {
            debug!(
                total = results.len(),
                "No candidate passed the confidence filter; reporting first input"
            );
            return Some(results[0].clone());
        }

        let chosen = match strategy {
            AggregationStrategy::BestConfidence => Self::best_confidence(&candidates),
            AggregationStrategy::FirstSuccess => candidates[0].clone(),
            AggregationStrategy::Consensus => self.consensus(&candidates),
            AggregationStrategy::WeightedMerge => self.weighted_merge(&candidates),
        };

        Some(chosen)
    }

    fn best_confidence(candidates: &[&SubagentResult]) -> SubagentResult {
        candidates
            .iter()
            .max_by(|a, b| {
                a.confidence
                    .partial_cmp(&b.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|r| (*r).clone())
            .expect("candidates checked non-empty")
    }

    /// Majority vote over the candidates' action signatures. A winner below
    /// the consensus threshold falls back to best-confidence.
    fn consensus(&self, candidates: &[&SubagentResult]) -> SubagentResult {
        let signatures: Vec<String> = candidates
            .iter()
            .map(|r| action_signature(&r.result))
            .collect();

        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for sig in &signatures {
            *counts.entry(sig.as_str()).or_insert(0) += 1;
        }

        let (winner, count) = counts
            .into_iter()
            .max_by_key(|&(_, n)| n)
            .expect("candidates checked non-empty");

        #[allow(clippy::cast_precision_loss)]
        let share = count as f64 / candidates.len() as f64;
        if share >= self.config.consensus_threshold {
            let idx = signatures
                .iter()
                .position(|s| *s == winner)
                .expect("winner came from signatures");
            candidates[idx].clone()
        } else {
            debug!(share, "No consensus reached; falling back to best confidence");
            Self::best_confidence(candidates)
        }
    }

    /// Shape-aware merge.
    ///
    /// Planning results are alternative action sequences: merging them has
    /// no sound semantics, so the best one wins. Vision results describe
    /// disjoint regions rather than competing answers, so every region's
    /// analysis is kept, keyed by its own identity. Specialist results are
    /// additive knowledge: shortcut maps are unioned and workflow lists
    /// concatenated onto the first success.
    fn weighted_merge(&self, candidates: &[&SubagentResult]) -> SubagentResult {
        match detect_shape(&candidates[0].result) {
            ResultShape::Planning => Self::best_confidence(candidates),
            ResultShape::Vision => Self::merge_vision(candidates),
            ResultShape::Specialist if candidates.len() > 1 => Self::merge_specialist(candidates),
            ResultShape::Specialist => candidates[0].clone(),
            ResultShape::Other => Self::best_confidence(candidates),
        }
    }

    fn merge_vision(candidates: &[&SubagentResult]) -> SubagentResult {
        let mut regions = Map::new();
        for (idx, candidate) in candidates.iter().enumerate() {
            let key = candidate
                .result
                .get("region")
                .and_then(Value::as_str)
                .map_or_else(|| format!("region_{idx}"), ToString::to_string);
            regions.insert(key, candidate.result.clone());
        }

        let confidence = candidates
            .iter()
            .map(|r| r.confidence)
            .fold(0.0_f64, f64::max);
        let execution_time = candidates
            .iter()
            .map(|r| r.execution_time)
            .max()
            .unwrap_or_default();

        SubagentResult {
            success: true,
            result: Value::Object(Map::from_iter([(
                "regions".to_string(),
                Value::Object(regions),
            )])),
            confidence,
            error: None,
            execution_time,
        }
    }

    fn merge_specialist(candidates: &[&SubagentResult]) -> SubagentResult {
        let mut merged = candidates[0].clone();

        let mut shortcuts = Map::new();
        let mut workflow = Vec::new();
        for candidate in candidates {
            if let Some(map) = candidate.result.get("shortcuts").and_then(Value::as_object) {
                for (key, value) in map {
                    // First answer for a shortcut wins
                    shortcuts.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            if let Some(steps) = candidate.result.get("workflow").and_then(Value::as_array) {
                workflow.extend(steps.iter().cloned());
            }
        }

        if let Some(obj) = merged.result.as_object_mut() {
            if !shortcuts.is_empty() {
                obj.insert("shortcuts".to_string(), Value::Object(shortcuts));
            }
            if !workflow.is_empty() {
                obj.insert("workflow".to_string(), Value::Array(workflow));
            }
        }

        merged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultShape {
    Planning,
    Vision,
    Specialist,
    Other,
}

fn detect_shape(result: &Value) -> ResultShape {
    let Some(obj) = result.as_object() else {
        return ResultShape::Other;
    };
    if obj.contains_key("actions") {
        ResultShape::Planning
    } else if obj.contains_key("elements") || obj.contains_key("analysis") {
        ResultShape::Vision
    } else if obj.contains_key("answer") || obj.contains_key("shortcuts") || obj.contains_key("workflow") {
        ResultShape::Specialist
    } else {
        ResultShape::Other
    }
}

/// Signature of a planning result: the type tags of its first 5 declared
/// actions.
fn action_signature(result: &Value) -> String {
    result
        .get("actions")
        .and_then(Value::as_array)
        .map(|actions| {
            actions
                .iter()
                .take(5)
                .map(|a| {
                    a.get("type")
                        .or_else(|| a.get("action_type"))
                        .and_then(Value::as_str)
                        .unwrap_or("unknown")
                        .to_string()
                })
                .collect::<Vec<_>>()
                .join("->")
        })
        .unwrap_or_default()
}
