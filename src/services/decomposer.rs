//! Subtask decomposition: turning a natural-language goal into an ordered
//! batch of subtasks.
//!
//! Three paths, in order of preference: fast pattern rules for common
//! intents, an opaque decomposition worker reached over the bus, and a
//! heuristic conjunction split. The result is never empty and the
//! decomposer never fails for a well-formed goal; every internal failure
//! falls through to the next path.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::models::{
    ActionDescriptor, Approach, Subtask, SubtaskContext, WorkerFamily,
};
use crate::infrastructure::bus::BusClient;

/// How long to wait for the decomposition worker before falling back.
const WORKER_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy)]
enum PatternKind {
    OpenApp,
    Search,
    CreateDocument,
}

struct PatternRule {
    regex: Regex,
    kind: PatternKind,
}

/// Flat subtask spec as returned by the decomposition worker. Dependencies
/// are 0-based indices into the same response.
#[derive(Debug, Deserialize)]
struct WorkerSubtaskSpec {
    description: String,
    #[serde(default)]
    approach: Option<String>,
    #[serde(default)]
    dependencies: Vec<usize>,
    #[serde(default)]
    can_parallel: bool,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// One step of an action-level decomposition.
#[derive(Debug, Deserialize)]
struct WorkerActionStep {
    description: String,
    #[serde(default)]
    approach: Option<String>,
    action: ActionDescriptor,
    #[serde(default)]
    wait_after_ms: u64,
}

/// Goal decomposition service.
pub struct SubtaskDecomposer {
    patterns: Vec<PatternRule>,
    splitter: Regex,
    client: Option<Arc<BusClient>>,
}

impl SubtaskDecomposer {
    /// Build a decomposer without a worker; only the pattern and heuristic
    /// paths are available.
    pub fn new() -> Self {
        Self {
            patterns: build_patterns(),
            splitter: Regex::new(r"\s+and\s+|\s+then\s+|,").expect("static split pattern"),
            client: None,
        }
    }

    /// Attach a bus client so the worker-assisted path can be used.
    pub fn with_client(mut self, client: Arc<BusClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Decompose a goal into an ordered subtask batch. Never empty.
    pub async fn decompose(&self, goal: &str, context: &Value) -> Vec<Subtask> {
        if let Some(subtasks) = self.try_patterns(goal) {
            debug!(count = subtasks.len(), "Goal matched a decomposition pattern");
            return subtasks;
        }

        if let Some(subtasks) = self.worker_decompose(goal, context).await {
            debug!(count = subtasks.len(), "Worker decomposed the goal");
            return subtasks;
        }

        self.heuristic_split(goal)
    }

    /// Like [`decompose`](Self::decompose), but asks the worker for one
    /// concrete low-level action per step, stored in each subtask's
    /// context. Falls back to the heuristic split when the worker is
    /// unavailable or its answer does not parse.
    pub async fn decompose_with_actions(&self, goal: &str, context: &Value) -> Vec<Subtask> {
        let Some(ref client) = self.client else {
            return self.heuristic_split(goal);
        };

        let params = json!({
            "goal": goal,
            "context": context,
            "include_actions": true,
        });
        let result = client
            .call(WorkerFamily::Decomposition, params, Some(WORKER_TIMEOUT))
            .await;

        if !result.success {
            warn!(
                error = result.error.as_deref().unwrap_or("unknown"),
                "Action-level decomposition failed; using heuristic split"
            );
            return self.heuristic_split(goal);
        }

        let steps: Vec<WorkerActionStep> = match result
            .result
            .get("steps")
            .cloned()
            .map(serde_json::from_value)
        {
            Some(Ok(steps)) => steps,
            _ => {
                warn!("Unparseable action-level decomposition; using heuristic split");
                return self.heuristic_split(goal);
            }
        };

        if steps.is_empty() {
            return self.heuristic_split(goal);
        }

        let mut subtasks: Vec<Subtask> = Vec::with_capacity(steps.len());
        for (i, step) in steps.into_iter().enumerate() {
            let approach = step
                .approach
                .as_deref()
                .and_then(Approach::from_str)
                .unwrap_or_else(|| classify_approach(&step.description));
            #[allow(clippy::cast_possible_truncation)]
            let mut subtask = Subtask::new(step.description, approach, i as u32).with_context(
                SubtaskContext::Input {
                    action: step.action,
                    post_action_wait_ms: step.wait_after_ms,
                },
            );
            if let Some(prev) = subtasks.last() {
                subtask.dependencies = vec![prev.id];
            }
            subtasks.push(subtask);
        }
        subtasks
    }

    fn try_patterns(&self, goal: &str) -> Option<Vec<Subtask>> {
        let goal = goal.trim();
        for rule in &self.patterns {
            if let Some(caps) = rule.regex.captures(goal) {
                let arg = caps.get(1).map(|m| m.as_str().trim().to_string())?;
                if arg.is_empty() {
                    continue;
                }
                return Some(match rule.kind {
                    PatternKind::OpenApp => expand_open_app(&arg),
                    PatternKind::Search => expand_search(&arg),
                    PatternKind::CreateDocument => expand_create_document(&arg),
                });
            }
        }
        None
    }

    async fn worker_decompose(&self, goal: &str, context: &Value) -> Option<Vec<Subtask>> {
        let client = self.client.as_ref()?;

        let params = json!({"goal": goal, "context": context});
        let result = client
            .call(WorkerFamily::Decomposition, params, Some(WORKER_TIMEOUT))
            .await;

        if !result.success {
            warn!(
                error = result.error.as_deref().unwrap_or("unknown"),
                "Decomposition worker failed; falling back"
            );
            return None;
        }

        let specs: Vec<WorkerSubtaskSpec> = match result
            .result
            .get("subtasks")
            .cloned()
            .map(serde_json::from_value)
        {
            Some(Ok(specs)) => specs,
            _ => {
                warn!("Unparseable decomposition response; falling back");
                return None;
            }
        };

        if specs.is_empty() {
            return None;
        }

        // Rewrite 0-based response indices into generated ids, preserving
        // response order
        let ids: Vec<Uuid> = specs.iter().map(|_| Uuid::new_v4()).collect();
        let subtasks = specs
            .into_iter()
            .enumerate()
            .map(|(i, spec)| {
                let approach = spec
                    .approach
                    .as_deref()
                    .and_then(Approach::from_str)
                    .unwrap_or_else(|| classify_approach(&spec.description));
                #[allow(clippy::cast_possible_truncation)]
                let order = i as u32;
                Subtask {
                    id: ids[i],
                    description: spec.description,
                    approach,
                    dependencies: spec
                        .dependencies
                        .iter()
                        .filter(|&&d| d < ids.len() && d != i)
                        .map(|&d| ids[d])
                        .collect(),
                    can_parallel: spec.can_parallel,
                    timeout: spec.timeout_secs.map(Duration::from_secs),
                    context: SubtaskContext::Empty,
                    order,
                }
            })
            .collect();

        Some(subtasks)
    }

    /// Last-resort path: split the goal on conjunctions, classify each
    /// fragment by keyword, and chain each fragment to the previous one.
    /// A goal that yields no fragments becomes one orchestrator subtask.
    fn heuristic_split(&self, goal: &str) -> Vec<Subtask> {
        let fragments: Vec<&str> = self
            .splitter
            .split(goal)
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();

        if fragments.is_empty() {
            return vec![Subtask::new(goal.trim(), Approach::Orchestrator, 0)];
        }

        let mut subtasks: Vec<Subtask> = Vec::with_capacity(fragments.len());
        for (i, fragment) in fragments.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let mut subtask =
                Subtask::new(*fragment, classify_approach(fragment), i as u32);
            if let Some(prev) = subtasks.last() {
                subtask.dependencies = vec![prev.id];
            }
            subtasks.push(subtask);
        }
        subtasks
    }
}

impl Default for SubtaskDecomposer {
    fn default() -> Self {
        Self::new()
    }
}

fn build_patterns() -> Vec<PatternRule> {
    let rules = [
        (r"(?i)^(?:open|launch|start)\s+(?:the\s+)?(.+)$", PatternKind::OpenApp),
        (
            r"(?i)^(?:search(?:\s+for)?|google)\s+(.+)$",
            PatternKind::Search,
        ),
        (
            r"(?i)^create\s+(?:a\s+|new\s+)*(\w+)\s+document$",
            PatternKind::CreateDocument,
        ),
    ];

    rules
        .into_iter()
        .map(|(pattern, kind)| PatternRule {
            regex: Regex::new(pattern).expect("static intent pattern"),
            kind,
        })
        .collect()
}

/// Classify a goal fragment by keyword.
fn classify_approach(fragment: &str) -> Approach {
    let lower = fragment.to_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if has(&["click", "drag", "scroll"]) {
        Approach::Mouse
    } else if has(&["type", "press", "ctrl"]) {
        Approach::Keyboard
    } else if has(&["check", "verify", "read"]) {
        Approach::Vision
    } else if has(&["how to", "shortcut for"]) {
        Approach::Specialist
    } else {
        Approach::Orchestrator
    }
}

/// Chain builder: each produced step depends on the one before it.
fn chained(steps: Vec<Subtask>) -> Vec<Subtask> {
    let mut out: Vec<Subtask> = Vec::with_capacity(steps.len());
    for mut step in steps {
        if let Some(prev) = out.last() {
            step.dependencies = vec![prev.id];
        }
        out.push(step);
    }
    out
}

fn press_keys(description: &str, keys: &[&str], order: u32, wait_ms: u64) -> Subtask {
    Subtask::new(description, Approach::Keyboard, order).with_context(SubtaskContext::Input {
        action: ActionDescriptor::new("press_keys", json!({ "keys": keys })),
        post_action_wait_ms: wait_ms,
    })
}

fn type_text(description: &str, text: &str, order: u32) -> Subtask {
    Subtask::new(description, Approach::Keyboard, order).with_context(SubtaskContext::Input {
        action: ActionDescriptor::new("type_text", json!({ "text": text })),
        post_action_wait_ms: 100,
    })
}

/// "open <app>": run dialog, app name, enter, then a vision check that the
/// window actually appeared.
fn expand_open_app(app: &str) -> Vec<Subtask> {
    chained(vec![
        press_keys("Open the run dialog", &["meta", "r"], 0, 500),
        type_text(&format!("Type the application name '{app}'"), app, 1),
        press_keys("Confirm with Enter", &["enter"], 2, 1500),
        Subtask::new(
            format!("Verify that '{app}' is open"),
            Approach::Vision,
            3,
        )
        .with_context(SubtaskContext::Vision {
            target: app.to_string(),
        }),
    ])
}

/// "search <query>": browser, query, enter, result check.
fn expand_search(query: &str) -> Vec<Subtask> {
    chained(vec![
        Subtask::new("Open the default browser", Approach::Hybrid, 0).with_context(
            SubtaskContext::Input {
                action: ActionDescriptor::new("launch_app", json!({"app": "browser"})),
                post_action_wait_ms: 2000,
            },
        ),
        type_text(&format!("Type the search query '{query}'"), query, 1),
        press_keys("Submit the search", &["enter"], 2, 1500),
        Subtask::new(
            format!("Verify search results for '{query}'"),
            Approach::Vision,
            3,
        )
        .with_context(SubtaskContext::Vision {
            target: "search results".to_string(),
        }),
    ])
}

/// "create <type> document": suitable editor, new-document shortcut, check.
fn expand_create_document(doc_type: &str) -> Vec<Subtask> {
    let app = match doc_type.to_lowercase().as_str() {
        "word" | "text" => "word",
        "excel" | "spreadsheet" => "excel",
        "powerpoint" | "presentation" => "powerpoint",
        _ => "word",
    };

    chained(vec![
        Subtask::new(format!("Open {app}"), Approach::Hybrid, 0).with_context(
            SubtaskContext::Input {
                action: ActionDescriptor::new("launch_app", json!({ "app": app })),
                post_action_wait_ms: 2000,
            },
        ),
        press_keys("Create a new document", &["ctrl", "n"], 1, 1000),
        Subtask::new(
            format!("Verify a blank {doc_type} document is open"),
            Approach::Vision,
            2,
        )
        .with_context(SubtaskContext::Vision {
            target: format!("{doc_type} document"),
        }),
    ])
}
