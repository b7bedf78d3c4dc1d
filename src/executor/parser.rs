//! Structured-output parsing from the agent's raw text.
//!
//! The agent is prompted to emit tags the engine can locate anywhere in its
//! output:
//! - `<task-complete>ID</task-complete>` — the completion marker
//! - `<criterion n="1" status="pass"/>` — one per acceptance criterion
//! - `<summary>...</summary>`, `<decision>...</decision>`
//! - `<file action="added|modified|deleted">path</file>`
//! - `<tests passed="12" failed="0"/>`, `<usage tokens="4200" cost="0.18"/>`
//! - `<validation>pass|fail</validation>` — verdict of the secondary pass

use regex::Regex;
use std::sync::LazyLock;

use crate::plan::{CriterionStatus, FileChangeSummary, TestCounts, UsageStats};

static TASK_COMPLETE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<task-complete>\s*(.*?)\s*</task-complete>").unwrap());

static CRITERION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<criterion\s+n="(\d+)"\s+status="(pass|fail)"\s*/>"#).unwrap());

static SUMMARY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<summary>\s*(.*?)\s*</summary>").unwrap());

static FILE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<file\s+action="(added|modified|deleted)">\s*(.*?)\s*</file>"#).unwrap()
});

static DECISION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<decision>\s*(.*?)\s*</decision>").unwrap());

static TESTS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<tests\s+passed="(\d+)"\s+failed="(\d+)"\s*/>"#).unwrap());

static USAGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<usage\s+tokens="(\d+)"\s+cost="([0-9]+(?:\.[0-9]+)?)"\s*/>"#).unwrap()
});

static VALIDATION_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<validation>\s*(pass|fail)\s*</validation>").unwrap());

/// Everything the engine could extract from one attempt's raw output.
#[derive(Debug, Clone, Default)]
pub struct ParsedTaskOutput {
    /// The ID inside the completion marker, if one was found.
    pub completed_task: Option<String>,
    /// Per-criterion verdicts, in reported order.
    pub criteria: Vec<CriterionStatus>,
    /// Agent-reported summary of the work.
    pub summary: Option<String>,
    /// Files the agent reported touching.
    pub files_changed: FileChangeSummary,
    /// Key decisions the agent recorded.
    pub decisions: Vec<String>,
    /// Test counts, if reported.
    pub tests: TestCounts,
    /// Token/cost usage, if reported.
    pub usage: UsageStats,
}

impl ParsedTaskOutput {
    /// Whether the completion marker for the given task is present.
    pub fn completes(&self, task_id: &str) -> bool {
        self.completed_task.as_deref() == Some(task_id)
    }

    /// Criteria the agent reported as failing, by 1-based index.
    pub fn failed_criteria(&self) -> Vec<usize> {
        self.criteria
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.index)
            .collect()
    }
}

/// Extract all structured fields from the agent's raw output.
pub fn parse_task_output(text: &str) -> ParsedTaskOutput {
    let mut parsed = ParsedTaskOutput::default();

    // The last marker wins: the agent may restate the contract while working.
    for cap in TASK_COMPLETE_REGEX.captures_iter(text) {
        if let Some(id) = cap.get(1) {
            let id = id.as_str().trim();
            if !id.is_empty() {
                parsed.completed_task = Some(id.to_string());
            }
        }
    }

    for cap in CRITERION_REGEX.captures_iter(text) {
        let (Some(index), Some(status)) = (cap.get(1), cap.get(2)) else {
            continue;
        };
        if let Ok(index) = index.as_str().parse::<usize>() {
            parsed.criteria.push(CriterionStatus {
                index,
                passed: status.as_str() == "pass",
            });
        }
    }

    if let Some(cap) = SUMMARY_REGEX.captures(text) {
        let summary = cap[1].trim();
        if !summary.is_empty() {
            parsed.summary = Some(summary.to_string());
        }
    }

    for cap in FILE_REGEX.captures_iter(text) {
        let path = cap[2].trim().to_string();
        if path.is_empty() {
            continue;
        }
        match &cap[1] {
            "added" => parsed.files_changed.files_added.push(path),
            "modified" => parsed.files_changed.files_modified.push(path),
            "deleted" => parsed.files_changed.files_deleted.push(path),
            _ => {}
        }
    }

    for cap in DECISION_REGEX.captures_iter(text) {
        let decision = cap[1].trim();
        if !decision.is_empty() {
            parsed.decisions.push(decision.to_string());
        }
    }

    if let Some(cap) = TESTS_REGEX.captures(text) {
        parsed.tests = TestCounts {
            passed: cap[1].parse().unwrap_or(0),
            failed: cap[2].parse().unwrap_or(0),
        };
    }

    if let Some(cap) = USAGE_REGEX.captures(text) {
        parsed.usage = UsageStats {
            tokens: cap[1].parse().unwrap_or(0),
            cost_usd: cap[2].parse().unwrap_or(0.0),
        };
    }

    parsed
}

/// Extract the secondary validator's verdict. None when absent, which the
/// caller treats as a validator failure (no recognizable verdict).
pub fn parse_validation_verdict(text: &str) -> Option<bool> {
    VALIDATION_REGEX
        .captures(text)
        .map(|cap| &cap[1] == "pass")
}
