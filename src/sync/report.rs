//! Structured record of one sync run.
//!
//! The orchestrator never raises past its `run()` contract; every outcome,
//! fatal or per-issue, lands here. The report drives both the operator
//! summary and the process exit code.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::Serialize;

use crate::sync::{compare::Classification, resolve::SyncStrategy};

/// Repository the backend was talking to. Opaque to the sync core.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, derive_new::new)]
pub struct RepoIdentity {
	pub owner: String,
	pub name: String,
}

/// Per-issue line in the report.
#[derive(Clone, Debug, Serialize)]
pub struct ChangeSummary {
	pub issue_id: String,
	pub title: String,
	pub classification: Classification,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub conflicted_fields: Vec<&'static str>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SyncReport {
	pub backend: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub repository: Option<RepoIdentity>,
	pub timestamp: Timestamp,
	pub dry_run: bool,
	pub strategy: SyncStrategy,

	pub issues_needs_push: usize,
	pub issues_needs_pull: usize,
	pub issues_up_to_date: usize,
	pub issues_pushed: usize,
	pub issues_pulled: usize,
	pub conflicts_detected: usize,
	pub conflicts_resolved: usize,
	pub milestones_pushed: usize,
	pub milestones_pulled: usize,

	pub changes: Vec<ChangeSummary>,
	/// Fatal error; set, it overrides any per-issue success.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Per-issue failures that did not abort the run.
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub errors: BTreeMap<String, String>,
}

impl SyncReport {
	pub fn new(backend: impl Into<String>, strategy: SyncStrategy, dry_run: bool) -> Self {
		Self {
			backend: backend.into(),
			repository: None,
			timestamp: Timestamp::now(),
			dry_run,
			strategy,
			issues_needs_push: 0,
			issues_needs_pull: 0,
			issues_up_to_date: 0,
			issues_pushed: 0,
			issues_pulled: 0,
			conflicts_detected: 0,
			conflicts_resolved: 0,
			milestones_pushed: 0,
			milestones_pulled: 0,
			changes: Vec::new(),
			error: None,
			errors: BTreeMap::new(),
		}
	}

	/// A run that died before doing anything useful.
	pub fn failed(backend: impl Into<String>, strategy: SyncStrategy, dry_run: bool, error: impl Into<String>) -> Self {
		let mut report = Self::new(backend, strategy, dry_run);
		report.error = Some(error.into());
		report
	}

	pub fn unresolved_conflicts(&self) -> usize {
		self.conflicts_detected.saturating_sub(self.conflicts_resolved)
	}

	/// 0 success, 1 non-fatal issues (unresolved conflicts or per-issue
	/// failures), 2 fatal.
	pub fn exit_code(&self) -> i32 {
		if self.error.is_some() {
			return 2;
		}
		if self.unresolved_conflicts() > 0 || !self.errors.is_empty() {
			return 1;
		}
		0
	}

	/// Human summary for the terminal.
	pub fn render(&self) -> String {
		let mut out = String::new();
		let mode = if self.dry_run { " (dry run)" } else { "" };
		out.push_str(&format!("sync with {}{mode}\n", self.backend));
		if let Some(error) = &self.error {
			out.push_str(&format!("error: {error}\n"));
			return out;
		}
		out.push_str(&format!(
			"  up to date: {}  pushed: {}  pulled: {}  conflicts: {} ({} resolved)\n",
			self.issues_up_to_date, self.issues_pushed, self.issues_pulled, self.conflicts_detected, self.conflicts_resolved
		));
		if self.milestones_pushed + self.milestones_pulled > 0 {
			out.push_str(&format!("  milestones pushed: {}  pulled: {}\n", self.milestones_pushed, self.milestones_pulled));
		}
		for change in &self.changes {
			if change.classification == Classification::NoChange {
				continue;
			}
			let reason = change.reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default();
			out.push_str(&format!("  {}: {} [{}]{reason}\n", change.issue_id, change.title, change.classification.as_str()));
			if !change.conflicted_fields.is_empty() {
				out.push_str(&format!("    blocked: {} conflict, re-run with --strategy=keep-local or --strategy=keep-remote\n", change.conflicted_fields.join(", ")));
			}
		}
		for (issue_id, message) in &self.errors {
			out.push_str(&format!("  {issue_id}: failed: {message}\n"));
		}
		out
	}
}
