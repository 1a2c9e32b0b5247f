//! Baseline store: the last state both sides agreed on, per backend.
//!
//! One JSON document per backend at `.roadmap/.sync-state.<backend>.json`,
//! written through the same temp-file-and-rename mechanics as entity saves.
//! A corrupted or missing file means "no baseline yet": sync proceeds and
//! every changed field reports as new relative to baseline.

use std::{
	collections::BTreeMap,
	path::{Path, PathBuf},
};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{
	issue::{Issue, Priority, Status, canonical_labels},
	persistence::frontmatter::atomic_write,
	sync::merge::{FieldMap, FieldValue, SyncField},
};

/// Snapshot of one issue at the last successful sync with a backend.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct IssueBaseState {
	pub issue_id: String,
	pub title: String,
	pub status: Status,
	pub priority: Priority,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub assignee: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub milestone: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub headline: Option<String>,
	pub content: String,
	/// Canonical form: sorted, duplicate-free.
	pub labels: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub updated_at: Option<Timestamp>,
}

impl IssueBaseState {
	/// Capture the current local entity as the agreed state.
	pub fn of_issue(issue: &Issue) -> Self {
		Self {
			issue_id: issue.id.clone(),
			title: issue.title.clone(),
			status: issue.status,
			priority: issue.priority,
			assignee: issue.assignee.clone(),
			milestone: issue.milestone.clone(),
			headline: issue.headline.clone(),
			content: issue.content.clone(),
			labels: canonical_labels(issue.labels.iter().cloned()),
			updated_at: Some(issue.updated),
		}
	}

	/// Project onto the sync fields for three-way comparison.
	pub fn field_map(&self, fields: &[SyncField]) -> FieldMap {
		let mut map = FieldMap::new();
		for field in fields {
			let value = match field {
				SyncField::Status => FieldValue::Status(self.status),
				SyncField::Priority => FieldValue::Priority(self.priority),
				SyncField::Content => FieldValue::text(self.content.clone()),
				SyncField::Labels => FieldValue::Labels(self.labels.clone()),
				SyncField::Assignee => FieldValue::opt_text(self.assignee.clone()),
			};
			map.insert(*field, value);
		}
		map
	}
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct BaselineFile {
	backend: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	last_sync: Option<Timestamp>,
	#[serde(default)]
	issues: BTreeMap<String, IssueBaseState>,
}

/// Persisted baselines for one backend.
#[derive(Clone, Debug)]
pub struct BaselineStore {
	path: PathBuf,
	backend: String,
}

impl BaselineStore {
	pub fn new(path: impl Into<PathBuf>, backend: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			backend: backend.into(),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Load all baselines. Missing or corrupted files are an empty baseline.
	pub fn load(&self) -> BTreeMap<String, IssueBaseState> {
		match std::fs::read_to_string(&self.path) {
			Ok(content) => match serde_json::from_str::<BaselineFile>(&content) {
				Ok(file) => file.issues,
				Err(e) => {
					tracing::warn!("[baseline] corrupted baseline {}: {e}; treating as no baseline", self.path.display());
					BTreeMap::new()
				}
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
			Err(e) => {
				tracing::warn!("[baseline] could not read {}: {e}; treating as no baseline", self.path.display());
				BTreeMap::new()
			}
		}
	}

	/// Replace the whole baseline document atomically.
	pub fn save(&self, issues: &BTreeMap<String, IssueBaseState>) -> std::io::Result<()> {
		let file = BaselineFile {
			backend: self.backend.clone(),
			last_sync: Some(Timestamp::now()),
			issues: issues.clone(),
		};
		let json = serde_json::to_string_pretty(&file).expect("baseline serializes");
		atomic_write(&self.path, &json)
	}

	/// Advance the baseline for a single issue.
	pub fn update(&self, state: IssueBaseState) -> std::io::Result<()> {
		let mut issues = self.load();
		issues.insert(state.issue_id.clone(), state);
		self.save(&issues)
	}

	/// Retire a single issue's baseline entry (e.g. after accepting a
	/// remote deletion).
	pub fn remove(&self, issue_id: &str) -> std::io::Result<()> {
		let mut issues = self.load();
		if issues.remove(issue_id).is_some() {
			self.save(&issues)?;
		}
		Ok(())
	}

	/// Drop all baselines for this backend.
	pub fn clear(&self) -> std::io::Result<()> {
		match std::fs::remove_file(&self.path) {
			Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
			_ => Ok(()),
		}
	}
}
