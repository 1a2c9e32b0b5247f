//! Core issue domain types.
//!
//! Issues are the unit of work tracked by the store and synchronized with
//! remote backends. Enumerations here are closed sets; strings coming from
//! remote trackers are normalized through [`Status::normalize`] and
//! [`Priority::normalize`], while unknown values in local files are a
//! validation error.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Upper bound on issue titles and milestone names.
pub const MAX_TITLE_LEN: usize = 200;
/// Upper bound on a single label.
pub const MAX_LABEL_LEN: usize = 50;

/// Validation failures for locally authored entities.
#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum ValidationError {
	#[error("{field} must not be empty")]
	Empty { field: &'static str },
	#[error("{field} exceeds {max} characters (got {got})")]
	TooLong { field: &'static str, max: usize, got: usize },
	#[error("invalid {field} {got:?}: valid values are {valid}")]
	InvalidEnum { field: &'static str, got: String, valid: String },
}

/// Workflow state of an issue.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
	#[default]
	#[display("todo")]
	Todo,
	#[display("in-progress")]
	InProgress,
	#[display("blocked")]
	Blocked,
	#[display("review")]
	Review,
	#[display("closed")]
	Closed,
	#[display("archived")]
	Archived,
}

impl Status /*{{{1*/ {
	pub const ALL: [Status; 6] = [Status::Todo, Status::InProgress, Status::Blocked, Status::Review, Status::Closed, Status::Archived];

	/// Canonical kebab-case form, as stored in frontmatter.
	pub fn as_str(&self) -> &'static str {
		match self {
			Status::Todo => "todo",
			Status::InProgress => "in-progress",
			Status::Blocked => "blocked",
			Status::Review => "review",
			Status::Closed => "closed",
			Status::Archived => "archived",
		}
	}

	/// Parse the canonical form only. Used for local files, where unknown
	/// values are a validation error rather than something to paper over.
	pub fn from_canonical(s: &str) -> Option<Self> {
		Self::ALL.iter().copied().find(|v| v.as_str() == s)
	}

	/// Normalize a status string received from a remote backend.
	///
	/// Tried case-sensitive first, then lowercased, then common synonyms
	/// are collapsed. Returns None when the value cannot be normalized;
	/// the caller decides whether to keep the original or fall back.
	pub fn normalize(s: &str) -> Option<Self> {
		if let Some(v) = Self::from_canonical(s) {
			return Some(v);
		}
		let lower = s.trim().to_lowercase();
		if let Some(v) = Self::from_canonical(&lower) {
			return Some(v);
		}
		match lower.as_str() {
			"done" | "completed" | "resolved" => Some(Status::Closed),
			"in progress" | "in_progress" | "active" | "started" => Some(Status::InProgress),
			"on_hold" | "on hold" | "paused" => Some(Status::Blocked),
			_ => None,
		}
	}

	/// Comma-separated list of valid values, for error messages.
	pub fn valid_values() -> String {
		Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
	}
}
//,}}}1

/// Priority of an issue.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "kebab-case")]
pub enum Priority {
	#[display("low")]
	Low,
	#[default]
	#[display("medium")]
	Medium,
	#[display("high")]
	High,
	#[display("critical")]
	Critical,
}

impl Priority /*{{{1*/ {
	pub const ALL: [Priority; 4] = [Priority::Low, Priority::Medium, Priority::High, Priority::Critical];

	pub fn as_str(&self) -> &'static str {
		match self {
			Priority::Low => "low",
			Priority::Medium => "medium",
			Priority::High => "high",
			Priority::Critical => "critical",
		}
	}

	pub fn from_canonical(s: &str) -> Option<Self> {
		Self::ALL.iter().copied().find(|v| v.as_str() == s)
	}

	/// Normalize a priority string from a remote: exact match, then lowercase.
	pub fn normalize(s: &str) -> Option<Self> {
		Self::from_canonical(s).or_else(|| Self::from_canonical(&s.trim().to_lowercase()))
	}

	pub fn valid_values() -> String {
		Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
	}
}
//,}}}1

/// Kind of work item.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
	#[display("bug")]
	Bug,
	#[display("feature")]
	Feature,
	#[default]
	#[display("other")]
	Other,
}

impl IssueType /*{{{1*/ {
	pub const ALL: [IssueType; 3] = [IssueType::Bug, IssueType::Feature, IssueType::Other];

	pub fn as_str(&self) -> &'static str {
		match self {
			IssueType::Bug => "bug",
			IssueType::Feature => "feature",
			IssueType::Other => "other",
		}
	}

	pub fn from_canonical(s: &str) -> Option<Self> {
		Self::ALL.iter().copied().find(|v| v.as_str() == s)
	}

	pub fn valid_values() -> String {
		Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
	}
}
//,}}}1

/// Per-backend bookkeeping recorded after each successful sync.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SyncMetadata {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_synced: Option<Timestamp>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub remote_updated: Option<Timestamp>,
}

/// A local-only comment on an issue. Comments are persisted in frontmatter
/// but never synchronized.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Comment {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub author: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub created: Option<Timestamp>,
	pub body: String,
}

/// A work item tracked by the store.
///
/// `id` is the store-owned identifier and is never exposed to backends;
/// cross-system linkage lives in `remote_ids` (durable record) and the
/// remote-link index (fast path).
#[derive(Clone, Debug, PartialEq)]
pub struct Issue {
	pub id: String,
	pub title: String,
	pub headline: Option<String>,
	pub content: String,
	pub status: Status,
	pub priority: Priority,
	pub issue_type: IssueType,
	pub assignee: Option<String>,
	pub milestone: Option<String>,
	pub labels: Vec<String>,
	pub estimated_hours: Option<f64>,
	pub progress_percentage: Option<u8>,
	pub created: Timestamp,
	pub updated: Timestamp,
	pub due_date: Option<Timestamp>,
	pub actual_start_date: Option<Timestamp>,
	pub actual_end_date: Option<Timestamp>,
	pub depends_on: Vec<String>,
	pub blocks: Vec<String>,
	pub comments: Vec<Comment>,
	pub remote_ids: BTreeMap<String, String>,
	pub sync_metadata: BTreeMap<String, SyncMetadata>,
}

impl Issue /*{{{1*/ {
	/// Create a new issue with a fresh local id and current timestamps.
	pub fn new(title: impl Into<String>) -> Result<Self, ValidationError> {
		let title = title.into();
		let now = Timestamp::now();
		let issue = Self {
			id: generate_local_id(),
			title,
			headline: None,
			content: String::new(),
			status: Status::default(),
			priority: Priority::default(),
			issue_type: IssueType::default(),
			assignee: None,
			milestone: None,
			labels: Vec::new(),
			estimated_hours: None,
			progress_percentage: None,
			created: now,
			updated: now,
			due_date: None,
			actual_start_date: None,
			actual_end_date: None,
			depends_on: Vec::new(),
			blocks: Vec::new(),
			comments: Vec::new(),
			remote_ids: BTreeMap::new(),
			sync_metadata: BTreeMap::new(),
		};
		issue.validate()?;
		Ok(issue)
	}

	/// Check the invariants constructors enforce. Also run on every load so
	/// hand-edited files cannot smuggle invalid entities into a sync run.
	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.title.trim().is_empty() {
			return Err(ValidationError::Empty { field: "title" });
		}
		if self.title.chars().count() > MAX_TITLE_LEN {
			return Err(ValidationError::TooLong {
				field: "title",
				max: MAX_TITLE_LEN,
				got: self.title.chars().count(),
			});
		}
		for label in &self.labels {
			if label.chars().count() > MAX_LABEL_LEN {
				return Err(ValidationError::TooLong {
					field: "label",
					max: MAX_LABEL_LEN,
					got: label.chars().count(),
				});
			}
		}
		Ok(())
	}

	/// Remote id assigned by the given backend, if linked.
	pub fn remote_id(&self, backend: &str) -> Option<&str> {
		self.remote_ids.get(backend).map(String::as_str)
	}

	/// Record a remote link and the sync bookkeeping for a backend.
	pub fn record_sync(&mut self, backend: &str, remote_id: impl Into<String>, remote_updated: Option<Timestamp>) {
		self.remote_ids.insert(backend.to_string(), remote_id.into());
		self.sync_metadata.insert(backend.to_string(), SyncMetadata {
			last_synced: Some(Timestamp::now()),
			remote_updated,
		});
	}

	/// Mark the entity as touched now.
	pub fn touch(&mut self) {
		self.updated = Timestamp::now();
	}
}
//,}}}1

/// Generate a fresh local id: the first 8 hex chars of a v4 UUID.
/// Short enough for filenames, unique enough for a single store.
pub fn generate_local_id() -> String {
	uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Canonical form for label comparison: sorted and duplicate-free.
/// Sync equality of label sets is permutation- and duplicate-insensitive.
pub fn canonical_labels<I, S>(labels: I) -> Vec<String>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut out: Vec<String> = labels.into_iter().map(Into::into).collect();
	out.sort();
	out.dedup();
	out
}

/// Parse a timestamp leniently.
///
/// Accepts full ISO-8601 instants (trailing `Z` or explicit offset); strings
/// without zone information are assumed UTC. Anything else yields None.
pub fn parse_timestamp(value: &str) -> Option<Timestamp> {
	let s = value.trim();
	if s.is_empty() {
		return None;
	}
	if let Ok(ts) = s.parse::<Timestamp>() {
		return Some(ts);
	}
	if let Ok(dt) = s.parse::<jiff::civil::DateTime>() {
		return dt.to_zoned(jiff::tz::TimeZone::UTC).ok().map(|z| z.timestamp());
	}
	if let Ok(date) = s.parse::<jiff::civil::Date>() {
		return date.to_zoned(jiff::tz::TimeZone::UTC).ok().map(|z| z.timestamp());
	}
	None
}
