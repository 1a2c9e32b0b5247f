//! Backend-agnostic interface to remote issue trackers.
//!
//! The sync core depends only on this trait; the wire protocol is each
//! backend's business. Remote entities cross the boundary as the closed
//! record types below, converted at the backend — the comparator never sees
//! backend-specific payloads.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use jiff::Timestamp;

use crate::{
	issue::{Issue, Status},
	milestone::Milestone,
};

/// A remote issue, reduced to the fields the sync engine cares about.
/// `status` and `priority` stay raw strings; normalization to enum values is
/// the comparator's job so unnormalizable values surface with context.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoteIssue {
	/// Backend-assigned identifier, in string form (`"42"`, `"gh-42"`, …).
	pub remote_key: String,
	pub title: String,
	pub status: String,
	pub priority: Option<String>,
	pub content: String,
	pub labels: Vec<String>,
	pub assignee: Option<String>,
	pub milestone: Option<String>,
	pub updated_at: Option<Timestamp>,
}

/// A remote milestone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RemoteMilestone {
	pub remote_key: String,
	pub name: String,
	pub description: String,
	pub state: String,
	pub due_date: Option<Timestamp>,
	pub updated_at: Option<Timestamp>,
}

/// Result of pushing an entity: the remote id it now lives under, and
/// whether the push created it. The orchestrator links newly created ids.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PushOutcome {
	pub remote_key: String,
	pub created: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
	#[error("authentication failed: {0}")]
	Auth(String),
	#[error("transport error: {0}")]
	Transport(String),
	#[error("remote entity not found: {0}")]
	NotFound(String),
	#[error("rate limited: {0}")]
	RateLimited(String),
	#[error("remote rejected the payload: {0}")]
	Validation(String),
}

impl From<reqwest::Error> for BackendError {
	fn from(e: reqwest::Error) -> Self {
		BackendError::Transport(e.to_string())
	}
}

/// Capability set every remote tracker must provide.
///
/// `authenticate` is idempotent and may cache its verdict for the duration
/// of a run. `push_issue` decides create-vs-update from the issue's recorded
/// remote id for this backend.
#[async_trait]
pub trait SyncBackend: Send + Sync {
	/// Short identifier used as the key in `remote_ids` (e.g. `gh`).
	fn name(&self) -> &str;

	async fn authenticate(&self) -> Result<bool, BackendError>;

	/// All issues visible to the credentials, keyed by backend-specific key.
	async fn get_issues(&self) -> Result<HashMap<String, RemoteIssue>, BackendError>;

	/// Create or update. Must return the assigned remote id for creations.
	async fn push_issue(&self, issue: &Issue) -> Result<PushOutcome, BackendError>;

	/// Fetch a single remote issue.
	async fn pull_issue(&self, remote_key: &str) -> Result<RemoteIssue, BackendError>;

	/// Fast path for status-only changes.
	async fn update_state(&self, remote_key: &str, state: Status) -> Result<(), BackendError>;

	async fn get_milestones(&self) -> Result<HashMap<String, RemoteMilestone>, BackendError>;

	async fn push_milestone(&self, milestone: &Milestone) -> Result<PushOutcome, BackendError>;
}

pub type BoxedSyncBackend = Arc<dyn SyncBackend>;
