//! Classifies per-issue divergence between local, remote and baseline state.
//!
//! Remote entries arrive keyed by backend-specific ids; before comparing,
//! keys are normalized to local ids through the link index (fast path) with
//! a frontmatter scan as the durability fallback. Entries with no local
//! counterpart keep a synthetic `_remote_<key>` key.

use std::collections::{BTreeMap, HashMap};

use crate::{
	issue::{Issue, Priority, Status},
	sync::{
		backend::RemoteIssue,
		baseline::IssueBaseState,
		links::RemoteLinkIndex,
		merge::{FieldMap, FieldValue, SyncField},
	},
};

/// Prefix for remote entries that matched no local issue.
pub const REMOTE_KEY_PREFIX: &str = "_remote_";

/// How one issue diverged since the last agreed state.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
	NoChange,
	LocalOnly,
	RemoteOnly,
	BothChanged,
	NewLocal,
	NewRemote,
	Deleted,
}

impl Classification {
	pub fn as_str(&self) -> &'static str {
		match self {
			Classification::NoChange => "no_change",
			Classification::LocalOnly => "local_only",
			Classification::RemoteOnly => "remote_only",
			Classification::BothChanged => "both_changed",
			Classification::NewLocal => "new_local",
			Classification::NewRemote => "new_remote",
			Classification::Deleted => "deleted",
		}
	}
}

/// One field's movement relative to baseline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FieldDelta {
	pub from: FieldValue,
	pub to: FieldValue,
}

/// Everything the orchestrator needs to know about one issue's divergence.
#[derive(Clone, Debug)]
pub struct ChangeRecord {
	pub issue_id: String,
	pub title: String,
	pub baseline_state: Option<IssueBaseState>,
	pub local_state: Option<Issue>,
	pub remote_state: Option<RemoteIssue>,
	pub local_changes: BTreeMap<SyncField, FieldDelta>,
	pub remote_changes: BTreeMap<SyncField, FieldDelta>,
	pub classification: Classification,
	/// Extra context for both_changed records (e.g. remote delete vs local edit).
	pub reason: Option<String>,
	/// Titles are display metadata and excluded from sync, but divergence is
	/// still reported informationally: (local, remote).
	pub title_divergence: Option<(String, String)>,
}

impl ChangeRecord {
	pub fn is_conflict(&self) -> bool {
		self.classification == Classification::BothChanged
	}
}

/// Project a local issue onto the sync fields.
pub fn local_field_map(issue: &Issue, fields: &[SyncField]) -> FieldMap {
	let mut map = FieldMap::new();
	for field in fields {
		let value = match field {
			SyncField::Status => FieldValue::Status(issue.status),
			SyncField::Priority => FieldValue::Priority(issue.priority),
			SyncField::Content => FieldValue::text(issue.content.clone()),
			SyncField::Labels => FieldValue::labels(issue.labels.iter().cloned()),
			SyncField::Assignee => FieldValue::opt_text(issue.assignee.clone()),
		};
		map.insert(*field, value);
	}
	map
}

/// Project a remote issue onto the sync fields, normalizing enum strings.
///
/// A status or priority the normalizer does not recognize is kept as the
/// original text, so the resulting mismatch surfaces as a conflict with the
/// offending value in full view instead of being silently coerced.
///
/// A priority the backend does not convey at all is omitted from the map
/// (not `Absent`): the backend simply has nothing to say about that field,
/// which must not read as "cleared remotely". An unassigned assignee, by
/// contrast, is a conveyed value.
pub fn remote_field_map(remote: &RemoteIssue, fields: &[SyncField]) -> FieldMap {
	let mut map = FieldMap::new();
	for field in fields {
		let value = match field {
			SyncField::Status => match Status::normalize(&remote.status) {
				Some(status) => FieldValue::Status(status),
				None => {
					tracing::debug!("[compare] unnormalizable remote status {:?} for {}", remote.status, remote.remote_key);
					FieldValue::text(remote.status.clone())
				}
			},
			SyncField::Priority => match &remote.priority {
				None => continue,
				Some(raw) => match Priority::normalize(raw) {
					Some(priority) => FieldValue::Priority(priority),
					None => {
						tracing::debug!("[compare] unnormalizable remote priority {raw:?} for {}", remote.remote_key);
						FieldValue::text(raw.clone())
					}
				},
			},
			SyncField::Content => FieldValue::text(remote.content.clone()),
			SyncField::Labels => FieldValue::labels(remote.labels.iter().cloned()),
			SyncField::Assignee => FieldValue::opt_text(remote.assignee.clone()),
		};
		map.insert(*field, value);
	}
	map
}

/// Fill fields missing from `map` with their `fallback` values. Used before
/// merging so an unconveyed remote field counts as unchanged, not deleted.
pub fn fill_missing(map: &FieldMap, fallback: &FieldMap, fields: &[SyncField]) -> FieldMap {
	let mut out = map.clone();
	for field in fields {
		if !out.contains_key(field)
			&& let Some(value) = fallback.get(field)
		{
			out.insert(*field, value.clone());
		}
	}
	out
}

fn diff(baseline: &FieldMap, current: &FieldMap, fields: &[SyncField]) -> BTreeMap<SyncField, FieldDelta> {
	let mut changes = BTreeMap::new();
	for field in fields {
		// A field the current side does not carry is not a change.
		let Some(to) = current.get(field) else { continue };
		let from = baseline.get(field).cloned().unwrap_or(FieldValue::Absent);
		if from != *to {
			changes.insert(*field, FieldDelta { from, to: to.clone() });
		}
	}
	changes
}

/// Compares local and remote issue states against the baseline.
#[derive(Clone, Debug)]
pub struct StateComparator {
	backend: String,
	fields_to_sync: Vec<SyncField>,
}

impl StateComparator /*{{{1*/ {
	pub fn new(backend: impl Into<String>) -> Self {
		Self {
			backend: backend.into(),
			fields_to_sync: SyncField::DEFAULT.to_vec(),
		}
	}

	pub fn with_fields(mut self, fields: Vec<SyncField>) -> Self {
		self.fields_to_sync = fields;
		self
	}

	pub fn fields(&self) -> &[SyncField] {
		&self.fields_to_sync
	}

	/// Rekey remote entries by local id.
	///
	/// The link index is consulted first; issues whose frontmatter disagrees
	/// with (or is missing from) the index win. With `reconcile` set the
	/// index is repaired on the spot; dry runs pass false so nothing on disk
	/// moves. Unmatched remote entries keep a `_remote_<key>` key and will
	/// classify as new_remote.
	pub fn normalize_remote_keys(&self, local: &HashMap<String, Issue>, remote: HashMap<String, RemoteIssue>, links: &RemoteLinkIndex, reconcile: bool) -> HashMap<String, RemoteIssue> {
		let mut remote_to_local: HashMap<String, String> = links.all_links_for_backend(&self.backend).into_iter().map(|(local_id, remote_id)| (remote_id, local_id)).collect();

		for (local_id, issue) in local {
			let Some(remote_id) = issue.remote_id(&self.backend) else { continue };
			if remote_to_local.get(remote_id).map(String::as_str) != Some(local_id.as_str()) {
				remote_to_local.insert(remote_id.to_string(), local_id.clone());
				if reconcile
					&& let Err(e) = links.link(&self.backend, remote_id, local_id)
				{
					tracing::warn!("[compare] could not reconcile link {remote_id}->{local_id}: {e}");
				}
			}
		}

		let total = remote.len();
		let mut matched = 0usize;
		let mut normalized = HashMap::with_capacity(total);
		for (remote_key, remote_issue) in remote {
			match remote_to_local.get(&remote_key) {
				Some(local_id) => {
					matched += 1;
					normalized.insert(local_id.clone(), remote_issue);
				}
				None => {
					normalized.insert(format!("{REMOTE_KEY_PREFIX}{remote_key}"), remote_issue);
				}
			}
		}
		tracing::debug!("[compare] normalized {matched}/{total} remote keys for backend {}", self.backend);
		normalized
	}

	/// Build classified change records over the union of local ids,
	/// normalized remote keys, and baseline keys.
	pub fn analyze(&self, local: &HashMap<String, Issue>, remote: &HashMap<String, RemoteIssue>, baseline: &BTreeMap<String, IssueBaseState>) -> Vec<ChangeRecord> {
		let mut ids: Vec<String> = local.keys().chain(remote.keys()).chain(baseline.keys()).cloned().collect();
		ids.sort();
		ids.dedup();

		let mut records = Vec::new();
		for id in ids {
			let local_issue = local.get(&id);
			let remote_issue = remote.get(&id);
			let baseline_state = baseline.get(&id);
			if let Some(record) = self.classify(&id, local_issue, remote_issue, baseline_state) {
				records.push(record);
			}
		}
		records
	}

	fn classify(&self, id: &str, local: Option<&Issue>, remote: Option<&RemoteIssue>, baseline: Option<&IssueBaseState>) -> Option<ChangeRecord> {
		let fields = &self.fields_to_sync;
		let title = local
			.map(|i| i.title.clone())
			.or_else(|| remote.map(|r| r.title.clone()))
			.or_else(|| baseline.map(|b| b.title.clone()))
			.unwrap_or_else(|| "Unknown".to_string());
		let title_divergence = match (local, remote) {
			(Some(l), Some(r)) if l.title != r.title => Some((l.title.clone(), r.title.clone())),
			_ => None,
		};

		let mut record = ChangeRecord {
			issue_id: id.to_string(),
			title,
			baseline_state: baseline.cloned(),
			local_state: local.cloned(),
			remote_state: remote.cloned(),
			local_changes: BTreeMap::new(),
			remote_changes: BTreeMap::new(),
			classification: Classification::NoChange,
			reason: None,
			title_divergence,
		};

		match (local, remote) {
			// Gone from both sides; only the baseline remembers it.
			(None, None) => return None,
			(None, Some(_)) => {
				record.classification = Classification::NewRemote;
			}
			(Some(local_issue), None) => match baseline {
				None => {
					record.classification = Classification::NewLocal;
				}
				Some(base) => {
					let base_map = base.field_map(fields);
					let local_map = local_field_map(local_issue, fields);
					record.local_changes = diff(&base_map, &local_map, fields);
					if record.local_changes.is_empty() {
						record.classification = Classification::Deleted;
					} else {
						record.classification = Classification::BothChanged;
						record.reason = Some("remote deleted vs local edit".to_string());
					}
				}
			},
			(Some(local_issue), Some(remote_issue)) => match baseline {
				None => {
					// First sync for this pair. Conservative: identical
					// (status, title) is the only thing we accept as clean.
					let local_status = FieldValue::Status(local_issue.status);
					let remote_status = match Status::normalize(&remote_issue.status) {
						Some(s) => FieldValue::Status(s),
						None => FieldValue::text(remote_issue.status.to_lowercase()),
					};
					if local_status == remote_status && local_issue.title == remote_issue.title {
						record.classification = Classification::NoChange;
					} else {
						let local_map = local_field_map(local_issue, fields);
						let remote_map = remote_field_map(remote_issue, fields);
						let empty = FieldMap::new();
						record.local_changes = diff(&empty, &local_map, fields);
						record.remote_changes = diff(&empty, &remote_map, fields);
						record.classification = Classification::BothChanged;
						record.reason = Some("first sync with diverged sides".to_string());
					}
				}
				Some(base) => {
					let base_map = base.field_map(fields);
					let local_map = local_field_map(local_issue, fields);
					let remote_map = remote_field_map(remote_issue, fields);
					record.local_changes = diff(&base_map, &local_map, fields);
					record.remote_changes = diff(&base_map, &remote_map, fields);
					record.classification = match (record.local_changes.is_empty(), record.remote_changes.is_empty()) {
						(true, true) => Classification::NoChange,
						(false, true) => Classification::LocalOnly,
						(true, false) => Classification::RemoteOnly,
						(false, false) => Classification::BothChanged,
					};
				}
			},
		}

		Some(record)
	}
}
//,}}}1
