//! Drives one sync run.
//!
//! A run is a fixed pipeline: authenticate, enumerate, compare, resolve,
//! apply, persist baseline, report. Stages are barriers with cancellation
//! points between them. Within the apply stage independent issues proceed
//! in parallel up to the worker cap, but everything touching one issue
//! happens inside its own serial section: compare, resolve, apply, and the
//! baseline write for that issue. The baseline row lands on disk before the
//! issue's section reports success, so a run killed mid-apply leaves every
//! completed issue already converged and the rest untouched.
//!
//! `run()` never raises: every outcome, fatal or per-issue, is encoded in
//! the returned report.

use std::{
	collections::BTreeMap,
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, Ordering},
	},
};

use futures::StreamExt;

use crate::{
	issue::{Issue, Priority, Status},
	metrics::{MetricsRecorder, NoopMetrics},
	milestone::{Milestone, MilestoneStatus},
	persistence::{
		lock::LockError,
		store::{RoadmapStore, StoreError},
	},
	sync::{
		backend::{BoxedSyncBackend, RemoteIssue},
		baseline::{BaselineStore, IssueBaseState},
		compare::{ChangeRecord, Classification, StateComparator, fill_missing, local_field_map, remote_field_map},
		links::RemoteLinkIndex,
		merge::{FieldMap, FieldValue, SyncField, merge_issue},
		report::{ChangeSummary, RepoIdentity, SyncReport},
		resolve::{Conflict, ConflictField, ConflictResolver, Resolution, Side, SyncStrategy},
	},
};

/// Default upper bound on concurrently applied issues.
pub const DEFAULT_WORKERS: usize = 4;

/// Caller-selected knobs for one run.
#[derive(Clone, Copy, Debug, Default)]
pub struct SyncOptions {
	/// Skip the apply and baseline stages; still produce the full report.
	pub dry_run: bool,
	pub strategy: SyncStrategy,
	pub include_archived: bool,
}

/// Cooperative cancellation, threaded from the top-level command.
/// Guaranteed to take effect at stage boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// What one issue's apply section did.
#[derive(Debug, Default)]
struct ApplyOutcome {
	pushed: bool,
	pulled: bool,
	/// New agreed state; None leaves the stored baseline untouched.
	baseline: Option<IssueBaseState>,
	/// Retire this issue's baseline entry (remote deletion accepted).
	drop_baseline: bool,
}

#[derive(Debug)]
struct ApplyError {
	message: String,
	lock_timeout: bool,
}

impl From<StoreError> for ApplyError {
	fn from(e: StoreError) -> Self {
		Self {
			lock_timeout: matches!(e, StoreError::Lock(LockError::Timeout { .. })),
			message: e.to_string(),
		}
	}
}

impl From<crate::sync::backend::BackendError> for ApplyError {
	fn from(e: crate::sync::backend::BackendError) -> Self {
		Self {
			message: e.to_string(),
			lock_timeout: false,
		}
	}
}

/// Per-record plan coming out of the resolve stage.
#[derive(Debug)]
enum Plan {
	/// No I/O; advance the baseline to the current value.
	Noop,
	Push,
	PullCreate,
	PullUpdate,
	/// Both changed; apply this merged result to whichever sides diverge.
	ApplyMerged(Resolution),
	/// Remote deleted, local unmodified (or deletion accepted): archive.
	Retire,
	/// Remote deleted vs local edit, resolved towards local: recreate remotely.
	Recreate,
	/// Unresolved conflict; leave both sides alone.
	Skip { conflicted: Vec<SyncField> },
}

pub struct SyncOrchestrator {
	backend: BoxedSyncBackend,
	store: Arc<RoadmapStore>,
	links: Arc<RemoteLinkIndex>,
	comparator: StateComparator,
	resolver: ConflictResolver,
	metrics: Arc<dyn MetricsRecorder>,
	workers: usize,
	cancel: CancelToken,
	repository: Option<RepoIdentity>,
}

impl SyncOrchestrator /*{{{1*/ {
	pub fn new(backend: BoxedSyncBackend, store: Arc<RoadmapStore>) -> Self {
		let links = Arc::new(RemoteLinkIndex::load(store.links_path()));
		let comparator = StateComparator::new(backend.name());
		Self {
			backend,
			store,
			links,
			comparator,
			resolver: ConflictResolver,
			metrics: Arc::new(NoopMetrics),
			workers: DEFAULT_WORKERS,
			cancel: CancelToken::new(),
			repository: None,
		}
	}

	pub fn with_workers(mut self, workers: usize) -> Self {
		self.workers = workers.max(1);
		self
	}

	pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
		self.metrics = metrics;
		self
	}

	pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
		self.cancel = cancel;
		self
	}

	pub fn with_repository(mut self, repository: RepoIdentity) -> Self {
		self.repository = Some(repository);
		self
	}

	pub fn links(&self) -> &RemoteLinkIndex {
		&self.links
	}

	fn baseline_store(&self) -> BaselineStore {
		BaselineStore::new(self.store.baseline_path(self.backend.name()), self.backend.name())
	}

	fn cancelled(&self, report: &mut SyncReport) -> bool {
		if self.cancel.is_cancelled() {
			report.error = Some("sync cancelled".to_string());
			true
		} else {
			false
		}
	}

	/// One full sync run.
	#[tracing::instrument(level = "debug", skip(self, opts), fields(backend = %self.backend.name(), dry_run = opts.dry_run))]
	pub async fn run(&self, opts: &SyncOptions) -> SyncReport {
		let backend_name = self.backend.name().to_string();
		let mut report = SyncReport::new(&backend_name, opts.strategy, opts.dry_run);
		report.repository = self.repository.clone();
		self.metrics.incr("sync.runs", 1);

		// Stage 1: authenticate.
		match self.backend.authenticate().await {
			Ok(true) => {}
			Ok(false) => {
				report.error = Some("authentication failed".to_string());
				return report;
			}
			Err(e) => {
				tracing::warn!("[sync] authenticate errored: {e}");
				report.error = Some("authentication failed".to_string());
				return report;
			}
		}
		if self.cancelled(&mut report) {
			return report;
		}

		// Stage 2: enumerate both sides and the baseline.
		let loaded = self.store.load_all_issues(opts.include_archived);
		for (path, message) in &loaded.errors {
			report.errors.insert(path.display().to_string(), message.clone());
		}
		let local = loaded.entities;
		let remote_raw = match self.backend.get_issues().await {
			Ok(remote) => remote,
			Err(e) => {
				tracing::warn!("[sync] remote enumeration failed: {e}");
				report.error = Some("failed to fetch remote issues".to_string());
				return report;
			}
		};
		let baseline_store = self.baseline_store();
		let baseline = baseline_store.load();
		if self.cancelled(&mut report) {
			return report;
		}

		// Stage 3: normalize keys and classify.
		let remote = self.comparator.normalize_remote_keys(&local, remote_raw, &self.links, !opts.dry_run);
		let records = self.comparator.analyze(&local, &remote, &baseline);
		for record in &records {
			match record.classification {
				Classification::NewLocal | Classification::LocalOnly => report.issues_needs_push += 1,
				Classification::NewRemote | Classification::RemoteOnly => report.issues_needs_pull += 1,
				Classification::NoChange => report.issues_up_to_date += 1,
				Classification::BothChanged => report.conflicts_detected += 1,
				Classification::Deleted => {}
			}
			if let Some((local_title, remote_title)) = &record.title_divergence {
				tracing::debug!("[sync] title divergence on {}: local={local_title:?} remote={remote_title:?}", record.issue_id);
			}
		}
		self.metrics.incr("sync.conflicts_detected", report.conflicts_detected as u64);
		if self.cancelled(&mut report) {
			return report;
		}

		// Stage 4: resolve both_changed records into plans.
		let mut plans: Vec<(ChangeRecord, Plan)> = Vec::new();
		for record in records {
			let plan = self.plan(&record, opts.strategy);
			if let Plan::ApplyMerged(_) | Plan::Recreate = &plan {
				report.conflicts_resolved += 1;
			}
			if let Plan::Retire = &plan {
				if record.classification == Classification::BothChanged {
					report.conflicts_resolved += 1;
				}
			}
			plans.push((record, plan));
		}
		self.metrics.incr("sync.conflicts_resolved", report.conflicts_resolved as u64);
		if self.cancelled(&mut report) {
			return report;
		}

		// Stage 5: apply. Dry runs stop here: no I/O, no baseline movement.
		for (record, plan) in &plans {
			report.changes.push(ChangeSummary {
				issue_id: record.issue_id.clone(),
				title: record.title.clone(),
				classification: record.classification,
				reason: record.reason.clone(),
				conflicted_fields: match plan {
					Plan::Skip { conflicted } => conflicted.iter().map(|f| f.name()).collect(),
					_ => Vec::new(),
				},
			});
		}
		if opts.dry_run {
			return report;
		}

		let baseline_writer = Mutex::new(());
		let baseline_store_ref = &baseline_store;
		let baseline_writer_ref = &baseline_writer;
		let outcomes: Vec<(String, Result<ApplyOutcome, ApplyError>)> = futures::stream::iter(plans.iter().map(|(record, plan)| {
			let id = record.issue_id.clone();
			async move {
				let mut result = self.apply(record, plan).await;
				// Lock timeouts are transient; the per-issue section gets one retry.
				if let Err(e) = &result
					&& e.lock_timeout
				{
					tracing::debug!("[sync] retrying {id} after lock timeout");
					result = self.apply(record, plan).await;
				}
				// The baseline write is the tail of this issue's serial
				// section; it lands on disk before the section reports
				// success, never deferred to the end of the run.
				if let Ok(outcome) = &result
					&& let Err(e) = self.persist_issue_baseline(baseline_store_ref, baseline_writer_ref, &id, outcome)
				{
					result = Err(e);
				}
				(id, result)
			}
		}))
		.buffer_unordered(self.workers)
		.collect()
		.await;

		let class_by_id: BTreeMap<&str, Classification> = plans.iter().map(|(record, _)| (record.issue_id.as_str(), record.classification)).collect();
		for (issue_id, outcome) in outcomes {
			let classification = class_by_id.get(issue_id.as_str()).copied();
			match outcome {
				Ok(outcome) => {
					let applied = outcome.pushed || outcome.pulled;
					if outcome.pushed {
						report.issues_pushed += 1;
						if matches!(classification, Some(Classification::NewLocal | Classification::LocalOnly)) {
							report.issues_needs_push = report.issues_needs_push.saturating_sub(1);
						}
						self.metrics.incr("sync.pushed", 1);
					}
					if outcome.pulled {
						report.issues_pulled += 1;
						if matches!(classification, Some(Classification::NewRemote | Classification::RemoteOnly)) {
							report.issues_needs_pull = report.issues_needs_pull.saturating_sub(1);
						}
						self.metrics.incr("sync.pulled", 1);
					}
					if applied {
						report.issues_up_to_date += 1;
					}
				}
				Err(e) => {
					self.metrics.incr("sync.apply_failures", 1);
					report.errors.insert(issue_id, e.message);
				}
			}
		}
		if self.cancelled(&mut report) {
			return report;
		}

		// Milestones: a simplified pass alongside the issue pipeline.
		if let Err(message) = self.sync_milestones(&mut report).await {
			report.errors.insert("milestones".to_string(), message);
		}

		// Stage 6: baseline persistence already happened per issue inside
		// each apply section above; there is nothing left to batch here.

		// Stage 7: the report itself.
		report
	}

	/// Persist one issue's baseline movement, serialized so the per-backend
	/// document has a single writer at any instant. A failure here fails the
	/// issue's section: the next run recomputes and retries it.
	fn persist_issue_baseline(&self, store: &BaselineStore, writer: &Mutex<()>, issue_id: &str, outcome: &ApplyOutcome) -> Result<(), ApplyError> {
		if outcome.baseline.is_none() && !outcome.drop_baseline {
			return Ok(());
		}
		let _writer = writer.lock().expect("baseline writer lock poisoned");
		if let Some(state) = &outcome.baseline {
			store.update(state.clone()).map_err(|e| ApplyError {
				message: format!("apply succeeded but baseline write failed: {e}"),
				lock_timeout: false,
			})?;
		}
		if outcome.drop_baseline {
			store.remove(issue_id).map_err(|e| ApplyError {
				message: format!("apply succeeded but baseline write failed: {e}"),
				lock_timeout: false,
			})?;
		}
		Ok(())
	}

	//=========================================================================
	// Resolve
	//=========================================================================

	fn field_maps(&self, record: &ChangeRecord) -> (FieldMap, FieldMap, FieldMap) {
		let fields = self.comparator.fields();
		let base_map = record.baseline_state.as_ref().map(|b| b.field_map(fields)).unwrap_or_default();
		let local_map = record.local_state.as_ref().map(|i| local_field_map(i, fields)).unwrap_or_default();
		let remote_map = match &record.remote_state {
			// A field the backend does not convey is unchanged, not cleared.
			Some(remote) => fill_missing(&remote_field_map(remote, fields), &base_map, fields),
			None => FieldMap::new(),
		};
		(base_map, local_map, remote_map)
	}

	fn plan(&self, record: &ChangeRecord, strategy: SyncStrategy) -> Plan {
		match record.classification {
			Classification::NoChange => Plan::Noop,
			Classification::NewLocal | Classification::LocalOnly => Plan::Push,
			Classification::NewRemote => Plan::PullCreate,
			Classification::RemoteOnly => Plan::PullUpdate,
			Classification::Deleted => Plan::Retire,
			Classification::BothChanged => {
				// Remote deletion vs local edit cannot be merged field-wise.
				if record.remote_state.is_none() && record.baseline_state.is_some() {
					let side = match strategy {
						SyncStrategy::KeepLocal => Side::Local,
						SyncStrategy::KeepRemote => Side::Remote,
						// No remote timestamp exists for a deleted issue.
						SyncStrategy::Auto => Side::Local,
						SyncStrategy::Manual => {
							return Plan::Skip {
								conflicted: record.local_changes.keys().copied().collect(),
							};
						}
					};
					return match side {
						Side::Local => Plan::Recreate,
						Side::Remote => Plan::Retire,
					};
				}

				let (base_map, local_map, remote_map) = self.field_maps(record);
				let (clean, conflicted) = merge_issue(&base_map, &local_map, &remote_map);
				if conflicted.is_empty() {
					// Disjoint edits; the merger already combined both sides.
					return Plan::ApplyMerged(Resolution {
						merged: clean,
						winner: None,
						resolved: true,
					});
				}
				let absent = FieldValue::Absent;
				let local_updated = record.local_state.as_ref().map(|i| i.updated);
				let remote_updated = record.remote_state.as_ref().and_then(|r| r.updated_at);
				let conflict = Conflict {
					issue_id: record.issue_id.clone(),
					fields: conflicted
						.iter()
						.map(|field| ConflictField {
							field: *field,
							local_value: local_map.get(field).unwrap_or(&absent).clone(),
							remote_value: remote_map.get(field).unwrap_or(&absent).clone(),
							local_updated,
							remote_updated,
						})
						.collect(),
					local_updated,
					remote_updated,
				};
				let resolution = self.resolver.resolve(&conflict, &clean, strategy);
				if resolution.resolved {
					Plan::ApplyMerged(resolution)
				} else {
					Plan::Skip { conflicted }
				}
			}
		}
	}

	//=========================================================================
	// Apply
	//=========================================================================

	async fn apply(&self, record: &ChangeRecord, plan: &Plan) -> Result<ApplyOutcome, ApplyError> {
		let backend_name = self.backend.name();
		match plan {
			Plan::Noop => {
				let baseline = record.local_state.as_ref().map(IssueBaseState::of_issue);
				Ok(ApplyOutcome { baseline, ..Default::default() })
			}
			Plan::Skip { .. } => Ok(ApplyOutcome::default()),
			Plan::Push => {
				let local = record.local_state.as_ref().expect("push plan implies local state");
				self.push_and_link(local).await
			}
			Plan::Recreate => {
				let local = record.local_state.as_ref().expect("recreate plan implies local state");
				// The old remote id points at a deleted entity; push as new.
				let mut detached = local.clone();
				detached.remote_ids.remove(backend_name);
				self.push_and_link(&detached).await
			}
			Plan::PullCreate => {
				let remote = record.remote_state.as_ref().expect("pull plan implies remote state");
				let issue = self.ingest_remote(remote).map_err(|e| ApplyError {
					message: format!("cannot ingest remote issue {}: {e}", remote.remote_key),
					lock_timeout: false,
				})?;
				self.store.save_issue(&issue, false)?;
				self.link(&remote.remote_key, &issue.id)?;
				Ok(ApplyOutcome {
					pulled: true,
					baseline: Some(IssueBaseState::of_issue(&issue)),
					..Default::default()
				})
			}
			Plan::PullUpdate => {
				let remote = record.remote_state.as_ref().expect("pull plan implies remote state");
				let changes = record.remote_changes.clone();
				let remote_key = remote.remote_key.clone();
				let remote_updated = remote.updated_at;
				let updated = self.store.update_issue(&record.issue_id, move |issue| {
					for (field, delta) in &changes {
						apply_field(issue, *field, &delta.to);
					}
					issue.record_sync(backend_name, remote_key, remote_updated);
				})?;
				Ok(ApplyOutcome {
					pulled: true,
					baseline: Some(IssueBaseState::of_issue(&updated)),
					..Default::default()
				})
			}
			Plan::ApplyMerged(resolution) => self.apply_merged(record, resolution).await,
			Plan::Retire => {
				// Remote side is gone; archive locally, never delete.
				let updated = self.store.update_issue(&record.issue_id, |issue| {
					issue.status = Status::Archived;
					issue.remote_ids.remove(backend_name);
					issue.sync_metadata.remove(backend_name);
				})?;
				self.links.unlink_local(&updated.id, backend_name).map_err(|e| ApplyError {
					message: format!("failed to unlink {}: {e}", updated.id),
					lock_timeout: false,
				})?;
				tracing::debug!("[sync] archived {} after remote deletion", updated.id);
				Ok(ApplyOutcome { drop_baseline: true, ..Default::default() })
			}
		}
	}

	async fn push_and_link(&self, local: &Issue) -> Result<ApplyOutcome, ApplyError> {
		let backend_name = self.backend.name();
		let outcome = self.backend.push_issue(local).await?;
		let remote_key = outcome.remote_key.clone();
		let updated = self.store.update_issue(&local.id, move |issue| {
			issue.record_sync(backend_name, remote_key, None);
		})?;
		self.link(&outcome.remote_key, &local.id)?;
		Ok(ApplyOutcome {
			pushed: true,
			baseline: Some(IssueBaseState::of_issue(&updated)),
			..Default::default()
		})
	}

	async fn apply_merged(&self, record: &ChangeRecord, resolution: &Resolution) -> Result<ApplyOutcome, ApplyError> {
		let backend_name = self.backend.name();
		let local = record.local_state.as_ref().expect("merged plan implies local state");
		let remote = record.remote_state.as_ref().expect("merged plan implies remote state");
		let fields = self.comparator.fields();

		let local_map = local_field_map(local, fields);
		let remote_map = fill_missing(&remote_field_map(remote, fields), &record.baseline_state.as_ref().map(|b| b.field_map(fields)).unwrap_or_default(), fields);

		let push_needed = resolution.merged.iter().any(|(field, value)| remote_map.get(field) != Some(value));
		let pull_needed = resolution.merged.iter().any(|(field, value)| local_map.get(field) != Some(value));

		// Push first, then reconstruct local from the merged snapshot. The
		// merged value is authoritative; a confirm-fetch would only race
		// with concurrent remote edits.
		if push_needed {
			let mut pushed = local.clone();
			for (field, value) in &resolution.merged {
				apply_field(&mut pushed, *field, value);
			}
			self.backend.push_issue(&pushed).await?;
		}

		let merged = resolution.merged.clone();
		let remote_key = remote.remote_key.clone();
		let remote_updated = remote.updated_at;
		let updated = self.store.update_issue(&record.issue_id, move |issue| {
			for (field, value) in &merged {
				apply_field(issue, *field, value);
			}
			issue.record_sync(backend_name, remote_key, remote_updated);
		})?;

		Ok(ApplyOutcome {
			pushed: push_needed,
			pulled: pull_needed,
			baseline: Some(IssueBaseState::of_issue(&updated)),
			..Default::default()
		})
	}

	fn link(&self, remote_key: &str, local_id: &str) -> Result<(), ApplyError> {
		self.links.link(self.backend.name(), remote_key, local_id).map_err(|e| ApplyError {
			message: format!("failed to record link {remote_key}->{local_id}: {e}"),
			lock_timeout: false,
		})
	}

	/// Build a local issue from a remote one seen for the first time.
	/// Unknown remote statuses map to todo here; this is the ingestion
	/// policy, distinct from the comparator keeping the original string.
	fn ingest_remote(&self, remote: &RemoteIssue) -> Result<Issue, crate::issue::ValidationError> {
		let mut issue = Issue::new(remote.title.clone())?;
		issue.status = Status::normalize(&remote.status).unwrap_or(Status::Todo);
		issue.priority = remote.priority.as_deref().and_then(Priority::normalize).unwrap_or_default();
		issue.content = remote.content.clone();
		issue.labels = remote.labels.clone();
		issue.assignee = remote.assignee.clone();
		issue.milestone = remote.milestone.clone();
		issue.record_sync(self.backend.name(), remote.remote_key.clone(), remote.updated_at);
		issue.validate()?;
		Ok(issue)
	}

	//=========================================================================
	// Milestones
	//=========================================================================

	async fn sync_milestones(&self, report: &mut SyncReport) -> Result<(), String> {
		let backend_name = self.backend.name();
		let remote = self.backend.get_milestones().await.map_err(|e| format!("failed to fetch remote milestones: {e}"))?;
		let loaded = self.store.load_all_milestones();
		for (path, message) in &loaded.errors {
			report.errors.insert(path.display().to_string(), message.clone());
		}
		let mut locals = loaded.entities;

		// Remote key -> local name, through remote_ids with a name fallback.
		let mut matched_remote: BTreeMap<String, String> = BTreeMap::new();
		for (name, milestone) in &locals {
			if let Some(remote_id) = milestone.remote_id(backend_name) {
				matched_remote.insert(remote_id.to_string(), name.clone());
			}
		}
		for (key, remote_milestone) in &remote {
			if !matched_remote.contains_key(key) && locals.contains_key(&remote_milestone.name) {
				matched_remote.insert(key.clone(), remote_milestone.name.clone());
			}
		}

		// Pull remote-only milestones.
		for (key, remote_milestone) in &remote {
			if matched_remote.contains_key(key) {
				continue;
			}
			let mut milestone = Milestone::new(remote_milestone.name.clone()).map_err(|e| format!("cannot ingest milestone {key}: {e}"))?;
			milestone.description = remote_milestone.description.clone();
			milestone.status = MilestoneStatus::normalize(&remote_milestone.state).unwrap_or_default();
			milestone.due_date = remote_milestone.due_date;
			milestone.record_sync(backend_name, key.clone(), remote_milestone.updated_at);
			self.store.save_milestone(&milestone, false).map_err(|e| e.to_string())?;
			report.milestones_pulled += 1;
		}

		// Push local-only milestones, and local state over diverged ones.
		for (name, milestone) in locals.iter_mut() {
			let remote_entry = milestone.remote_id(backend_name).and_then(|id| remote.get(id)).or_else(|| remote.values().find(|r| &r.name == name));
			let needs_push = match remote_entry {
				None => true,
				Some(entry) => MilestoneStatus::normalize(&entry.state) != Some(milestone.status) || entry.description != milestone.description,
			};
			if !needs_push {
				continue;
			}
			let outcome = self.backend.push_milestone(milestone).await.map_err(|e| format!("failed to push milestone {name}: {e}"))?;
			milestone.record_sync(backend_name, outcome.remote_key, None);
			self.store.save_milestone(milestone, false).map_err(|e| e.to_string())?;
			report.milestones_pushed += 1;
		}

		Ok(())
	}
}
//,}}}1

/// Write one merged field value back into a local entity.
fn apply_field(issue: &mut Issue, field: SyncField, value: &FieldValue) {
	match (field, value) {
		(SyncField::Status, FieldValue::Status(status)) => issue.status = *status,
		// Unknown remote status: the todo-by-policy fallback.
		(SyncField::Status, FieldValue::Text(raw)) => issue.status = Status::normalize(raw).unwrap_or(Status::Todo),
		(SyncField::Priority, FieldValue::Priority(priority)) => issue.priority = *priority,
		(SyncField::Priority, FieldValue::Text(raw)) => issue.priority = Priority::normalize(raw).unwrap_or_default(),
		(SyncField::Content, FieldValue::Text(body)) => issue.content = body.clone(),
		(SyncField::Labels, FieldValue::Labels(labels)) => issue.labels = labels.clone(),
		(SyncField::Assignee, FieldValue::Text(assignee)) => issue.assignee = Some(assignee.clone()),
		(SyncField::Assignee, FieldValue::Absent) => issue.assignee = None,
		// Absent for the remaining fields means "nothing conveyed".
		_ => {}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn apply_field_maps_unknown_status_to_todo() {
		let mut issue = Issue::new("Policy").unwrap();
		issue.status = Status::Review;
		apply_field(&mut issue, SyncField::Status, &FieldValue::text("wontfix"));
		assert_eq!(issue.status, Status::Todo);
	}

	#[test]
	fn apply_field_clears_assignee_on_absent() {
		let mut issue = Issue::new("Assign").unwrap();
		issue.assignee = Some("alice".to_string());
		apply_field(&mut issue, SyncField::Assignee, &FieldValue::Absent);
		assert_eq!(issue.assignee, None);
	}

	#[test]
	fn cancel_token_flips_once() {
		let token = CancelToken::new();
		assert!(!token.is_cancelled());
		token.cancel();
		assert!(token.is_cancelled());
		assert!(token.clone().is_cancelled());
	}
}
