//! Mock backend for testing.
//!
//! Stores all remote state in memory and can be used for unit and
//! integration tests without hitting any real API. Thread-safe; every call
//! is appended to a log so tests can assert on the exact traffic.

use std::{
	collections::HashMap,
	sync::{
		Mutex,
		atomic::{AtomicBool, AtomicU64, Ordering},
	},
};

use async_trait::async_trait;
use jiff::Timestamp;

use crate::{
	issue::{Issue, Status},
	milestone::Milestone,
	sync::{
		backend::{BackendError, PushOutcome, RemoteIssue, RemoteMilestone, SyncBackend},
		orchestrator::CancelToken,
	},
};

/// In-memory backend. Construct, seed remote state, hand to the
/// orchestrator, then inspect `calls()` and the stored state.
pub struct MockBackend {
	name: String,
	/// Counter for remote keys assigned to created issues.
	next_number: AtomicU64,
	authenticated: AtomicBool,
	fail_enumerate: AtomicBool,
	issues: Mutex<HashMap<String, RemoteIssue>>,
	milestones: Mutex<HashMap<String, RemoteMilestone>>,
	/// Issue titles whose push should fail with a transport error.
	push_failures: Mutex<Vec<String>>,
	/// Token cancelled after every successful issue push. Lets tests cut a
	/// run short right after an apply section, as a crash would.
	cancel_after_push: Mutex<Option<CancelToken>>,
	call_log: Mutex<Vec<String>>,
}

impl MockBackend /*{{{1*/ {
	pub fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			next_number: AtomicU64::new(42),
			authenticated: AtomicBool::new(true),
			fail_enumerate: AtomicBool::new(false),
			issues: Mutex::new(HashMap::new()),
			milestones: Mutex::new(HashMap::new()),
			push_failures: Mutex::new(Vec::new()),
			cancel_after_push: Mutex::new(None),
			call_log: Mutex::new(Vec::new()),
		}
	}

	pub fn deny_auth(&self) {
		self.authenticated.store(false, Ordering::SeqCst);
	}

	pub fn fail_enumerate(&self) {
		self.fail_enumerate.store(true, Ordering::SeqCst);
	}

	/// Make pushes of the issue with this title fail with a transport error.
	pub fn fail_push_of(&self, title: &str) {
		self.push_failures.lock().unwrap().push(title.to_string());
	}

	/// Cancel `token` after each successful issue push.
	pub fn cancel_after_push(&self, token: CancelToken) {
		*self.cancel_after_push.lock().unwrap() = Some(token);
	}

	pub fn insert_issue(&self, remote: RemoteIssue) {
		self.issues.lock().unwrap().insert(remote.remote_key.clone(), remote);
	}

	pub fn insert_milestone(&self, remote: RemoteMilestone) {
		self.milestones.lock().unwrap().insert(remote.remote_key.clone(), remote);
	}

	pub fn remove_issue(&self, remote_key: &str) {
		self.issues.lock().unwrap().remove(remote_key);
	}

	pub fn issue(&self, remote_key: &str) -> Option<RemoteIssue> {
		self.issues.lock().unwrap().get(remote_key).cloned()
	}

	pub fn milestone(&self, remote_key: &str) -> Option<RemoteMilestone> {
		self.milestones.lock().unwrap().get(remote_key).cloned()
	}

	pub fn issue_count(&self) -> usize {
		self.issues.lock().unwrap().len()
	}

	pub fn calls(&self) -> Vec<String> {
		self.call_log.lock().unwrap().clone()
	}

	pub fn calls_matching(&self, prefix: &str) -> usize {
		self.call_log.lock().unwrap().iter().filter(|c| c.starts_with(prefix)).count()
	}

	fn log(&self, call: String) {
		tracing::debug!(target: "mock_backend", "{call}");
		self.call_log.lock().unwrap().push(call);
	}

	fn fire_cancel_hook(&self) {
		if let Some(token) = self.cancel_after_push.lock().unwrap().as_ref() {
			token.cancel();
		}
	}

	fn issue_payload(&self, issue: &Issue) -> RemoteIssue {
		RemoteIssue {
			remote_key: issue.remote_id(&self.name).unwrap_or_default().to_string(),
			title: issue.title.clone(),
			status: issue.status.as_str().to_string(),
			priority: Some(issue.priority.as_str().to_string()),
			content: issue.content.clone(),
			labels: issue.labels.clone(),
			assignee: issue.assignee.clone(),
			milestone: issue.milestone.clone(),
			updated_at: Some(Timestamp::now()),
		}
	}
}
//,}}}1

#[async_trait]
impl SyncBackend for MockBackend /*{{{1*/ {
	fn name(&self) -> &str {
		&self.name
	}

	async fn authenticate(&self) -> Result<bool, BackendError> {
		self.log("authenticate".to_string());
		Ok(self.authenticated.load(Ordering::SeqCst))
	}

	async fn get_issues(&self) -> Result<HashMap<String, RemoteIssue>, BackendError> {
		self.log("get_issues".to_string());
		if self.fail_enumerate.load(Ordering::SeqCst) {
			return Err(BackendError::Transport("connection refused".to_string()));
		}
		Ok(self.issues.lock().unwrap().clone())
	}

	async fn push_issue(&self, issue: &Issue) -> Result<PushOutcome, BackendError> {
		self.log(format!("push_issue title={:?} status={}", issue.title, issue.status));
		if self.push_failures.lock().unwrap().contains(&issue.title) {
			return Err(BackendError::Transport("push rejected".to_string()));
		}
		let mut payload = self.issue_payload(issue);
		match issue.remote_id(&self.name) {
			Some(remote_key) => {
				let mut issues = self.issues.lock().unwrap();
				if !issues.contains_key(remote_key) {
					return Err(BackendError::NotFound(remote_key.to_string()));
				}
				payload.remote_key = remote_key.to_string();
				issues.insert(remote_key.to_string(), payload);
				drop(issues);
				self.fire_cancel_hook();
				Ok(PushOutcome {
					remote_key: remote_key.to_string(),
					created: false,
				})
			}
			None => {
				let number = self.next_number.fetch_add(1, Ordering::SeqCst);
				let remote_key = number.to_string();
				payload.remote_key = remote_key.clone();
				self.issues.lock().unwrap().insert(remote_key.clone(), payload);
				self.fire_cancel_hook();
				Ok(PushOutcome { remote_key, created: true })
			}
		}
	}

	async fn pull_issue(&self, remote_key: &str) -> Result<RemoteIssue, BackendError> {
		self.log(format!("pull_issue {remote_key}"));
		self.issues.lock().unwrap().get(remote_key).cloned().ok_or_else(|| BackendError::NotFound(remote_key.to_string()))
	}

	async fn update_state(&self, remote_key: &str, state: Status) -> Result<(), BackendError> {
		self.log(format!("update_state {remote_key} -> {state}"));
		let mut issues = self.issues.lock().unwrap();
		let issue = issues.get_mut(remote_key).ok_or_else(|| BackendError::NotFound(remote_key.to_string()))?;
		issue.status = state.as_str().to_string();
		issue.updated_at = Some(Timestamp::now());
		Ok(())
	}

	async fn get_milestones(&self) -> Result<HashMap<String, RemoteMilestone>, BackendError> {
		self.log("get_milestones".to_string());
		Ok(self.milestones.lock().unwrap().clone())
	}

	async fn push_milestone(&self, milestone: &Milestone) -> Result<PushOutcome, BackendError> {
		self.log(format!("push_milestone name={:?}", milestone.name));
		let payload = |remote_key: String| RemoteMilestone {
			remote_key,
			name: milestone.name.clone(),
			description: milestone.description.clone(),
			state: milestone.status.as_str().to_string(),
			due_date: milestone.due_date,
			updated_at: Some(Timestamp::now()),
		};
		match milestone.remote_id(&self.name) {
			Some(remote_key) => {
				self.milestones.lock().unwrap().insert(remote_key.to_string(), payload(remote_key.to_string()));
				Ok(PushOutcome {
					remote_key: remote_key.to_string(),
					created: false,
				})
			}
			None => {
				let number = self.next_number.fetch_add(1, Ordering::SeqCst);
				let remote_key = number.to_string();
				self.milestones.lock().unwrap().insert(remote_key.clone(), payload(remote_key.clone()));
				Ok(PushOutcome { remote_key, created: true })
			}
		}
	}
}
//,}}}1

#[cfg(test)]
mod tests {
	use super::*;

	fn block_on<F: std::future::Future>(future: F) -> F::Output {
		tokio::runtime::Runtime::new().unwrap().block_on(future)
	}

	#[test]
	fn push_assigns_remote_keys_to_new_issues() {
		let mock = MockBackend::new("gh");
		let issue = Issue::new("Fresh").unwrap();
		let outcome = block_on(mock.push_issue(&issue)).unwrap();
		assert!(outcome.created);
		assert_eq!(outcome.remote_key, "42");
		assert_eq!(mock.issue("42").unwrap().title, "Fresh");
	}

	#[test]
	fn push_updates_linked_issues_in_place() {
		let mock = MockBackend::new("gh");
		let mut issue = Issue::new("Linked").unwrap();
		let created = block_on(mock.push_issue(&issue)).unwrap();
		issue.record_sync("gh", created.remote_key.clone(), None);
		issue.status = Status::Closed;
		let outcome = block_on(mock.push_issue(&issue)).unwrap();
		assert!(!outcome.created);
		assert_eq!(mock.issue(&created.remote_key).unwrap().status, "closed");
	}

	#[test]
	fn update_state_is_a_fast_path() {
		let mock = MockBackend::new("gh");
		let issue = Issue::new("State").unwrap();
		let created = block_on(mock.push_issue(&issue)).unwrap();
		block_on(mock.update_state(&created.remote_key, Status::Closed)).unwrap();
		assert_eq!(mock.issue(&created.remote_key).unwrap().status, "closed");
		assert!(block_on(mock.update_state("404", Status::Closed)).is_err());
	}

	#[test]
	fn call_log_records_traffic() {
		let mock = MockBackend::new("gh");
		block_on(mock.get_issues()).unwrap();
		block_on(mock.get_issues()).unwrap();
		assert_eq!(mock.calls_matching("get_issues"), 2);
	}

	#[test]
	fn denied_auth_and_enumerate_failures() {
		let mock = MockBackend::new("gh");
		mock.deny_auth();
		assert!(!block_on(mock.authenticate()).unwrap());
		mock.fail_enumerate();
		assert!(block_on(mock.get_issues()).is_err());
	}
}
