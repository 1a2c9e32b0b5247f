//! Shared test fixtures for integration tests.
//!
//! Each context owns a temp directory with a `.roadmap/` store and an
//! in-memory mock backend, and runs the orchestrator through the public API.

use std::{collections::BTreeMap, sync::Arc};

use jiff::Timestamp;
use roadmap::{
	Issue,
	persistence::RoadmapStore,
	sync::{BaselineStore, IssueBaseState, RemoteIssue, RemoteLinkIndex, SyncOptions, SyncOrchestrator, SyncReport, SyncStrategy, mock::MockBackend},
};
use tempfile::TempDir;

pub fn block_on<F: std::future::Future>(future: F) -> F::Output {
	tokio::runtime::Runtime::new().unwrap().block_on(future)
}

pub fn ts(s: &str) -> Timestamp {
	s.parse().unwrap()
}

/// Test context for sync runs.
pub struct SyncTestContext {
	// Kept alive to preserve temp directory
	_temp_dir: TempDir,
	pub store: Arc<RoadmapStore>,
	pub mock: Arc<MockBackend>,
}

impl SyncTestContext {
	pub fn new() -> Self {
		let temp_dir = tempfile::Builder::new().prefix("roadmap_test_").tempdir().unwrap();
		let store = Arc::new(RoadmapStore::new(temp_dir.path().join(".roadmap")));
		let mock = Arc::new(MockBackend::new("gh"));
		Self { _temp_dir: temp_dir, store, mock }
	}

	pub fn orchestrator(&self) -> SyncOrchestrator {
		SyncOrchestrator::new(self.mock.clone(), self.store.clone()).with_workers(2)
	}

	pub fn run(&self, strategy: SyncStrategy, dry_run: bool) -> SyncReport {
		let opts = SyncOptions {
			dry_run,
			strategy,
			include_archived: false,
		};
		block_on(self.orchestrator().run(&opts))
	}

	/// Create and persist a local issue, applying `customize` before saving.
	pub fn seed_local(&self, title: &str, customize: impl FnOnce(&mut Issue)) -> Issue {
		let mut issue = Issue::new(title).unwrap();
		customize(&mut issue);
		self.store.save_issue(&issue, false).unwrap();
		issue
	}

	pub fn seed_remote(&self, key: &str, title: &str, status: &str, customize: impl FnOnce(&mut RemoteIssue)) {
		let mut remote = RemoteIssue {
			remote_key: key.to_string(),
			title: title.to_string(),
			status: status.to_string(),
			..RemoteIssue::default()
		};
		customize(&mut remote);
		self.mock.insert_issue(remote);
	}

	pub fn baseline_store(&self) -> BaselineStore {
		BaselineStore::new(self.store.baseline_path("gh"), "gh")
	}

	pub fn seed_baseline(&self, state: IssueBaseState) {
		self.baseline_store().update(state).unwrap();
	}

	pub fn baseline(&self) -> BTreeMap<String, IssueBaseState> {
		self.baseline_store().load()
	}

	pub fn links(&self) -> RemoteLinkIndex {
		RemoteLinkIndex::load(self.store.links_path())
	}

	/// Snapshot every file under the store root as (relative path, bytes).
	pub fn disk_snapshot(&self) -> BTreeMap<String, Vec<u8>> {
		let mut snapshot = BTreeMap::new();
		for entry in walkdir::WalkDir::new(self.store.root()).into_iter().flatten() {
			if entry.file_type().is_file() {
				let relative = entry.path().strip_prefix(self.store.root()).unwrap().display().to_string();
				snapshot.insert(relative, std::fs::read(entry.path()).unwrap());
			}
		}
		snapshot
	}
}
