//! Entity-level persistence over the `.roadmap/` directory.
//!
//! Every save acquires the advisory lock for the target file, writes through
//! the atomic-replace path, and releases the lock. Concurrent saves to the
//! same file serialize; readers outside the sync engine may read lock-free
//! and never observe a torn file.

use std::{
	collections::HashMap,
	fs,
	path::{Path, PathBuf},
};

use crate::{
	issue::Issue,
	milestone::Milestone,
	persistence::{
		frontmatter::{self, ParseError},
		lock::{LockError, LockManager},
	},
};

pub const ISSUES_DIR: &str = "issues";
pub const MILESTONES_DIR: &str = "milestones";
pub const LINKS_FILE: &str = "remote-links.db";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
	#[error(transparent)]
	Lock(#[from] LockError),
	#[error(transparent)]
	Parse(#[from] ParseError),
	#[error("io error for {}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("no issue with id {0} in the store")]
	UnknownIssue(String),
}

/// Entities loaded by a bulk walk, plus per-file validation failures.
/// A malformed file never aborts the walk; it is excluded from the run and
/// reported so the operator can fix it.
#[derive(Debug)]
pub struct Loaded<T> {
	pub entities: HashMap<String, T>,
	pub errors: Vec<(PathBuf, String)>,
}

impl<T> Default for Loaded<T> {
	fn default() -> Self {
		Self {
			entities: HashMap::new(),
			errors: Vec::new(),
		}
	}
}

/// File-backed store for issues and milestones.
#[derive(Clone, Debug)]
pub struct RoadmapStore {
	root: PathBuf,
	locks: LockManager,
}

impl RoadmapStore /*{{{1*/ {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
			locks: LockManager::default(),
		}
	}

	pub fn with_locks(root: impl Into<PathBuf>, locks: LockManager) -> Self {
		Self { root: root.into(), locks }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn locks(&self) -> &LockManager {
		&self.locks
	}

	pub fn issues_dir(&self) -> PathBuf {
		self.root.join(ISSUES_DIR)
	}

	pub fn milestones_dir(&self) -> PathBuf {
		self.root.join(MILESTONES_DIR)
	}

	pub fn baseline_path(&self, backend: &str) -> PathBuf {
		self.root.join(format!(".sync-state.{backend}.json"))
	}

	pub fn links_path(&self) -> PathBuf {
		self.root.join(LINKS_FILE)
	}

	/// Where an issue lives: `issues/<milestone-or-root>/<id>.md`.
	/// Issues without a milestone sit directly under `issues/`.
	pub fn issue_path(&self, issue: &Issue) -> PathBuf {
		let dir = match &issue.milestone {
			Some(group) => self.issues_dir().join(group),
			None => self.issues_dir(),
		};
		dir.join(format!("{}.md", issue.id))
	}

	pub fn milestone_path(&self, name: &str) -> PathBuf {
		self.milestones_dir().join(format!("{name}.md"))
	}

	/// Locate an existing issue file by id, searching milestone subdirectories.
	pub fn find_issue_path(&self, id: &str) -> Option<PathBuf> {
		let file_name = format!("{id}.md");
		let direct = self.issues_dir().join(&file_name);
		if direct.exists() {
			return Some(direct);
		}
		for path in walk_entity_files(&self.issues_dir()) {
			if path.file_name().and_then(|n| n.to_str()) == Some(file_name.as_str()) {
				return Some(path);
			}
		}
		None
	}

	//=========================================================================
	// Issues
	//=========================================================================

	pub fn load_issue(&self, id: &str) -> Result<Issue, StoreError> {
		let path = self.find_issue_path(id).ok_or_else(|| StoreError::UnknownIssue(id.to_string()))?;
		Ok(frontmatter::load_issue(&path)?)
	}

	/// Save an issue under its lock. If the issue moved between milestone
	/// groups, the file at the old location is removed after the new one is
	/// in place.
	#[tracing::instrument(level = "debug", skip(self, issue), fields(id = %issue.id))]
	pub fn save_issue(&self, issue: &Issue, backup: bool) -> Result<PathBuf, StoreError> {
		issue.validate().map_err(|source| ParseError::Validation {
			path: self.issue_path(issue),
			source,
		})?;
		let path = self.issue_path(issue);
		let guard = self.locks.lock(&path, "save_issue")?;
		let result = self.save_issue_locked(issue, &path, backup);
		guard.release()?;
		let old_path = result?;
		if let Some(old) = old_path
			&& old != path
		{
			fs::remove_file(&old).map_err(|source| StoreError::Io { path: old, source })?;
		}
		Ok(path)
	}

	fn save_issue_locked(&self, issue: &Issue, path: &Path, backup: bool) -> Result<Option<PathBuf>, StoreError> {
		if backup {
			frontmatter::backup(path).map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
		}
		let previous = self.find_issue_path(&issue.id);
		let content = frontmatter::serialize_issue(issue);
		frontmatter::atomic_write(path, &content).map_err(|source| StoreError::Io { path: path.to_path_buf(), source })?;
		Ok(previous)
	}

	/// Load-mutate-save under the file lock. The mutator sees current state;
	/// a failure after the temp write leaves the target unchanged.
	pub fn update_issue(&self, id: &str, mutator: impl FnOnce(&mut Issue)) -> Result<Issue, StoreError> {
		let path = self.find_issue_path(id).ok_or_else(|| StoreError::UnknownIssue(id.to_string()))?;
		let guard = self.locks.lock(&path, "update_issue")?;
		let result = (|| -> Result<Issue, StoreError> {
			let mut issue = frontmatter::load_issue(&path)?;
			mutator(&mut issue);
			issue.touch();
			issue.validate().map_err(|source| ParseError::Validation { path: path.clone(), source })?;
			let content = frontmatter::serialize_issue(&issue);
			frontmatter::atomic_write(&path, &content).map_err(|source| StoreError::Io { path: path.clone(), source })?;
			Ok(issue)
		})();
		guard.release()?;
		let issue = result?;
		// Milestone changes move the file into another group directory.
		let wanted = self.issue_path(&issue);
		if wanted != path {
			let content = frontmatter::serialize_issue(&issue);
			frontmatter::atomic_write(&wanted, &content).map_err(|source| StoreError::Io { path: wanted.clone(), source })?;
			fs::remove_file(&path).map_err(|source| StoreError::Io { path: path.clone(), source })?;
		}
		Ok(issue)
	}

	/// Load every issue in the store. Archived issues are skipped unless
	/// requested; malformed files are collected, not fatal.
	pub fn load_all_issues(&self, include_archived: bool) -> Loaded<Issue> {
		let mut loaded = Loaded::default();
		for path in walk_entity_files(&self.issues_dir()) {
			match frontmatter::load_issue_safe(&path) {
				Ok(issue) => {
					if !include_archived && issue.status == crate::issue::Status::Archived {
						continue;
					}
					loaded.entities.insert(issue.id.clone(), issue);
				}
				Err(message) => loaded.errors.push((path, message)),
			}
		}
		loaded
	}

	//=========================================================================
	// Milestones
	//=========================================================================

	pub fn save_milestone(&self, milestone: &Milestone, backup: bool) -> Result<PathBuf, StoreError> {
		milestone.validate().map_err(|source| ParseError::Validation {
			path: self.milestone_path(&milestone.name),
			source,
		})?;
		let path = self.milestone_path(&milestone.name);
		let guard = self.locks.lock(&path, "save_milestone")?;
		let result = (|| -> Result<(), StoreError> {
			if backup {
				frontmatter::backup(&path).map_err(|source| StoreError::Io { path: path.clone(), source })?;
			}
			let content = frontmatter::serialize_milestone(milestone);
			frontmatter::atomic_write(&path, &content).map_err(|source| StoreError::Io { path: path.clone(), source })?;
			Ok(())
		})();
		guard.release()?;
		result?;
		Ok(path)
	}

	pub fn load_all_milestones(&self) -> Loaded<Milestone> {
		let mut loaded = Loaded::default();
		for path in walk_entity_files(&self.milestones_dir()) {
			match frontmatter::load_milestone_safe(&path) {
				Ok(milestone) => {
					loaded.entities.insert(milestone.name.clone(), milestone);
				}
				Err(message) => loaded.errors.push((path, message)),
			}
		}
		loaded
	}
}
//,}}}1

/// All entity (`.md`) files under `dir`, recursively. Lock sidecars, backups
/// and in-flight temp files are not entities.
fn walk_entity_files(dir: &Path) -> Vec<PathBuf> {
	let mut out = Vec::new();
	let mut stack = vec![dir.to_path_buf()];
	while let Some(current) = stack.pop() {
		let Ok(entries) = fs::read_dir(&current) else { continue };
		for entry in entries.flatten() {
			let path = entry.path();
			if path.is_dir() {
				stack.push(path);
				continue;
			}
			let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
			if name.ends_with(".md") && !name.starts_with('.') {
				out.push(path);
			}
		}
	}
	out.sort();
	out
}
