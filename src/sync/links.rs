//! Bidirectional mapping between local ids and backend remote ids.
//!
//! The index is the fast path: an in-memory two-direction map behind a
//! reader-writer lock, hydrated from a JSON table on disk. The durable
//! record stays in each issue's frontmatter (`remote_ids`); on disagreement
//! the frontmatter wins and the index is reconciled on the next load.

use std::{
	collections::{BTreeMap, HashMap},
	path::{Path, PathBuf},
	sync::RwLock,
};

use serde::{Deserialize, Serialize};

use crate::persistence::frontmatter::atomic_write;

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
struct LinkRow {
	backend: String,
	remote_id: String,
	local_id: String,
}

#[derive(Debug, Default)]
struct LinkMaps {
	/// (backend, local_id) -> remote_id
	by_local: HashMap<(String, String), String>,
	/// (backend, remote_id) -> local_id
	by_remote: HashMap<(String, String), String>,
}

impl LinkMaps {
	fn insert(&mut self, backend: &str, remote_id: &str, local_id: &str) {
		// A relink replaces both directions of any previous row.
		if let Some(old_remote) = self.by_local.insert((backend.to_string(), local_id.to_string()), remote_id.to_string()) {
			self.by_remote.remove(&(backend.to_string(), old_remote));
		}
		if let Some(old_local) = self.by_remote.insert((backend.to_string(), remote_id.to_string()), local_id.to_string()) {
			if old_local != local_id {
				self.by_local.remove(&(backend.to_string(), old_local));
			}
		}
	}

	fn rows(&self) -> Vec<LinkRow> {
		let mut rows: Vec<LinkRow> = self
			.by_local
			.iter()
			.map(|((backend, local_id), remote_id)| LinkRow {
				backend: backend.clone(),
				remote_id: remote_id.clone(),
				local_id: local_id.clone(),
			})
			.collect();
		rows.sort_by(|a, b| (&a.backend, &a.local_id).cmp(&(&b.backend, &b.local_id)));
		rows
	}
}

/// Durable O(1) index over `(backend, remote_id) <-> local_id`.
#[derive(Debug)]
pub struct RemoteLinkIndex {
	path: PathBuf,
	inner: RwLock<LinkMaps>,
}

impl RemoteLinkIndex {
	/// Hydrate from the backing table. Missing or corrupted tables start
	/// empty; the table is rebuilt from frontmatter as entities are seen.
	pub fn load(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let mut maps = LinkMaps::default();
		match std::fs::read_to_string(&path) {
			Ok(content) => match serde_json::from_str::<Vec<LinkRow>>(&content) {
				Ok(rows) =>
					for row in rows {
						maps.insert(&row.backend, &row.remote_id, &row.local_id);
					},
				Err(e) => {
					tracing::warn!("[links] corrupted link table {}: {e}; rebuilding from frontmatter", path.display());
				}
			},
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => {
				tracing::warn!("[links] could not read link table {}: {e}", path.display());
			}
		}
		Self {
			path,
			inner: RwLock::new(maps),
		}
	}

	/// Record a link. Durable before returning.
	pub fn link(&self, backend: &str, remote_id: &str, local_id: &str) -> std::io::Result<()> {
		{
			let mut maps = self.inner.write().expect("link index lock poisoned");
			maps.insert(backend, remote_id, local_id);
		}
		self.persist()
	}

	/// Drop the link for a local id on one backend, if any.
	pub fn unlink_local(&self, local_id: &str, backend: &str) -> std::io::Result<()> {
		{
			let mut maps = self.inner.write().expect("link index lock poisoned");
			if let Some(remote_id) = maps.by_local.remove(&(backend.to_string(), local_id.to_string())) {
				maps.by_remote.remove(&(backend.to_string(), remote_id));
			}
		}
		self.persist()
	}

	pub fn get_remote_id(&self, backend: &str, local_id: &str) -> Option<String> {
		let maps = self.inner.read().expect("link index lock poisoned");
		maps.by_local.get(&(backend.to_string(), local_id.to_string())).cloned()
	}

	pub fn get_local_id(&self, backend: &str, remote_id: &str) -> Option<String> {
		let maps = self.inner.read().expect("link index lock poisoned");
		maps.by_remote.get(&(backend.to_string(), remote_id.to_string())).cloned()
	}

	/// local_id -> remote_id for every link on one backend.
	pub fn all_links_for_backend(&self, backend: &str) -> BTreeMap<String, String> {
		let maps = self.inner.read().expect("link index lock poisoned");
		maps.by_local
			.iter()
			.filter(|((b, _), _)| b == backend)
			.map(|((_, local_id), remote_id)| (local_id.clone(), remote_id.clone()))
			.collect()
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn persist(&self) -> std::io::Result<()> {
		let rows = {
			let maps = self.inner.read().expect("link index lock poisoned");
			maps.rows()
		};
		let json = serde_json::to_string_pretty(&rows).expect("link rows serialize");
		atomic_write(&self.path, &json)
	}
}
