//! Milestone domain type.
//!
//! Milestones group issues and are keyed by name (unique within the store).
//! They carry the same remote-link and sync bookkeeping as issues.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::issue::{MAX_TITLE_LEN, SyncMetadata, ValidationError};

/// Open/closed state of a milestone.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "kebab-case")]
pub enum MilestoneStatus {
	#[default]
	#[display("open")]
	Open,
	#[display("closed")]
	Closed,
}

impl MilestoneStatus {
	pub const ALL: [MilestoneStatus; 2] = [MilestoneStatus::Open, MilestoneStatus::Closed];

	pub fn as_str(&self) -> &'static str {
		match self {
			MilestoneStatus::Open => "open",
			MilestoneStatus::Closed => "closed",
		}
	}

	pub fn from_canonical(s: &str) -> Option<Self> {
		Self::ALL.iter().copied().find(|v| v.as_str() == s)
	}

	/// Normalize a state string from a remote: exact match, then lowercase.
	pub fn normalize(s: &str) -> Option<Self> {
		Self::from_canonical(s).or_else(|| Self::from_canonical(&s.trim().to_lowercase()))
	}

	pub fn valid_values() -> String {
		Self::ALL.iter().map(|v| v.as_str()).collect::<Vec<_>>().join(", ")
	}
}

/// A milestone grouping issues. `name` doubles as the logical foreign key
/// referenced by `Issue::milestone` (not enforced by the store).
#[derive(Clone, Debug, PartialEq)]
pub struct Milestone {
	pub name: String,
	pub description: String,
	pub content: String,
	pub status: MilestoneStatus,
	pub created: Timestamp,
	pub updated: Timestamp,
	pub due_date: Option<Timestamp>,
	pub remote_ids: BTreeMap<String, String>,
	pub sync_metadata: BTreeMap<String, SyncMetadata>,
}

impl Milestone {
	pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
		let name = name.into();
		let now = Timestamp::now();
		let milestone = Self {
			name,
			description: String::new(),
			content: String::new(),
			status: MilestoneStatus::default(),
			created: now,
			updated: now,
			due_date: None,
			remote_ids: BTreeMap::new(),
			sync_metadata: BTreeMap::new(),
		};
		milestone.validate()?;
		Ok(milestone)
	}

	pub fn validate(&self) -> Result<(), ValidationError> {
		if self.name.trim().is_empty() {
			return Err(ValidationError::Empty { field: "name" });
		}
		if self.name.chars().count() > MAX_TITLE_LEN {
			return Err(ValidationError::TooLong {
				field: "name",
				max: MAX_TITLE_LEN,
				got: self.name.chars().count(),
			});
		}
		Ok(())
	}

	pub fn remote_id(&self, backend: &str) -> Option<&str> {
		self.remote_ids.get(backend).map(String::as_str)
	}

	pub fn record_sync(&mut self, backend: &str, remote_id: impl Into<String>, remote_updated: Option<Timestamp>) {
		self.remote_ids.insert(backend.to_string(), remote_id.into());
		self.sync_metadata.insert(backend.to_string(), SyncMetadata {
			last_synced: Some(Timestamp::now()),
			remote_updated,
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn milestone_new_validates_name() {
		assert!(Milestone::new("v1.0").is_ok());
		assert_eq!(Milestone::new("").unwrap_err(), ValidationError::Empty { field: "name" });
	}

	#[test]
	fn status_normalization() {
		assert_eq!(MilestoneStatus::normalize("OPEN"), Some(MilestoneStatus::Open));
		assert_eq!(MilestoneStatus::normalize("closed"), Some(MilestoneStatus::Closed));
		assert_eq!(MilestoneStatus::normalize("archived"), None);
	}
}
