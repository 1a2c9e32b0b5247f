//! Conflict resolution strategies.
//!
//! Operates after the three-way merger: clean fields are taken as-is, and
//! only the truly conflicted fields are put to the selected strategy.

use jiff::Timestamp;

use crate::sync::merge::{FieldMap, FieldValue, SyncField};

/// Named policy for resolving a both-changed item.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, clap::ValueEnum, serde::Serialize, derive_more::Display)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStrategy {
	/// Merged result is the local side; push to remote during apply.
	#[display("keep-local")]
	KeepLocal,
	/// Merged result is the remote side; pull to local during apply.
	#[display("keep-remote")]
	KeepRemote,
	/// Pick the side whose `updated_at` is strictly newer. Ties and a
	/// missing remote timestamp keep local.
	#[display("auto")]
	Auto,
	/// Do not resolve; report the conflict and leave both sides unchanged.
	#[default]
	#[display("manual")]
	Manual,
}

/// Which side a resolved field came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
	Local,
	Remote,
}

/// One conflicted field with full three-way context for the report.
#[derive(Clone, Debug)]
pub struct ConflictField {
	pub field: SyncField,
	pub local_value: FieldValue,
	pub remote_value: FieldValue,
	pub local_updated: Option<Timestamp>,
	pub remote_updated: Option<Timestamp>,
}

/// A both-changed issue put to the resolver. Timestamps are aggregates for
/// the whole entity; the strategy picks one side for all conflicted fields.
#[derive(Clone, Debug)]
pub struct Conflict {
	pub issue_id: String,
	pub fields: Vec<ConflictField>,
	pub local_updated: Option<Timestamp>,
	pub remote_updated: Option<Timestamp>,
}

impl Conflict {
	pub fn field_names(&self) -> Vec<&'static str> {
		self.fields.iter().map(|f| f.field.name()).collect()
	}
}

/// Outcome of putting a conflict to a strategy.
#[derive(Clone, Debug)]
pub struct Resolution {
	/// Clean fields plus strategy-resolved fields. For an unresolved
	/// conflict this holds only the clean fields.
	pub merged: FieldMap,
	/// The side that won the conflicted fields, when resolved.
	pub winner: Option<Side>,
	pub resolved: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ConflictResolver;

impl ConflictResolver {
	/// Resolve `conflict` on top of the merger's clean fields.
	pub fn resolve(&self, conflict: &Conflict, clean: &FieldMap, strategy: SyncStrategy) -> Resolution {
		let side = match strategy {
			SyncStrategy::KeepLocal => Side::Local,
			SyncStrategy::KeepRemote => Side::Remote,
			SyncStrategy::Auto => match (conflict.local_updated, conflict.remote_updated) {
				(Some(local), Some(remote)) if remote > local => Side::Remote,
				// Ties and missing remote timestamps keep local.
				_ => Side::Local,
			},
			SyncStrategy::Manual => {
				tracing::debug!("[resolve] leaving {} unresolved ({} conflicted fields)", conflict.issue_id, conflict.fields.len());
				return Resolution {
					merged: clean.clone(),
					winner: None,
					resolved: false,
				};
			}
		};

		let mut merged = clean.clone();
		for field in &conflict.fields {
			let value = match side {
				Side::Local => field.local_value.clone(),
				Side::Remote => field.remote_value.clone(),
			};
			merged.insert(field.field, value);
		}
		tracing::debug!("[resolve] {} resolved via {:?} for fields {:?}", conflict.issue_id, side, conflict.field_names());
		Resolution {
			merged,
			winner: Some(side),
			resolved: true,
		}
	}
}
