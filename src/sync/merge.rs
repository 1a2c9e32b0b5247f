//! Three-way field merge.
//!
//! Given base (last agreed), local and remote versions of a field, the merge
//! either resolves cleanly or declares a conflict:
//!
//! - neither changed: take either
//! - only one side changed: take that side
//! - both changed to the same value: take it
//! - both changed differently: conflict, left for the resolver
//!
//! Everything here is pure; no I/O, no policy.

use std::collections::BTreeMap;

use crate::issue::{Priority, Status};

/// A field value in comparable form. `Absent` is distinct from empty text:
/// clearing a field and never setting it are different edits. Labels carry
/// their canonical (sorted, deduplicated) form.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldValue {
	Absent,
	Text(String),
	Status(Status),
	Priority(Priority),
	Labels(Vec<String>),
}

impl FieldValue {
	pub fn text(value: impl Into<String>) -> Self {
		FieldValue::Text(value.into())
	}

	pub fn opt_text(value: Option<impl Into<String>>) -> Self {
		match value {
			Some(v) => FieldValue::Text(v.into()),
			None => FieldValue::Absent,
		}
	}

	pub fn labels<I, S>(labels: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		FieldValue::Labels(crate::issue::canonical_labels(labels))
	}

	pub fn is_absent(&self) -> bool {
		matches!(self, FieldValue::Absent)
	}

	/// Human-readable form for reports and conflict listings.
	pub fn display(&self) -> String {
		match self {
			FieldValue::Absent => "<unset>".to_string(),
			FieldValue::Text(s) => s.clone(),
			FieldValue::Status(s) => s.as_str().to_string(),
			FieldValue::Priority(p) => p.as_str().to_string(),
			FieldValue::Labels(l) => l.join(", "),
		}
	}
}

/// The closed set of fields subject to synchronization. `title` is display
/// metadata and deliberately not part of the default set.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncField {
	Status,
	Priority,
	Content,
	Labels,
	Assignee,
}

impl SyncField {
	pub const DEFAULT: [SyncField; 5] = [SyncField::Status, SyncField::Priority, SyncField::Content, SyncField::Labels, SyncField::Assignee];

	pub fn name(&self) -> &'static str {
		match self {
			SyncField::Status => "status",
			SyncField::Priority => "priority",
			SyncField::Content => "content",
			SyncField::Labels => "labels",
			SyncField::Assignee => "assignee",
		}
	}
}

/// Field values of one issue version, keyed by sync field.
pub type FieldMap = BTreeMap<SyncField, FieldValue>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeStatus {
	Clean,
	Conflict,
}

/// Outcome of merging one field. `value` is None exactly when conflicted.
#[derive(Clone, Debug)]
pub struct FieldMergeResult {
	pub value: Option<FieldValue>,
	pub status: MergeStatus,
	pub reason: String,
}

impl FieldMergeResult {
	pub fn is_conflict(&self) -> bool {
		self.status == MergeStatus::Conflict
	}
}

/// Merge a single field using three-way logic. Equality is structural.
pub fn merge_field(name: &str, base: &FieldValue, local: &FieldValue, remote: &FieldValue) -> FieldMergeResult {
	if local == base && remote == base {
		return FieldMergeResult {
			value: Some(local.clone()),
			status: MergeStatus::Clean,
			reason: format!("{name}: no changes"),
		};
	}
	if local != base && remote == base {
		return FieldMergeResult {
			value: Some(local.clone()),
			status: MergeStatus::Clean,
			reason: format!("{name}: only local changed"),
		};
	}
	if remote != base && local == base {
		return FieldMergeResult {
			value: Some(remote.clone()),
			status: MergeStatus::Clean,
			reason: format!("{name}: only remote changed"),
		};
	}
	if local == remote {
		return FieldMergeResult {
			value: Some(local.clone()),
			status: MergeStatus::Clean,
			reason: format!("{name}: both changed to same value"),
		};
	}
	FieldMergeResult {
		value: None,
		status: MergeStatus::Conflict,
		reason: format!("{name}: both sides changed differently (base={}, local={}, remote={})", base.display(), local.display(), remote.display()),
	}
}

/// Merge all fields of one issue over the union of field names.
///
/// Conflicted fields are omitted from the merged map and returned separately
/// for the resolver; clean fields carry their merged value.
pub fn merge_issue(base: &FieldMap, local: &FieldMap, remote: &FieldMap) -> (FieldMap, Vec<SyncField>) {
	let mut merged = FieldMap::new();
	let mut conflicts = Vec::new();

	let mut fields: Vec<SyncField> = base.keys().chain(local.keys()).chain(remote.keys()).copied().collect();
	fields.sort();
	fields.dedup();

	for field in fields {
		let absent = FieldValue::Absent;
		let result = merge_field(
			field.name(),
			base.get(&field).unwrap_or(&absent),
			local.get(&field).unwrap_or(&absent),
			remote.get(&field).unwrap_or(&absent),
		);
		match result.value {
			Some(value) => {
				merged.insert(field, value);
			}
			None => conflicts.push(field),
		}
	}

	(merged, conflicts)
}

/// Batch outcome for one issue: merged fields plus conflicted field names.
pub type IssueMergeResult = (FieldMap, Vec<SyncField>);

/// Merge many issues at once.
///
/// An issue present in base and local but missing from remote was deleted
/// remotely: if the local side is unmodified since base it lands in
/// `deleted` (safe to retire locally); a locally modified issue instead goes
/// through the normal merge against an all-absent remote, which surfaces the
/// local edits as conflicts (local-edit vs remote-delete).
pub fn merge_issues(bases: &BTreeMap<String, FieldMap>, locals: &BTreeMap<String, FieldMap>, remotes: &BTreeMap<String, FieldMap>) -> (BTreeMap<String, IssueMergeResult>, Vec<String>) {
	let mut results = BTreeMap::new();
	let mut deleted = Vec::new();

	let mut ids: Vec<&String> = bases.keys().chain(locals.keys()).chain(remotes.keys()).collect();
	ids.sort();
	ids.dedup();

	let empty = FieldMap::new();
	for id in ids {
		let base = bases.get(id).unwrap_or(&empty);
		let local = locals.get(id).unwrap_or(&empty);
		let remote = remotes.get(id).unwrap_or(&empty);

		if !bases.contains_key(id) && local.is_empty() && remote.is_empty() {
			continue;
		}
		if bases.contains_key(id) && !remotes.contains_key(id) {
			let locally_modified = locals.contains_key(id) && local != base;
			if !locally_modified {
				deleted.push(id.clone());
				continue;
			}
		}

		results.insert(id.clone(), merge_issue(base, local, remote));
	}

	(results, deleted)
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	fn text(s: &str) -> FieldValue {
		FieldValue::text(s)
	}

	#[rstest]
	#[case::no_changes(text("a"), text("a"), text("a"), Some(text("a")))]
	#[case::only_local(text("a"), text("b"), text("a"), Some(text("b")))]
	#[case::only_remote(text("a"), text("a"), text("b"), Some(text("b")))]
	#[case::both_same(text("a"), text("b"), text("b"), Some(text("b")))]
	#[case::both_differ(text("a"), text("b"), text("c"), None)]
	fn merge_field_five_cases(#[case] base: FieldValue, #[case] local: FieldValue, #[case] remote: FieldValue, #[case] expected: Option<FieldValue>) {
		let result = merge_field("content", &base, &local, &remote);
		assert_eq!(result.value, expected);
		assert_eq!(result.is_conflict(), expected.is_none());
	}

	#[test]
	fn conflict_iff_both_changed_differently() {
		// Exhaustive over a small value domain: conflict exactly when
		// local != base && remote != base && local != remote.
		let domain = [FieldValue::Absent, text(""), text("x"), text("y")];
		for base in &domain {
			for local in &domain {
				for remote in &domain {
					let result = merge_field("f", base, local, remote);
					let expect_conflict = local != base && remote != base && local != remote;
					assert_eq!(result.is_conflict(), expect_conflict, "base={base:?} local={local:?} remote={remote:?}");
				}
			}
		}
	}

	#[test]
	fn field_values_render_for_reports() {
		insta::assert_snapshot!(FieldValue::labels(["b", "a", "a"]).display(), @"a, b");
		insta::assert_snapshot!(FieldValue::Absent.display(), @"<unset>");
		insta::assert_snapshot!(merge_field("status", &text("a"), &text("b"), &text("c")).reason, @"status: both sides changed differently (base=a, local=b, remote=c)");
	}

	#[test]
	fn none_and_empty_string_are_distinct() {
		let result = merge_field("assignee", &FieldValue::Absent, &text(""), &FieldValue::Absent);
		assert_eq!(result.value, Some(text("")));
		assert_eq!(result.reason, "assignee: only local changed");
	}

	#[test]
	fn label_permutations_merge_clean() {
		let base = FieldValue::labels(["bug", "urgent"]);
		let local = FieldValue::labels(["urgent", "bug"]);
		let remote = FieldValue::labels(["bug", "urgent", "bug"]);
		let result = merge_field("labels", &base, &local, &remote);
		assert!(!result.is_conflict());
		assert_eq!(result.reason, "labels: no changes");
	}

	#[test]
	fn merge_issue_omits_conflicted_fields() {
		let base = FieldMap::from([(SyncField::Status, FieldValue::Status(crate::issue::Status::Todo)), (SyncField::Content, text("old"))]);
		let local = FieldMap::from([(SyncField::Status, FieldValue::Status(crate::issue::Status::InProgress)), (SyncField::Content, text("local body"))]);
		let remote = FieldMap::from([(SyncField::Status, FieldValue::Status(crate::issue::Status::Closed)), (SyncField::Content, text("old"))]);

		let (merged, conflicts) = merge_issue(&base, &local, &remote);
		assert_eq!(conflicts, vec![SyncField::Status]);
		assert!(!merged.contains_key(&SyncField::Status));
		assert_eq!(merged.get(&SyncField::Content), Some(&text("local body")));
	}

	#[test]
	fn merge_issues_remote_delete_of_unmodified_issue() {
		let fields = FieldMap::from([(SyncField::Content, text("same"))]);
		let bases = BTreeMap::from([("a1".to_string(), fields.clone())]);
		let locals = BTreeMap::from([("a1".to_string(), fields)]);
		let remotes = BTreeMap::new();

		let (results, deleted) = merge_issues(&bases, &locals, &remotes);
		assert_eq!(deleted, vec!["a1".to_string()]);
		assert!(results.is_empty());
	}

	#[test]
	fn merge_issues_remote_delete_of_modified_issue_conflicts() {
		let bases = BTreeMap::from([("a1".to_string(), FieldMap::from([(SyncField::Content, text("base"))]))]);
		let locals = BTreeMap::from([("a1".to_string(), FieldMap::from([(SyncField::Content, text("edited"))]))]);
		let remotes = BTreeMap::new();

		let (results, deleted) = merge_issues(&bases, &locals, &remotes);
		assert!(deleted.is_empty());
		let (_, conflicts) = &results["a1"];
		assert_eq!(conflicts, &vec![SyncField::Content]);
	}
}
