//! End-to-end sync runs through the orchestrator against the mock backend.
//!
//! Covers the full classification/resolution/apply pipeline: new-local push,
//! new-remote pull, conflicts under each strategy, remote-delete handling,
//! dry-run purity, and failure containment.

use roadmap::{
	Status,
	metrics::InMemoryMetrics,
	sync::{CancelToken, Classification, IssueBaseState, SyncOptions, SyncStrategy},
};

use crate::fixtures::{SyncTestContext, block_on, ts};

#[test]
fn new_local_issue_is_pushed_and_linked() {
	let ctx = SyncTestContext::new();
	let issue = ctx.seed_local("Fix", |i| {
		i.labels = vec!["bug".to_string()];
	});

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error, None);
	assert_eq!(report.issues_pushed, 1);
	assert_eq!(report.issues_needs_push, 0);
	assert_eq!(report.issues_up_to_date, 1);
	assert_eq!(ctx.mock.calls_matching("push_issue"), 1);

	// The mock assigns 42 to the first created issue.
	assert_eq!(ctx.links().get_remote_id("gh", &issue.id), Some("42".to_string()));
	let saved = ctx.store.load_issue(&issue.id).unwrap();
	assert_eq!(saved.remote_id("gh"), Some("42"));
	assert_eq!(ctx.baseline()[&issue.id].status, Status::Todo);
	assert_eq!(ctx.mock.issue("42").unwrap().title, "Fix");
}

#[test]
fn new_local_issue_dry_run_only_reports() {
	let ctx = SyncTestContext::new();
	ctx.seed_local("Fix", |_| {});

	let report = ctx.run(SyncStrategy::KeepLocal, true);

	assert_eq!(report.error, None);
	assert_eq!(report.issues_needs_push, 1);
	assert_eq!(report.issues_pushed, 0);
	assert_eq!(report.conflicts_detected, 0);
	assert_eq!(ctx.mock.calls_matching("push_issue"), 0);
	assert!(ctx.baseline().is_empty());
}

#[test]
fn new_remote_issue_is_pulled_and_linked() {
	let ctx = SyncTestContext::new();
	ctx.seed_remote("7", "Bug", "in-progress", |_| {});

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error, None);
	assert_eq!(report.issues_pulled, 1);
	assert_eq!(report.issues_needs_pull, 0);

	let loaded = ctx.store.load_all_issues(false);
	assert_eq!(loaded.entities.len(), 1);
	let pulled = loaded.entities.values().next().unwrap();
	assert_eq!(pulled.title, "Bug");
	assert_eq!(pulled.status, Status::InProgress);
	assert_eq!(pulled.remote_id("gh"), Some("7"));
	assert_eq!(ctx.links().get_local_id("gh", "7"), Some(pulled.id.clone()));
	assert!(ctx.baseline().contains_key(&pulled.id));
}

fn conflict_fixture(ctx: &SyncTestContext, local_updated: &str, remote_updated: &str) -> roadmap::Issue {
	let issue = ctx.seed_local("Hot path", |i| {
		i.status = Status::InProgress;
		i.updated = ts(local_updated);
		i.remote_ids.insert("gh".to_string(), "42".to_string());
	});
	let mut base = IssueBaseState::of_issue(&issue);
	base.status = Status::Todo;
	ctx.seed_baseline(base);
	ctx.seed_remote("42", "Hot path", "closed", |r| {
		r.updated_at = Some(ts(remote_updated));
	});
	issue
}

#[test]
fn conflict_resolved_keep_remote_pulls_without_pushing() {
	let ctx = SyncTestContext::new();
	let issue = conflict_fixture(&ctx, "2024-05-01T10:00:00Z", "2024-05-01T11:00:00Z");

	let report = ctx.run(SyncStrategy::KeepRemote, false);

	assert_eq!(report.error, None);
	assert_eq!(report.conflicts_detected, 1);
	assert_eq!(report.conflicts_resolved, 1);
	assert_eq!(report.exit_code(), 0);
	assert_eq!(ctx.mock.calls_matching("push_issue"), 0);
	assert_eq!(ctx.store.load_issue(&issue.id).unwrap().status, Status::Closed);
	assert_eq!(ctx.baseline()[&issue.id].status, Status::Closed);
}

#[test]
fn conflict_auto_merge_prefers_newer_local_and_pushes() {
	let ctx = SyncTestContext::new();
	let issue = conflict_fixture(&ctx, "2024-05-01T12:00:00Z", "2024-05-01T11:00:00Z");

	let report = ctx.run(SyncStrategy::Auto, false);

	assert_eq!(report.error, None);
	assert_eq!(report.conflicts_resolved, 1);
	assert_eq!(ctx.mock.calls_matching("push_issue"), 1);
	assert_eq!(ctx.mock.issue("42").unwrap().status, "in-progress");
	assert_eq!(ctx.store.load_issue(&issue.id).unwrap().status, Status::InProgress);
	assert_eq!(ctx.baseline()[&issue.id].status, Status::InProgress);
}

#[test]
fn applied_issue_converges_on_all_sync_fields() {
	// After a successful apply, baseline == local == remote projected onto
	// the synced fields.
	let ctx = SyncTestContext::new();
	let issue = conflict_fixture(&ctx, "2024-05-01T12:00:00Z", "2024-05-01T11:00:00Z");

	ctx.run(SyncStrategy::Auto, false);

	let local = ctx.store.load_issue(&issue.id).unwrap();
	let remote = ctx.mock.issue("42").unwrap();
	let base = &ctx.baseline()[&issue.id];
	assert_eq!(local.status, base.status);
	assert_eq!(remote.status, base.status.as_str());
	assert_eq!(local.content, base.content);
	assert_eq!(remote.content, base.content);
	assert_eq!(roadmap::issue::canonical_labels(remote.labels.clone()), base.labels);
}

#[test]
fn manual_strategy_reports_and_leaves_both_sides() {
	let ctx = SyncTestContext::new();
	let issue = conflict_fixture(&ctx, "2024-05-01T10:00:00Z", "2024-05-01T11:00:00Z");

	let report = ctx.run(SyncStrategy::Manual, false);

	assert_eq!(report.error, None);
	assert_eq!(report.conflicts_detected, 1);
	assert_eq!(report.conflicts_resolved, 0);
	assert_eq!(report.exit_code(), 1);
	assert_eq!(ctx.mock.calls_matching("push_issue"), 0);
	assert_eq!(ctx.store.load_issue(&issue.id).unwrap().status, Status::InProgress);
	assert_eq!(ctx.mock.issue("42").unwrap().status, "closed");
	assert_eq!(ctx.baseline()[&issue.id].status, Status::Todo);

	let change = report.changes.iter().find(|c| c.issue_id == issue.id).unwrap();
	assert_eq!(change.classification, Classification::BothChanged);
	assert_eq!(change.conflicted_fields, vec!["status"]);
}

#[test]
fn label_permutation_is_not_a_change() {
	let ctx = SyncTestContext::new();
	let issue = ctx.seed_local("Labels", |i| {
		i.labels = vec!["urgent".to_string(), "bug".to_string()];
		i.remote_ids.insert("gh".to_string(), "42".to_string());
	});
	let base = IssueBaseState::of_issue(&issue);
	assert_eq!(base.labels, vec!["bug".to_string(), "urgent".to_string()]);
	ctx.seed_baseline(base);
	ctx.seed_remote("42", "Labels", "todo", |r| {
		r.labels = vec!["bug".to_string(), "urgent".to_string()];
	});

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error, None);
	assert_eq!(report.issues_up_to_date, 1);
	assert_eq!(report.issues_pushed, 0);
	assert_eq!(report.issues_pulled, 0);
	assert_eq!(ctx.mock.calls_matching("push_issue"), 0);
	assert_eq!(ctx.baseline()[&issue.id].labels, vec!["bug".to_string(), "urgent".to_string()]);
}

#[test]
fn remote_delete_vs_local_edit_is_a_manual_conflict() {
	let ctx = SyncTestContext::new();
	let issue = ctx.seed_local("Edited then deleted", |i| {
		i.status = Status::InProgress;
		i.remote_ids.insert("gh".to_string(), "42".to_string());
	});
	let mut base = IssueBaseState::of_issue(&issue);
	base.status = Status::Todo;
	ctx.seed_baseline(base);
	// Remote side has no issue 42 at all.

	let report = ctx.run(SyncStrategy::Manual, false);

	assert_eq!(report.error, None);
	assert_eq!(report.conflicts_detected, 1);
	assert_eq!(report.conflicts_resolved, 0);
	let change = report.changes.iter().find(|c| c.issue_id == issue.id).unwrap();
	assert_eq!(change.classification, Classification::BothChanged);
	assert_eq!(change.reason.as_deref(), Some("remote deleted vs local edit"));
	// Nothing applied, baseline untouched.
	assert_eq!(ctx.mock.calls_matching("push_issue"), 0);
	assert_eq!(ctx.baseline()[&issue.id].status, Status::Todo);
	assert_eq!(ctx.store.load_issue(&issue.id).unwrap().status, Status::InProgress);
}

#[test]
fn remote_delete_vs_local_edit_keep_local_recreates_remotely() {
	let ctx = SyncTestContext::new();
	let issue = ctx.seed_local("Edited then deleted", |i| {
		i.status = Status::InProgress;
		i.remote_ids.insert("gh".to_string(), "99".to_string());
	});
	let mut base = IssueBaseState::of_issue(&issue);
	base.status = Status::Todo;
	ctx.seed_baseline(base);

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error, None);
	assert_eq!(report.conflicts_resolved, 1);
	// Pushed as a brand new remote issue and relinked.
	let saved = ctx.store.load_issue(&issue.id).unwrap();
	let new_key = saved.remote_id("gh").unwrap().to_string();
	assert_ne!(new_key, "99");
	assert_eq!(ctx.mock.issue(&new_key).unwrap().status, "in-progress");
	assert_eq!(ctx.links().get_local_id("gh", &new_key), Some(issue.id.clone()));
}

#[test]
fn remote_delete_of_unmodified_issue_archives_locally() {
	let ctx = SyncTestContext::new();
	let issue = ctx.seed_local("Quietly removed", |i| {
		i.remote_ids.insert("gh".to_string(), "42".to_string());
	});
	ctx.seed_baseline(IssueBaseState::of_issue(&issue));

	let report = ctx.run(SyncStrategy::Manual, false);

	assert_eq!(report.error, None);
	assert_eq!(report.conflicts_detected, 0);
	let archived = ctx.store.load_issue(&issue.id).unwrap();
	assert_eq!(archived.status, Status::Archived);
	assert_eq!(archived.remote_id("gh"), None);
	assert!(!ctx.baseline().contains_key(&issue.id));
	assert_eq!(ctx.links().get_local_id("gh", "42"), None);
}

#[test]
fn dry_run_leaves_disk_bit_identical() {
	let ctx = SyncTestContext::new();
	// A mixed scenario: pending push, pending pull, and a conflict.
	ctx.seed_local("Pending push", |_| {});
	ctx.seed_remote("7", "Pending pull", "todo", |_| {});
	conflict_fixture(&ctx, "2024-05-01T10:00:00Z", "2024-05-01T11:00:00Z");

	let before = ctx.disk_snapshot();
	for strategy in [SyncStrategy::KeepLocal, SyncStrategy::KeepRemote, SyncStrategy::Auto, SyncStrategy::Manual] {
		let report = ctx.run(strategy, true);
		assert_eq!(report.error, None);
		assert_eq!(ctx.disk_snapshot(), before, "dry run with {strategy:?} touched the store");
	}
	assert_eq!(ctx.mock.calls_matching("push_issue"), 0);
	assert_eq!(ctx.mock.calls_matching("pull_issue"), 0);
}

#[test]
fn auth_failure_aborts_with_fatal_report() {
	let ctx = SyncTestContext::new();
	ctx.mock.deny_auth();
	ctx.seed_local("Never synced", |_| {});

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error.as_deref(), Some("authentication failed"));
	assert_eq!(report.exit_code(), 2);
	assert_eq!(ctx.mock.calls_matching("get_issues"), 0);
}

#[test]
fn enumerate_failure_aborts_with_fatal_report() {
	let ctx = SyncTestContext::new();
	ctx.mock.fail_enumerate();

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error.as_deref(), Some("failed to fetch remote issues"));
	assert_eq!(report.exit_code(), 2);
}

#[test]
fn per_issue_push_failure_does_not_abort_the_run() {
	let ctx = SyncTestContext::new();
	let doomed = ctx.seed_local("Doomed", |_| {});
	let fine = ctx.seed_local("Fine", |_| {});
	ctx.mock.fail_push_of("Doomed");

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error, None);
	assert_eq!(report.issues_pushed, 1);
	assert!(report.errors.contains_key(&doomed.id));
	assert_eq!(report.exit_code(), 1);
	// The healthy issue still converged and got a baseline.
	assert!(ctx.baseline().contains_key(&fine.id));
	assert!(!ctx.baseline().contains_key(&doomed.id));
}

#[test]
fn malformed_local_file_is_reported_and_skipped() {
	let ctx = SyncTestContext::new();
	ctx.seed_local("Good", |_| {});
	std::fs::write(ctx.store.issues_dir().join("bad.md"), "---\nid: bad00000\ntitle: Bad\nstatus: wat\n---\n").unwrap();

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error, None);
	assert_eq!(report.issues_pushed, 1);
	assert_eq!(report.errors.len(), 1);
	let message = report.errors.values().next().unwrap();
	assert!(message.contains("valid values"), "{message}");
}

#[test]
fn metrics_record_push_and_pull_counts() {
	let ctx = SyncTestContext::new();
	ctx.seed_local("Tracked", |_| {});
	ctx.seed_remote("7", "Incoming", "todo", |_| {});

	let metrics = InMemoryMetrics::new();
	let orchestrator = ctx.orchestrator().with_metrics(metrics.clone());
	let opts = SyncOptions {
		strategy: SyncStrategy::KeepLocal,
		..Default::default()
	};
	let report = block_on(orchestrator.run(&opts));

	assert_eq!(report.error, None);
	assert_eq!(metrics.get("sync.runs"), 1);
	assert_eq!(metrics.get("sync.pushed"), 1);
	assert_eq!(metrics.get("sync.pulled"), 1);
	assert_eq!(metrics.get("sync.apply_failures"), 0);
}

#[test]
fn cancellation_takes_effect_at_stage_boundaries() {
	let ctx = SyncTestContext::new();
	ctx.seed_local("Never applied", |_| {});
	let cancel = CancelToken::new();
	cancel.cancel();

	let orchestrator = ctx.orchestrator().with_cancel(cancel);
	let opts = SyncOptions {
		strategy: SyncStrategy::KeepLocal,
		..Default::default()
	};
	let report = block_on(orchestrator.run(&opts));

	assert_eq!(report.error.as_deref(), Some("sync cancelled"));
	assert_eq!(ctx.mock.calls_matching("push_issue"), 0);
	assert!(ctx.baseline().is_empty());
}

#[test]
fn baseline_row_is_durable_before_the_run_ends() {
	// Cut the run short immediately after the issue's apply section, the
	// way a crash between apply and the end of the run would: the pushed
	// issue's baseline row must already be on disk.
	let ctx = SyncTestContext::new();
	let issue = ctx.seed_local("Survivor", |_| {});
	let cancel = CancelToken::new();
	ctx.mock.cancel_after_push(cancel.clone());

	let orchestrator = ctx.orchestrator().with_cancel(cancel);
	let opts = SyncOptions {
		strategy: SyncStrategy::KeepLocal,
		..Default::default()
	};
	let report = block_on(orchestrator.run(&opts));

	// The run died at the next stage boundary, before the milestone pass.
	assert_eq!(report.error.as_deref(), Some("sync cancelled"));
	assert_eq!(ctx.mock.calls_matching("get_milestones"), 0);
	// The completed apply section had already persisted its baseline, so
	// the next run converges instead of reporting a spurious conflict.
	assert_eq!(ctx.baseline()[&issue.id].status, Status::Todo);
	let rerun = ctx.run(SyncStrategy::Manual, false);
	assert_eq!(rerun.error, None);
	assert_eq!(rerun.conflicts_detected, 0);
	assert_eq!(rerun.issues_up_to_date, 1);
}

#[test]
fn second_run_after_convergence_is_all_up_to_date() {
	let ctx = SyncTestContext::new();
	ctx.seed_local("Round trip", |i| {
		i.labels = vec!["bug".to_string()];
	});
	ctx.seed_remote("9", "From remote", "done", |_| {});

	let first = ctx.run(SyncStrategy::KeepLocal, false);
	assert_eq!(first.error, None);
	assert_eq!(first.issues_pushed, 1);
	assert_eq!(first.issues_pulled, 1);

	let second = ctx.run(SyncStrategy::KeepLocal, false);
	assert_eq!(second.error, None);
	assert_eq!(second.issues_pushed, 0);
	assert_eq!(second.issues_pulled, 0);
	assert_eq!(second.conflicts_detected, 0);
	assert_eq!(second.issues_up_to_date, 2);
}
