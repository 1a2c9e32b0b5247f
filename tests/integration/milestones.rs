//! Milestone synchronization alongside the issue pipeline.

use roadmap::{Milestone, MilestoneStatus, sync::{RemoteMilestone, SyncStrategy}};

use crate::fixtures::SyncTestContext;

#[test]
fn local_only_milestone_is_pushed() {
	let ctx = SyncTestContext::new();
	let mut milestone = Milestone::new("v1.0").unwrap();
	milestone.description = "first cut".to_string();
	ctx.store.save_milestone(&milestone, false).unwrap();

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error, None);
	assert_eq!(report.milestones_pushed, 1);
	assert_eq!(ctx.mock.calls_matching("push_milestone"), 1);
	// The milestone file now records its remote id.
	let saved = ctx.store.load_all_milestones().entities["v1.0"].clone();
	assert!(saved.remote_id("gh").is_some());
}

#[test]
fn remote_only_milestone_is_pulled() {
	let ctx = SyncTestContext::new();
	ctx.mock.insert_milestone(RemoteMilestone {
		remote_key: "5".to_string(),
		name: "v2.0".to_string(),
		description: "next".to_string(),
		state: "open".to_string(),
		due_date: None,
		updated_at: None,
	});

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error, None);
	assert_eq!(report.milestones_pulled, 1);
	let saved = ctx.store.load_all_milestones().entities["v2.0"].clone();
	assert_eq!(saved.status, MilestoneStatus::Open);
	assert_eq!(saved.description, "next");
	assert_eq!(saved.remote_id("gh"), Some("5"));
}

#[test]
fn diverged_milestone_state_is_pushed_local_wins() {
	let ctx = SyncTestContext::new();
	let mut milestone = Milestone::new("v1.0").unwrap();
	milestone.status = MilestoneStatus::Closed;
	milestone.remote_ids.insert("gh".to_string(), "5".to_string());
	ctx.store.save_milestone(&milestone, false).unwrap();
	ctx.mock.insert_milestone(RemoteMilestone {
		remote_key: "5".to_string(),
		name: "v1.0".to_string(),
		description: String::new(),
		state: "open".to_string(),
		due_date: None,
		updated_at: None,
	});

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error, None);
	assert_eq!(report.milestones_pushed, 1);
	assert_eq!(ctx.mock.milestone("5").unwrap().state, "closed");
}

#[test]
fn matched_identical_milestones_do_nothing() {
	let ctx = SyncTestContext::new();
	let mut milestone = Milestone::new("v1.0").unwrap();
	milestone.remote_ids.insert("gh".to_string(), "5".to_string());
	ctx.store.save_milestone(&milestone, false).unwrap();
	ctx.mock.insert_milestone(RemoteMilestone {
		remote_key: "5".to_string(),
		name: "v1.0".to_string(),
		description: String::new(),
		state: "open".to_string(),
		due_date: None,
		updated_at: None,
	});

	let report = ctx.run(SyncStrategy::KeepLocal, false);

	assert_eq!(report.error, None);
	assert_eq!(report.milestones_pushed, 0);
	assert_eq!(report.milestones_pulled, 0);
	assert_eq!(ctx.mock.calls_matching("push_milestone"), 0);
}
