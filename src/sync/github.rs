//! GitHub backend for the sync engine.
//!
//! Talks to the GitHub REST API. GitHub only has open/closed issue states,
//! so the richer local status and the priority ride on `status:<value>` and
//! `priority:<value>` labels; the remaining labels pass through untouched.

use std::{
	collections::HashMap,
	sync::{Arc, Mutex},
};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::{
	issue::{Issue, Status, parse_timestamp},
	milestone::Milestone,
	sync::backend::{BackendError, BoxedSyncBackend, PushOutcome, RemoteIssue, RemoteMilestone, SyncBackend},
};

const API_ROOT: &str = "https://api.github.com";
const STATUS_LABEL_PREFIX: &str = "status:";
const PRIORITY_LABEL_PREFIX: &str = "priority:";

#[derive(Debug, Deserialize)]
struct GhIssue {
	number: u64,
	title: String,
	body: Option<String>,
	labels: Vec<GhLabel>,
	state: String, // "open" or "closed"
	assignee: Option<GhUser>,
	milestone: Option<GhMilestone>,
	updated_at: Option<String>,
	/// Present when the "issue" is actually a pull request.
	pull_request: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
	name: String,
}

#[derive(Clone, Debug, Deserialize)]
struct GhUser {
	login: String,
}

#[derive(Debug, Deserialize)]
struct GhMilestone {
	number: u64,
	title: String,
	description: Option<String>,
	state: String,
	due_on: Option<String>,
	updated_at: Option<String>,
}

/// Backend over one GitHub repository.
pub struct GithubBackend {
	name: String,
	client: Client,
	token: String,
	owner: String,
	repo: String,
	/// Authenticate is idempotent; the verdict is cached for the run.
	auth_cache: Mutex<Option<bool>>,
}

impl GithubBackend /*{{{1*/ {
	pub fn new(name: impl Into<String>, token: impl Into<String>, owner: impl Into<String>, repo: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			client: Client::new(),
			token: token.into(),
			owner: owner.into(),
			repo: repo.into(),
			auth_cache: Mutex::new(None),
		}
	}

	pub fn boxed(self) -> BoxedSyncBackend {
		Arc::new(self)
	}

	pub fn owner(&self) -> &str {
		&self.owner
	}

	pub fn repo(&self) -> &str {
		&self.repo
	}

	fn repo_url(&self, tail: &str) -> String {
		format!("{API_ROOT}/repos/{}/{}/{tail}", self.owner, self.repo)
	}

	fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
		self.client
			.request(method, url)
			.header("User-Agent", "roadmap-sync")
			.header("Accept", "application/vnd.github+json")
			.header("Authorization", format!("token {}", self.token))
	}

	async fn check(&self, res: reqwest::Response, context: &str) -> Result<reqwest::Response, BackendError> {
		let status = res.status();
		if status.is_success() {
			return Ok(res);
		}
		let body = res.text().await.unwrap_or_default();
		Err(match status.as_u16() {
			401 => BackendError::Auth(format!("{context}: {status}")),
			403 if body.contains("rate limit") => BackendError::RateLimited(format!("{context}: {body}")),
			403 => BackendError::Auth(format!("{context}: {status} - {body}")),
			404 => BackendError::NotFound(context.to_string()),
			422 => BackendError::Validation(format!("{context}: {body}")),
			_ => BackendError::Transport(format!("{context}: {status} - {body}")),
		})
	}

	fn to_remote_issue(&self, issue: GhIssue) -> RemoteIssue {
		let mut status = None;
		let mut priority = None;
		let mut labels = Vec::new();
		for label in issue.labels {
			if let Some(value) = label.name.strip_prefix(STATUS_LABEL_PREFIX) {
				status = Some(value.to_string());
			} else if let Some(value) = label.name.strip_prefix(PRIORITY_LABEL_PREFIX) {
				priority = Some(value.to_string());
			} else {
				labels.push(label.name);
			}
		}
		// Without a status label, the binary open/closed state is all GitHub knows.
		let status = status.unwrap_or_else(|| if issue.state == "closed" { "closed".to_string() } else { "todo".to_string() });
		RemoteIssue {
			remote_key: issue.number.to_string(),
			title: issue.title,
			status,
			priority,
			content: issue.body.unwrap_or_default(),
			labels,
			assignee: issue.assignee.map(|u| u.login),
			milestone: issue.milestone.map(|m| m.title),
			updated_at: issue.updated_at.as_deref().and_then(parse_timestamp),
		}
	}

	fn to_remote_milestone(m: GhMilestone) -> RemoteMilestone {
		RemoteMilestone {
			remote_key: m.number.to_string(),
			name: m.title,
			description: m.description.unwrap_or_default(),
			state: m.state,
			due_date: m.due_on.as_deref().and_then(parse_timestamp),
			updated_at: m.updated_at.as_deref().and_then(parse_timestamp),
		}
	}

	fn issue_labels(issue: &Issue) -> Vec<String> {
		let mut labels = issue.labels.clone();
		labels.push(format!("{STATUS_LABEL_PREFIX}{}", issue.status.as_str()));
		labels.push(format!("{PRIORITY_LABEL_PREFIX}{}", issue.priority.as_str()));
		labels
	}

	fn gh_state(status: Status) -> &'static str {
		match status {
			Status::Closed | Status::Archived => "closed",
			_ => "open",
		}
	}
}
//,}}}1

#[async_trait]
impl SyncBackend for GithubBackend /*{{{1*/ {
	fn name(&self) -> &str {
		&self.name
	}

	async fn authenticate(&self) -> Result<bool, BackendError> {
		if let Some(cached) = *self.auth_cache.lock().expect("auth cache lock poisoned") {
			return Ok(cached);
		}
		let res = self.request(reqwest::Method::GET, &format!("{API_ROOT}/user")).send().await?;
		let ok = res.status().is_success();
		if !ok {
			tracing::warn!("[github] authentication check failed: {}", res.status());
		}
		*self.auth_cache.lock().expect("auth cache lock poisoned") = Some(ok);
		Ok(ok)
	}

	async fn get_issues(&self) -> Result<HashMap<String, RemoteIssue>, BackendError> {
		let mut out = HashMap::new();
		let mut page = 1u32;
		loop {
			let url = self.repo_url(&format!("issues?state=all&per_page=100&page={page}"));
			let res = self.request(reqwest::Method::GET, &url).send().await?;
			let res = self.check(res, "fetch issues").await?;
			let batch = res.json::<Vec<GhIssue>>().await?;
			if batch.is_empty() {
				break;
			}
			let len = batch.len();
			for issue in batch {
				// The issues endpoint also returns pull requests.
				if issue.pull_request.is_some() {
					continue;
				}
				let remote = self.to_remote_issue(issue);
				out.insert(remote.remote_key.clone(), remote);
			}
			if len < 100 {
				break;
			}
			page += 1;
		}
		Ok(out)
	}

	async fn push_issue(&self, issue: &Issue) -> Result<PushOutcome, BackendError> {
		let labels = Self::issue_labels(issue);
		let assignees: Vec<&str> = issue.assignee.as_deref().into_iter().collect();
		match issue.remote_id(&self.name) {
			Some(remote_key) => {
				let url = self.repo_url(&format!("issues/{remote_key}"));
				let payload = serde_json::json!({
					"title": issue.title,
					"body": issue.content,
					"state": Self::gh_state(issue.status),
					"labels": labels,
					"assignees": assignees,
				});
				let res = self.request(reqwest::Method::PATCH, &url).json(&payload).send().await?;
				self.check(res, &format!("update issue {remote_key}")).await?;
				Ok(PushOutcome {
					remote_key: remote_key.to_string(),
					created: false,
				})
			}
			None => {
				let url = self.repo_url("issues");
				let payload = serde_json::json!({
					"title": issue.title,
					"body": issue.content,
					"labels": labels,
					"assignees": assignees,
				});
				let res = self.request(reqwest::Method::POST, &url).json(&payload).send().await?;
				let res = self.check(res, "create issue").await?;
				let created = res.json::<GhIssue>().await?;
				let number = created.number;
				if Self::gh_state(issue.status) == "closed" {
					self.update_state(&number.to_string(), issue.status).await?;
				}
				Ok(PushOutcome {
					remote_key: number.to_string(),
					created: true,
				})
			}
		}
	}

	async fn pull_issue(&self, remote_key: &str) -> Result<RemoteIssue, BackendError> {
		let url = self.repo_url(&format!("issues/{remote_key}"));
		let res = self.request(reqwest::Method::GET, &url).send().await?;
		let res = self.check(res, &format!("fetch issue {remote_key}")).await?;
		let issue = res.json::<GhIssue>().await?;
		Ok(self.to_remote_issue(issue))
	}

	async fn update_state(&self, remote_key: &str, state: Status) -> Result<(), BackendError> {
		let url = self.repo_url(&format!("issues/{remote_key}"));
		let payload = serde_json::json!({ "state": Self::gh_state(state) });
		let res = self.request(reqwest::Method::PATCH, &url).json(&payload).send().await?;
		self.check(res, &format!("update state of issue {remote_key}")).await?;
		Ok(())
	}

	async fn get_milestones(&self) -> Result<HashMap<String, RemoteMilestone>, BackendError> {
		let url = self.repo_url("milestones?state=all&per_page=100");
		let res = self.request(reqwest::Method::GET, &url).send().await?;
		let res = self.check(res, "fetch milestones").await?;
		let milestones = res.json::<Vec<GhMilestone>>().await?;
		Ok(milestones.into_iter().map(Self::to_remote_milestone).map(|m| (m.remote_key.clone(), m)).collect())
	}

	async fn push_milestone(&self, milestone: &Milestone) -> Result<PushOutcome, BackendError> {
		let payload = serde_json::json!({
			"title": milestone.name,
			"description": milestone.description,
			"state": milestone.status.as_str(),
			"due_on": milestone.due_date.map(|t| t.to_string()),
		});
		match milestone.remote_id(&self.name) {
			Some(remote_key) => {
				let url = self.repo_url(&format!("milestones/{remote_key}"));
				let res = self.request(reqwest::Method::PATCH, &url).json(&payload).send().await?;
				self.check(res, &format!("update milestone {remote_key}")).await?;
				Ok(PushOutcome {
					remote_key: remote_key.to_string(),
					created: false,
				})
			}
			None => {
				let url = self.repo_url("milestones");
				let res = self.request(reqwest::Method::POST, &url).json(&payload).send().await?;
				let res = self.check(res, "create milestone").await?;
				let created = res.json::<GhMilestone>().await?;
				Ok(PushOutcome {
					remote_key: created.number.to_string(),
					created: true,
				})
			}
		}
	}
}
//,}}}1
