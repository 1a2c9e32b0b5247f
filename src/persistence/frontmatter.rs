//! Markdown-with-frontmatter codec and atomic file replacement.
//!
//! Entity files are a YAML header block between `---` delimiters followed by
//! a free-form markdown body. Saves go through a temp file in the target
//! directory, fsync, then rename, so readers never observe a half-written
//! file.

use std::{
	collections::BTreeMap,
	fs,
	io::Write,
	path::{Path, PathBuf},
	sync::LazyLock,
};

use jiff::Timestamp;
use miette::Diagnostic;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
	issue::{self, Comment, Issue, IssueType, Priority, Status, SyncMetadata, ValidationError, parse_timestamp},
	milestone::{Milestone, MilestoneStatus},
};

static FRONTMATTER_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\A---\s*\n(.*?)\n---\s*\n?(.*)\z").expect("frontmatter pattern compiles"));

/// Errors surfaced when loading an entity file.
#[derive(Debug, Diagnostic, thiserror::Error)]
pub enum ParseError {
	#[error("file not found: {}", .path.display())]
	#[diagnostic(code(roadmap::store::not_found))]
	NotFound { path: PathBuf },

	#[error("could not read {}", .path.display())]
	#[diagnostic(code(roadmap::store::io))]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid YAML frontmatter in {}: {source}", .path.display())]
	#[diagnostic(code(roadmap::store::frontmatter), help("the header is the YAML block between `---` lines at the top of the file"))]
	Frontmatter {
		path: PathBuf,
		#[source]
		source: serde_yaml::Error,
	},

	#[error("{source} in {}", .path.display())]
	#[diagnostic(code(roadmap::store::validation))]
	Validation {
		path: PathBuf,
		#[source]
		source: ValidationError,
	},
}

/// Split file content into (frontmatter_yaml, body). Content without a
/// frontmatter block yields no header and the full text as body.
pub fn split_content(content: &str) -> (Option<&str>, &str) {
	match FRONTMATTER_PATTERN.captures(content) {
		Some(caps) => {
			let header = caps.get(1).map(|m| m.as_str());
			let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
			(header, body)
		}
		None => (None, content),
	}
}

//=============================================================================
// Raw header records (string-typed, converted with explicit validation)
//=============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct IssueHeader {
	#[serde(skip_serializing_if = "Option::is_none")]
	id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	title: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	headline: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	status: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	priority: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	issue_type: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	assignee: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	milestone: Option<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	labels: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	estimated_hours: Option<f64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	progress_percentage: Option<u8>,
	#[serde(skip_serializing_if = "Option::is_none")]
	created: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	updated: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	due_date: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	actual_start_date: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	actual_end_date: Option<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	depends_on: Vec<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	blocks: Vec<String>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	comments: Vec<Comment>,
	/// Values may be written as bare ints by hand or by other tools.
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	remote_ids: BTreeMap<String, serde_yaml::Value>,
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	sync_metadata: BTreeMap<String, SyncMetadata>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct MilestoneHeader {
	#[serde(skip_serializing_if = "Option::is_none")]
	name: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	description: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	status: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	created: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	updated: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	due_date: Option<String>,
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	remote_ids: BTreeMap<String, serde_yaml::Value>,
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	sync_metadata: BTreeMap<String, SyncMetadata>,
}

fn remote_id_string(value: &serde_yaml::Value) -> Option<String> {
	match value {
		serde_yaml::Value::String(s) => Some(s.clone()),
		serde_yaml::Value::Number(n) => Some(n.to_string()),
		_ => None,
	}
}

fn stamp(value: Option<&str>) -> Option<Timestamp> {
	value.and_then(parse_timestamp)
}

//=============================================================================
// Issue codec
//=============================================================================

/// Parse issue file content. Enum values must be canonical; anything else
/// is a validation error carrying the full list of valid values.
pub fn parse_issue(content: &str, path: &Path) -> Result<Issue, ParseError> {
	let (header_str, body) = split_content(content);
	let header: IssueHeader = match header_str {
		Some(raw) => serde_yaml::from_str(raw).map_err(|source| ParseError::Frontmatter { path: path.to_path_buf(), source })?,
		None => IssueHeader::default(),
	};

	let validation = |source: ValidationError| ParseError::Validation { path: path.to_path_buf(), source };

	let status = match header.status.as_deref() {
		None => Status::default(),
		Some(raw) => Status::from_canonical(raw).ok_or_else(|| {
			validation(ValidationError::InvalidEnum {
				field: "status",
				got: raw.to_string(),
				valid: Status::valid_values(),
			})
		})?,
	};
	let priority = match header.priority.as_deref() {
		None => Priority::default(),
		Some(raw) => Priority::from_canonical(raw).ok_or_else(|| {
			validation(ValidationError::InvalidEnum {
				field: "priority",
				got: raw.to_string(),
				valid: Priority::valid_values(),
			})
		})?,
	};
	let issue_type = match header.issue_type.as_deref() {
		None => IssueType::default(),
		Some(raw) => IssueType::from_canonical(raw).ok_or_else(|| {
			validation(ValidationError::InvalidEnum {
				field: "issue_type",
				got: raw.to_string(),
				valid: IssueType::valid_values(),
			})
		})?,
	};

	let now = Timestamp::now();
	let remote_ids = header.remote_ids.iter().filter_map(|(backend, v)| remote_id_string(v).map(|id| (backend.clone(), id))).collect();

	let issue = Issue {
		id: header.id.unwrap_or_else(issue::generate_local_id),
		title: header.title.ok_or_else(|| validation(ValidationError::Empty { field: "title" }))?,
		headline: header.headline,
		content: body.trim_end().to_string(),
		status,
		priority,
		issue_type,
		assignee: header.assignee,
		milestone: header.milestone,
		labels: header.labels,
		estimated_hours: header.estimated_hours,
		progress_percentage: header.progress_percentage,
		created: stamp(header.created.as_deref()).unwrap_or(now),
		updated: stamp(header.updated.as_deref()).unwrap_or(now),
		due_date: stamp(header.due_date.as_deref()),
		actual_start_date: stamp(header.actual_start_date.as_deref()),
		actual_end_date: stamp(header.actual_end_date.as_deref()),
		depends_on: header.depends_on,
		blocks: header.blocks,
		comments: header.comments,
		remote_ids,
		sync_metadata: header.sync_metadata,
	};
	issue.validate().map_err(validation)?;
	Ok(issue)
}

/// Serialize an issue back to file content.
pub fn serialize_issue(issue: &Issue) -> String {
	let header = IssueHeader {
		id: Some(issue.id.clone()),
		title: Some(issue.title.clone()),
		headline: issue.headline.clone(),
		status: Some(issue.status.as_str().to_string()),
		priority: Some(issue.priority.as_str().to_string()),
		issue_type: Some(issue.issue_type.as_str().to_string()),
		assignee: issue.assignee.clone(),
		milestone: issue.milestone.clone(),
		labels: issue.labels.clone(),
		estimated_hours: issue.estimated_hours,
		progress_percentage: issue.progress_percentage,
		created: Some(issue.created.to_string()),
		updated: Some(issue.updated.to_string()),
		due_date: issue.due_date.map(|t| t.to_string()),
		actual_start_date: issue.actual_start_date.map(|t| t.to_string()),
		actual_end_date: issue.actual_end_date.map(|t| t.to_string()),
		depends_on: issue.depends_on.clone(),
		blocks: issue.blocks.clone(),
		comments: issue.comments.clone(),
		remote_ids: issue.remote_ids.iter().map(|(k, v)| (k.clone(), serde_yaml::Value::String(v.clone()))).collect(),
		sync_metadata: issue.sync_metadata.clone(),
	};
	render(&header, &issue.content)
}

//=============================================================================
// Milestone codec
//=============================================================================

pub fn parse_milestone(content: &str, path: &Path) -> Result<Milestone, ParseError> {
	let (header_str, body) = split_content(content);
	let header: MilestoneHeader = match header_str {
		Some(raw) => serde_yaml::from_str(raw).map_err(|source| ParseError::Frontmatter { path: path.to_path_buf(), source })?,
		None => MilestoneHeader::default(),
	};

	let validation = |source: ValidationError| ParseError::Validation { path: path.to_path_buf(), source };

	let status = match header.status.as_deref() {
		None => MilestoneStatus::default(),
		Some(raw) => MilestoneStatus::from_canonical(raw).ok_or_else(|| {
			validation(ValidationError::InvalidEnum {
				field: "status",
				got: raw.to_string(),
				valid: MilestoneStatus::valid_values(),
			})
		})?,
	};

	let now = Timestamp::now();
	let remote_ids = header.remote_ids.iter().filter_map(|(backend, v)| remote_id_string(v).map(|id| (backend.clone(), id))).collect();

	let milestone = Milestone {
		name: header.name.ok_or_else(|| validation(ValidationError::Empty { field: "name" }))?,
		description: header.description.unwrap_or_default(),
		content: body.trim_end().to_string(),
		status,
		created: stamp(header.created.as_deref()).unwrap_or(now),
		updated: stamp(header.updated.as_deref()).unwrap_or(now),
		due_date: stamp(header.due_date.as_deref()),
		remote_ids,
		sync_metadata: header.sync_metadata,
	};
	milestone.validate().map_err(validation)?;
	Ok(milestone)
}

pub fn serialize_milestone(milestone: &Milestone) -> String {
	let header = MilestoneHeader {
		name: Some(milestone.name.clone()),
		description: if milestone.description.is_empty() { None } else { Some(milestone.description.clone()) },
		status: Some(milestone.status.as_str().to_string()),
		created: Some(milestone.created.to_string()),
		updated: Some(milestone.updated.to_string()),
		due_date: milestone.due_date.map(|t| t.to_string()),
		remote_ids: milestone.remote_ids.iter().map(|(k, v)| (k.clone(), serde_yaml::Value::String(v.clone()))).collect(),
		sync_metadata: milestone.sync_metadata.clone(),
	};
	render(&header, &milestone.content)
}

fn render<H: Serialize>(header: &H, body: &str) -> String {
	let yaml = serde_yaml::to_string(header).expect("headers serialize to yaml");
	if body.is_empty() {
		format!("---\n{yaml}---\n")
	} else {
		format!("---\n{yaml}---\n\n{body}\n")
	}
}

//=============================================================================
// File access
//=============================================================================

pub fn read(path: &Path) -> Result<String, ParseError> {
	match fs::read_to_string(path) {
		Ok(content) => Ok(content),
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ParseError::NotFound { path: path.to_path_buf() }),
		Err(source) => Err(ParseError::Io { path: path.to_path_buf(), source }),
	}
}

pub fn load_issue(path: &Path) -> Result<Issue, ParseError> {
	parse_issue(&read(path)?, path)
}

pub fn load_milestone(path: &Path) -> Result<Milestone, ParseError> {
	parse_milestone(&read(path)?, path)
}

/// Never fails a bulk walk: one malformed file comes back as a descriptive
/// message instead of an error, so callers can keep going.
pub fn load_issue_safe(path: &Path) -> Result<Issue, String> {
	load_issue(path).map_err(|e| e.to_string())
}

pub fn load_milestone_safe(path: &Path) -> Result<Milestone, String> {
	load_milestone(path).map_err(|e| e.to_string())
}

/// Write `content` to `path` atomically: temp file in the same directory,
/// fsync, rename over the target. A failed write leaves the target as-is.
pub fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
	let parent = match path.parent() {
		Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
		_ => PathBuf::from("."),
	};
	fs::create_dir_all(&parent)?;
	let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("entity");
	let mut tmp = tempfile::Builder::new().prefix(&format!(".{file_name}.")).suffix(".tmp").tempfile_in(&parent)?;
	tmp.write_all(content.as_bytes())?;
	tmp.as_file().sync_all()?;
	tmp.persist(path).map_err(|e| e.error)?;
	Ok(())
}

/// Copy the current target aside as `<name>.backup.<epoch-seconds>`.
/// Returns the backup path, or None when there is nothing to back up.
pub fn backup(path: &Path) -> std::io::Result<Option<PathBuf>> {
	if !path.exists() {
		return Ok(None);
	}
	let mut os = path.as_os_str().to_os_string();
	os.push(format!(".backup.{}", Timestamp::now().as_second()));
	let backup_path = PathBuf::from(os);
	fs::copy(path, &backup_path)?;
	Ok(Some(backup_path))
}
