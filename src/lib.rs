//! Local-first roadmap tracker with bidirectional remote sync.
//!
//! Work items live as markdown-with-frontmatter files under a `.roadmap/`
//! directory and are kept consistent with remote issue trackers through a
//! three-way merge against the last agreed baseline.

pub mod config;
pub mod issue;
pub mod metrics;
pub mod milestone;
pub mod persistence;
pub mod sync;

pub use issue::{Comment, Issue, IssueType, Priority, Status, SyncMetadata, ValidationError};
pub use milestone::{Milestone, MilestoneStatus};
