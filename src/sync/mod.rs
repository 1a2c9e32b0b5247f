//! The sync engine: three-way merge of local, remote and baseline state.

pub mod backend;
pub mod baseline;
pub mod compare;
pub mod github;
pub mod links;
pub mod merge;
pub mod mock;
pub mod orchestrator;
pub mod report;
pub mod resolve;

pub use backend::{BackendError, BoxedSyncBackend, PushOutcome, RemoteIssue, RemoteMilestone, SyncBackend};
pub use baseline::{BaselineStore, IssueBaseState};
pub use compare::{ChangeRecord, Classification, StateComparator};
pub use links::RemoteLinkIndex;
pub use merge::{FieldValue, MergeStatus, SyncField};
pub use orchestrator::{CancelToken, SyncOptions, SyncOrchestrator};
pub use report::{RepoIdentity, SyncReport};
pub use resolve::{Conflict, ConflictResolver, SyncStrategy};
