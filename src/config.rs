//! Application configuration, loaded once at process start.

use std::path::PathBuf;

use serde::Deserialize;
use smart_default::SmartDefault;
use v_utils::io::ExpandedPath;

use crate::persistence::store::{ISSUES_DIR, MILESTONES_DIR};

fn default_data_dir() -> PathBuf {
	PathBuf::from(".roadmap")
}

fn default_workers() -> usize {
	4
}

fn default_lock_timeout_secs() -> u64 {
	30
}

fn default_lock_stale_hours() -> u64 {
	24
}

fn default_backend() -> String {
	"gh".to_string()
}

#[derive(Clone, Debug, Deserialize, SmartDefault, derive_new::new)]
pub struct AppConfig {
	#[default(default_data_dir())]
	#[serde(default = "default_data_dir")]
	pub data_dir: PathBuf,
	#[serde(default)]
	pub sync: SyncSettings,
	#[serde(default)]
	pub github: Option<GithubSettings>,
}

#[derive(Clone, Debug, Deserialize, SmartDefault, derive_new::new)]
pub struct SyncSettings {
	/// Upper bound on issues applied in parallel during one run.
	#[default(default_workers())]
	#[serde(default = "default_workers")]
	pub workers: usize,
	#[default(default_lock_timeout_secs())]
	#[serde(default = "default_lock_timeout_secs")]
	pub lock_timeout_secs: u64,
	#[default(default_lock_stale_hours())]
	#[serde(default = "default_lock_stale_hours")]
	pub lock_stale_hours: u64,
	#[default(default_backend())]
	#[serde(default = "default_backend")]
	pub default_backend: String,
}

#[derive(Clone, Debug, Deserialize, derive_new::new)]
pub struct GithubSettings {
	pub token: String,
	pub owner: String,
	pub repo: String,
	/// Key used in `remote_ids` and on-disk sync state.
	#[serde(default = "default_backend")]
	pub backend_name: String,
}

impl AppConfig {
	pub fn read(path: ExpandedPath) -> Result<Self, config::ConfigError> {
		let builder = config::Config::builder().add_source(config::File::with_name(&path.to_string()));

		let settings: config::Config = builder.build()?;
		let settings: Self = settings.try_deserialize()?;

		let _ = std::fs::create_dir_all(settings.data_dir.join(ISSUES_DIR));
		let _ = std::fs::create_dir_all(settings.data_dir.join(MILESTONES_DIR));

		Ok(settings)
	}
}
