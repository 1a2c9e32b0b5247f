//! Advisory per-file locking.
//!
//! Each lock is scoped to a sidecar file `<path>.lock` holding JSON metadata
//! about the holder. The lock itself is an OS advisory lock on the sidecar,
//! so a crashed holder never wedges the store: its sidecar can be grabbed
//! and cleaned up by anyone.

use std::{
	fs::{self, File, OpenOptions},
	io::Write,
	path::{Path, PathBuf},
	time::{Duration, Instant},
};

use fs2::FileExt;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Default budget for acquiring a lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
/// How long to wait between acquisition attempts while contended.
const RETRY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
	/// Transient: the holder may release shortly. Callers may retry.
	#[error("timed out acquiring lock for {} after {timeout:?}", .path.display())]
	Timeout { path: PathBuf, timeout: Duration },
	#[error("lock io error for {}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
}

impl LockError {
	pub fn is_timeout(&self) -> bool {
		matches!(self, LockError::Timeout { .. })
	}
}

/// Metadata written into the sidecar, identifying the holder.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LockInfo {
	pub pid: u32,
	pub host: String,
	pub acquired_at: Timestamp,
	pub purpose: String,
}

/// Sidecar path for a target file: `<path>.lock`.
pub fn lock_path_for(path: &Path) -> PathBuf {
	let mut os = path.as_os_str().to_os_string();
	os.push(".lock");
	PathBuf::from(os)
}

/// A held lock. Releases the OS lock and removes the sidecar on `release()`
/// or on drop, so every return path gives the lock back.
#[derive(Debug)]
pub struct LockGuard {
	lock_path: PathBuf,
	file: Option<File>,
}

impl LockGuard {
	/// Release explicitly, surfacing any io error. Dropping releases too,
	/// but swallows errors.
	pub fn release(mut self) -> Result<(), LockError> {
		self.release_inner()
	}

	fn release_inner(&mut self) -> Result<(), LockError> {
		let Some(file) = self.file.take() else {
			return Ok(());
		};
		FileExt::unlock(&file).map_err(|source| LockError::Io { path: self.lock_path.clone(), source })?;
		drop(file);
		match fs::remove_file(&self.lock_path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(source) => Err(LockError::Io { path: self.lock_path.clone(), source }),
		}
	}
}

impl Drop for LockGuard {
	fn drop(&mut self) {
		let _ = self.release_inner();
	}
}

fn holder_host() -> String {
	std::env::var("HOSTNAME").or_else(|_| std::env::var("HOST")).unwrap_or_else(|_| "unknown".to_string())
}

fn try_acquire(lock_path: &Path, purpose: &str) -> std::io::Result<Option<LockGuard>> {
	if let Some(parent) = lock_path.parent()
		&& !parent.as_os_str().is_empty()
	{
		fs::create_dir_all(parent)?;
	}
	let mut file = OpenOptions::new().create(true).read(true).write(true).open(lock_path)?;
	match file.try_lock_exclusive() {
		Ok(()) => {
			let info = LockInfo {
				pid: std::process::id(),
				host: holder_host(),
				acquired_at: Timestamp::now(),
				purpose: purpose.to_string(),
			};
			file.set_len(0)?;
			let json = serde_json::to_string_pretty(&info).expect("lock metadata serializes");
			file.write_all(json.as_bytes())?;
			file.flush()?;
			Ok(Some(LockGuard {
				lock_path: lock_path.to_path_buf(),
				file: Some(file),
			}))
		}
		Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
		Err(e) => Err(e),
	}
}

/// Acquire the advisory lock for `path`, retrying on contention until
/// `timeout` elapses.
pub fn acquire(path: &Path, timeout: Duration, purpose: &str) -> Result<LockGuard, LockError> {
	let lock_path = lock_path_for(path);
	let start = Instant::now();
	loop {
		match try_acquire(&lock_path, purpose) {
			Ok(Some(guard)) => return Ok(guard),
			Ok(None) => {
				if start.elapsed() >= timeout {
					return Err(LockError::Timeout { path: path.to_path_buf(), timeout });
				}
				std::thread::sleep(RETRY_INTERVAL);
			}
			Err(source) => return Err(LockError::Io { path: path.to_path_buf(), source }),
		}
	}
}

/// Non-blocking check: trial-acquires and releases the OS lock without
/// mutating on-disk state. A missing sidecar means unlocked.
pub fn is_locked(path: &Path) -> bool {
	let lock_path = lock_path_for(path);
	let file = match OpenOptions::new().read(true).write(true).open(&lock_path) {
		Ok(f) => f,
		Err(_) => return false,
	};
	match file.try_lock_exclusive() {
		Ok(()) => {
			let _ = FileExt::unlock(&file);
			false
		}
		Err(_) => true,
	}
}

/// Read the holder metadata from a sidecar, if present and well-formed.
pub fn lock_info(path: &Path) -> Option<LockInfo> {
	let content = fs::read_to_string(lock_path_for(path)).ok()?;
	serde_json::from_str(&content).ok()
}

/// Remove a sidecar without checking the holder. Last resort.
pub fn force_unlock(path: &Path) -> std::io::Result<()> {
	match fs::remove_file(lock_path_for(path)) {
		Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
		_ => Ok(()),
	}
}

/// Hands out locks with a shared default timeout and knows how to sweep
/// stale sidecars.
#[derive(Clone, Debug, derive_new::new)]
pub struct LockManager {
	pub default_timeout: Duration,
}

impl Default for LockManager {
	fn default() -> Self {
		Self::new(DEFAULT_LOCK_TIMEOUT)
	}
}

impl LockManager {
	pub fn lock(&self, path: &Path, purpose: &str) -> Result<LockGuard, LockError> {
		acquire(path, self.default_timeout, purpose)
	}

	/// Remove sidecar files under `root` older than `stale_hours` whose
	/// holder no longer holds the OS lock. Returns how many were removed.
	pub fn cleanup_stale(&self, root: &Path, stale_hours: u64) -> usize {
		let mut cleaned = 0;
		let horizon = Duration::from_secs(stale_hours.saturating_mul(3600));
		let mut stack = vec![root.to_path_buf()];
		while let Some(dir) = stack.pop() {
			let Ok(entries) = fs::read_dir(&dir) else { continue };
			for entry in entries.flatten() {
				let entry_path = entry.path();
				if entry_path.is_dir() {
					stack.push(entry_path);
					continue;
				}
				if entry_path.extension().and_then(|e| e.to_str()) != Some("lock") {
					continue;
				}
				let age = entry.metadata().and_then(|m| m.modified()).ok().and_then(|m| m.elapsed().ok());
				let Some(age) = age else { continue };
				if age < horizon {
					continue;
				}
				let target = entry_path.with_extension("");
				if !is_locked(&target) {
					if fs::remove_file(&entry_path).is_ok() {
						tracing::debug!("[lock] removed stale sidecar {}", entry_path.display());
						cleaned += 1;
					}
				}
			}
		}
		cleaned
	}
}
