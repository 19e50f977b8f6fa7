// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The registration file: a newline-delimited set of key ids.
//!
//! Writers coordinate through an advisory exclusive lock: `flock` on the
//! file itself on Unix, `LockFileEx` on a sidecar `<file>.lock` on Windows
//! (a single process cannot hold an exclusive lock on a file it has opened
//! twice there). Acquisition polls the non-blocking lock every 50 ms up to
//! a 10 s timeout. Reads and writes require the guard, which keeps the
//! lock scope visible at every call site; the lock is never held across
//! network calls.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;

const LOCK_RETRY: Duration = Duration::from_millis(50);
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum KeysFileError {
	#[error("timeout waiting on lock to become available")]
	Timeout,

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

/// Holds the advisory lock; dropping it releases the lock.
pub struct FlockGuard {
	file: File,
}

impl Drop for FlockGuard {
	fn drop(&mut self) {
		let _ = fs2::FileExt::unlock(&self.file);
	}
}

/// The newline-delimited registration file with its lock.
pub struct KeysFile {
	path: PathBuf,
	lock_path: PathBuf,
}

impl KeysFile {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		let path = path.into();
		let lock_path = lock_path_for(&path);
		KeysFile { path, lock_path }
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Acquire the exclusive advisory lock, polling until the timeout.
	pub async fn lock(&self) -> Result<FlockGuard, KeysFileError> {
		let file = OpenOptions::new()
			.read(true)
			.write(true)
			.create(true)
			.truncate(false)
			.open(&self.lock_path)?;
		let started = Instant::now();
		loop {
			match file.try_lock_exclusive() {
				Ok(()) => return Ok(FlockGuard { file }),
				Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
					if started.elapsed() > LOCK_TIMEOUT {
						return Err(KeysFileError::Timeout);
					}
					tokio::time::sleep(LOCK_RETRY).await;
				}
				Err(e) => return Err(e.into()),
			}
		}
	}

	/// Read the registered ids. Requires the lock.
	pub fn get(&self, _guard: &FlockGuard) -> Result<Vec<String>, KeysFileError> {
		let content = match std::fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
			Err(e) => return Err(e.into()),
		};
		Ok(content.split_whitespace().map(str::to_string).collect())
	}

	/// Add ids to the set. Requires the lock. No write happens when the set
	/// is unchanged.
	pub fn add(&self, guard: &FlockGuard, ids: &[String]) -> Result<(), KeysFileError> {
		let mut current = self.get(guard)?;
		let before = current.len();
		for id in ids {
			if !current.contains(id) {
				current.push(id.clone());
			}
		}
		if current.len() == before {
			return Ok(());
		}
		self.write(&current)
	}

	/// Remove ids from the set. Requires the lock.
	pub fn remove(&self, guard: &FlockGuard, ids: &[String]) -> Result<(), KeysFileError> {
		let current = self.get(guard)?;
		let remaining: Vec<String> =
			current.into_iter().filter(|id| !ids.contains(id)).collect();
		self.write(&remaining)
	}

	/// Replace the whole set. Requires the lock.
	pub fn overwrite(&self, _guard: &FlockGuard, ids: &[String]) -> Result<(), KeysFileError> {
		let mut unique: Vec<String> = Vec::with_capacity(ids.len());
		for id in ids {
			if !unique.contains(id) {
				unique.push(id.clone());
			}
		}
		self.write(&unique)
	}

	fn write(&self, ids: &[String]) -> Result<(), KeysFileError> {
		let mut buf = String::with_capacity(ids.iter().map(|id| id.len() + 1).sum());
		for id in ids {
			buf.push_str(id);
			buf.push('\n');
		}
		let mut file = File::create(&self.path)?;
		file.write_all(buf.as_bytes())?;
		Ok(())
	}
}

#[cfg(not(windows))]
fn lock_path_for(path: &Path) -> PathBuf {
	path.to_path_buf()
}

#[cfg(windows)]
fn lock_path_for(path: &Path) -> PathBuf {
	let mut name = path.file_name().unwrap_or_default().to_os_string();
	name.push(".lock");
	path.with_file_name(name)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn keys_file() -> (tempfile::TempDir, KeysFile) {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join(".registered");
		std::fs::write(&path, b"").unwrap();
		(dir, KeysFile::new(path))
	}

	#[tokio::test]
	async fn add_get_remove_round_trip() {
		let (_dir, kf) = keys_file();
		let guard = kf.lock().await.unwrap();

		kf.add(&guard, &["a".to_string(), "b".to_string()]).unwrap();
		let mut ids = kf.get(&guard).unwrap();
		ids.sort();
		assert_eq!(ids, vec!["a", "b"]);

		// Adding a duplicate leaves the set unchanged.
		kf.add(&guard, &["a".to_string()]).unwrap();
		assert_eq!(kf.get(&guard).unwrap().len(), 2);

		kf.remove(&guard, &["a".to_string()]).unwrap();
		assert_eq!(kf.get(&guard).unwrap(), vec!["b"]);

		kf.overwrite(&guard, &["c".to_string(), "c".to_string()]).unwrap();
		assert_eq!(kf.get(&guard).unwrap(), vec!["c"]);
	}

	#[tokio::test]
	async fn lock_excludes_second_holder() {
		let (_dir, kf) = keys_file();
		let guard = kf.lock().await.unwrap();

		// A second handle on the same file cannot take the lock while the
		// guard lives.
		let file = OpenOptions::new().read(true).write(true).open(kf.path()).unwrap();
		assert!(file.try_lock_exclusive().is_err());

		drop(guard);
		assert!(file.try_lock_exclusive().is_ok());
	}

	#[tokio::test]
	async fn missing_file_reads_as_empty() {
		let dir = tempfile::tempdir().unwrap();
		let kf = KeysFile::new(dir.path().join(".registered"));
		let guard = kf.lock().await.unwrap();
		assert!(kf.get(&guard).unwrap().is_empty());
	}
}
