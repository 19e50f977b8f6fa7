// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The refresh daemon.
//!
//! One process per consumer host owns the cache directory. A cycle runs on
//! a ~10 minute ticker and additionally whenever the registration file
//! changes; each cycle reads the registered ids under the lock, drops cache
//! files for unregistered ids, asks the server which fingerprints are
//! stale, and atomically replaces each changed key file (temp file, then
//! rename, so readers see old or new, never truncated). A key the server
//! reports gone or forbidden is unregistered, which makes the daemon
//! self-healing against deletions and revocations. No single key's failure
//! aborts a cycle; failures only feed the metrics counters.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use rand::Rng;
use thiserror::Error;

use knox_core::Code;

use crate::client::{ApiClient, ClientError};
use crate::keys_file::{KeysFile, KeysFileError};
use crate::{KEYS_DIR, REGISTER_FILE};

/// Default time between refresh cycles.
pub const DEFAULT_REFRESH: Duration = Duration::from_secs(600);

#[derive(Error, Debug)]
pub enum DaemonError {
	#[error("failed to initialize cache directory {path}: {source}")]
	Init {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	KeysFile(#[from] KeysFileError),

	#[error(transparent)]
	Client(#[from] ClientError),

	#[error("failed to watch registration file: {0}")]
	Watch(#[from] notify::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}

/// Counters reported through the metrics callback on every tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DaemonMetrics {
	/// Whole refresh cycles that failed.
	pub update_err: u64,
	/// Individual keys that failed to fetch or write.
	pub get_key_err: u64,
	/// Refresh cycles that completed.
	pub success: u64,
}

type MetricsCallback = Arc<dyn Fn(&DaemonMetrics) + Send + Sync>;

/// The refresh daemon. Owns one cache directory tree.
pub struct Daemon {
	root: PathBuf,
	client: Arc<dyn ApiClient>,
	register_file: KeysFile,
	metrics: DaemonMetrics,
	report: Option<MetricsCallback>,
}

impl Daemon {
	pub fn new(root: impl Into<PathBuf>, client: Arc<dyn ApiClient>) -> Self {
		let root = root.into();
		let register_file = KeysFile::new(root.join(REGISTER_FILE));
		Daemon {
			root,
			client,
			register_file,
			metrics: DaemonMetrics::default(),
			report: None,
		}
	}

	/// Report the counters through `callback` on every tick.
	pub fn with_metrics_callback(mut self, callback: MetricsCallback) -> Self {
		self.report = Some(callback);
		self
	}

	pub fn metrics(&self) -> DaemonMetrics {
		self.metrics
	}

	fn keys_dir(&self) -> PathBuf {
		self.root.join(KEYS_DIR)
	}

	fn key_path(&self, id: &str) -> PathBuf {
		self.keys_dir().join(id)
	}

	fn register_path(&self) -> &Path {
		self.register_file.path()
	}

	/// Create the cache tree and an empty registration file if absent.
	pub fn initialize(&self) -> Result<(), DaemonError> {
		for dir in [&self.root, &self.keys_dir()] {
			std::fs::create_dir_all(dir).map_err(|source| DaemonError::Init {
				path: dir.display().to_string(),
				source,
			})?;
		}
		if !self.register_path().exists() {
			std::fs::write(self.register_path(), b"")?;
		}
		Ok(())
	}

	/// Run forever: refresh on every tick and on every registration-file
	/// change. All cache writes are atomic, so shutdown needs no cleanup.
	pub async fn run(mut self, refresh: Duration) -> Result<(), DaemonError> {
		self.initialize()?;

		let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);
		let mut watcher =
			notify::recommended_watcher(move |event: Result<notify::Event, notify::Error>| {
				if event.is_ok() {
					let _ = tx.try_send(());
				}
			})?;
		watcher.watch(self.register_path(), RecursiveMode::NonRecursive)?;

		let mut ticker = tokio::time::interval(refresh);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
		ticker.tick().await;

		loop {
			tracing::info!("updating keys");
			match self.update().await {
				Ok(()) => self.metrics.success += 1,
				Err(e) => {
					self.metrics.update_err += 1;
					tracing::warn!(error = %e, "failed to update");
				}
			}

			tokio::select! {
				_ = rx.recv() => {
					// Registration change; refresh immediately.
				}
				_ = ticker.tick() => {
					// Random jitter to avoid a fleet-wide stampede.
					let jitter = rand::thread_rng().gen_range(0..10);
					tokio::time::sleep(Duration::from_millis(jitter)).await;
					if let Some(report) = &self.report {
						report(&self.metrics);
					}
				}
			}
		}
	}

	/// One refresh cycle.
	pub async fn update(&mut self) -> Result<(), DaemonError> {
		// Registration read happens under the lock; the lock is released
		// before any network traffic.
		let registered = {
			let guard = self.register_file.lock().await?;
			self.register_file.get(&guard)?
		};

		let mut fingerprints: HashMap<String, String> = registered
			.iter()
			.map(|id| (id.clone(), String::new()))
			.collect();

		for cached_id in self.current_cached_keys()? {
			if fingerprints.contains_key(&cached_id) {
				match self.client.cache_get_key(&cached_id).await {
					Ok(key) => {
						fingerprints.insert(cached_id, key.version_hash);
					}
					Err(e) => {
						// Keep going; the empty hash forces a refetch.
						tracing::warn!(key_id = %cached_id, error = %e, "error reading cached key");
					}
				}
			} else {
				self.delete_cached(&cached_id)?;
			}
		}

		if fingerprints.is_empty() {
			return Ok(());
		}

		let updated = self.client.get_keys(&fingerprints).await?;
		for key_id in updated {
			if let Err(e) = self.process_key(&key_id).await {
				self.metrics.get_key_err += 1;
				tracing::warn!(key_id = %key_id, error = %e, "error processing key");
			}
		}
		Ok(())
	}

	/// Fetch one key and atomically replace its cache file.
	async fn process_key(&self, key_id: &str) -> Result<(), DaemonError> {
		let key = match self.client.network_get_key(key_id).await {
			Ok(key) => key,
			Err(ClientError::Api { code, message })
				if code == Code::Unauthorized || code == Code::KeyIdentifierDoesNotExist =>
			{
				// Deleted or revoked on the server: stop tracking it.
				let guard = self.register_file.lock().await?;
				self.register_file.remove(&guard, &[key_id.to_string()])?;
				return Err(DaemonError::Client(ClientError::Api { code, message }));
			}
			Err(e) => return Err(e.into()),
		};

		let bytes = serde_json::to_vec(&key)?;
		let mut tmp = tempfile::Builder::new()
			.prefix(".")
			.suffix(&format!(".{key_id}.tmp"))
			.tempfile_in(&self.root)?;
		tmp.write_all(&bytes)?;
		tmp.flush()?;
		// Atomic replace; the temp file is unlinked on any earlier failure.
		tmp.persist(self.key_path(key_id))
			.map_err(|e| DaemonError::Io(e.error))?;
		Ok(())
	}

	fn delete_cached(&self, key_id: &str) -> Result<(), DaemonError> {
		match std::fs::remove_file(self.key_path(key_id)) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}

	fn current_cached_keys(&self) -> Result<Vec<String>, DaemonError> {
		let mut ids = Vec::new();
		for entry in std::fs::read_dir(self.keys_dir())? {
			let entry = entry?;
			if let Some(name) = entry.file_name().to_str() {
				ids.push(name.to_string());
			}
		}
		Ok(ids)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use knox_core::{Access, Acl, Key, KeyVersion, KeyVersionList, VersionStatus};
	use std::sync::Mutex;

	/// A server stand-in: keys by id, plus ids that answer with an error.
	#[derive(Default)]
	struct FakeApi {
		keys: Mutex<HashMap<String, Key>>,
		gone: Mutex<Vec<String>>,
		cache_dir: PathBuf,
	}

	impl FakeApi {
		fn new(cache_dir: PathBuf) -> Self {
			FakeApi { cache_dir, ..Default::default() }
		}

		fn put(&self, key: Key) {
			self.keys.lock().unwrap().insert(key.id.clone(), key);
		}

		fn mark_gone(&self, id: &str) {
			self.gone.lock().unwrap().push(id.to_string());
		}
	}

	#[async_trait]
	impl ApiClient for FakeApi {
		async fn get_key(&self, key_id: &str) -> Result<Key, ClientError> {
			match self.cache_get_key(key_id).await {
				Ok(key) => Ok(key),
				Err(_) => self.network_get_key(key_id).await,
			}
		}

		async fn cache_get_key(&self, key_id: &str) -> Result<Key, ClientError> {
			let bytes = std::fs::read(self.cache_dir.join(key_id))?;
			Ok(serde_json::from_slice(&bytes)?)
		}

		async fn network_get_key_with_status(
			&self,
			key_id: &str,
			_status: VersionStatus,
		) -> Result<Key, ClientError> {
			self.network_get_key(key_id).await
		}

		async fn network_get_key(&self, key_id: &str) -> Result<Key, ClientError> {
			if self.gone.lock().unwrap().contains(&key_id.to_string()) {
				return Err(ClientError::Api {
					code: Code::KeyIdentifierDoesNotExist,
					message: "Key identifier does not exist".to_string(),
				});
			}
			self.keys
				.lock()
				.unwrap()
				.get(key_id)
				.cloned()
				.ok_or(ClientError::Api {
					code: Code::KeyIdentifierDoesNotExist,
					message: "Key identifier does not exist".to_string(),
				})
		}

		async fn create_key(&self, _: &str, _: &[u8], _: &Acl) -> Result<u64, ClientError> {
			unimplemented!()
		}

		async fn get_keys(
			&self,
			fingerprints: &HashMap<String, String>,
		) -> Result<Vec<String>, ClientError> {
			let keys = self.keys.lock().unwrap();
			let gone = self.gone.lock().unwrap();
			Ok(fingerprints
				.iter()
				.filter(|(id, hash)| {
					gone.contains(*id)
						|| keys.get(*id).map(|k| k.version_hash != **hash).unwrap_or(false)
				})
				.map(|(id, _)| id.clone())
				.collect())
		}

		async fn delete_key(&self, _: &str) -> Result<(), ClientError> {
			unimplemented!()
		}

		async fn get_acl(&self, _: &str) -> Result<Acl, ClientError> {
			unimplemented!()
		}

		async fn put_access(&self, _: &str, _: &Access) -> Result<(), ClientError> {
			unimplemented!()
		}

		async fn add_version(&self, _: &str, _: &[u8]) -> Result<u64, ClientError> {
			unimplemented!()
		}

		async fn update_version(
			&self,
			_: &str,
			_: u64,
			_: VersionStatus,
		) -> Result<(), ClientError> {
			unimplemented!()
		}
	}

	fn test_key(id: &str, version_id: u64, data: &[u8]) -> Key {
		let versions = KeyVersionList(vec![KeyVersion {
			id: version_id,
			data: data.to_vec(),
			status: VersionStatus::Primary,
			creation_time: 1,
		}]);
		let hash = versions.hash();
		Key {
			id: id.to_string(),
			acl: Acl::new(),
			version_list: versions,
			version_hash: hash,
			path: None,
		}
	}

	struct Fixture {
		_dir: tempfile::TempDir,
		daemon: Daemon,
		api: Arc<FakeApi>,
		root: PathBuf,
	}

	async fn fixture() -> Fixture {
		let dir = tempfile::tempdir().unwrap();
		let root = dir.path().to_path_buf();
		let api = Arc::new(FakeApi::new(root.join(KEYS_DIR)));
		let daemon = Daemon::new(&root, api.clone());
		daemon.initialize().unwrap();
		Fixture { _dir: dir, daemon, api, root }
	}

	async fn register(root: &Path, id: &str) {
		let kf = KeysFile::new(root.join(REGISTER_FILE));
		let guard = kf.lock().await.unwrap();
		kf.add(&guard, &[id.to_string()]).unwrap();
	}

	async fn registered_ids(root: &Path) -> Vec<String> {
		let kf = KeysFile::new(root.join(REGISTER_FILE));
		let guard = kf.lock().await.unwrap();
		kf.get(&guard).unwrap()
	}

	#[tokio::test]
	async fn update_caches_registered_keys() {
		let mut fx = fixture().await;
		fx.api.put(test_key("k1", 1, b"secret"));
		register(&fx.root, "k1").await;

		fx.daemon.update().await.unwrap();

		let cached: Key =
			serde_json::from_slice(&std::fs::read(fx.root.join(KEYS_DIR).join("k1")).unwrap())
				.unwrap();
		assert_eq!(cached.id, "k1");
		assert_eq!(cached.version_list.0[0].data, b"secret");
	}

	#[tokio::test]
	async fn update_refreshes_rotated_keys() {
		let mut fx = fixture().await;
		fx.api.put(test_key("k1", 1, b"old"));
		register(&fx.root, "k1").await;
		fx.daemon.update().await.unwrap();
		let before: Key =
			serde_json::from_slice(&std::fs::read(fx.root.join(KEYS_DIR).join("k1")).unwrap())
				.unwrap();

		// Rotation on the server changes the hash.
		fx.api.put(test_key("k1", 2, b"new"));
		fx.daemon.update().await.unwrap();

		let after: Key =
			serde_json::from_slice(&std::fs::read(fx.root.join(KEYS_DIR).join("k1")).unwrap())
				.unwrap();
		assert_ne!(after.version_hash, before.version_hash);
		assert_eq!(after.version_list.0[0].data, b"new");
	}

	#[tokio::test]
	async fn unchanged_keys_are_not_refetched() {
		let mut fx = fixture().await;
		fx.api.put(test_key("k1", 1, b"secret"));
		register(&fx.root, "k1").await;
		fx.daemon.update().await.unwrap();

		// Scribble on the cache file's mtime-visible content through a
		// second cycle: with a matching hash the server reports no change
		// and the file is left alone.
		let path = fx.root.join(KEYS_DIR).join("k1");
		let before = std::fs::metadata(&path).unwrap().modified().unwrap();
		fx.daemon.update().await.unwrap();
		let after = std::fs::metadata(&path).unwrap().modified().unwrap();
		assert_eq!(before, after);
	}

	#[tokio::test]
	async fn unregistered_keys_are_evicted_from_cache() {
		let mut fx = fixture().await;
		fx.api.put(test_key("k1", 1, b"secret"));
		register(&fx.root, "k1").await;
		fx.daemon.update().await.unwrap();
		assert!(fx.root.join(KEYS_DIR).join("k1").exists());

		let kf = KeysFile::new(fx.root.join(REGISTER_FILE));
		let guard = kf.lock().await.unwrap();
		kf.remove(&guard, &["k1".to_string()]).unwrap();
		drop(guard);

		fx.daemon.update().await.unwrap();
		assert!(!fx.root.join(KEYS_DIR).join("k1").exists());
	}

	#[tokio::test]
	async fn deleted_keys_self_heal_out_of_the_registration() {
		let mut fx = fixture().await;
		fx.api.put(test_key("k1", 1, b"secret"));
		register(&fx.root, "k1").await;
		fx.daemon.update().await.unwrap();

		fx.api.mark_gone("k1");
		fx.daemon.update().await.unwrap();

		assert!(registered_ids(&fx.root).await.is_empty());
		assert_eq!(fx.daemon.metrics().get_key_err, 1);
	}

	#[tokio::test]
	async fn one_failing_key_does_not_abort_the_cycle() {
		let mut fx = fixture().await;
		fx.api.put(test_key("good", 1, b"data"));
		fx.api.mark_gone("bad");
		register(&fx.root, "good").await;
		register(&fx.root, "bad").await;

		fx.daemon.update().await.unwrap();

		assert!(fx.root.join(KEYS_DIR).join("good").exists());
		assert!(!fx.root.join(KEYS_DIR).join("bad").exists());
		assert_eq!(fx.daemon.metrics().get_key_err, 1);
	}
}
