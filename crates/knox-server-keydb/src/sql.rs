// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! SQLite-backed [`Db`].
//!
//! The table stores the ACL and encrypted version list as JSON text; the
//! `last_updated` column doubles as the optimistic version token. The
//! update predicate `WHERE id = ? AND last_updated = ?` is the entire
//! concurrency story: a zero-row update means either the record vanished or
//! someone else wrote first, and a follow-up select tells the two apart.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use sqlx::Row;
use std::str::FromStr;

use crate::db::{now_nanos, Db};
use crate::error::KeydbError;
use crate::types::{DbKey, EncKeyVersion};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS secrets (
	id VARCHAR(512) PRIMARY KEY,
	acl TEXT NOT NULL,
	version_hash TEXT NOT NULL,
	versions TEXT NOT NULL,
	last_updated BIGINT NOT NULL
)
"#;

/// SQL-backed key storage.
#[derive(Clone)]
pub struct SqlDb {
	pool: SqlitePool,
}

impl SqlDb {
	/// Wrap an existing pool, creating the secrets table if needed.
	pub async fn new(pool: SqlitePool) -> Result<Self, KeydbError> {
		sqlx::query(CREATE_TABLE).execute(&pool).await?;
		Ok(SqlDb { pool })
	}

	/// Open a SQLite database at `database_url` with WAL mode and sane
	/// defaults, creating the file and table if needed.
	#[tracing::instrument(skip(database_url))]
	pub async fn connect(database_url: &str) -> Result<Self, KeydbError> {
		let options = SqliteConnectOptions::from_str(database_url)
			.map_err(KeydbError::Sql)?
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Normal)
			.create_if_missing(true);
		let pool = SqlitePool::connect_with(options).await?;
		tracing::debug!("key database pool created");
		Self::new(pool).await
	}
}

fn parse_row(row: &sqlx::sqlite::SqliteRow) -> Result<DbKey, KeydbError> {
	let acl_json: String = row.try_get("acl")?;
	let versions_json: String = row.try_get("versions")?;
	let version_list: Vec<EncKeyVersion> = serde_json::from_str(&versions_json)?;
	Ok(DbKey {
		id: row.try_get("id")?,
		acl: serde_json::from_str(&acl_json)?,
		version_list,
		version_hash: row.try_get("version_hash")?,
		db_version: row.try_get("last_updated")?,
	})
}

#[async_trait]
impl Db for SqlDb {
	async fn get(&self, id: &str) -> Result<DbKey, KeydbError> {
		let row = sqlx::query(
			"SELECT id, acl, version_hash, versions, last_updated FROM secrets WHERE id = ?",
		)
		.bind(id)
		.fetch_optional(&self.pool)
		.await?;
		match row {
			Some(row) => parse_row(&row),
			None => Err(KeydbError::KeyIdNotFound),
		}
	}

	async fn get_all(&self) -> Result<Vec<DbKey>, KeydbError> {
		let rows =
			sqlx::query("SELECT id, acl, version_hash, versions, last_updated FROM secrets")
				.fetch_all(&self.pool)
				.await?;
		rows.iter().map(parse_row).collect()
	}

	#[tracing::instrument(skip(self, keys))]
	async fn add(&self, keys: &[DbKey]) -> Result<(), KeydbError> {
		for key in keys {
			let acl = serde_json::to_string(&key.acl)?;
			let versions = serde_json::to_string(&key.version_list)?;
			let result = sqlx::query(
				r#"
				INSERT INTO secrets (id, acl, versions, version_hash, last_updated)
				VALUES (?, ?, ?, ?, ?)
				"#,
			)
			.bind(&key.id)
			.bind(&acl)
			.bind(&versions)
			.bind(&key.version_hash)
			.bind(now_nanos())
			.execute(&self.pool)
			.await;
			match result {
				Ok(_) => {}
				Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
					return Err(KeydbError::KeyExists);
				}
				Err(e) => return Err(e.into()),
			}
			tracing::debug!(key_id = %key.id, "key record inserted");
		}
		Ok(())
	}

	#[tracing::instrument(skip(self, key), fields(key_id = %key.id))]
	async fn update(&self, key: &DbKey) -> Result<(), KeydbError> {
		let acl = serde_json::to_string(&key.acl)?;
		let versions = serde_json::to_string(&key.version_list)?;
		let result = sqlx::query(
			r#"
			UPDATE secrets SET versions = ?, version_hash = ?, last_updated = ?, acl = ?
			WHERE id = ? AND last_updated = ?
			"#,
		)
		.bind(&versions)
		.bind(&key.version_hash)
		.bind(now_nanos())
		.bind(&acl)
		.bind(&key.id)
		.bind(key.db_version)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			// Zero rows: the record is gone, or another writer got there
			// first. A follow-up select tells the two apart.
			let exists = sqlx::query("SELECT id FROM secrets WHERE id = ?")
				.bind(&key.id)
				.fetch_optional(&self.pool)
				.await?;
			return match exists {
				Some(_) => Err(KeydbError::DbVersion),
				None => Err(KeydbError::KeyIdNotFound),
			};
		}
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	async fn remove(&self, id: &str) -> Result<(), KeydbError> {
		let result = sqlx::query("DELETE FROM secrets WHERE id = ?")
			.bind(id)
			.execute(&self.pool)
			.await?;
		if result.rows_affected() == 0 {
			return Err(KeydbError::KeyIdNotFound);
		}
		Ok(())
	}
}
