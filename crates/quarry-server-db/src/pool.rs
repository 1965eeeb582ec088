// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::{
	SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::str::FromStr;
use std::time::Duration;

use crate::error::DbError;

/// Bounds applied to the connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
	pub max_connections: u32,
	pub acquire_timeout: Duration,
}

impl Default for PoolLimits {
	fn default() -> Self {
		Self {
			max_connections: 10,
			acquire_timeout: Duration::from_secs(30),
		}
	}
}

/// Create a SqlitePool with WAL mode and default limits.
///
/// # Arguments
/// * `database_url` - SQLite connection string (e.g., "sqlite:./quarry.db")
///
/// # Errors
/// Returns `DbError::Internal` if the URL is invalid or connection fails.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, DbError> {
	create_pool_with(database_url, PoolLimits::default()).await
}

/// Create a SqlitePool with WAL mode, bounded by `limits`.
///
/// Acquiring a connection blocks for at most `limits.acquire_timeout`.
#[tracing::instrument(skip(database_url), fields(max_connections = limits.max_connections))]
pub async fn create_pool_with(
	database_url: &str,
	limits: PoolLimits,
) -> Result<SqlitePool, DbError> {
	let options = SqliteConnectOptions::from_str(database_url)
		.map_err(|e| DbError::Internal(format!("Invalid database URL: {e}")))?
		.journal_mode(SqliteJournalMode::Wal)
		.synchronous(SqliteSynchronous::Normal)
		.foreign_keys(true)
		.create_if_missing(true);

	let pool = SqlitePoolOptions::new()
		.max_connections(limits.max_connections)
		.acquire_timeout(limits.acquire_timeout)
		.connect_with(options)
		.await?;

	tracing::debug!("database pool created");
	Ok(pool)
}
