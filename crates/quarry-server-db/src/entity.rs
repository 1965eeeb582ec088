// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Table mapping for persistent entities.
//!
//! An [`Entity`] knows its table, how to decode a row, and which data columns to
//! write. `id`, `created_at`, `updated_at` and `deleted_at` are managed by the
//! store and are not part of [`Entity::columns`].

use chrono::{DateTime, Utc};
use quarry_server_auth::{ResourceType, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::DbError;

pub trait Entity: Clone + Send + Sync + Unpin + 'static {
	/// Table holding the rows.
	const TABLE: &'static str;

	/// Primary lookup column used by `find`, `update` and `delete`.
	const ID_COLUMN: &'static str = "id";

	fn id(&self) -> Uuid;

	/// Data columns in write order.
	fn columns(&self) -> Vec<(&'static str, Value)>;

	fn from_row(row: &SqliteRow) -> Result<Self, DbError>;
}

/// An entity that is itself a policy-bearing resource.
pub trait Resource: Entity {
	const RESOURCE_TYPE: ResourceType;
}

/// A child entity reachable from parent `P` through a foreign key.
pub trait BelongsTo<P: Entity>: Entity {
	const FOREIGN_KEY: &'static str;
}

// Row decoding helpers.

pub(crate) fn get_uuid(row: &SqliteRow, column: &str) -> Result<Uuid, DbError> {
	let raw: String = row.try_get(column)?;
	Uuid::parse_str(&raw).map_err(|e| DbError::Internal(format!("Invalid {column}: {e}")))
}

pub(crate) fn get_id<T: From<Uuid>>(row: &SqliteRow, column: &str) -> Result<T, DbError> {
	get_uuid(row, column).map(T::from)
}

pub(crate) fn get_opt_id<T: From<Uuid>>(
	row: &SqliteRow,
	column: &str,
) -> Result<Option<T>, DbError> {
	let raw: Option<String> = row.try_get(column)?;
	raw.map(|s| {
		Uuid::parse_str(&s)
			.map(T::from)
			.map_err(|e| DbError::Internal(format!("Invalid {column}: {e}")))
	})
	.transpose()
}

pub(crate) fn parse_ts(raw: &str, column: &str) -> Result<DateTime<Utc>, DbError> {
	DateTime::parse_from_rfc3339(raw)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| DbError::Internal(format!("Invalid {column}: {e}")))
}

pub(crate) fn get_ts(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>, DbError> {
	let raw: String = row.try_get(column)?;
	parse_ts(&raw, column)
}

pub(crate) fn get_opt_ts(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, DbError> {
	let raw: Option<String> = row.try_get(column)?;
	raw.map(|s| parse_ts(&s, column)).transpose()
}

pub(crate) fn get_json(
	row: &SqliteRow,
	column: &str,
) -> Result<Option<serde_json::Value>, DbError> {
	let raw: Option<String> = row.try_get(column)?;
	Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
}

pub(crate) fn get_parsed<T>(row: &SqliteRow, column: &str) -> Result<T, DbError>
where
	T: FromStr,
	T::Err: Display,
{
	let raw: String = row.try_get(column)?;
	raw.parse()
		.map_err(|e| DbError::Internal(format!("Invalid {column}: {e}")))
}

/// The `(created_at, updated_at, deleted_at)` triple every table carries.
pub(crate) fn get_timestamps(
	row: &SqliteRow,
) -> Result<(DateTime<Utc>, DateTime<Utc>, Option<DateTime<Utc>>), DbError> {
	Ok((
		get_ts(row, "created_at")?,
		get_ts(row, "updated_at")?,
		get_opt_ts(row, "deleted_at")?,
	))
}

pub(crate) fn json_value(value: &Option<serde_json::Value>) -> Value {
	value.as_ref().map(Value::from).unwrap_or(Value::Null)
}
