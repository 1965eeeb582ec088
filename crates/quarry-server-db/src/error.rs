// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use quarry_server_auth::AuthzError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error(transparent)]
	Authz(#[from] AuthzError),
}

impl DbError {
	/// Map unique-constraint violations to [`DbError::Conflict`].
	pub(crate) fn from_insert(err: sqlx::Error, what: &str) -> Self {
		match &err {
			sqlx::Error::Database(db) if db.is_unique_violation() => {
				DbError::Conflict(format!("{what} already exists"))
			}
			_ => DbError::Sqlx(err),
		}
	}

	pub fn is_permission_denied(&self) -> bool {
		matches!(self, DbError::Authz(e) if e.is_permission_denied())
	}

	pub fn is_insert_forbidden(&self) -> bool {
		matches!(self, DbError::Authz(e) if e.is_insert_forbidden())
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, DbError::NotFound(_))
	}

	pub fn authz(&self) -> Option<&AuthzError> {
		match self {
			DbError::Authz(e) => Some(e),
			_ => None,
		}
	}
}

pub type Result<T> = std::result::Result<T, DbError>;
