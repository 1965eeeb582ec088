// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The capability contract every persistent entity implements.
//!
//! This module provides:
//! - [`Capability`] - read-filter predicate plus create/update/delete guards
//! - [`Gate`] - what a guard may consult: the identity and the live transaction
//! - [`Write`] - the row change handed to [`Capability::after_write`]
//!
//! Guards run inside the mutating transaction and see its uncommitted state.
//! Update and delete are forbidden unless a capability says otherwise.

use async_trait::async_trait;
use quarry_server_auth::{
	AuthzError, Identity, Predicate, Privilege, RequestContext, ResourceType, UserId,
};
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use crate::entity::Entity;
use crate::error::DbError;
use crate::sql::FLATTENED_TABLE;

/// A completed row change, passed to [`Capability::after_write`].
pub enum Write<'w, E> {
	Created(&'w E),
	Updated { before: &'w E, after: &'w E },
	Deleted(&'w E),
}

impl<'w, E> Write<'w, E> {
	/// The row as it is now (the pre-delete row for deletions).
	pub fn row(&self) -> &'w E {
		match self {
			Write::Created(row) | Write::Deleted(row) => row,
			Write::Updated { after, .. } => after,
		}
	}
}

#[async_trait]
pub trait Capability<E: Entity>: Send + Sync {
	/// Rows of `E` visible to `identity`. Must not widen for anonymous identities.
	fn filter_predicate(&self, identity: &Identity) -> Predicate;

	/// Gate an insert. No default: every entity decides.
	async fn authorize_create(&self, gate: &mut Gate<'_>, row: &E) -> Result<(), AuthzError>;

	async fn authorize_update(
		&self,
		_gate: &mut Gate<'_>,
		_current: &E,
		_proposed: &E,
	) -> Result<(), AuthzError> {
		Err(AuthzError::denied(format!("{} rows cannot be updated", E::TABLE)))
	}

	async fn authorize_delete(&self, _gate: &mut Gate<'_>, _current: &E) -> Result<(), AuthzError> {
		Err(AuthzError::denied(format!("{} rows cannot be deleted", E::TABLE)))
	}

	/// Runs after the write, in the same transaction.
	async fn after_write(&self, _gate: &mut Gate<'_>, _write: Write<'_, E>) -> Result<(), DbError> {
		Ok(())
	}
}

/// Authorization view of an in-flight transaction.
///
/// Every sub-query first checks the request's cancellation token. A store error
/// inside a sub-query becomes [`AuthzError::PermissionDenied`] carrying the
/// original error as its source.
pub struct Gate<'c> {
	ctx: &'c RequestContext,
	conn: &'c mut SqliteConnection,
}

impl<'c> Gate<'c> {
	pub(crate) fn new(ctx: &'c RequestContext, conn: &'c mut SqliteConnection) -> Self {
		Self { ctx, conn }
	}

	pub fn context(&self) -> &RequestContext {
		self.ctx
	}

	pub fn identity(&self) -> &Identity {
		self.ctx.identity()
	}

	/// The acting user, or [`AuthzError::NoIdentity`].
	pub fn actor(&self) -> Result<UserId, AuthzError> {
		self.ctx.identity().require_user()
	}

	pub fn checkpoint(&self) -> Result<(), AuthzError> {
		self.ctx.checkpoint()
	}

	/// The transaction's connection, for post-write maintenance.
	pub fn conn(&mut self) -> &mut SqliteConnection {
		&mut *self.conn
	}

	/// Does the actor hold one of `privileges` (any privilege if empty) on the resource?
	///
	/// Anonymous identities hold nothing.
	pub async fn has_policy(
		&mut self,
		resource_type: ResourceType,
		resource_id: Uuid,
		privileges: &[Privilege],
	) -> Result<bool, AuthzError> {
		self.checkpoint()?;
		let Some(user_id) = self.identity().user_id() else {
			return Ok(false);
		};

		let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new(format!(
			"SELECT COUNT(*) FROM {FLATTENED_TABLE} WHERE deleted_at IS NULL AND user_id = "
		));
		qb.push_bind(user_id.to_string());
		qb.push(" AND resource_type = ");
		qb.push_bind(resource_type.as_str().to_string());
		qb.push(" AND resource_id = ");
		qb.push_bind(resource_id.to_string());
		if !privileges.is_empty() {
			qb.push(" AND privilege IN (");
			let mut separated = qb.separated(", ");
			for privilege in privileges {
				separated.push_bind(privilege.as_str().to_string());
			}
			separated.push_unseparated(")");
		}

		let count: i64 = qb
			.build_query_scalar()
			.fetch_one(&mut *self.conn)
			.await
			.map_err(|e| AuthzError::denied_by("policy lookup failed", e))?;
		Ok(count > 0)
	}

	/// Require one of `privileges` (any privilege if empty) on the resource.
	pub async fn require_policy(
		&mut self,
		resource_type: ResourceType,
		resource_id: Uuid,
		privileges: &[Privilege],
	) -> Result<(), AuthzError> {
		self.actor()?;
		if self.has_policy(resource_type, resource_id, privileges).await? {
			return Ok(());
		}
		let wanted = if privileges.is_empty() {
			"access".to_string()
		} else {
			privileges
				.iter()
				.map(|p| p.as_str())
				.collect::<Vec<_>>()
				.join(" or ")
		};
		Err(AuthzError::denied(format!(
			"{wanted} on {resource_type} {resource_id} required"
		)))
	}

	/// Require the resource type's admin-equivalent privilege.
	pub async fn require_admin(
		&mut self,
		resource_type: ResourceType,
		resource_id: Uuid,
	) -> Result<(), AuthzError> {
		self.require_policy(resource_type, resource_id, &[resource_type.admin_privilege()])
			.await
	}

	/// Require any privilege at all on the resource.
	pub async fn require_access(
		&mut self,
		resource_type: ResourceType,
		resource_id: Uuid,
	) -> Result<(), AuthzError> {
		self.require_policy(resource_type, resource_id, &[]).await
	}

	/// Read a UUID column of a live row, bypassing row scoping.
	pub async fn lookup(
		&mut self,
		table: &'static str,
		column: &'static str,
		id: Uuid,
	) -> Result<Option<Uuid>, AuthzError> {
		self.checkpoint()?;
		let raw: Option<String> = sqlx::query_scalar(&format!(
			"SELECT {column} FROM {table} WHERE id = ? AND deleted_at IS NULL"
		))
		.bind(id.to_string())
		.fetch_optional(&mut *self.conn)
		.await
		.map_err(|e| AuthzError::denied_by(format!("{table} lookup failed"), e))?;

		raw.map(|s| {
			Uuid::parse_str(&s)
				.map_err(|e| AuthzError::denied_by(format!("{table}.{column} is malformed"), e))
		})
		.transpose()
	}

	/// Does a live row with this id exist?
	pub async fn exists(&mut self, table: &'static str, id: Uuid) -> Result<bool, AuthzError> {
		Ok(self.lookup(table, "id", id).await?.is_some())
	}

	/// The acting user's email, if the user is known.
	pub async fn actor_email(&mut self) -> Result<Option<String>, AuthzError> {
		self.checkpoint()?;
		let Some(user_id) = self.identity().user_id() else {
			return Ok(None);
		};
		let row = sqlx::query("SELECT email FROM users WHERE id = ? AND deleted_at IS NULL")
			.bind(user_id.to_string())
			.fetch_optional(&mut *self.conn)
			.await
			.map_err(|e| AuthzError::denied_by("user lookup failed", e))?;
		Ok(row.map(|r| r.get::<String, _>("email")))
	}
}
