// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scoped access to every registered entity.
//!
//! This module provides:
//! - [`Store`] - one transaction per call, for handlers doing a single operation
//! - [`ScopedTx`] - an open transaction for callers composing several writes
//! - [`ListQuery`] - caller filter, paging, and soft-delete visibility
//!
//! Every read merges the entity's filter predicate with the caller's filter.
//! Every write first runs the entity's guard, then re-applies the filter
//! predicate to the statement itself. Rows the identity cannot see are reported
//! as [`DbError::NotFound`] by `update` and `delete`.

use chrono::Utc;
use quarry_server_auth::{
	AuthzError, Predicate, RequestContext, ResourceAudiencePolicy, Value,
};
use sqlx::sqlite::SqlitePool;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, Transaction};
use std::sync::Arc;
use uuid::Uuid;

use crate::capability::{Capability, Gate, Write};
use crate::closure;
use crate::entity::{BelongsTo, Entity, Resource};
use crate::error::DbError;
use crate::registry::Registry;
use crate::sql::{push_predicate, push_value, ROOT_ALIAS};

/// Filtering and paging for `list`.
#[derive(Debug, Clone)]
pub struct ListQuery {
	pub filter: Predicate,
	pub limit: Option<i64>,
	pub offset: Option<i64>,
	pub include_deleted: bool,
}

impl Default for ListQuery {
	fn default() -> Self {
		Self {
			filter: Predicate::Always,
			limit: None,
			offset: None,
			include_deleted: false,
		}
	}
}

impl ListQuery {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn filter(mut self, filter: Predicate) -> Self {
		self.filter = filter;
		self
	}

	pub fn limit(mut self, limit: i64) -> Self {
		self.limit = Some(limit);
		self
	}

	pub fn offset(mut self, offset: i64) -> Self {
		self.offset = Some(offset);
		self
	}

	pub fn include_deleted(mut self) -> Self {
		self.include_deleted = true;
		self
	}
}

/// Entry point to scoped persistence.
#[derive(Clone)]
pub struct Store {
	pool: SqlitePool,
	registry: Arc<Registry>,
}

impl Store {
	pub fn new(pool: SqlitePool, registry: Arc<Registry>) -> Self {
		Self { pool, registry }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	pub fn registry(&self) -> &Registry {
		&self.registry
	}

	/// Open a transaction scoped to `ctx`. Dropping it without commit rolls back.
	pub async fn begin<'a>(&self, ctx: &'a RequestContext) -> Result<ScopedTx<'a>, DbError> {
		ctx.checkpoint()?;
		let tx = self.pool.begin().await?;
		Ok(ScopedTx {
			tx,
			ctx,
			registry: Arc::clone(&self.registry),
		})
	}

	pub async fn find<E: Entity>(
		&self,
		ctx: &RequestContext,
		id: impl Into<Uuid>,
	) -> Result<Option<E>, DbError> {
		let mut tx = self.begin(ctx).await?;
		let found = tx.find::<E>(id).await?;
		tx.commit().await?;
		Ok(found)
	}

	pub async fn list<E: Entity>(
		&self,
		ctx: &RequestContext,
		query: &ListQuery,
	) -> Result<Vec<E>, DbError> {
		let mut tx = self.begin(ctx).await?;
		let rows = tx.list::<E>(query).await?;
		tx.commit().await?;
		Ok(rows)
	}

	pub async fn count<E: Entity>(
		&self,
		ctx: &RequestContext,
		filter: Predicate,
	) -> Result<i64, DbError> {
		let mut tx = self.begin(ctx).await?;
		let count = tx.count::<E>(filter).await?;
		tx.commit().await?;
		Ok(count)
	}

	pub async fn create<E: Entity>(&self, ctx: &RequestContext, row: E) -> Result<E, DbError> {
		let mut tx = self.begin(ctx).await?;
		let created = tx.create(row).await?;
		tx.commit().await?;
		Ok(created)
	}

	pub async fn create_resource<E: Resource>(
		&self,
		ctx: &RequestContext,
		row: E,
	) -> Result<E, DbError> {
		let mut tx = self.begin(ctx).await?;
		let created = tx.create_resource(row).await?;
		tx.commit().await?;
		Ok(created)
	}

	pub async fn update<E: Entity>(&self, ctx: &RequestContext, row: E) -> Result<E, DbError> {
		let mut tx = self.begin(ctx).await?;
		let updated = tx.update(row).await?;
		tx.commit().await?;
		Ok(updated)
	}

	pub async fn delete<E: Entity>(
		&self,
		ctx: &RequestContext,
		id: impl Into<Uuid>,
	) -> Result<(), DbError> {
		let mut tx = self.begin(ctx).await?;
		tx.delete::<E>(id).await?;
		tx.commit().await?;
		Ok(())
	}

	pub async fn related<P: Entity, C: BelongsTo<P>>(
		&self,
		ctx: &RequestContext,
		parent_id: impl Into<Uuid>,
	) -> Result<Vec<C>, DbError> {
		let mut tx = self.begin(ctx).await?;
		let rows = tx.related::<P, C>(parent_id).await?;
		tx.commit().await?;
		Ok(rows)
	}
}

/// A transaction bound to one request's identity.
pub struct ScopedTx<'a> {
	tx: Transaction<'static, Sqlite>,
	ctx: &'a RequestContext,
	registry: Arc<Registry>,
}

impl<'a> ScopedTx<'a> {
	pub fn context(&self) -> &'a RequestContext {
		self.ctx
	}

	pub async fn commit(self) -> Result<(), DbError> {
		self.tx.commit().await?;
		Ok(())
	}

	pub async fn rollback(self) -> Result<(), DbError> {
		self.tx.rollback().await?;
		Ok(())
	}

	/// The raw connection. Bypasses scoping; crate-internal maintenance only.
	pub(crate) fn conn(&mut self) -> &mut SqliteConnection {
		&mut *self.tx
	}

	fn capability<E: Entity>(&self) -> Result<Arc<dyn Capability<E>>, AuthzError> {
		self.registry.capability::<E>()
	}

	/// The entity's filter predicate for this request.
	fn scope<E: Entity>(&self) -> Result<(Arc<dyn Capability<E>>, Predicate), DbError> {
		self.ctx.checkpoint()?;
		let capability = self.capability::<E>()?;
		let predicate = capability.filter_predicate(self.ctx.identity()).simplify();
		tracing::trace!(table = E::TABLE, predicate = %predicate, "row scope");
		Ok((capability, predicate))
	}

	fn log_denial<E: Entity>(&self, op: &'static str, err: &AuthzError) {
		tracing::warn!(
			table = E::TABLE,
			op,
			user_id = ?self.ctx.identity().user_id(),
			error = %err,
			"write denied"
		);
	}

	/// Fetch one live row visible to the identity.
	#[tracing::instrument(skip(self, id), fields(table = E::TABLE))]
	pub async fn find<E: Entity>(&mut self, id: impl Into<Uuid>) -> Result<Option<E>, DbError> {
		let id = id.into();
		let (_, scope) = self.scope::<E>()?;

		let mut qb = QueryBuilder::<Sqlite>::new(format!(
			"SELECT {ROOT_ALIAS}.* FROM {table} {ROOT_ALIAS} WHERE {ROOT_ALIAS}.{id_column} = ",
			table = E::TABLE,
			id_column = E::ID_COLUMN,
		));
		qb.push_bind(id.to_string());
		qb.push(format!(" AND {ROOT_ALIAS}.deleted_at IS NULL AND "));
		push_predicate(&mut qb, ROOT_ALIAS, &scope);
		qb.push(" LIMIT 1");

		let row = qb.build().fetch_optional(&mut *self.tx).await?;
		row.map(|r| E::from_row(&r)).transpose()
	}

	/// Rows visible to the identity that also match the caller's filter.
	#[tracing::instrument(skip(self, query), fields(table = E::TABLE))]
	pub async fn list<E: Entity>(&mut self, query: &ListQuery) -> Result<Vec<E>, DbError> {
		let (_, scope) = self.scope::<E>()?;
		let predicate = scope.and(query.filter.clone()).simplify();

		let mut qb = QueryBuilder::<Sqlite>::new(format!(
			"SELECT {ROOT_ALIAS}.* FROM {table} {ROOT_ALIAS} WHERE ",
			table = E::TABLE
		));
		if !query.include_deleted {
			qb.push(format!("{ROOT_ALIAS}.deleted_at IS NULL AND "));
		}
		push_predicate(&mut qb, ROOT_ALIAS, &predicate);
		qb.push(format!(
			" ORDER BY {ROOT_ALIAS}.created_at, {ROOT_ALIAS}.{}",
			E::ID_COLUMN
		));
		if query.limit.is_some() || query.offset.is_some() {
			qb.push(" LIMIT ");
			qb.push_bind(query.limit.unwrap_or(-1));
			qb.push(" OFFSET ");
			qb.push_bind(query.offset.unwrap_or(0));
		}

		let rows = qb.build().fetch_all(&mut *self.tx).await?;
		rows.iter().map(E::from_row).collect()
	}

	#[tracing::instrument(skip(self, filter), fields(table = E::TABLE))]
	pub async fn count<E: Entity>(&mut self, filter: Predicate) -> Result<i64, DbError> {
		let (_, scope) = self.scope::<E>()?;
		let predicate = scope.and(filter).simplify();

		let mut qb = QueryBuilder::<Sqlite>::new(format!(
			"SELECT COUNT(*) FROM {table} {ROOT_ALIAS} WHERE {ROOT_ALIAS}.deleted_at IS NULL AND ",
			table = E::TABLE
		));
		push_predicate(&mut qb, ROOT_ALIAS, &predicate);

		let count: i64 = qb.build_query_scalar().fetch_one(&mut *self.tx).await?;
		Ok(count)
	}

	/// Load a live row by id without scoping.
	async fn load<E: Entity>(&mut self, id: Uuid) -> Result<E, DbError> {
		let row = sqlx::query(&format!(
			"SELECT * FROM {table} WHERE {id_column} = ? AND deleted_at IS NULL LIMIT 1",
			table = E::TABLE,
			id_column = E::ID_COLUMN,
		))
		.bind(id.to_string())
		.fetch_optional(&mut *self.tx)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("{} {id}", E::TABLE)))?;
		E::from_row(&row)
	}

	/// Authorize and insert a row.
	#[tracing::instrument(skip(self, row), fields(table = E::TABLE, id = %row.id()))]
	pub async fn create<E: Entity>(&mut self, row: E) -> Result<E, DbError> {
		let (capability, _) = self.scope::<E>()?;
		let ctx = self.ctx;

		let verdict = {
			let mut gate = Gate::new(ctx, &mut *self.tx);
			capability.authorize_create(&mut gate, &row).await
		};
		if let Err(err) = verdict {
			self.log_denial::<E>("create", &err);
			return Err(err.into());
		}

		let now = Utc::now().to_rfc3339();
		let columns = row.columns();
		let mut qb = QueryBuilder::<Sqlite>::new(format!(
			"INSERT INTO {table} ({id_column}",
			table = E::TABLE,
			id_column = E::ID_COLUMN,
		));
		for (name, _) in &columns {
			qb.push(", ");
			qb.push(*name);
		}
		qb.push(", created_at, updated_at) VALUES (");
		qb.push_bind(row.id().to_string());
		for (_, value) in &columns {
			qb.push(", ");
			push_value(&mut qb, value);
		}
		qb.push(", ");
		qb.push_bind(now.clone());
		qb.push(", ");
		qb.push_bind(now);
		qb.push(")");

		qb.build()
			.execute(&mut *self.tx)
			.await
			.map_err(|e| DbError::from_insert(e, E::TABLE))?;

		let created = self.load::<E>(row.id()).await?;
		{
			let mut gate = Gate::new(ctx, &mut *self.tx);
			capability
				.after_write(&mut gate, Write::Created(&created))
				.await?;
		}

		tracing::debug!(table = E::TABLE, id = %created.id(), "row created");
		Ok(created)
	}

	/// Create a resource and grant its creator the admin-equivalent privilege,
	/// atomically.
	pub async fn create_resource<E: Resource>(&mut self, row: E) -> Result<E, DbError> {
		let creator = self.ctx.identity().require_user()?;
		let created = self.create(row).await?;

		let resource_type = E::RESOURCE_TYPE;
		let grant = ResourceAudiencePolicy::creator_grant(resource_type, created.id(), creator);
		closure::insert_policy(&mut *self.tx, &grant).await?;

		tracing::debug!(
			resource_type = %resource_type,
			resource_id = %created.id(),
			creator = %creator,
			"creator granted admin"
		);
		Ok(created)
	}

	/// Authorize and apply changes to a visible row.
	#[tracing::instrument(skip(self, proposed), fields(table = E::TABLE, id = %proposed.id()))]
	pub async fn update<E: Entity>(&mut self, proposed: E) -> Result<E, DbError> {
		let id = proposed.id();
		let current = self
			.find::<E>(id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("{} {id}", E::TABLE)))?;
		let (capability, scope) = self.scope::<E>()?;
		let ctx = self.ctx;

		let verdict = {
			let mut gate = Gate::new(ctx, &mut *self.tx);
			capability
				.authorize_update(&mut gate, &current, &proposed)
				.await
		};
		if let Err(err) = verdict {
			self.log_denial::<E>("update", &err);
			return Err(err.into());
		}

		let mut qb = QueryBuilder::<Sqlite>::new(format!("UPDATE {} AS {ROOT_ALIAS} SET ", E::TABLE));
		for (name, value) in proposed.columns() {
			qb.push(name);
			qb.push(" = ");
			push_value(&mut qb, &value);
			qb.push(", ");
		}
		qb.push("updated_at = ");
		qb.push_bind(Utc::now().to_rfc3339());
		push_row_match::<E>(&mut qb, id, &scope);

		let result = qb.build().execute(&mut *self.tx).await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("{} {id}", E::TABLE)));
		}

		let updated = self.load::<E>(id).await?;
		{
			let mut gate = Gate::new(ctx, &mut *self.tx);
			capability
				.after_write(
					&mut gate,
					Write::Updated {
						before: &current,
						after: &updated,
					},
				)
				.await?;
		}

		tracing::debug!(table = E::TABLE, id = %id, "row updated");
		Ok(updated)
	}

	/// Authorize and soft-delete a visible row.
	#[tracing::instrument(skip(self, id), fields(table = E::TABLE))]
	pub async fn delete<E: Entity>(&mut self, id: impl Into<Uuid>) -> Result<(), DbError> {
		let id = id.into();
		let current = self
			.find::<E>(id)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("{} {id}", E::TABLE)))?;
		let (capability, scope) = self.scope::<E>()?;
		let ctx = self.ctx;

		let verdict = {
			let mut gate = Gate::new(ctx, &mut *self.tx);
			capability.authorize_delete(&mut gate, &current).await
		};
		if let Err(err) = verdict {
			self.log_denial::<E>("delete", &err);
			return Err(err.into());
		}

		let now = Utc::now().to_rfc3339();
		let mut qb = QueryBuilder::<Sqlite>::new(format!(
			"UPDATE {} AS {ROOT_ALIAS} SET deleted_at = ",
			E::TABLE
		));
		qb.push_bind(now.clone());
		qb.push(", updated_at = ");
		qb.push_bind(now);
		push_row_match::<E>(&mut qb, id, &scope);

		let result = qb.build().execute(&mut *self.tx).await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("{} {id}", E::TABLE)));
		}

		{
			let mut gate = Gate::new(ctx, &mut *self.tx);
			capability
				.after_write(&mut gate, Write::Deleted(&current))
				.await?;
		}

		tracing::debug!(table = E::TABLE, id = %id, "row deleted");
		Ok(())
	}

	/// Children of a visible parent, filtered by the child's own predicate.
	///
	/// An invisible parent yields no children.
	pub async fn related<P: Entity, C: BelongsTo<P>>(
		&mut self,
		parent_id: impl Into<Uuid>,
	) -> Result<Vec<C>, DbError> {
		let parent_id = parent_id.into();
		if self.find::<P>(parent_id).await?.is_none() {
			return Ok(Vec::new());
		}
		let query = ListQuery::new().filter(Predicate::eq(C::FOREIGN_KEY, parent_id));
		self.list::<C>(&query).await
	}
}

/// ` WHERE <id> = ? AND deleted_at IS NULL AND <scope>` for single-row writes.
fn push_row_match<E: Entity>(qb: &mut QueryBuilder<'_, Sqlite>, id: Uuid, scope: &Predicate) {
	qb.push(format!(" WHERE {ROOT_ALIAS}.{} = ", E::ID_COLUMN));
	push_value(qb, &Value::from(id));
	qb.push(format!(" AND {ROOT_ALIAS}.deleted_at IS NULL AND "));
	push_predicate(qb, ROOT_ALIAS, scope);
}
