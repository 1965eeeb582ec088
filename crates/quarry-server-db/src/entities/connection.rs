// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! External connections and the schedules that run over them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_server_auth::{
	AuthzError, ConnectionId, Identity, OrgId, Predicate, ResourceType, ScheduleId, Value,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::capability::{Capability, Gate, Write};
use crate::closure;
use crate::entity::{get_id, get_timestamps, BelongsTo, Entity, Resource};
use crate::error::DbError;

use super::immutable;
use super::org::Organization;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
	pub id: ConnectionId,
	pub org_id: OrgId,
	pub name: String,
	/// Driver name, e.g. `postgres`.
	pub kind: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl Connection {
	pub fn new(org_id: OrgId, name: impl Into<String>, kind: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			id: ConnectionId::generate(),
			org_id,
			name: name.into(),
			kind: kind.into(),
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}
}

impl Entity for Connection {
	const TABLE: &'static str = "connections";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("org_id", self.org_id.into()),
			("name", Value::from(&self.name)),
			("kind", Value::from(&self.kind)),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			org_id: get_id(row, "org_id")?,
			name: row.try_get("name")?,
			kind: row.try_get("kind")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl Resource for Connection {
	const RESOURCE_TYPE: ResourceType = ResourceType::Connection;
}

impl BelongsTo<Organization> for Connection {
	const FOREIGN_KEY: &'static str = "org_id";
}

pub struct ConnectionRules;

#[async_trait]
impl Capability<Connection> for ConnectionRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::grant(ResourceType::Connection, "id", user_id, &[])
		})
	}

	async fn authorize_create(&self, gate: &mut Gate<'_>, row: &Connection) -> Result<(), AuthzError> {
		gate.require_access(ResourceType::Organization, row.org_id.into_inner())
			.await
	}

	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &Connection,
		proposed: &Connection,
	) -> Result<(), AuthzError> {
		immutable("org_id", &current.org_id, &proposed.org_id)?;
		gate.require_admin(ResourceType::Connection, current.id.into_inner())
			.await
	}

	async fn authorize_delete(&self, gate: &mut Gate<'_>, current: &Connection) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Connection, current.id.into_inner())
			.await
	}

	async fn after_write(&self, gate: &mut Gate<'_>, write: Write<'_, Connection>) -> Result<(), DbError> {
		if let Write::Deleted(connection) = write {
			closure::retire_resource(gate.conn(), ResourceType::Connection, connection.id.into_inner())
				.await?;
		}
		Ok(())
	}
}

// =============================================================================
// Schedule
// =============================================================================

/// A recurring job over a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
	pub id: ScheduleId,
	pub org_id: OrgId,
	pub connection_id: ConnectionId,
	pub name: String,
	pub cron: String,
	pub enabled: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl Schedule {
	pub fn new(
		org_id: OrgId,
		connection_id: ConnectionId,
		name: impl Into<String>,
		cron: impl Into<String>,
	) -> Self {
		let now = Utc::now();
		Self {
			id: ScheduleId::generate(),
			org_id,
			connection_id,
			name: name.into(),
			cron: cron.into(),
			enabled: true,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}
}

impl Entity for Schedule {
	const TABLE: &'static str = "schedules";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("org_id", self.org_id.into()),
			("connection_id", self.connection_id.into()),
			("name", Value::from(&self.name)),
			("cron", Value::from(&self.cron)),
			("enabled", self.enabled.into()),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			org_id: get_id(row, "org_id")?,
			connection_id: get_id(row, "connection_id")?,
			name: row.try_get("name")?,
			cron: row.try_get("cron")?,
			enabled: row.try_get("enabled")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl Resource for Schedule {
	const RESOURCE_TYPE: ResourceType = ResourceType::Schedule;
}

impl BelongsTo<Connection> for Schedule {
	const FOREIGN_KEY: &'static str = "connection_id";
}

pub struct ScheduleRules;

#[async_trait]
impl Capability<Schedule> for ScheduleRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::grant(ResourceType::Schedule, "id", user_id, &[])
		})
	}

	async fn authorize_create(&self, gate: &mut Gate<'_>, row: &Schedule) -> Result<(), AuthzError> {
		gate.require_access(ResourceType::Organization, row.org_id.into_inner())
			.await?;
		gate.require_access(ResourceType::Connection, row.connection_id.into_inner())
			.await
	}

	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &Schedule,
		proposed: &Schedule,
	) -> Result<(), AuthzError> {
		immutable("org_id", &current.org_id, &proposed.org_id)?;
		gate.require_admin(ResourceType::Schedule, current.id.into_inner())
			.await?;
		if proposed.connection_id != current.connection_id {
			gate.require_access(ResourceType::Connection, proposed.connection_id.into_inner())
				.await?;
		}
		Ok(())
	}

	async fn authorize_delete(&self, gate: &mut Gate<'_>, current: &Schedule) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Schedule, current.id.into_inner())
			.await
	}

	async fn after_write(&self, gate: &mut Gate<'_>, write: Write<'_, Schedule>) -> Result<(), DbError> {
		if let Write::Deleted(schedule) = write {
			closure::retire_resource(gate.conn(), ResourceType::Schedule, schedule.id.into_inner())
				.await?;
		}
		Ok(())
	}
}
