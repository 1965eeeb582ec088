// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Datasets and the rules and actions attached to them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_server_auth::{
	AuthzError, ConnectionId, DatasetActionId, DatasetId, Identity, OrgId, Predicate, ResourceType,
	RuleId, UserId, Value,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::capability::{Capability, Gate, Write};
use crate::closure;
use crate::entity::{get_id, get_json, get_opt_id, get_timestamps, json_value, BelongsTo, Entity, Resource};
use crate::error::DbError;

use super::immutable;
use super::org::Organization;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
	pub id: DatasetId,
	pub org_id: OrgId,
	pub name: String,
	pub description: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl Dataset {
	pub fn new(org_id: OrgId, name: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			id: DatasetId::generate(),
			org_id,
			name: name.into(),
			description: None,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}
}

impl Entity for Dataset {
	const TABLE: &'static str = "datasets";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("org_id", self.org_id.into()),
			("name", Value::from(&self.name)),
			("description", self.description.clone().into()),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			org_id: get_id(row, "org_id")?,
			name: row.try_get("name")?,
			description: row.try_get("description")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl Resource for Dataset {
	const RESOURCE_TYPE: ResourceType = ResourceType::Dataset;
}

impl BelongsTo<Organization> for Dataset {
	const FOREIGN_KEY: &'static str = "org_id";
}

fn dataset_grant(user_id: UserId) -> Predicate {
	Predicate::grant(ResourceType::Dataset, "id", user_id, &[])
}

pub struct DatasetRules;

#[async_trait]
impl Capability<Dataset> for DatasetRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, dataset_grant)
	}

	async fn authorize_create(&self, gate: &mut Gate<'_>, row: &Dataset) -> Result<(), AuthzError> {
		gate.require_access(ResourceType::Organization, row.org_id.into_inner())
			.await
	}

	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &Dataset,
		proposed: &Dataset,
	) -> Result<(), AuthzError> {
		immutable("org_id", &current.org_id, &proposed.org_id)?;
		gate.require_admin(ResourceType::Dataset, current.id.into_inner())
			.await
	}

	async fn authorize_delete(&self, gate: &mut Gate<'_>, current: &Dataset) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Dataset, current.id.into_inner())
			.await
	}

	async fn after_write(&self, gate: &mut Gate<'_>, write: Write<'_, Dataset>) -> Result<(), DbError> {
		if let Write::Deleted(dataset) = write {
			closure::retire_resource(gate.conn(), ResourceType::Dataset, dataset.id.into_inner())
				.await?;
		}
		Ok(())
	}
}

// =============================================================================
// Rule
// =============================================================================

/// A validation rule evaluated against a dataset's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
	pub id: RuleId,
	pub dataset_id: DatasetId,
	pub name: String,
	pub expression: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl Rule {
	pub fn new(dataset_id: DatasetId, name: impl Into<String>, expression: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			id: RuleId::generate(),
			dataset_id,
			name: name.into(),
			expression: expression.into(),
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}
}

impl Entity for Rule {
	const TABLE: &'static str = "dataset_rules";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("dataset_id", self.dataset_id.into()),
			("name", Value::from(&self.name)),
			("expression", Value::from(&self.expression)),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			dataset_id: get_id(row, "dataset_id")?,
			name: row.try_get("name")?,
			expression: row.try_get("expression")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl BelongsTo<Dataset> for Rule {
	const FOREIGN_KEY: &'static str = "dataset_id";
}

pub struct RuleRules;

#[async_trait]
impl Capability<Rule> for RuleRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::via("dataset_id", Dataset::TABLE, dataset_grant(user_id))
		})
	}

	async fn authorize_create(&self, gate: &mut Gate<'_>, row: &Rule) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Dataset, row.dataset_id.into_inner())
			.await
	}

	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &Rule,
		proposed: &Rule,
	) -> Result<(), AuthzError> {
		immutable("dataset_id", &current.dataset_id, &proposed.dataset_id)?;
		gate.require_admin(ResourceType::Dataset, current.dataset_id.into_inner())
			.await
	}

	async fn authorize_delete(&self, gate: &mut Gate<'_>, current: &Rule) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Dataset, current.dataset_id.into_inner())
			.await
	}
}

// =============================================================================
// DatasetAction
// =============================================================================

/// Something a dataset does, optionally through a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetAction {
	pub id: DatasetActionId,
	pub dataset_id: DatasetId,
	pub name: String,
	pub connection_id: Option<ConnectionId>,
	pub config: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl DatasetAction {
	pub fn new(dataset_id: DatasetId, name: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			id: DatasetActionId::generate(),
			dataset_id,
			name: name.into(),
			connection_id: None,
			config: None,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}

	pub fn via_connection(mut self, connection_id: ConnectionId) -> Self {
		self.connection_id = Some(connection_id);
		self
	}

	pub fn with_config(mut self, config: serde_json::Value) -> Self {
		self.config = Some(config);
		self
	}
}

impl Entity for DatasetAction {
	const TABLE: &'static str = "dataset_actions";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("dataset_id", self.dataset_id.into()),
			("name", Value::from(&self.name)),
			("connection_id", self.connection_id.into()),
			("config", json_value(&self.config)),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			dataset_id: get_id(row, "dataset_id")?,
			name: row.try_get("name")?,
			connection_id: get_opt_id(row, "connection_id")?,
			config: get_json(row, "config")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl BelongsTo<Dataset> for DatasetAction {
	const FOREIGN_KEY: &'static str = "dataset_id";
}

pub struct DatasetActionRules;

impl DatasetActionRules {
	async fn require_connection(gate: &mut Gate<'_>, action: &DatasetAction) -> Result<(), AuthzError> {
		match action.connection_id {
			Some(connection_id) => {
				gate.require_access(ResourceType::Connection, connection_id.into_inner())
					.await
			}
			None => Ok(()),
		}
	}
}

#[async_trait]
impl Capability<DatasetAction> for DatasetActionRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::via("dataset_id", Dataset::TABLE, dataset_grant(user_id))
		})
	}

	async fn authorize_create(&self, gate: &mut Gate<'_>, row: &DatasetAction) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Dataset, row.dataset_id.into_inner())
			.await?;
		Self::require_connection(gate, row).await
	}

	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &DatasetAction,
		proposed: &DatasetAction,
	) -> Result<(), AuthzError> {
		immutable("dataset_id", &current.dataset_id, &proposed.dataset_id)?;
		gate.require_admin(ResourceType::Dataset, current.dataset_id.into_inner())
			.await?;
		if proposed.connection_id != current.connection_id {
			Self::require_connection(gate, proposed).await?;
		}
		Ok(())
	}

	async fn authorize_delete(
		&self,
		gate: &mut Gate<'_>,
		current: &DatasetAction,
	) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Dataset, current.dataset_id.into_inner())
			.await
	}
}
