// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Payment provider configuration.
//!
//! Created by an organization's `system_admin`, but from then on scoped by the
//! config's own `payments` grants. Org admins without one cannot see it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_server_auth::{
	AuthzError, Identity, OrgId, PaymentsConfigId, Predicate, Privilege, ResourceType, Value,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::capability::{Capability, Gate, Write};
use crate::closure;
use crate::entity::{get_id, get_json, get_timestamps, json_value, BelongsTo, Entity, Resource};
use crate::error::DbError;

use super::immutable;
use super::org::Organization;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentsConfig {
	pub id: PaymentsConfigId,
	pub org_id: OrgId,
	pub provider: String,
	pub settings: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl PaymentsConfig {
	pub fn new(org_id: OrgId, provider: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			id: PaymentsConfigId::generate(),
			org_id,
			provider: provider.into(),
			settings: None,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}

	pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
		self.settings = Some(settings);
		self
	}
}

impl Entity for PaymentsConfig {
	const TABLE: &'static str = "payments_configs";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("org_id", self.org_id.into()),
			("provider", Value::from(&self.provider)),
			("settings", json_value(&self.settings)),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			org_id: get_id(row, "org_id")?,
			provider: row.try_get("provider")?,
			settings: get_json(row, "settings")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl Resource for PaymentsConfig {
	const RESOURCE_TYPE: ResourceType = ResourceType::Payments;
}

impl BelongsTo<Organization> for PaymentsConfig {
	const FOREIGN_KEY: &'static str = "org_id";
}

pub struct PaymentsConfigRules;

#[async_trait]
impl Capability<PaymentsConfig> for PaymentsConfigRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::grant(ResourceType::Payments, "id", user_id, &[Privilege::Admin])
		})
	}

	async fn authorize_create(&self, gate: &mut Gate<'_>, row: &PaymentsConfig) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Organization, row.org_id.into_inner())
			.await
	}

	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &PaymentsConfig,
		proposed: &PaymentsConfig,
	) -> Result<(), AuthzError> {
		immutable("org_id", &current.org_id, &proposed.org_id)?;
		gate.require_admin(ResourceType::Payments, current.id.into_inner())
			.await
	}

	async fn authorize_delete(
		&self,
		gate: &mut Gate<'_>,
		current: &PaymentsConfig,
	) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Payments, current.id.into_inner())
			.await
	}

	async fn after_write(
		&self,
		gate: &mut Gate<'_>,
		write: Write<'_, PaymentsConfig>,
	) -> Result<(), DbError> {
		if let Write::Deleted(config) = write {
			closure::retire_resource(gate.conn(), ResourceType::Payments, config.id.into_inner())
				.await?;
		}
		Ok(())
	}
}
