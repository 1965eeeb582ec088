// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Teams and team memberships.
//!
//! Both are administered by the parent organization's `system_admin`s. Joining
//! or leaving a team updates the flattened closure of every policy the team holds.

use async_trait::async_trait;
use chrono::Utc;
use quarry_server_auth::{
	Audience, AuthzError, Identity, Predicate, ResourceType, Team, TeamMembership, Value,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::capability::{Capability, Gate, Write};
use crate::closure;
use crate::entity::{get_id, get_timestamps, BelongsTo, Entity};
use crate::error::DbError;

use super::immutable;
use super::org::Organization;

impl Entity for Team {
	const TABLE: &'static str = "teams";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![("org_id", self.org_id.into()), ("name", Value::from(&self.name))]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			org_id: get_id(row, "org_id")?,
			name: row.try_get("name")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl BelongsTo<Organization> for Team {
	const FOREIGN_KEY: &'static str = "org_id";
}

impl Entity for TeamMembership {
	const TABLE: &'static str = "team_memberships";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![("team_id", self.team_id.into()), ("user_id", self.user_id.into())]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			team_id: get_id(row, "team_id")?,
			user_id: get_id(row, "user_id")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl BelongsTo<Team> for TeamMembership {
	const FOREIGN_KEY: &'static str = "team_id";
}

fn org_scope(user_id: quarry_server_auth::UserId) -> Predicate {
	Predicate::grant(ResourceType::Organization, "org_id", user_id, &[])
}

pub struct TeamRules;

#[async_trait]
impl Capability<Team> for TeamRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, org_scope)
	}

	async fn authorize_create(&self, gate: &mut Gate<'_>, row: &Team) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Organization, row.org_id.into_inner())
			.await
	}

	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &Team,
		proposed: &Team,
	) -> Result<(), AuthzError> {
		immutable("org_id", &current.org_id, &proposed.org_id)?;
		gate.require_admin(ResourceType::Organization, current.org_id.into_inner())
			.await
	}

	async fn authorize_delete(&self, gate: &mut Gate<'_>, current: &Team) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Organization, current.org_id.into_inner())
			.await
	}

	/// A deleted team loses its members and every grant derived through it.
	async fn after_write(&self, gate: &mut Gate<'_>, write: Write<'_, Team>) -> Result<(), DbError> {
		if let Write::Deleted(team) = write {
			let now = Utc::now().to_rfc3339();
			let memberships = sqlx::query(
				r#"
				UPDATE team_memberships
				SET deleted_at = ?, updated_at = ?
				WHERE team_id = ? AND deleted_at IS NULL
				"#,
			)
			.bind(&now)
			.bind(&now)
			.bind(team.id.to_string())
			.execute(&mut *gate.conn())
			.await?;

			let retired = closure::retire_audience(gate.conn(), Audience::Team(team.id)).await?;
			tracing::debug!(
				team_id = %team.id,
				memberships = memberships.rows_affected(),
				retired,
				"team retired"
			);
		}
		Ok(())
	}
}

pub struct TeamMembershipRules;

impl TeamMembershipRules {
	/// `system_admin` on the organization owning `team`. The team must be live.
	async fn require_team_admin(gate: &mut Gate<'_>, membership: &TeamMembership) -> Result<(), AuthzError> {
		gate.actor()?;
		let Some(org_id) = gate
			.lookup(Team::TABLE, "org_id", membership.team_id.into_inner())
			.await?
		else {
			return Err(AuthzError::denied(format!(
				"team {} does not exist",
				membership.team_id
			)));
		};
		gate.require_admin(ResourceType::Organization, org_id).await
	}
}

#[async_trait]
impl Capability<TeamMembership> for TeamMembershipRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::via("team_id", Team::TABLE, org_scope(user_id))
		})
	}

	async fn authorize_create(
		&self,
		gate: &mut Gate<'_>,
		row: &TeamMembership,
	) -> Result<(), AuthzError> {
		Self::require_team_admin(gate, row).await?;
		if !gate.exists("users", row.user_id.into_inner()).await? {
			return Err(AuthzError::denied(format!("user {} does not exist", row.user_id)));
		}
		Ok(())
	}

	async fn authorize_delete(
		&self,
		gate: &mut Gate<'_>,
		current: &TeamMembership,
	) -> Result<(), AuthzError> {
		Self::require_team_admin(gate, current).await
	}

	async fn after_write(
		&self,
		gate: &mut Gate<'_>,
		write: Write<'_, TeamMembership>,
	) -> Result<(), DbError> {
		match write {
			Write::Created(membership) => {
				closure::add_member(gate.conn(), Audience::Team(membership.team_id), membership.user_id)
					.await?;
			}
			Write::Deleted(membership) => {
				closure::remove_member(gate.conn(), Audience::Team(membership.team_id), membership.user_id)
					.await?;
			}
			Write::Updated { .. } => {}
		}
		Ok(())
	}
}
