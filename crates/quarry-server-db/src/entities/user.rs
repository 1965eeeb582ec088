// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Users, as provisioned by the authentication layer.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_server_auth::{AuthzError, Identity, Predicate, UserId, Value};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::capability::{Capability, Gate};
use crate::entity::{get_id, get_timestamps, Entity};
use crate::error::DbError;

use super::immutable;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
	pub id: UserId,
	pub email: String,
	pub display_name: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity for User {
	const TABLE: &'static str = "users";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("email", Value::from(&self.email)),
			("display_name", Value::from(&self.display_name)),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			email: row.try_get("email")?,
			display_name: row.try_get("display_name")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

pub struct UserRules;

#[async_trait]
impl Capability<User> for UserRules {
	/// Yourself, plus users sharing an organization you claim and actually hold.
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::eq("id", user_id).or(Predicate::CoMember {
				column: "id",
				user_id,
				org_ids: identity.org_ids().to_vec(),
			})
		})
	}

	async fn authorize_create(&self, _gate: &mut Gate<'_>, _row: &User) -> Result<(), AuthzError> {
		Err(AuthzError::InsertForbidden { entity: User::TABLE })
	}

	/// Only your own display name. The email drives invitation matching.
	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &User,
		proposed: &User,
	) -> Result<(), AuthzError> {
		let actor = gate.actor()?;
		if current.id != actor {
			return Err(AuthzError::denied("users can only update themselves"));
		}
		immutable("email", &current.email, &proposed.email)
	}
}
