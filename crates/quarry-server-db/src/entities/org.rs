// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Organizations, their invitations, and their audit trail.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_server_auth::{
	Audience, AuditLogId, AuthzError, Identity, InvitationId, OrgId, Predicate, Privilege,
	ResourceType, UserId, Value,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::capability::{Capability, Gate, Write};
use crate::closure;
use crate::entity::{
	get_id, get_json, get_opt_id, get_opt_ts, get_parsed, get_timestamps, get_ts, json_value,
	BelongsTo, Entity, Resource,
};
use crate::error::DbError;

use super::immutable;

// =============================================================================
// Organization
// =============================================================================

/// A tenant. Membership is a user-audience policy on the organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
	pub id: OrgId,
	pub name: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl Organization {
	pub fn new(name: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			id: OrgId::generate(),
			name: name.into(),
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}
}

impl Entity for Organization {
	const TABLE: &'static str = "organizations";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![("name", Value::from(&self.name))]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			name: row.try_get("name")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl Resource for Organization {
	const RESOURCE_TYPE: ResourceType = ResourceType::Organization;
}

pub struct OrganizationRules;

#[async_trait]
impl Capability<Organization> for OrganizationRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::grant(ResourceType::Organization, "id", user_id, &[])
		})
	}

	/// Organizations have no parent resource; only platform admins create them.
	async fn authorize_create(
		&self,
		gate: &mut Gate<'_>,
		_row: &Organization,
	) -> Result<(), AuthzError> {
		if !gate.identity().role().is_admin() {
			return Err(AuthzError::denied(
				"only platform admins can create organizations",
			));
		}
		gate.actor()?;
		Ok(())
	}

	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &Organization,
		_proposed: &Organization,
	) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Organization, current.id.into_inner())
			.await
	}

	async fn authorize_delete(
		&self,
		gate: &mut Gate<'_>,
		current: &Organization,
	) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Organization, current.id.into_inner())
			.await
	}

	async fn after_write(
		&self,
		gate: &mut Gate<'_>,
		write: Write<'_, Organization>,
	) -> Result<(), DbError> {
		if let Write::Deleted(org) = write {
			closure::retire_resource(gate.conn(), ResourceType::Organization, org.id.into_inner())
				.await?;
			closure::retire_audience(gate.conn(), Audience::Organization(org.id)).await?;
		}
		Ok(())
	}
}

// =============================================================================
// OrganizationInvitation
// =============================================================================

/// An email-addressed offer of organization membership.
///
/// Only the SHA-256 of the invitation token is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationInvitation {
	pub id: InvitationId,
	pub org_id: OrgId,
	pub email: String,
	pub privilege: Privilege,
	#[serde(skip_serializing)]
	pub token_hash: String,
	pub invited_by: UserId,
	pub expires_at: DateTime<Utc>,
	pub accepted_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl OrganizationInvitation {
	pub fn new(
		org_id: OrgId,
		email: impl Into<String>,
		privilege: Privilege,
		token_hash: impl Into<String>,
		invited_by: UserId,
		expires_at: DateTime<Utc>,
	) -> Self {
		let now = Utc::now();
		Self {
			id: InvitationId::generate(),
			org_id,
			email: email.into(),
			privilege,
			token_hash: token_hash.into(),
			invited_by,
			expires_at,
			accepted_at: None,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}

	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expires_at <= now
	}

	pub fn is_addressed_to(&self, email: &str) -> bool {
		self.email.eq_ignore_ascii_case(email)
	}
}

impl Entity for OrganizationInvitation {
	const TABLE: &'static str = "organization_invitations";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("org_id", self.org_id.into()),
			("email", Value::from(&self.email)),
			("privilege", self.privilege.into()),
			("token_hash", Value::from(&self.token_hash)),
			("invited_by", self.invited_by.into()),
			("expires_at", self.expires_at.into()),
			("accepted_at", self.accepted_at.into()),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			org_id: get_id(row, "org_id")?,
			email: row.try_get("email")?,
			privilege: get_parsed(row, "privilege")?,
			token_hash: row.try_get("token_hash")?,
			invited_by: get_id(row, "invited_by")?,
			expires_at: get_ts(row, "expires_at")?,
			accepted_at: get_opt_ts(row, "accepted_at")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl BelongsTo<Organization> for OrganizationInvitation {
	const FOREIGN_KEY: &'static str = "org_id";
}

pub struct OrganizationInvitationRules;

impl OrganizationInvitationRules {
	async fn is_invitee(
		gate: &mut Gate<'_>,
		invitation: &OrganizationInvitation,
	) -> Result<bool, AuthzError> {
		Ok(gate
			.actor_email()
			.await?
			.is_some_and(|email| invitation.is_addressed_to(&email)))
	}
}

#[async_trait]
impl Capability<OrganizationInvitation> for OrganizationInvitationRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::grant(
				ResourceType::Organization,
				"org_id",
				user_id,
				&[Privilege::SystemAdmin],
			)
			.or(Predicate::EmailOf {
				column: "email",
				user_id,
			})
		})
	}

	async fn authorize_create(
		&self,
		gate: &mut Gate<'_>,
		row: &OrganizationInvitation,
	) -> Result<(), AuthzError> {
		let actor = gate.actor()?;
		ResourceType::Organization.validate(row.privilege)?;
		gate.require_admin(ResourceType::Organization, row.org_id.into_inner())
			.await?;
		if row.invited_by != actor {
			return Err(AuthzError::denied("invited_by must be the acting user"));
		}
		if row.accepted_at.is_some() {
			return Err(AuthzError::denied("invitations start unaccepted"));
		}
		Ok(())
	}

	/// Only admins edit an offer. Acceptance goes through
	/// [`accept_invitation`](crate::invitations::accept_invitation), which
	/// proves the token.
	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &OrganizationInvitation,
		proposed: &OrganizationInvitation,
	) -> Result<(), AuthzError> {
		gate.actor()?;
		immutable("org_id", &current.org_id, &proposed.org_id)?;
		immutable("accepted_at", &current.accepted_at, &proposed.accepted_at)?;
		gate.require_admin(ResourceType::Organization, current.org_id.into_inner())
			.await?;
		ResourceType::Organization.validate(proposed.privilege)
	}

	/// Admins revoke; invitees decline.
	async fn authorize_delete(
		&self,
		gate: &mut Gate<'_>,
		current: &OrganizationInvitation,
	) -> Result<(), AuthzError> {
		gate.actor()?;
		if gate
			.has_policy(
				ResourceType::Organization,
				current.org_id.into_inner(),
				&[Privilege::SystemAdmin],
			)
			.await?
		{
			return Ok(());
		}
		if Self::is_invitee(gate, current).await? {
			return Ok(());
		}
		Err(AuthzError::denied("only admins or the invitee can remove an invitation"))
	}
}

// =============================================================================
// AuditLog
// =============================================================================

/// An append-only record of something that happened in an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
	pub id: AuditLogId,
	pub org_id: OrgId,
	pub actor_id: Option<UserId>,
	pub action: String,
	pub target_type: Option<String>,
	pub target_id: Option<Uuid>,
	pub details: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl AuditLog {
	pub fn new(org_id: OrgId, actor_id: Option<UserId>, action: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			id: AuditLogId::generate(),
			org_id,
			actor_id,
			action: action.into(),
			target_type: None,
			target_id: None,
			details: None,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}

	pub fn with_target(mut self, target_type: impl Into<String>, target_id: Uuid) -> Self {
		self.target_type = Some(target_type.into());
		self.target_id = Some(target_id);
		self
	}

	pub fn with_details(mut self, details: serde_json::Value) -> Self {
		self.details = Some(details);
		self
	}
}

impl Entity for AuditLog {
	const TABLE: &'static str = "audit_logs";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("org_id", self.org_id.into()),
			("actor_id", self.actor_id.into()),
			("action", Value::from(&self.action)),
			("target_type", self.target_type.clone().into()),
			("target_id", self.target_id.into()),
			("details", json_value(&self.details)),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			org_id: get_id(row, "org_id")?,
			actor_id: get_opt_id(row, "actor_id")?,
			action: row.try_get("action")?,
			target_type: row.try_get("target_type")?,
			target_id: get_opt_id(row, "target_id")?,
			details: get_json(row, "details")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl BelongsTo<Organization> for AuditLog {
	const FOREIGN_KEY: &'static str = "org_id";
}

pub struct AuditLogRules;

#[async_trait]
impl Capability<AuditLog> for AuditLogRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::grant(ResourceType::Organization, "org_id", user_id, &[])
		})
	}

	async fn authorize_create(&self, gate: &mut Gate<'_>, row: &AuditLog) -> Result<(), AuthzError> {
		gate.require_access(ResourceType::Organization, row.org_id.into_inner())
			.await
	}

	async fn authorize_update(
		&self,
		_gate: &mut Gate<'_>,
		_current: &AuditLog,
		_proposed: &AuditLog,
	) -> Result<(), AuthzError> {
		Err(AuthzError::denied("audit logs are immutable"))
	}

	async fn authorize_delete(&self, _gate: &mut Gate<'_>, _current: &AuditLog) -> Result<(), AuthzError> {
		Err(AuthzError::denied("audit logs are immutable"))
	}
}
