// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Identity context threaded through every engine call.
//!
//! This module provides:
//! - [`Identity`] - who is acting: `(role, user_id, org_ids)`, as asserted by the
//!   upstream authentication middleware
//! - [`RequestContext`] - an identity paired with the request's cancellation token
//!
//! The engine never authenticates anyone. It trusts the identity it is handed and
//! degrades to the least-privileged value whenever part of it is missing.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::AuthzError;
use crate::types::{OrgId, Role, UserId};

/// The authenticated actor for one request.
///
/// Immutable once built. An identity without a user id is anonymous and can see
/// nothing that requires a grant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	role: Role,
	user_id: Option<UserId>,
	org_ids: Vec<OrgId>,
}

impl Identity {
	/// Build an identity from its three parts.
	pub fn new(role: Role, user_id: Option<UserId>, org_ids: Vec<OrgId>) -> Self {
		Self {
			role,
			user_id,
			org_ids,
		}
	}

	/// The anonymous identity.
	pub fn anonymous() -> Self {
		Self::default()
	}

	/// A regular user with no organization claims.
	pub fn user(user_id: UserId) -> Self {
		Self::new(Role::User, Some(user_id), Vec::new())
	}

	/// Build an identity from loosely typed claims.
	///
	/// The role claim degrades to [`Role::Anonymous`] when missing or malformed.
	pub fn from_claims(
		role: Option<&serde_json::Value>,
		user_id: Option<UserId>,
		org_ids: Vec<OrgId>,
	) -> Self {
		Self::new(Role::from_claim(role), user_id, org_ids)
	}

	/// Builder: replace the organization claims.
	pub fn with_orgs(mut self, org_ids: Vec<OrgId>) -> Self {
		self.org_ids = org_ids;
		self
	}

	/// Builder: replace the role.
	pub fn with_role(mut self, role: Role) -> Self {
		self.role = role;
		self
	}

	/// The `(role, user_id, org_ids)` triple.
	pub fn parts(&self) -> (Role, Option<UserId>, &[OrgId]) {
		(self.role, self.user_id, &self.org_ids)
	}

	pub fn role(&self) -> Role {
		self.role
	}

	pub fn user_id(&self) -> Option<UserId> {
		self.user_id
	}

	pub fn org_ids(&self) -> &[OrgId] {
		&self.org_ids
	}

	pub fn is_anonymous(&self) -> bool {
		self.user_id.is_none()
	}

	/// Require an authenticated user.
	pub fn require_user(&self) -> Result<UserId, AuthzError> {
		self.user_id.ok_or(AuthzError::NoIdentity)
	}
}

/// Per-request state handed to every store operation.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
	identity: Identity,
	cancel: CancellationToken,
}

impl RequestContext {
	pub fn new(identity: Identity) -> Self {
		Self {
			identity,
			cancel: CancellationToken::new(),
		}
	}

	/// Use the originating request's cancellation token.
	pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;
		self
	}

	pub fn identity(&self) -> &Identity {
		&self.identity
	}

	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Fail with [`AuthzError::Cancelled`] if the request was cancelled.
	pub fn checkpoint(&self) -> Result<(), AuthzError> {
		if self.cancel.is_cancelled() {
			Err(AuthzError::Cancelled)
		} else {
			Ok(())
		}
	}
}

impl From<Identity> for RequestContext {
	fn from(identity: Identity) -> Self {
		Self::new(identity)
	}
}
