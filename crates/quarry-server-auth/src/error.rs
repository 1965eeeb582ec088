// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Authorization error taxonomy.

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why an operation was refused by the access-control engine.
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
	/// The operation needs an authenticated actor and the identity has none.
	#[error("no identity: an authenticated user is required")]
	NoIdentity,

	/// The actor is known but lacks the required privilege.
	///
	/// When the denial was caused by a failing authorization sub-query the
	/// underlying store error is kept as the source.
	#[error("permission denied: {reason}")]
	PermissionDenied {
		reason: String,
		#[source]
		source: Option<BoxError>,
	},

	/// Rows of this entity are never created through the generic paths.
	#[error("insert forbidden: {entity} rows cannot be created directly")]
	InsertForbidden { entity: &'static str },

	/// The entity has no registered capability. Deploy-time bug.
	#[error("misconfigured entity: no capability registered for {entity}")]
	MisconfiguredEntity { entity: &'static str },

	/// The grant itself is malformed (unknown or out-of-vocabulary privilege).
	#[error("invalid grant: {0}")]
	InvalidGrant(String),

	/// The request was cancelled before authorization completed.
	#[error("operation cancelled")]
	Cancelled,
}

impl AuthzError {
	pub fn denied(reason: impl Into<String>) -> Self {
		AuthzError::PermissionDenied {
			reason: reason.into(),
			source: None,
		}
	}

	/// A denial caused by a failing authorization sub-query.
	pub fn denied_by<E>(reason: impl Into<String>, source: E) -> Self
	where
		E: std::error::Error + Send + Sync + 'static,
	{
		AuthzError::PermissionDenied {
			reason: reason.into(),
			source: Some(Box::new(source)),
		}
	}

	pub fn is_permission_denied(&self) -> bool {
		matches!(self, AuthzError::PermissionDenied { .. })
	}

	pub fn is_insert_forbidden(&self) -> bool {
		matches!(self, AuthzError::InsertForbidden { .. })
	}
}
