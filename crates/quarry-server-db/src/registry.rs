// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Entity type → capability lookup, built once at startup.

use quarry_server_auth::AuthzError;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::capability::Capability;
use crate::entity::Entity;

/// Immutable after construction; share it behind an `Arc`.
#[derive(Default)]
pub struct Registry {
	capabilities: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
	tables: Vec<&'static str>,
}

impl Registry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register the capability for `E`, replacing any previous one.
	pub fn register<E: Entity>(&mut self, capability: impl Capability<E> + 'static) -> &mut Self {
		let capability: Arc<dyn Capability<E>> = Arc::new(capability);
		if self
			.capabilities
			.insert(TypeId::of::<E>(), Box::new(capability))
			.is_none()
		{
			self.tables.push(E::TABLE);
		}
		self
	}

	/// The capability for `E`, or [`AuthzError::MisconfiguredEntity`].
	pub fn capability<E: Entity>(&self) -> Result<Arc<dyn Capability<E>>, AuthzError> {
		self.capabilities
			.get(&TypeId::of::<E>())
			.and_then(|boxed| boxed.downcast_ref::<Arc<dyn Capability<E>>>())
			.cloned()
			.ok_or_else(|| {
				tracing::error!(table = E::TABLE, "no capability registered");
				AuthzError::MisconfiguredEntity { entity: E::TABLE }
			})
	}

	pub fn is_registered<E: Entity>(&self) -> bool {
		self.capabilities.contains_key(&TypeId::of::<E>())
	}

	/// Tables with a registered capability, in registration order.
	pub fn tables(&self) -> &[&'static str] {
		&self.tables
	}

	pub fn len(&self) -> usize {
		self.capabilities.len()
	}

	pub fn is_empty(&self) -> bool {
		self.capabilities.is_empty()
	}
}

impl std::fmt::Debug for Registry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Registry")
			.field("tables", &self.tables)
			.finish()
	}
}
