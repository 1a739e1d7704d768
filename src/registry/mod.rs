//! The process registry: scoped, replicated name → process bindings.

use {
	crate::{
		clock::Timestamp,
		cluster::NodeId,
		node,
		primitives::{Meta, Name, Scope},
		process::Pid,
		scope::remote_call,
	},
	std::sync::Arc,
};

mod error;
mod machine;
mod store;

pub use error::Error;
pub(crate) use {
	machine::{Call, RegistryMachine, Reply},
	store::{Registration, Store},
};

/// The outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct Registered {
	/// The binding this registration replaced: present when the same pid
	/// re-registered with new meta, absent for a fresh name.
	pub previous: Option<(Pid, Meta)>,

	/// The registration timestamp stamped by the owner node.
	pub time: Timestamp,
}

/// Public registry API of one node.
///
/// Obtained from [`Node::registry`](crate::node::Node::registry); cheap to
/// clone. Writes route to the owner node of the target pid and become
/// visible to local reads before they return; reads are served directly
/// from the local tables without touching the scope actor.
///
/// # Panics
///
/// Every method panics when called with a scope this node does not run
/// (`invalid_scope`): accessing an unknown scope is a programming error,
/// not a runtime condition.
pub struct Registry {
	inner: Arc<node::Inner>,
}

impl Clone for Registry {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl Registry {
	pub(crate) fn new(inner: Arc<node::Inner>) -> Self {
		Self { inner }
	}

	/// Looks up the process registered under `name`, with its meta.
	pub fn lookup(&self, scope: &Scope, name: &Name) -> Option<(Pid, Meta)> {
		let store = self.inner.registry_store(scope);
		store.get(name).map(|row| (row.pid, row.meta))
	}

	/// Registers `pid` under `name` within `scope`.
	///
	/// Executes on the owner node of `pid`; the registration is visible to
	/// reads on this node when the call returns. Re-registering the same
	/// pid under the same name refreshes its meta; a name held by a
	/// different pid yields [`Error::Taken`].
	pub async fn register(
		&self,
		scope: impl Into<Scope>,
		name: impl Into<Name>,
		pid: Pid,
		meta: impl Into<Meta>,
	) -> Result<Registered, Error> {
		let scope = scope.into();
		let name = name.into();
		let meta = meta.into();

		let caller = self.inner.registry_caller(&scope);
		let local = self.inner.id().clone();

		let reply = if pid.node() == &local {
			caller
				.call(Call::Register {
					name: name.clone(),
					pid: pid.clone(),
					meta: meta.clone(),
					requester: local,
				})
				.await?
		} else {
			let reply = remote_call::<RegistryMachine>(
				self.inner.cluster(),
				&local,
				pid.node(),
				&scope,
				&Call::Register {
					name: name.clone(),
					pid: pid.clone(),
					meta: meta.clone(),
					requester: local.clone(),
				},
			)
			.await?;

			// Read-your-writes: mirror the owner's write into the local
			// tables before reporting success.
			if let Reply::Registered { time, .. } = &reply {
				caller
					.call(Call::ApplyRegistered {
						name: name.clone(),
						pid: pid.clone(),
						meta: meta.clone(),
						time: *time,
					})
					.await?;
			}
			reply
		};

		match reply {
			Reply::Registered { previous, time } => {
				Ok(Registered { previous, time })
			}
			Reply::NotAlive => Err(Error::NotAlive),
			Reply::Taken => Err(Error::Taken),
			_ => Err(Error::UnexpectedReply),
		}
	}

	/// Releases `name`, returning the meta it was registered with.
	///
	/// Resolved on the owner node of the currently registered pid. Yields
	/// [`Error::Undefined`] when nothing is registered and
	/// [`Error::RaceCondition`] when a concurrent re-registration moved
	/// the name to a different pid.
	pub async fn unregister(
		&self,
		scope: impl Into<Scope>,
		name: impl Into<Name>,
	) -> Result<Meta, Error> {
		let scope = scope.into();
		let name = name.into();

		// Find the owner through the local view, then let it decide.
		let (pid, _meta) = self.lookup(&scope, &name).ok_or(Error::Undefined)?;

		let caller = self.inner.registry_caller(&scope);
		let local = self.inner.id().clone();

		let reply = if pid.node() == &local {
			caller
				.call(Call::Unregister {
					name: name.clone(),
					pid: pid.clone(),
					requester: local,
				})
				.await?
		} else {
			let reply = remote_call::<RegistryMachine>(
				self.inner.cluster(),
				&local,
				pid.node(),
				&scope,
				&Call::Unregister {
					name: name.clone(),
					pid: pid.clone(),
					requester: local.clone(),
				},
			)
			.await?;

			if let Reply::Unregistered { meta } = &reply {
				caller
					.call(Call::ApplyUnregistered {
						name: name.clone(),
						pid: pid.clone(),
						meta: meta.clone(),
					})
					.await?;
			}
			reply
		};

		match reply {
			Reply::Unregistered { meta } => Ok(meta),
			Reply::Undefined => Err(Error::Undefined),
			Reply::RaceCondition => Err(Error::RaceCondition),
			_ => Err(Error::UnexpectedReply),
		}
	}

	/// The number of names registered in `scope`, as seen by this node.
	pub fn count(&self, scope: &Scope) -> usize {
		self.inner.registry_store(scope).len()
	}

	/// The number of names registered in `scope` whose process runs on
	/// `node`, as seen by this node.
	pub fn count_on(&self, scope: &Scope, node: &NodeId) -> usize {
		self.inner.registry_store(scope).count_on(node)
	}
}
