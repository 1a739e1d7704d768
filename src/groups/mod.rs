//! Process groups: scoped, replicated group → member-set views.

use {
	crate::{
		clock::Timestamp,
		cluster::NodeId,
		node,
		primitives::{GroupName, Meta, Scope},
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
	machine::{Call, GroupsMachine, Reply},
	store::{Membership, Store},
};

/// The outcome of a successful join.
#[derive(Debug, Clone)]
pub struct Joined {
	/// The membership timestamp stamped by the owner node.
	pub time: Timestamp,
}

/// Public process-group API of one node.
///
/// Obtained from [`Node::groups`](crate::node::Node::groups); cheap to
/// clone. Writes route to the owner node of the member pid and become
/// visible to local reads before they return; reads are served directly
/// from the local tables.
///
/// # Panics
///
/// Every method panics when called with a scope this node does not run
/// (`invalid_scope`).
pub struct Groups {
	inner: Arc<node::Inner>,
}

impl Clone for Groups {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl Groups {
	pub(crate) fn new(inner: Arc<node::Inner>) -> Self {
		Self { inner }
	}

	/// Adds `pid` to `group` within `scope`, or refreshes its meta if it
	/// is already a member.
	pub async fn join(
		&self,
		scope: impl Into<Scope>,
		group: impl Into<GroupName>,
		pid: Pid,
		meta: impl Into<Meta>,
	) -> Result<Joined, Error> {
		let scope = scope.into();
		let group = group.into();
		let meta = meta.into();

		let caller = self.inner.groups_caller(&scope);
		let local = self.inner.id().clone();

		let reply = if pid.node() == &local {
			caller
				.call(Call::Join {
					group: group.clone(),
					pid: pid.clone(),
					meta: meta.clone(),
					requester: local,
				})
				.await?
		} else {
			let reply = remote_call::<GroupsMachine>(
				self.inner.cluster(),
				&local,
				pid.node(),
				&scope,
				&Call::Join {
					group: group.clone(),
					pid: pid.clone(),
					meta: meta.clone(),
					requester: local.clone(),
				},
			)
			.await?;

			// Read-your-writes: mirror the owner's write locally.
			if let Reply::Joined { time } = &reply {
				caller
					.call(Call::ApplyJoined {
						group: group.clone(),
						pid: pid.clone(),
						meta: meta.clone(),
						time: *time,
					})
					.await?;
			}
			reply
		};

		match reply {
			Reply::Joined { time } => Ok(Joined { time }),
			Reply::NotAlive => Err(Error::NotAlive),
			_ => Err(Error::UnexpectedReply),
		}
	}

	/// Removes `pid` from `group` within `scope`.
	pub async fn leave(
		&self,
		scope: impl Into<Scope>,
		group: impl Into<GroupName>,
		pid: Pid,
	) -> Result<(), Error> {
		let scope = scope.into();
		let group = group.into();

		let caller = self.inner.groups_caller(&scope);
		let local = self.inner.id().clone();

		let reply = if pid.node() == &local {
			caller
				.call(Call::Leave {
					group: group.clone(),
					pid: pid.clone(),
					requester: local,
				})
				.await?
		} else {
			let reply = remote_call::<GroupsMachine>(
				self.inner.cluster(),
				&local,
				pid.node(),
				&scope,
				&Call::Leave {
					group: group.clone(),
					pid: pid.clone(),
					requester: local.clone(),
				},
			)
			.await?;

			if matches!(reply, Reply::Left) {
				caller
					.call(Call::ApplyLeft {
						group: group.clone(),
						pid: pid.clone(),
					})
					.await?;
			}
			reply
		};

		match reply {
			Reply::Left => Ok(()),
			Reply::NotInGroup => Err(Error::NotInGroup),
			_ => Err(Error::UnexpectedReply),
		}
	}

	/// The members of `group` with their meta, as seen by this node.
	pub fn members(
		&self,
		scope: &Scope,
		group: &GroupName,
	) -> Vec<(Pid, Meta)> {
		self.inner.groups_store(scope).members(group)
	}

	/// The members of `group` running on this node.
	pub fn local_members(
		&self,
		scope: &Scope,
		group: &GroupName,
	) -> Vec<(Pid, Meta)> {
		self
			.inner
			.groups_store(scope)
			.members_on(group, self.inner.id())
	}

	/// The number of distinct non-empty groups in `scope`, as seen by this
	/// node.
	pub fn count(&self, scope: &Scope) -> usize {
		self.inner.groups_store(scope).count()
	}

	/// The number of distinct groups with at least one member on `node`.
	pub fn count_on(&self, scope: &Scope, node: &NodeId) -> usize {
		self.inner.groups_store(scope).count_on(node)
	}
}
