use {
	crate::{
		clock::Timestamp,
		cluster::NodeId,
		primitives::{GroupName, Meta},
		process::{MonitorRef, Pid},
	},
	im::{OrdMap, OrdSet},
	parking_lot::RwLock,
	std::sync::Arc,
};

/// One group membership row, keyed by `(group, pid)`.
#[derive(Debug, Clone)]
pub(crate) struct Membership {
	pub meta: Meta,
	pub time: Timestamp,
	/// Present iff the member pid is owned by the local node; one monitor
	/// per local pid is shared across all its groups.
	pub monitor: Option<MonitorRef>,
	/// The owner node of the member pid.
	pub node: NodeId,
}

/// The per-scope group tables: members nested under their group, plus a
/// by-pid index over the groups each process joined.
///
/// Same sharing contract as the registry store: the scope actor is the
/// single writer, reads work on snapshots.
pub(crate) struct Store(Arc<Inner>);

impl Clone for Store {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}

impl Default for Store {
	fn default() -> Self {
		Self(Arc::new(Inner {
			by_name: RwLock::new(OrdMap::new()),
			by_pid: RwLock::new(OrdMap::new()),
		}))
	}
}

struct Inner {
	by_name: RwLock<OrdMap<GroupName, OrdMap<Pid, Membership>>>,
	by_pid: RwLock<OrdMap<Pid, OrdSet<GroupName>>>,
}

impl Store {
	pub(crate) fn get(
		&self,
		group: &GroupName,
		pid: &Pid,
	) -> Option<Membership> {
		self
			.0
			.by_name
			.read()
			.get(group)
			.and_then(|members| members.get(pid))
			.cloned()
	}

	/// Inserts or overwrites the `(group, pid)` row.
	pub(crate) fn insert(
		&self,
		group: GroupName,
		pid: Pid,
		membership: Membership,
	) {
		let mut by_name = self.0.by_name.write();
		let mut by_pid = self.0.by_pid.write();

		match by_name.get_mut(&group) {
			Some(members) => {
				members.insert(pid.clone(), membership);
			}
			None => {
				by_name.insert(group.clone(), OrdMap::unit(pid.clone(), membership));
			}
		}

		match by_pid.get_mut(&pid) {
			Some(groups) => {
				groups.insert(group);
			}
			None => {
				by_pid.insert(pid, OrdSet::unit(group));
			}
		}
	}

	/// Removes the `(group, pid)` row.
	pub(crate) fn remove(
		&self,
		group: &GroupName,
		pid: &Pid,
	) -> Option<Membership> {
		let mut by_name = self.0.by_name.write();
		let mut by_pid = self.0.by_pid.write();

		let members = by_name.get_mut(group)?;
		let removed = members.remove(pid)?;
		if members.is_empty() {
			by_name.remove(group);
		}

		if let Some(groups) = by_pid.get_mut(pid) {
			groups.remove(group);
			if groups.is_empty() {
				by_pid.remove(pid);
			}
		}

		Some(removed)
	}

	/// All groups `pid` is currently a member of.
	pub(crate) fn groups_of(&self, pid: &Pid) -> Vec<GroupName> {
		self
			.0
			.by_pid
			.read()
			.get(pid)
			.map(|groups| groups.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// True iff `pid` is a member of at least one group besides the one
	/// being left; the monitor refcount probe of the leave path.
	pub(crate) fn has_other_memberships(&self, pid: &Pid) -> bool {
		self
			.0
			.by_pid
			.read()
			.get(pid)
			.is_some_and(|groups| groups.len() > 1)
	}

	/// The members of `group`, with their meta.
	pub(crate) fn members(&self, group: &GroupName) -> Vec<(Pid, Meta)> {
		self
			.0
			.by_name
			.read()
			.get(group)
			.map(|members| {
				members
					.iter()
					.map(|(pid, membership)| (pid.clone(), membership.meta.clone()))
					.collect()
			})
			.unwrap_or_default()
	}

	/// The members of `group` whose pid is owned by `node`.
	pub(crate) fn members_on(
		&self,
		group: &GroupName,
		node: &NodeId,
	) -> Vec<(Pid, Meta)> {
		self
			.0
			.by_name
			.read()
			.get(group)
			.map(|members| {
				members
					.iter()
					.filter(|(_, membership)| membership.node == *node)
					.map(|(pid, membership)| (pid.clone(), membership.meta.clone()))
					.collect()
			})
			.unwrap_or_default()
	}

	/// Snapshot of all rows as `(group, pid, membership)` tuples.
	pub(crate) fn rows(&self) -> Vec<(GroupName, Pid, Membership)> {
		self
			.0
			.by_name
			.read()
			.iter()
			.flat_map(|(group, members)| {
				members.iter().map(|(pid, membership)| {
					(group.clone(), pid.clone(), membership.clone())
				})
			})
			.collect()
	}

	/// Snapshot of the rows whose member pid is owned by `node`.
	pub(crate) fn rows_on(
		&self,
		node: &NodeId,
	) -> Vec<(GroupName, Pid, Membership)> {
		self
			.rows()
			.into_iter()
			.filter(|(_, _, membership)| membership.node == *node)
			.collect()
	}

	/// Removes and returns every row whose member pid is owned by `node`.
	pub(crate) fn drain_node(
		&self,
		node: &NodeId,
	) -> Vec<(GroupName, Pid, Membership)> {
		let drained = self.rows_on(node);
		for (group, pid, _) in &drained {
			self.remove(group, pid);
		}
		drained
	}

	/// The number of distinct groups with at least one member.
	pub(crate) fn count(&self) -> usize {
		self.0.by_name.read().len()
	}

	/// The number of distinct groups with at least one member on `node`.
	pub(crate) fn count_on(&self, node: &NodeId) -> usize {
		self
			.0
			.by_name
			.read()
			.values()
			.filter(|members| {
				members
					.values()
					.any(|membership| membership.node == *node)
			})
			.count()
	}
}
