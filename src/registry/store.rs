use {
	crate::{
		clock::Timestamp,
		cluster::NodeId,
		primitives::{Meta, Name},
		process::{MonitorRef, Pid},
	},
	im::{OrdMap, OrdSet},
	parking_lot::RwLock,
	std::sync::Arc,
};

/// One registration row.
#[derive(Debug, Clone)]
pub(crate) struct Registration {
	pub pid: Pid,
	pub meta: Meta,
	pub time: Timestamp,
	/// Present iff the row's pid is owned by the local node. A single
	/// monitor per local pid is shared across all names that pid holds.
	pub monitor: Option<MonitorRef>,
	/// The owner node of `pid`, denormalized for per-node selection.
	pub node: NodeId,
}

/// The per-scope registry tables: a unique by-name map plus a by-pid
/// index over the names each process holds.
///
/// Notes:
///
/// - This type is cheap to clone; all clones refer to the same underlying
///   tables. The scope actor is the only writer, everything else reads.
///
/// - Reads work on persistent-map snapshots and never block the writer;
///   writes take both table locks so the two indexes change together.
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
	by_name: RwLock<OrdMap<Name, Registration>>,
	by_pid: RwLock<OrdMap<Pid, OrdSet<Name>>>,
}

impl Store {
	pub(crate) fn get(&self, name: &Name) -> Option<Registration> {
		self.0.by_name.read().get(name).cloned()
	}

	/// Inserts or overwrites the row for `name`, keeping the by-pid index
	/// consistent when the name moves to a different pid.
	pub(crate) fn insert(&self, name: Name, registration: Registration) {
		let mut by_name = self.0.by_name.write();
		let mut by_pid = self.0.by_pid.write();

		if let Some(previous) = by_name.get(&name) {
			if previous.pid != registration.pid {
				detach(&mut by_pid, &previous.pid, &name);
			}
		}

		attach(&mut by_pid, &registration.pid, &name);
		by_name.insert(name, registration);
	}

	/// Removes the row for `name`, whatever pid holds it.
	pub(crate) fn remove(&self, name: &Name) -> Option<Registration> {
		let mut by_name = self.0.by_name.write();
		let mut by_pid = self.0.by_pid.write();

		let removed = by_name.remove(name)?;
		detach(&mut by_pid, &removed.pid, name);
		Some(removed)
	}

	/// Removes the row for `name` only if it is held by `pid`.
	pub(crate) fn remove_exact(
		&self,
		name: &Name,
		pid: &Pid,
	) -> Option<Registration> {
		let mut by_name = self.0.by_name.write();
		let mut by_pid = self.0.by_pid.write();

		match by_name.get(name) {
			Some(row) if row.pid == *pid => {}
			_ => return None,
		}

		let removed = by_name.remove(name)?;
		detach(&mut by_pid, pid, name);
		Some(removed)
	}

	/// All names currently held by `pid`.
	pub(crate) fn names_of(&self, pid: &Pid) -> Vec<Name> {
		self
			.0
			.by_pid
			.read()
			.get(pid)
			.map(|names| names.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// True iff `pid` holds at least one name besides the one being
	/// released; the monitor refcount probe of the unregister path.
	pub(crate) fn has_other_names(&self, pid: &Pid) -> bool {
		self
			.0
			.by_pid
			.read()
			.get(pid)
			.is_some_and(|names| names.len() > 1)
	}

	/// Snapshot of the rows owned by `node`.
	pub(crate) fn entries_on(&self, node: &NodeId) -> Vec<(Name, Registration)> {
		self
			.0
			.by_name
			.read()
			.iter()
			.filter(|(_, row)| row.node == *node)
			.map(|(name, row)| (name.clone(), row.clone()))
			.collect()
	}

	/// Removes and returns every row owned by `node`.
	pub(crate) fn drain_node(&self, node: &NodeId) -> Vec<(Name, Registration)> {
		let mut by_name = self.0.by_name.write();
		let mut by_pid = self.0.by_pid.write();

		let drained: Vec<_> = by_name
			.iter()
			.filter(|(_, row)| row.node == *node)
			.map(|(name, row)| (name.clone(), row.clone()))
			.collect();

		for (name, row) in &drained {
			by_name.remove(name);
			detach(&mut by_pid, &row.pid, name);
		}

		drained
	}

	pub(crate) fn len(&self) -> usize {
		self.0.by_name.read().len()
	}

	pub(crate) fn count_on(&self, node: &NodeId) -> usize {
		self
			.0
			.by_name
			.read()
			.values()
			.filter(|row| row.node == *node)
			.count()
	}
}

fn attach(by_pid: &mut OrdMap<Pid, OrdSet<Name>>, pid: &Pid, name: &Name) {
	match by_pid.get_mut(pid) {
		Some(names) => {
			names.insert(name.clone());
		}
		None => {
			by_pid.insert(pid.clone(), OrdSet::unit(name.clone()));
		}
	}
}

fn detach(by_pid: &mut OrdMap<Pid, OrdSet<Name>>, pid: &Pid, name: &Name) {
	if let Some(names) = by_pid.get_mut(pid) {
		names.remove(name);
		if names.is_empty() {
			by_pid.remove(pid);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn row(host: &crate::process::ProcessHost) -> (Pid, Registration) {
		let pid = host.spawn();
		let registration = Registration {
			pid: pid.clone(),
			meta: Meta::null(),
			time: Timestamp::ZERO,
			monitor: None,
			node: pid.node().clone(),
		};
		(pid, registration)
	}

	#[test]
	fn both_indexes_stay_consistent() {
		let host = crate::process::ProcessHost::new("a".into());
		let store = Store::default();
		let (pid, registration) = row(&host);

		store.insert(Name::from("one"), registration.clone());
		store.insert(Name::from("two"), registration);

		assert_eq!(store.len(), 2);
		assert_eq!(store.names_of(&pid).len(), 2);
		assert!(store.has_other_names(&pid));

		store.remove(&Name::from("one"));
		assert_eq!(store.names_of(&pid), vec![Name::from("two")]);
		assert!(!store.has_other_names(&pid));

		store.remove(&Name::from("two"));
		assert!(store.names_of(&pid).is_empty());
		assert_eq!(store.len(), 0);
	}

	#[test]
	fn overwrite_moves_the_by_pid_index() {
		let host = crate::process::ProcessHost::new("a".into());
		let store = Store::default();
		let (first, registration) = row(&host);
		store.insert(Name::from("n"), registration);

		let (second, replacement) = row(&host);
		store.insert(Name::from("n"), replacement);

		assert!(store.names_of(&first).is_empty());
		assert_eq!(store.names_of(&second), vec![Name::from("n")]);
		assert_eq!(store.len(), 1);
	}

	#[test]
	fn remove_exact_requires_a_pid_match() {
		let host = crate::process::ProcessHost::new("a".into());
		let store = Store::default();
		let (pid, registration) = row(&host);
		store.insert(Name::from("n"), registration);

		let other = host.spawn();
		assert!(store.remove_exact(&Name::from("n"), &other).is_none());
		assert_eq!(store.len(), 1);

		assert!(store.remove_exact(&Name::from("n"), &pid).is_some());
		assert_eq!(store.len(), 0);
	}

	#[test]
	fn drain_node_only_touches_that_node() {
		let local = crate::process::ProcessHost::new("a".into());
		let remote = crate::process::ProcessHost::new("b".into());
		let store = Store::default();

		let (_, ours) = row(&local);
		let (theirs_pid, theirs) = row(&remote);
		store.insert(Name::from("ours"), ours);
		store.insert(Name::from("theirs"), theirs);

		let drained = store.drain_node(&"b".into());
		assert_eq!(drained.len(), 1);
		assert_eq!(drained[0].0, Name::from("theirs"));
		assert!(store.names_of(&theirs_pid).is_empty());
		assert_eq!(store.len(), 1);
		assert_eq!(store.count_on(&"a".into()), 1);
		assert_eq!(store.count_on(&"b".into()), 0);
	}
}
