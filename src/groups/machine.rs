use {
	super::store::{Membership, Store},
	crate::{
		clock::{MonotonicClock, Timestamp},
		cluster::NodeId,
		primitives::{GroupName, Meta, Scope},
		process::{Down, ExitReason, MonitorRef, Pid, ProcessHost},
		scope::{Machine, Peers},
	},
	serde::{Deserialize, Serialize},
	std::{collections::HashMap, sync::Arc},
	tokio::sync::mpsc::UnboundedSender,
	tracing::{debug, info},
};

/// Synchronous calls accepted by a groups scope actor. Routing follows the
/// registry pattern: `Join`/`Leave` execute on the member pid's owner
/// node, the `Apply*` variants mirror a successful remote call into the
/// requester's local tables.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Call {
	Join {
		group: GroupName,
		pid: Pid,
		meta: Meta,
		requester: NodeId,
	},
	Leave {
		group: GroupName,
		pid: Pid,
		requester: NodeId,
	},
	ApplyJoined {
		group: GroupName,
		pid: Pid,
		meta: Meta,
		time: Timestamp,
	},
	ApplyLeft {
		group: GroupName,
		pid: Pid,
	},
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Reply {
	Joined { time: Timestamp },
	Left,
	Applied,
	NotAlive,
	NotInGroup,
}

/// Group membership sync broadcasts.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Sync {
	Join {
		scope: Scope,
		group: GroupName,
		pid: Pid,
		meta: Meta,
		time: Timestamp,
	},
	Leave {
		group: GroupName,
		pid: Pid,
		meta: Meta,
	},
}

/// One row of an `ACK_SYNC` snapshot: a membership owned by the sender.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Record {
	pub group: GroupName,
	pub pid: Pid,
	pub meta: Meta,
	pub time: Timestamp,
}

/// The groups state machine of one scope on one node.
///
/// Simpler than the registry: `(group, pid)` is the key, so two pids in
/// the same group coexist and there is no conflict path. Liveness-driven
/// eviction broadcasts a leave per dropped row, symmetric with the
/// registry's unregister broadcast.
pub(crate) struct GroupsMachine {
	scope: Scope,
	store: Store,
	host: ProcessHost,
	clock: Arc<MonotonicClock>,
	downs: UnboundedSender<Down>,
}

impl GroupsMachine {
	pub(crate) fn new(
		scope: Scope,
		store: Store,
		host: ProcessHost,
		clock: Arc<MonotonicClock>,
		downs: UnboundedSender<Down>,
	) -> Self {
		Self {
			scope,
			store,
			host,
			clock,
			downs,
		}
	}

	/// Returns the monitor already covering `pid`, or installs a new one.
	fn ensure_monitor(&self, pid: &Pid) -> MonitorRef {
		for group in self.store.groups_of(pid) {
			if let Some(monitor) =
				self.store.get(&group, pid).and_then(|row| row.monitor)
			{
				return monitor;
			}
		}
		self.host.monitor(pid, self.downs.clone())
	}

	/// Owner-side join: an upsert of the `(group, pid)` row.
	fn join(
		&mut self,
		peers: &Peers<Self>,
		group: GroupName,
		pid: Pid,
		meta: Meta,
		requester: NodeId,
	) -> Reply {
		if !self.host.is_alive(&pid) {
			return Reply::NotAlive;
		}

		let monitor = match self.store.get(&group, &pid) {
			Some(existing) => existing.monitor,
			None => Some(self.ensure_monitor(&pid)),
		};

		let time = self.clock.now();
		self.store.insert(group.clone(), pid.clone(), Membership {
			meta: meta.clone(),
			time,
			monitor,
			node: pid.node().clone(),
		});

		peers.broadcast(
			&Sync::Join {
				scope: self.scope.clone(),
				group,
				pid,
				meta,
				time,
			},
			Some(&requester),
		);

		Reply::Joined { time }
	}

	/// Owner-side leave.
	fn leave(
		&mut self,
		peers: &Peers<Self>,
		group: GroupName,
		pid: Pid,
		requester: NodeId,
	) -> Reply {
		let Some(existing) = self.store.get(&group, &pid) else {
			return Reply::NotInGroup;
		};

		if let Some(monitor) = existing.monitor {
			if !self.store.has_other_memberships(&pid) {
				self.host.demonitor(&pid, monitor);
			}
		}

		self.store.remove(&group, &pid);
		peers.broadcast(
			&Sync::Leave {
				group,
				pid,
				meta: existing.meta,
			},
			Some(&requester),
		);

		Reply::Left
	}

	/// The sync-join receiver, shared by incremental broadcasts, snapshot
	/// replay and requester-side apply. Insert when absent, overwrite when
	/// strictly newer, drop otherwise.
	fn sync_join(
		&mut self,
		group: GroupName,
		pid: Pid,
		meta: Meta,
		time: Timestamp,
	) {
		match self.store.get(&group, &pid) {
			None => {
				self.store.insert(group, pid.clone(), Membership {
					meta,
					time,
					monitor: None,
					node: pid.node().clone(),
				});
			}
			Some(existing) if time > existing.time => {
				self.store.insert(group, pid.clone(), Membership {
					meta,
					time,
					monitor: existing.monitor,
					node: pid.node().clone(),
				});
			}
			Some(_) => {}
		}
	}

	/// The sync-leave receiver: drops the exact `(group, pid)` row.
	fn sync_leave(&mut self, group: GroupName, pid: Pid) {
		self.store.remove(&group, &pid);
	}
}

impl Machine for GroupsMachine {
	const KIND: &'static str = "groups";

	type Call = Call;
	type Reply = Reply;
	type Snapshot = Vec<Record>;
	type Sync = Sync;

	fn local_snapshot(&self) -> Self::Snapshot {
		self
			.store
			.rows_on(self.host.node())
			.into_iter()
			.map(|(group, pid, row)| Record {
				group,
				pid,
				meta: row.meta,
				time: row.time,
			})
			.collect()
	}

	fn merge_snapshot(
		&mut self,
		_peers: &Peers<Self>,
		from: &NodeId,
		data: Self::Snapshot,
	) {
		debug!(
			scope = %self.scope,
			peer = %from,
			records = data.len(),
			"merging groups snapshot"
		);
		for record in data {
			self.sync_join(record.group, record.pid, record.meta, record.time);
		}
	}

	fn apply_sync(
		&mut self,
		_peers: &Peers<Self>,
		_from: &NodeId,
		msg: Self::Sync,
	) {
		match msg {
			Sync::Join {
				group,
				pid,
				meta,
				time,
				..
			} => self.sync_join(group, pid, meta, time),
			Sync::Leave { group, pid, .. } => self.sync_leave(group, pid),
		}
	}

	fn handle_call(&mut self, peers: &Peers<Self>, call: Self::Call) -> Self::Reply {
		match call {
			Call::Join {
				group,
				pid,
				meta,
				requester,
			} => self.join(peers, group, pid, meta, requester),
			Call::Leave {
				group,
				pid,
				requester,
			} => self.leave(peers, group, pid, requester),
			Call::ApplyJoined {
				group,
				pid,
				meta,
				time,
			} => {
				self.sync_join(group, pid, meta, time);
				Reply::Applied
			}
			Call::ApplyLeft { group, pid } => {
				self.sync_leave(group, pid);
				Reply::Applied
			}
		}
	}

	fn process_down(
		&mut self,
		peers: &Peers<Self>,
		pid: Pid,
		reason: ExitReason,
	) {
		let groups = self.store.groups_of(&pid);
		if groups.is_empty() {
			return;
		}

		debug!(
			scope = %self.scope,
			pid = %pid,
			groups = groups.len(),
			?reason,
			"group member down"
		);

		for group in groups {
			if let Some(removed) = self.store.remove(&group, &pid) {
				// Symmetric with the registry's unregister broadcast: peers
				// cannot observe this DOWN themselves, only the owner
				// monitors the member.
				peers.broadcast(
					&Sync::Leave {
						group,
						pid: pid.clone(),
						meta: removed.meta,
					},
					None,
				);
			}
		}
	}

	fn purge_node(&mut self, node: &NodeId) {
		let rows = self.store.drain_node(node);
		if !rows.is_empty() {
			info!(
				scope = %self.scope,
				node = %node,
				rows = rows.len(),
				"purging group memberships of departed node"
			);
		}
	}

	fn rebuild_monitors(&mut self) {
		let mut fresh: HashMap<Pid, MonitorRef> = HashMap::new();

		for (group, pid, row) in self.store.rows_on(self.host.node()) {
			if let Some(stale) = row.monitor {
				self.host.demonitor(&pid, stale);
			}

			if self.host.is_alive(&pid) {
				let monitor = *fresh
					.entry(pid.clone())
					.or_insert_with(|| self.host.monitor(&pid, self.downs.clone()));
				self.store.insert(group, pid.clone(), Membership {
					monitor: Some(monitor),
					..row
				});
			} else {
				self.store.remove(&group, &pid);
			}
		}
	}
}
