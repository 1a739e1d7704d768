use {
	super::store::{Registration, Store},
	crate::{
		clock::{MonotonicClock, Timestamp},
		cluster::NodeId,
		events::{Claim, Dispatcher},
		primitives::{Meta, Name, Scope},
		process::{Down, ExitReason, MonitorRef, Pid, ProcessHost},
		scope::{Machine, Peers},
	},
	serde::{Deserialize, Serialize},
	std::{collections::HashMap, sync::Arc},
	tokio::sync::mpsc::UnboundedSender,
	tracing::{debug, info, warn},
};

/// Synchronous calls accepted by a registry scope actor.
///
/// `Register` and `Unregister` execute on the owner node of the target
/// pid and are forwarded there by the facade when the pid is remote. The
/// `Apply*` variants are issued by the facade against its *local* actor
/// after a successful remote call, so that the write is visible to local
/// reads before the API call returns.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Call {
	Register {
		name: Name,
		pid: Pid,
		meta: Meta,
		requester: NodeId,
	},
	Unregister {
		name: Name,
		pid: Pid,
		requester: NodeId,
	},
	ApplyRegistered {
		name: Name,
		pid: Pid,
		meta: Meta,
		time: Timestamp,
	},
	ApplyUnregistered {
		name: Name,
		pid: Pid,
		meta: Meta,
	},
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Reply {
	Registered {
		previous: Option<(Pid, Meta)>,
		time: Timestamp,
	},
	Unregistered {
		meta: Meta,
	},
	Applied,
	NotAlive,
	Taken,
	Undefined,
	RaceCondition,
}

/// Registry sync broadcasts.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Sync {
	Register {
		scope: Scope,
		name: Name,
		pid: Pid,
		meta: Meta,
		time: Timestamp,
	},
	Unregister {
		name: Name,
		pid: Pid,
		meta: Meta,
	},
}

/// One row of an `ACK_SYNC` snapshot: a registration owned by the sender.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Record {
	pub name: Name,
	pub pid: Pid,
	pub meta: Meta,
	pub time: Timestamp,
}

/// The registry state machine of one scope on one node.
pub(crate) struct RegistryMachine {
	scope: Scope,
	store: Store,
	host: ProcessHost,
	clock: Arc<MonotonicClock>,
	events: Dispatcher,
	downs: UnboundedSender<Down>,
}

impl RegistryMachine {
	pub(crate) fn new(
		scope: Scope,
		store: Store,
		host: ProcessHost,
		clock: Arc<MonotonicClock>,
		events: Dispatcher,
		downs: UnboundedSender<Down>,
	) -> Self {
		Self {
			scope,
			store,
			host,
			clock,
			events,
			downs,
		}
	}

	/// Returns the monitor already covering `pid`, or installs a new one.
	/// One monitor per local pid is shared across all its names.
	fn ensure_monitor(&self, pid: &Pid) -> MonitorRef {
		for name in self.store.names_of(pid) {
			if let Some(monitor) = self.store.get(&name).and_then(|row| row.monitor)
			{
				return monitor;
			}
		}
		self.host.monitor(pid, self.downs.clone())
	}

	/// Owner-side registration.
	fn register(
		&mut self,
		peers: &Peers<Self>,
		name: Name,
		pid: Pid,
		meta: Meta,
		requester: NodeId,
	) -> Reply {
		if !self.host.is_alive(&pid) {
			return Reply::NotAlive;
		}

		match self.store.get(&name) {
			None => {
				let monitor = self.ensure_monitor(&pid);
				let time = self.clock.now();
				self.store.insert(name.clone(), Registration {
					pid: pid.clone(),
					meta: meta.clone(),
					time,
					monitor: Some(monitor),
					node: pid.node().clone(),
				});

				self
					.events
					.registered(&name, None, (pid.clone(), meta.clone()));
				peers.broadcast(
					&Sync::Register {
						scope: self.scope.clone(),
						name,
						pid,
						meta,
						time,
					},
					Some(&requester),
				);

				Reply::Registered {
					previous: None,
					time,
				}
			}

			// Re-registration of the same pid refreshes meta and time in
			// place.
			Some(existing) if existing.pid == pid => {
				let time = self.clock.now();
				self.store.insert(name.clone(), Registration {
					pid: pid.clone(),
					meta: meta.clone(),
					time,
					monitor: existing.monitor,
					node: pid.node().clone(),
				});

				self.events.registered(
					&name,
					Some((existing.pid.clone(), existing.meta.clone())),
					(pid.clone(), meta.clone()),
				);
				// Consistency update: the requester node applies it too.
				peers.broadcast(
					&Sync::Register {
						scope: self.scope.clone(),
						name,
						pid,
						meta,
						time,
					},
					None,
				);

				Reply::Registered {
					previous: Some((existing.pid, existing.meta)),
					time,
				}
			}

			Some(_) => Reply::Taken,
		}
	}

	/// Owner-side unregistration. `pid` is the holder the requester
	/// observed; a different current holder means the requester raced a
	/// concurrent re-registration.
	fn unregister(
		&mut self,
		peers: &Peers<Self>,
		name: Name,
		pid: Pid,
		requester: NodeId,
	) -> Reply {
		match self.store.get(&name) {
			None => Reply::Undefined,
			Some(existing) if existing.pid != pid => Reply::RaceCondition,
			Some(existing) => {
				if let Some(monitor) = existing.monitor {
					if !self.store.has_other_names(&existing.pid) {
						self.host.demonitor(&existing.pid, monitor);
					}
				}

				self.store.remove(&name);
				self.events.unregistered(
					&name,
					existing.pid.clone(),
					existing.meta.clone(),
				);
				peers.broadcast(
					&Sync::Unregister {
						name,
						pid: existing.pid,
						meta: existing.meta.clone(),
					},
					Some(&requester),
				);

				Reply::Unregistered {
					meta: existing.meta,
				}
			}
		}
	}

	/// The sync-register receiver, shared by incremental broadcasts,
	/// snapshot replay and requester-side apply.
	fn sync_register(
		&mut self,
		peers: &Peers<Self>,
		name: Name,
		pid: Pid,
		meta: Meta,
		time: Timestamp,
	) {
		match self.store.get(&name) {
			None => {
				self.store.insert(name.clone(), Registration {
					pid: pid.clone(),
					meta: meta.clone(),
					time,
					monitor: None,
					node: pid.node().clone(),
				});
				self.events.registered(&name, None, (pid, meta));
			}

			Some(existing) if existing.pid == pid => {
				// Same holder: only a strictly newer stamp overwrites, so a
				// replayed broadcast is a no-op.
				if time > existing.time {
					self.store.insert(name.clone(), Registration {
						pid: pid.clone(),
						meta: meta.clone(),
						time,
						monitor: existing.monitor,
						node: pid.node().clone(),
					});
					self.events.registered(
						&name,
						Some((existing.pid, existing.meta)),
						(pid, meta),
					);
				}
			}

			// The conflicting holder is ours: both nodes see the other's
			// broadcast and run the resolver.
			Some(existing) if existing.pid.node() == peers.local_node() => {
				self.resolve_conflict(peers, name, Claim { pid, meta, time }, existing);
			}

			// Two remote claims: newest stamp wins.
			Some(existing) if time > existing.time => {
				self.store.insert(name.clone(), Registration {
					pid: pid.clone(),
					meta: meta.clone(),
					time,
					monitor: None,
					node: pid.node().clone(),
				});
				self.events.unregistered(
					&name,
					existing.pid,
					existing.meta,
				);
				self.events.registered(&name, None, (pid, meta));
			}

			// Ours is as new or newer: drop.
			Some(_) => {}
		}
	}

	/// Resolves a claim conflict for `name` between a remote `incoming`
	/// claim and the locally-owned `existing` row. Runs independently on
	/// both conflicting nodes; determinism comes from the resolver, not
	/// from coordination.
	fn resolve_conflict(
		&mut self,
		peers: &Peers<Self>,
		name: Name,
		incoming: Claim,
		existing: Registration,
	) {
		let current = Claim {
			pid: existing.pid.clone(),
			meta: existing.meta.clone(),
			time: existing.time,
		};

		warn!(
			scope = %self.scope,
			name = %name,
			incoming = %incoming.pid,
			current = %current.pid,
			"registration conflict detected"
		);

		let elected = self.events.resolve(&name, &incoming, &current);

		match elected {
			Some(winner) if winner == incoming.pid => {
				// The remote claim wins: adopt it, kill our local holder. Its
				// DOWN will release whatever other names it still holds.
				self.store.insert(name.clone(), Registration {
					pid: incoming.pid.clone(),
					meta: incoming.meta.clone(),
					time: incoming.time,
					monitor: None,
					node: incoming.pid.node().clone(),
				});
				self.host.kill(&current.pid, ExitReason::ResolveKill {
					name: name.clone(),
					meta: current.meta.clone(),
				});

				info!(
					scope = %self.scope,
					name = %name,
					winner = %incoming.pid,
					killed = %current.pid,
					"conflict resolved towards incoming claim"
				);

				self
					.events
					.unregistered(&name, current.pid, current.meta);
				self
					.events
					.registered(&name, None, (incoming.pid, incoming.meta));
			}

			Some(winner) if winner == current.pid => {
				// Our claim wins: re-stamp it fresher than both claims and
				// rebroadcast so every replica converges on it.
				let time = self.clock.after(current.time.max(incoming.time));
				self.store.insert(name.clone(), Registration {
					time,
					..existing
				});

				info!(
					scope = %self.scope,
					name = %name,
					winner = %current.pid,
					"conflict resolved towards local claim"
				);

				peers.broadcast(
					&Sync::Register {
						scope: self.scope.clone(),
						name,
						pid: current.pid,
						meta: current.meta,
						time,
					},
					None,
				);
			}

			other => {
				// No usable verdict: discard our claim and kill its holder.
				// The other node does the same to the incoming claim's
				// holder.
				if other.is_some() {
					warn!(
						scope = %self.scope,
						name = %name,
						"conflict resolver elected a pid that holds neither claim"
					);
				}

				self.store.remove(&name);
				self.host.kill(&current.pid, ExitReason::ResolveKill {
					name: name.clone(),
					meta: current.meta.clone(),
				});
				self
					.events
					.unregistered(&name, current.pid, current.meta);
			}
		}
	}

	/// The sync-unregister receiver: drops the exact `(name, pid)` row.
	fn sync_unregister(&mut self, name: Name, pid: Pid, _meta: Meta) {
		if let Some(removed) = self.store.remove_exact(&name, &pid) {
			self.events.unregistered(&name, pid, removed.meta);
		}
	}
}

impl Machine for RegistryMachine {
	const KIND: &'static str = "registry";

	type Call = Call;
	type Reply = Reply;
	type Snapshot = Vec<Record>;
	type Sync = Sync;

	fn local_snapshot(&self) -> Self::Snapshot {
		self
			.store
			.entries_on(self.host.node())
			.into_iter()
			.map(|(name, row)| Record {
				name,
				pid: row.pid,
				meta: row.meta,
				time: row.time,
			})
			.collect()
	}

	fn merge_snapshot(
		&mut self,
		peers: &Peers<Self>,
		from: &NodeId,
		data: Self::Snapshot,
	) {
		debug!(
			scope = %self.scope,
			peer = %from,
			records = data.len(),
			"merging registry snapshot"
		);
		for record in data {
			self.sync_register(peers, record.name, record.pid, record.meta, record.time);
		}
	}

	fn apply_sync(
		&mut self,
		peers: &Peers<Self>,
		_from: &NodeId,
		msg: Self::Sync,
	) {
		match msg {
			Sync::Register {
				name,
				pid,
				meta,
				time,
				..
			} => self.sync_register(peers, name, pid, meta, time),
			Sync::Unregister { name, pid, meta } => {
				self.sync_unregister(name, pid, meta);
			}
		}
	}

	fn handle_call(&mut self, peers: &Peers<Self>, call: Self::Call) -> Self::Reply {
		match call {
			Call::Register {
				name,
				pid,
				meta,
				requester,
			} => self.register(peers, name, pid, meta, requester),
			Call::Unregister {
				name,
				pid,
				requester,
			} => self.unregister(peers, name, pid, requester),
			Call::ApplyRegistered {
				name,
				pid,
				meta,
				time,
			} => {
				self.sync_register(peers, name, pid, meta, time);
				Reply::Applied
			}
			Call::ApplyUnregistered { name, pid, meta } => {
				self.sync_unregister(name, pid, meta);
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
		let names = self.store.names_of(&pid);
		if names.is_empty() {
			// Monitor was already released; stale notification.
			return;
		}

		debug!(
			scope = %self.scope,
			pid = %pid,
			names = names.len(),
			?reason,
			"registered process down"
		);

		for name in names {
			if let Some(removed) = self.store.remove_exact(&name, &pid) {
				self
					.events
					.unregistered(&name, pid.clone(), removed.meta.clone());
				peers.broadcast(
					&Sync::Unregister {
						name,
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
		if rows.is_empty() {
			return;
		}

		info!(
			scope = %self.scope,
			node = %node,
			rows = rows.len(),
			"purging registrations of departed node"
		);

		// The unregister callbacks for a purge run off the actor so the
		// loop keeps draining messages while user code iterates.
		let events = self.events.clone();
		tokio::spawn(async move {
			for (name, row) in rows {
				events.unregistered(&name, row.pid, row.meta);
			}
		});
	}

	fn rebuild_monitors(&mut self) {
		let mut fresh: HashMap<Pid, MonitorRef> = HashMap::new();

		for (name, row) in self.store.entries_on(self.host.node()) {
			if let Some(stale) = row.monitor {
				self.host.demonitor(&row.pid, stale);
			}

			if self.host.is_alive(&row.pid) {
				let monitor = *fresh.entry(row.pid.clone()).or_insert_with(|| {
					self.host.monitor(&row.pid, self.downs.clone())
				});
				self.store.insert(name, Registration {
					monitor: Some(monitor),
					..row
				});
			} else {
				self.store.remove(&name);
				self.events.unregistered(&name, row.pid, row.meta);
			}
		}
	}
}
