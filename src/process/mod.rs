//! Per-node process identity and liveness.
//!
//! The registry tracks long-lived worker entities ("processes") that are
//! spawned and killed by the embedding application. This module provides
//! the cluster-unique [`Pid`] handle and the per-node [`ProcessHost`]
//! liveness service: only the node that owns a pid can observe its
//! liveness, install monitors on it, or kill it. Monitors deliver a single
//! [`Down`] notification into a subscriber-provided sink when the process
//! exits.

use {
	crate::{
		cluster::NodeId,
		primitives::{Meta, Name},
	},
	core::fmt,
	parking_lot::RwLock,
	serde::{Deserialize, Serialize},
	std::{
		collections::{HashMap, HashSet},
		sync::{
			Arc,
			atomic::{AtomicU64, Ordering},
		},
	},
	tokio::sync::mpsc::UnboundedSender,
};

/// A cluster-unique process identifier.
///
/// A pid carries the node it runs on; the owning node is the only place
/// its liveness can be observed and the only place registry mutations for
/// it are decided.
#[derive(
	Debug,
	Clone,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Serialize,
	Deserialize,
)]
pub struct Pid {
	node: NodeId,
	seq: u64,
}

impl Pid {
	/// The node this process runs on.
	pub const fn node(&self) -> &NodeId {
		&self.node
	}
}

impl fmt::Display for Pid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.node, self.seq)
	}
}

/// A liveness subscription handle returned by [`ProcessHost::monitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorRef(u64);

/// Why a process exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
	/// The process terminated on its own.
	Normal,

	/// The process was killed by the embedding application.
	Killed,

	/// The process lost a registry name conflict and was killed by the
	/// conflict resolution procedure. Carries the contested name and the
	/// meta the loser was registered with.
	ResolveKill { name: Name, meta: Meta },
}

/// A liveness notification delivered to a monitor sink when the monitored
/// process exits.
#[derive(Debug, Clone)]
pub struct Down {
	pub monitor: MonitorRef,
	pub pid: Pid,
	pub reason: ExitReason,
}

/// The per-node process liveness service.
///
/// Notes:
///
/// - This type is cheap to clone; all clones refer to the same underlying
///   host.
///
/// - Pids minted by one host are only observable on that host. Queries for
///   pids owned by other nodes report not-alive.
///
/// - A monitor installed on an already-dead (or never-seen) pid fires
///   immediately.
///
/// - [`ProcessHost::demonitor`] discards the subscription; a notification
///   that was already delivered into the sink is the subscriber's to
///   ignore (flush semantics are realized at the consumer, which drops
///   `Down`s for pids it holds no rows for).
pub struct ProcessHost(Arc<Inner>);

impl Clone for ProcessHost {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}

struct Inner {
	node: NodeId,
	next_seq: AtomicU64,
	next_monitor: AtomicU64,
	state: RwLock<State>,
}

#[derive(Default)]
struct State {
	alive: HashSet<u64>,
	monitors: HashMap<u64, Vec<Watch>>,
	exited: HashMap<u64, ExitReason>,
}

struct Watch {
	id: MonitorRef,
	sink: UnboundedSender<Down>,
}

impl ProcessHost {
	pub(crate) fn new(node: NodeId) -> Self {
		Self(Arc::new(Inner {
			node,
			next_seq: AtomicU64::new(1),
			next_monitor: AtomicU64::new(1),
			state: RwLock::new(State::default()),
		}))
	}

	/// The node this host mints pids for.
	pub fn node(&self) -> &NodeId {
		&self.0.node
	}

	/// Mints a new live process handle owned by this node.
	pub fn spawn(&self) -> Pid {
		let seq = self.0.next_seq.fetch_add(1, Ordering::Relaxed);
		self.0.state.write().alive.insert(seq);
		Pid {
			node: self.0.node.clone(),
			seq,
		}
	}

	/// Returns true iff `pid` is owned by this node and currently alive.
	pub fn is_alive(&self, pid: &Pid) -> bool {
		pid.node == self.0.node && self.0.state.read().alive.contains(&pid.seq)
	}

	/// Kills a locally-owned process, recording `reason` and firing every
	/// monitor installed on it. Returns false if the pid was not alive
	/// here.
	pub fn kill(&self, pid: &Pid, reason: ExitReason) -> bool {
		if pid.node != self.0.node {
			return false;
		}

		let watches = {
			let mut state = self.0.state.write();
			if !state.alive.remove(&pid.seq) {
				return false;
			}
			state.exited.insert(pid.seq, reason.clone());
			state.monitors.remove(&pid.seq).unwrap_or_default()
		};

		for watch in watches {
			let _ = watch.sink.send(Down {
				monitor: watch.id,
				pid: pid.clone(),
				reason: reason.clone(),
			});
		}

		true
	}

	/// The recorded exit reason of a dead process, if it died on this node.
	pub fn exit_reason(&self, pid: &Pid) -> Option<ExitReason> {
		self.0.state.read().exited.get(&pid.seq).cloned()
	}

	/// Installs a liveness monitor on a locally-owned pid. The returned
	/// reference identifies the subscription in the `Down` notification
	/// and in [`ProcessHost::demonitor`].
	///
	/// Monitoring a dead pid delivers the `Down` immediately.
	pub(crate) fn monitor(
		&self,
		pid: &Pid,
		sink: UnboundedSender<Down>,
	) -> MonitorRef {
		let id = MonitorRef(self.0.next_monitor.fetch_add(1, Ordering::Relaxed));

		let reason = {
			let mut state = self.0.state.write();
			if state.alive.contains(&pid.seq) {
				state
					.monitors
					.entry(pid.seq)
					.or_default()
					.push(Watch { id, sink: sink.clone() });
				None
			} else {
				Some(
					state
						.exited
						.get(&pid.seq)
						.cloned()
						.unwrap_or(ExitReason::Normal),
				)
			}
		};

		if let Some(reason) = reason {
			let _ = sink.send(Down {
				monitor: id,
				pid: pid.clone(),
				reason,
			});
		}

		id
	}

	/// Drops a monitor subscription. Notifications already delivered into
	/// the sink are not recalled.
	pub(crate) fn demonitor(&self, pid: &Pid, monitor: MonitorRef) {
		let mut state = self.0.state.write();
		if let Some(watches) = state.monitors.get_mut(&pid.seq) {
			watches.retain(|watch| watch.id != monitor);
			if watches.is_empty() {
				state.monitors.remove(&pid.seq);
			}
		}
	}
}

impl fmt::Debug for ProcessHost {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProcessHost")
			.field("node", &self.0.node)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use {super::*, tokio::sync::mpsc::unbounded_channel};

	fn host() -> ProcessHost {
		ProcessHost::new(NodeId::from("n1"))
	}

	#[test]
	fn spawned_pids_are_alive_and_unique() {
		let host = host();
		let a = host.spawn();
		let b = host.spawn();
		assert_ne!(a, b);
		assert!(host.is_alive(&a));
		assert!(host.is_alive(&b));
	}

	#[test]
	fn foreign_pids_are_not_alive_here() {
		let other = ProcessHost::new(NodeId::from("n2"));
		let pid = other.spawn();
		assert!(!host().is_alive(&pid));
	}

	#[test]
	fn kill_fires_monitors_and_records_reason() {
		let host = host();
		let pid = host.spawn();

		let (tx, mut rx) = unbounded_channel();
		let monitor = host.monitor(&pid, tx);

		assert!(host.kill(&pid, ExitReason::Killed));
		assert!(!host.is_alive(&pid));
		assert_eq!(host.exit_reason(&pid), Some(ExitReason::Killed));

		let down = rx.try_recv().unwrap();
		assert_eq!(down.monitor, monitor);
		assert_eq!(down.pid, pid);
		assert_eq!(down.reason, ExitReason::Killed);

		// second kill is a no-op
		assert!(!host.kill(&pid, ExitReason::Killed));
	}

	#[test]
	fn monitor_on_dead_pid_fires_immediately() {
		let host = host();
		let pid = host.spawn();
		host.kill(
			&pid,
			ExitReason::ResolveKill {
				name: Name::from("alpha"),
				meta: Meta::null(),
			},
		);

		let (tx, mut rx) = unbounded_channel();
		host.monitor(&pid, tx);
		let down = rx.try_recv().unwrap();
		assert!(matches!(down.reason, ExitReason::ResolveKill { .. }));
	}

	#[test]
	fn demonitor_stops_delivery() {
		let host = host();
		let pid = host.spawn();

		let (tx, mut rx) = unbounded_channel();
		let monitor = host.monitor(&pid, tx);
		host.demonitor(&pid, monitor);

		host.kill(&pid, ExitReason::Killed);
		assert!(rx.try_recv().is_err());
	}
}
