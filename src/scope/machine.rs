use {
	super::worker::Peers,
	crate::{
		cluster::NodeId,
		process::{ExitReason, Pid},
	},
	serde::{Serialize, de::DeserializeOwned},
};

/// A per-scope replicated state machine driven by the scope actor.
///
/// The worker loop owns the mailbox and the discovery/peer bookkeeping;
/// everything domain-specific is behind this trait. All methods run on the
/// actor, one at a time — implementations are the single writer of their
/// tables.
pub(crate) trait Machine: Send + Sized + 'static {
	/// State machine kind, the first half of the actor name
	/// (`<KIND>_<scope>`).
	const KIND: &'static str;

	/// Synchronous call payload, for both local API calls and calls
	/// forwarded from other nodes.
	type Call: Serialize + DeserializeOwned + Send + 'static;

	/// Reply payload of [`Machine::handle_call`].
	type Reply: Serialize + DeserializeOwned + Send + 'static;

	/// Fire-and-forget broadcast payload.
	type Sync: Serialize + DeserializeOwned + Send + 'static;

	/// Snapshot payload exchanged in the `ACK_SYNC` handshake.
	type Snapshot: Serialize + DeserializeOwned + Send + 'static;

	/// Projects the rows owned by the local node for an `ACK_SYNC` reply.
	fn local_snapshot(&self) -> Self::Snapshot;

	/// Folds a peer's snapshot into the local tables. Each record is
	/// treated exactly like the corresponding incremental sync message.
	fn merge_snapshot(
		&mut self,
		peers: &Peers<Self>,
		from: &NodeId,
		data: Self::Snapshot,
	);

	/// Applies one incremental sync broadcast from a peer.
	fn apply_sync(
		&mut self,
		peers: &Peers<Self>,
		from: &NodeId,
		msg: Self::Sync,
	);

	/// Handles a synchronous call (local API or forwarded from the node
	/// that initiated the operation).
	fn handle_call(
		&mut self,
		peers: &Peers<Self>,
		call: Self::Call,
	) -> Self::Reply;

	/// A locally monitored process exited.
	fn process_down(
		&mut self,
		peers: &Peers<Self>,
		pid: Pid,
		reason: ExitReason,
	);

	/// The same-scope actor on `node` went away: evict every row owned by
	/// that node.
	fn purge_node(&mut self, node: &NodeId);

	/// Reconciles monitors with pre-existing tables on actor startup: the
	/// tables outlive the actor, the monitors do not.
	fn rebuild_monitors(&mut self);
}
