use {
	super::{
		CallError,
		actor_name,
		machine::Machine,
		protocol::{self, Envelope, Frame, PROTOCOL_VERSION},
	},
	crate::{
		cluster::{ActorMonitor, Cluster, Delivery, MembershipEvent, NodeId},
		primitives::Scope,
		process::Down,
	},
	bytes::Bytes,
	core::{
		marker::PhantomData,
		pin::Pin,
		task::{Context, Poll},
	},
	futures::FutureExt,
	std::collections::HashMap,
	tokio::{
		sync::{
			broadcast::{self, error::RecvError},
			mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel},
			oneshot,
		},
		task::{JoinError, JoinHandle},
	},
	tokio_util::sync::CancellationToken,
	tracing::{debug, info, trace, warn},
};

/// Scope actor handle.
///
/// Held by the node glue; used by the API facades to issue synchronous
/// calls into the actor. Dropping the handle does not stop the actor; the
/// node stops it explicitly through [`Handle::stop`].
pub(crate) struct Handle<M: Machine> {
	calls: UnboundedSender<(M::Call, oneshot::Sender<M::Reply>)>,
	cancel: CancellationToken,
	task: JoinHandle<()>,
}

impl<M: Machine> Handle<M> {
	/// Returns a cheap-clone handle for issuing synchronous calls into the
	/// actor.
	pub(crate) fn caller(&self) -> Caller<M> {
		Caller {
			calls: self.calls.clone(),
		}
	}

	/// Stops the actor and waits for its loop to drain.
	pub(crate) async fn stop(mut self) {
		self.cancel.cancel();
		let _ = (&mut self.task).await;
	}
}

impl<M: Machine> Drop for Handle<M> {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

/// Call-only handle to a local scope actor, cloned out of [`Handle`] for
/// the API facades.
pub(crate) struct Caller<M: Machine> {
	calls: UnboundedSender<(M::Call, oneshot::Sender<M::Reply>)>,
}

impl<M: Machine> Clone for Caller<M> {
	fn clone(&self) -> Self {
		Self {
			calls: self.calls.clone(),
		}
	}
}

impl<M: Machine> Caller<M> {
	/// Issues a synchronous call to the local scope actor. Suspends the
	/// caller until the actor replies.
	pub(crate) async fn call(&self, call: M::Call) -> Result<M::Reply, CallError> {
		let (reply_tx, reply_rx) = oneshot::channel();
		self
			.calls
			.send((call, reply_tx))
			.map_err(|_| CallError::ActorStopped)?;
		reply_rx.await.map_err(|_| CallError::ActorStopped)
	}
}

impl<M: Machine> Future for Handle<M> {
	type Output = Result<(), JoinError>;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		self.get_mut().task.poll_unpin(cx)
	}
}

/// Issues a synchronous call to the same-kind scope actor on a remote
/// node, encoding the call and decoding the reply.
pub(crate) async fn remote_call<M: Machine>(
	cluster: &Cluster,
	from: &NodeId,
	to: &NodeId,
	scope: &Scope,
	call: &M::Call,
) -> Result<M::Reply, CallError> {
	let actor = actor_name(M::KIND, scope);
	let reply = cluster
		.request(from, to, &actor, protocol::encode(call))
		.await?;
	Ok(protocol::decode(&reply)?)
}

/// The peer map of one scope actor: every same-named actor discovered on
/// another node, each with a liveness monitor installed on it.
pub(crate) struct Peers<M: Machine> {
	node: NodeId,
	actor: String,
	cluster: Cluster,
	sink: UnboundedSender<NodeId>,
	map: HashMap<NodeId, ActorMonitor>,
	_machine: PhantomData<fn() -> M>,
}

impl<M: Machine> Peers<M> {
	pub(crate) fn new(
		node: NodeId,
		actor: String,
		cluster: Cluster,
		sink: UnboundedSender<NodeId>,
	) -> Self {
		Self {
			node,
			actor,
			cluster,
			sink,
			map: HashMap::new(),
			_machine: PhantomData,
		}
	}

	/// Records a remote actor handle, installing a liveness monitor if it
	/// was not known yet. Returns true iff the peer is new.
	fn admit(&mut self, node: NodeId) -> bool {
		if node == self.node || self.map.contains_key(&node) {
			return false;
		}

		debug!(
			node = %self.node,
			peer = %node,
			actor = %self.actor,
			"discovered scope actor peer"
		);

		let monitor =
			self
				.cluster
				.monitor(&self.node, &node, &self.actor, self.sink.clone());
		self.map.insert(node, monitor);
		true
	}

	/// Forgets a peer, dropping its monitor. Returns true iff it was known.
	fn forget(&mut self, node: &NodeId) -> bool {
		self.map.remove(node).is_some()
	}

	/// Fire-and-forget broadcast of a sync message to every known peer,
	/// optionally excluding one node (the requester of the operation that
	/// produced the broadcast).
	pub(crate) fn broadcast(&self, msg: &M::Sync, exclude: Option<&NodeId>) {
		let frame = protocol::sync::<M>(msg);
		for peer in self.map.keys() {
			if exclude.is_some_and(|excluded| excluded == peer) {
				continue;
			}
			self
				.cluster
				.send(&self.node, peer, &self.actor, frame.clone());
		}
	}

	fn send_to(&self, node: &NodeId, frame: Bytes) {
		self.cluster.send(&self.node, node, &self.actor, frame);
	}

	/// The local node id.
	pub(crate) fn local_node(&self) -> &NodeId {
		&self.node
	}
}

/// The scope actor event loop.
///
/// A long-running task owning the actor mailbox. All table writes for the
/// scope happen from this loop, one message at a time; reads are served
/// directly from the shared tables by the API facades.
pub(crate) struct WorkerLoop<M: Machine> {
	scope: Scope,
	node: NodeId,
	actor: String,
	cluster: Cluster,
	machine: M,
	peers: Peers<M>,
	calls: UnboundedReceiver<(M::Call, oneshot::Sender<M::Reply>)>,
	deliveries: UnboundedReceiver<Delivery>,
	membership: broadcast::Receiver<MembershipEvent>,
	peer_downs: UnboundedReceiver<NodeId>,
	process_downs: UnboundedReceiver<Down>,
	cancel: CancellationToken,
}

impl<M: Machine> WorkerLoop<M> {
	/// Constructs the scope actor and spawns it as a background task.
	///
	/// The caller has already registered the delivery mailbox with the
	/// cluster fabric under this actor's name; the worker deregisters it
	/// when the loop exits.
	pub(crate) fn spawn(
		scope: Scope,
		node: NodeId,
		cluster: Cluster,
		machine: M,
		deliveries: UnboundedReceiver<Delivery>,
		membership: broadcast::Receiver<MembershipEvent>,
		process_downs: UnboundedReceiver<Down>,
	) -> Handle<M> {
		let actor = actor_name(M::KIND, &scope);
		let (calls_tx, calls_rx) = unbounded_channel();
		let (peer_downs_tx, peer_downs_rx) = unbounded_channel();
		let cancel = CancellationToken::new();

		let worker = Self {
			peers: Peers::new(
				node.clone(),
				actor.clone(),
				cluster.clone(),
				peer_downs_tx,
			),
			scope,
			node,
			actor,
			cluster,
			machine,
			calls: calls_rx,
			deliveries,
			membership,
			peer_downs: peer_downs_rx,
			process_downs,
			cancel: cancel.clone(),
		};

		let task = tokio::spawn(worker.run());

		Handle {
			calls: calls_tx,
			cancel,
			task,
		}
	}

	async fn run(mut self) {
		// The tables may predate this actor (actor restart); monitors never
		// do.
		self.machine.rebuild_monitors();

		info!(
			scope = %self.scope,
			node = %self.node,
			actor = %self.actor,
			"scope actor started"
		);

		// Make ourselves known to every currently visible peer node.
		let discover = protocol::discover::<M>(&self.node);
		for peer in self.cluster.connected_nodes(&self.node) {
			self.peers.send_to(&peer, discover.clone());
		}

		loop {
			tokio::select! {
				() = self.cancel.cancelled() => break,

				Some((call, reply)) = self.calls.recv() => {
					let response = self.machine.handle_call(&self.peers, call);
					let _ = reply.send(response);
				}

				Some(delivery) = self.deliveries.recv() => {
					self.on_delivery(delivery);
				}

				event = self.membership.recv() => match event {
					Ok(MembershipEvent::NodeUp(node)) => self.on_node_up(node),
					Ok(MembershipEvent::NodeDown(node)) => {
						// Not authoritative; the monitor on the peer actor is.
						trace!(
							scope = %self.scope,
							node = %self.node,
							peer = %node,
							"node down observed, awaiting peer actor monitor"
						);
					}
					Err(RecvError::Lagged(missed)) => {
						warn!(
							scope = %self.scope,
							node = %self.node,
							missed,
							"membership event stream lagged"
						);
					}
					Err(RecvError::Closed) => break,
				},

				Some(peer) = self.peer_downs.recv() => self.on_peer_down(peer),

				Some(down) = self.process_downs.recv() => {
					self.machine.process_down(&self.peers, down.pid, down.reason);
				}

				else => break,
			}
		}

		self.cluster.deregister_actor(&self.node, &self.actor);
		info!(
			scope = %self.scope,
			node = %self.node,
			actor = %self.actor,
			"scope actor stopped"
		);
	}

	fn on_delivery(&mut self, delivery: Delivery) {
		match delivery {
			Delivery::Message { from, frame } => self.on_message(from, &frame),
			Delivery::Request { from, frame, reply } => {
				let call: M::Call = match protocol::decode(&frame) {
					Ok(call) => call,
					Err(error) => {
						warn!(
							scope = %self.scope,
							node = %self.node,
							peer = %from,
							%error,
							"discarding undecodable call frame"
						);
						return;
					}
				};

				let response = self.machine.handle_call(&self.peers, call);
				let _ = reply.send(protocol::encode(&response));
			}
		}
	}

	fn on_message(&mut self, from: NodeId, frame: &[u8]) {
		let frame: Frame<M::Sync, M::Snapshot> = match protocol::decode(frame) {
			Ok(frame) => frame,
			Err(error) => {
				warn!(
					scope = %self.scope,
					node = %self.node,
					peer = %from,
					%error,
					"discarding undecodable frame"
				);
				return;
			}
		};

		if frame.version != PROTOCOL_VERSION {
			warn!(
				scope = %self.scope,
				node = %self.node,
				peer = %from,
				version = %frame.version,
				"discarding frame with unsupported protocol version"
			);
			return;
		}

		match frame.envelope {
			Envelope::Discover { from } => {
				self.peers.admit(from.clone());
				// Always answer with our local data, even for an already
				// known peer: discovery may be a re-announcement after a
				// partition heals.
				let ack =
					protocol::ack_sync::<M>(&self.node, self.machine.local_snapshot());
				self.peers.send_to(&from, ack);
			}

			Envelope::AckSync { from, data } => {
				let newly_discovered = self.peers.admit(from.clone());

				// Capture our snapshot before folding in the peer's: the
				// ack-back must carry the claims we held going into the
				// exchange, or a conflict resolved during the merge would
				// be invisible to the other side.
				let ack = newly_discovered.then(|| {
					protocol::ack_sync::<M>(&self.node, self.machine.local_snapshot())
				});

				self.machine.merge_snapshot(&self.peers, &from, data);

				// Converge even if our own DISCOVER towards this peer was
				// lost: a peer we learn about through its ack gets our data
				// too.
				if let Some(ack) = ack {
					self.peers.send_to(&from, ack);
				}
			}

			Envelope::Sync(msg) => {
				self.machine.apply_sync(&self.peers, &from, msg);
			}
		}
	}

	fn on_node_up(&mut self, node: NodeId) {
		if node == self.node {
			return;
		}
		debug!(
			scope = %self.scope,
			node = %self.node,
			peer = %node,
			"node up, sending discover"
		);
		self.peers.send_to(&node, protocol::discover::<M>(&self.node));
	}

	fn on_peer_down(&mut self, peer: NodeId) {
		if self.peers.forget(&peer) {
			info!(
				scope = %self.scope,
				node = %self.node,
				peer = %peer,
				"scope actor peer down, purging its rows"
			);
			self.machine.purge_node(&peer);
		}
	}
}
