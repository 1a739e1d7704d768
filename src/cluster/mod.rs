//! Cluster membership and message fabric.
//!
//! The scope actors assume a transport with a very small contract:
//! location-transparent addressing by `(node, actor name)`, per-pair FIFO
//! delivery, best-effort fire-and-forget sends, a synchronous call channel
//! that fails when the callee is down, and liveness monitoring of remote
//! actors. This module realizes that contract in-process: every
//! participating [`Node`](crate::node::Node) joins one [`Cluster`] value
//! and exchanges messages through it.
//!
//! Notes:
//!
//! - Delivery is reliable only while a pair of nodes is connected; messages
//!   sent across a severed pair are silently dropped, and synchronous calls
//!   fail with [`Error::Unreachable`].
//!
//! - Per-pair FIFO holds because each actor mailbox is a single mpsc
//!   channel and every sender enqueues from one task at a time.
//!
//! - With the `test-utils` feature the fabric can sever and heal individual
//!   node pairs, which is how partition scenarios are driven in tests.

use {
	crate::primitives::UniqueId,
	bytes::Bytes,
	core::fmt,
	parking_lot::RwLock,
	serde::{Deserialize, Serialize},
	std::{
		collections::{HashMap, HashSet},
		sync::{Arc, Weak},
	},
	tokio::sync::{broadcast, mpsc::UnboundedSender, oneshot},
	tracing::trace,
};

mod error;

pub use error::Error;

/// Uniquely identifies a cluster instance.
pub type ClusterId = UniqueId;

/// A symbolic node identifier, unique within a cluster.
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
pub struct NodeId(String);

impl NodeId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl<T: AsRef<str>> From<T> for NodeId {
	fn from(s: T) -> Self {
		Self(s.as_ref().to_owned())
	}
}

impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Cluster membership events observed by every scope actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
	/// A node became visible to the observing node.
	NodeUp(NodeId),

	/// A node stopped being visible to the observing node.
	///
	/// Scope actors deliberately ignore this; the authoritative signal for
	/// peer loss is the monitor on the peer's scope actor.
	NodeDown(NodeId),
}

/// A message handed to a registered actor mailbox.
pub(crate) enum Delivery {
	/// Fire-and-forget frame.
	Message { from: NodeId, frame: Bytes },

	/// Synchronous call; the callee must produce exactly one reply frame.
	Request {
		from: NodeId,
		frame: Bytes,
		reply: oneshot::Sender<Bytes>,
	},
}

/// The in-process cluster fabric.
///
/// Cheap to clone; all clones refer to the same fabric.
pub struct Cluster(Arc<Inner>);

impl Clone for Cluster {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}

impl Default for Cluster {
	fn default() -> Self {
		Self::new()
	}
}

struct Inner {
	id: ClusterId,
	state: RwLock<State>,
}

#[derive(Default)]
struct State {
	nodes: HashMap<NodeId, NodeLink>,
	severed: HashSet<(NodeId, NodeId)>,
	watches: Vec<ActorWatch>,
	next_watch: u64,
}

struct NodeLink {
	actors: HashMap<String, UnboundedSender<Delivery>>,
	events: broadcast::Sender<MembershipEvent>,
}

/// A one-shot liveness subscription on a remote actor.
struct ActorWatch {
	id: u64,
	watcher: NodeId,
	node: NodeId,
	actor: String,
	sink: UnboundedSender<NodeId>,
}

impl Cluster {
	pub fn new() -> Self {
		Self(Arc::new(Inner {
			id: ClusterId::random(),
			state: RwLock::new(State::default()),
		}))
	}

	pub fn id(&self) -> &ClusterId {
		&self.0.id
	}
}

/// Membership.
impl Cluster {
	/// Adds a node to the fabric and announces it to every node it can
	/// reach. `events_backlog` sizes the node's membership event channel.
	pub(crate) fn join(
		&self,
		node: NodeId,
		events_backlog: usize,
	) -> Result<(), Error> {
		let notify = {
			let mut state = self.0.state.write();
			if state.nodes.contains_key(&node) {
				return Err(Error::AlreadyJoined(node));
			}

			let (events, _) = broadcast::channel(events_backlog);
			state.nodes.insert(node.clone(), NodeLink {
				actors: HashMap::new(),
				events,
			});

			state.reachable_senders(&node)
		};

		for sender in notify {
			let _ = sender.send(MembershipEvent::NodeUp(node.clone()));
		}
		Ok(())
	}

	/// Removes a node from the fabric, announcing its departure and firing
	/// every monitor installed on its actors.
	pub(crate) fn leave(&self, node: &NodeId) {
		let (notify, fired) = {
			let mut state = self.0.state.write();
			if state.nodes.remove(node).is_none() {
				return;
			}

			let notify = state.reachable_senders(node);
			let fired = state.take_watches(|watch| watch.node == *node);
			state.watches.retain(|watch| watch.watcher != *node);
			state
				.severed
				.retain(|(a, b)| a != node && b != node);
			(notify, fired)
		};

		for sender in notify {
			let _ = sender.send(MembershipEvent::NodeDown(node.clone()));
		}
		fire(fired, node);
	}

	/// Subscribes to the membership events visible to `node`.
	pub(crate) fn subscribe(
		&self,
		node: &NodeId,
	) -> Result<broadcast::Receiver<MembershipEvent>, Error> {
		let state = self.0.state.read();
		let link = state
			.nodes
			.get(node)
			.ok_or_else(|| Error::UnknownNode(node.clone()))?;
		Ok(link.events.subscribe())
	}

	/// The nodes currently visible to `node`, excluding itself.
	pub(crate) fn connected_nodes(&self, node: &NodeId) -> Vec<NodeId> {
		let state = self.0.state.read();
		state
			.nodes
			.keys()
			.filter(|other| *other != node && !state.is_severed(node, other))
			.cloned()
			.collect()
	}
}

/// Actor registration and messaging.
impl Cluster {
	pub(crate) fn register_actor(
		&self,
		node: &NodeId,
		actor: &str,
		mailbox: UnboundedSender<Delivery>,
	) -> Result<(), Error> {
		let mut state = self.0.state.write();
		let link = state
			.nodes
			.get_mut(node)
			.ok_or_else(|| Error::UnknownNode(node.clone()))?;
		link.actors.insert(actor.to_owned(), mailbox);
		Ok(())
	}

	/// Removes a named actor, firing every monitor installed on it.
	pub(crate) fn deregister_actor(&self, node: &NodeId, actor: &str) {
		let fired = {
			let mut state = self.0.state.write();
			let Some(link) = state.nodes.get_mut(node) else {
				return;
			};
			if link.actors.remove(actor).is_none() {
				return;
			}
			state
				.take_watches(|watch| watch.node == *node && watch.actor == actor)
		};
		fire(fired, node);
	}

	/// Fire-and-forget send. Silently dropped when the pair is severed or
	/// the target actor is not registered.
	pub(crate) fn send(
		&self,
		from: &NodeId,
		to: &NodeId,
		actor: &str,
		frame: Bytes,
	) {
		let mailbox = self.resolve(from, to, actor);
		match mailbox {
			Some(mailbox) => {
				let _ = mailbox.send(Delivery::Message {
					from: from.clone(),
					frame,
				});
			}
			None => trace!(%from, %to, actor, "dropping frame for unreachable actor"),
		}
	}

	/// Synchronous call: delivers the frame and suspends until the callee
	/// replies. There is no application-level timeout; the call fails only
	/// when the callee is unreachable or goes away before replying.
	pub(crate) async fn request(
		&self,
		from: &NodeId,
		to: &NodeId,
		actor: &str,
		frame: Bytes,
	) -> Result<Bytes, Error> {
		let mailbox =
			self
				.resolve(from, to, actor)
				.ok_or_else(|| Error::Unreachable {
					node: to.clone(),
					actor: actor.to_owned(),
				})?;

		let (reply_tx, reply_rx) = oneshot::channel();
		mailbox
			.send(Delivery::Request {
				from: from.clone(),
				frame,
				reply: reply_tx,
			})
			.map_err(|_| Error::Unreachable {
				node: to.clone(),
				actor: actor.to_owned(),
			})?;

		reply_rx.await.map_err(|_| Error::CallDropped {
			node: to.clone(),
			actor: actor.to_owned(),
		})
	}

	fn resolve(
		&self,
		from: &NodeId,
		to: &NodeId,
		actor: &str,
	) -> Option<UnboundedSender<Delivery>> {
		let state = self.0.state.read();
		if from != to && state.is_severed(from, to) {
			return None;
		}
		state.nodes.get(to)?.actors.get(actor).cloned()
	}
}

/// Remote actor monitoring.
impl Cluster {
	/// Installs a one-shot liveness monitor on `(node, actor)` observed
	/// from `watcher`. The sink receives the target node id when the actor
	/// deregisters, its node leaves, or the pair becomes severed. If the
	/// target is already unreachable the monitor fires immediately.
	pub(crate) fn monitor(
		&self,
		watcher: &NodeId,
		node: &NodeId,
		actor: &str,
		sink: UnboundedSender<NodeId>,
	) -> ActorMonitor {
		let mut state = self.0.state.write();

		let reachable = !state.is_severed(watcher, node)
			&& state
				.nodes
				.get(node)
				.is_some_and(|link| link.actors.contains_key(actor));

		if !reachable {
			drop(state);
			let _ = sink.send(node.clone());
			return ActorMonitor {
				cluster: Weak::new(),
				id: 0,
			};
		}

		state.next_watch += 1;
		let id = state.next_watch;
		state.watches.push(ActorWatch {
			id,
			watcher: watcher.clone(),
			node: node.clone(),
			actor: actor.to_owned(),
			sink,
		});

		ActorMonitor {
			cluster: Arc::downgrade(&self.0),
			id,
		}
	}
}

/// Fault injection for tests: severs and heals individual node pairs.
#[cfg(feature = "test-utils")]
impl Cluster {
	/// Severs the pair `(a, b)`: both nodes observe the other as down,
	/// cross-pair monitors fire, and subsequent traffic between the two is
	/// dropped until [`Cluster::reconnect`].
	pub fn disconnect(&self, a: &NodeId, b: &NodeId) {
		let (notify_a, notify_b, fired) = {
			let mut state = self.0.state.write();
			if !state.severed.insert(pair_key(a, b)) {
				return;
			}
			let fired = state.take_watches(|watch| {
				(watch.watcher == *a && watch.node == *b)
					|| (watch.watcher == *b && watch.node == *a)
			});
			(
				state.nodes.get(a).map(|link| link.events.clone()),
				state.nodes.get(b).map(|link| link.events.clone()),
				fired,
			)
		};

		if let Some(events) = notify_a {
			let _ = events.send(MembershipEvent::NodeDown(b.clone()));
		}
		if let Some(events) = notify_b {
			let _ = events.send(MembershipEvent::NodeDown(a.clone()));
		}
		for watch in fired {
			let target = if watch.watcher == *a { b } else { a };
			let _ = watch.sink.send(target.clone());
		}
	}

	/// Heals a previously severed pair; both nodes observe the other as up
	/// again.
	pub fn reconnect(&self, a: &NodeId, b: &NodeId) {
		let (notify_a, notify_b) = {
			let mut state = self.0.state.write();
			if !state.severed.remove(&pair_key(a, b)) {
				return;
			}
			(
				state.nodes.get(a).map(|link| link.events.clone()),
				state.nodes.get(b).map(|link| link.events.clone()),
			)
		};

		if let Some(events) = notify_a {
			let _ = events.send(MembershipEvent::NodeUp(b.clone()));
		}
		if let Some(events) = notify_b {
			let _ = events.send(MembershipEvent::NodeUp(a.clone()));
		}
	}
}

impl fmt::Debug for Cluster {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Cluster({})", self.0.id)
	}
}

impl State {
	fn is_severed(&self, a: &NodeId, b: &NodeId) -> bool {
		self.severed.contains(&pair_key(a, b))
	}

	/// Event senders of every node currently reachable from `node`.
	fn reachable_senders(
		&self,
		node: &NodeId,
	) -> Vec<broadcast::Sender<MembershipEvent>> {
		self
			.nodes
			.iter()
			.filter(|(other, _)| {
				*other != node && !self.is_severed(node, other)
			})
			.map(|(_, link)| link.events.clone())
			.collect()
	}

	/// Removes and returns every watch matching the predicate.
	fn take_watches(
		&mut self,
		matches: impl Fn(&ActorWatch) -> bool,
	) -> Vec<ActorWatch> {
		let (fired, kept) =
			std::mem::take(&mut self.watches)
				.into_iter()
				.partition(|watch| matches(watch));
		self.watches = kept;
		fired
	}
}

fn fire(watches: Vec<ActorWatch>, node: &NodeId) {
	for watch in watches {
		let _ = watch.sink.send(node.clone());
	}
}

fn pair_key(a: &NodeId, b: &NodeId) -> (NodeId, NodeId) {
	if a <= b {
		(a.clone(), b.clone())
	} else {
		(b.clone(), a.clone())
	}
}

/// Guard for a remote-actor monitor; dropping it unsubscribes.
pub(crate) struct ActorMonitor {
	cluster: Weak<Inner>,
	id: u64,
}

impl Drop for ActorMonitor {
	fn drop(&mut self) {
		if let Some(inner) = self.cluster.upgrade() {
			inner.state.write().watches.retain(|watch| watch.id != self.id);
		}
	}
}

#[cfg(test)]
mod tests {
	use {super::*, tokio::sync::mpsc::unbounded_channel};

	fn joined(cluster: &Cluster, name: &str) -> NodeId {
		let node = NodeId::from(name);
		cluster.join(node.clone(), 16).unwrap();
		node
	}

	#[tokio::test]
	async fn join_announces_to_existing_nodes() {
		let cluster = Cluster::new();
		let a = joined(&cluster, "a");
		let mut events = cluster.subscribe(&a).unwrap();

		let b = joined(&cluster, "b");
		assert_eq!(events.recv().await.unwrap(), MembershipEvent::NodeUp(b));
	}

	#[tokio::test]
	async fn request_reaches_registered_actor() {
		let cluster = Cluster::new();
		let a = joined(&cluster, "a");
		let b = joined(&cluster, "b");

		let (tx, mut rx) = unbounded_channel();
		cluster.register_actor(&b, "echo", tx).unwrap();

		let fabric = cluster.clone();
		let from = a.clone();
		let to = b.clone();
		let call = tokio::spawn(async move {
			fabric
				.request(&from, &to, "echo", Bytes::from_static(b"ping"))
				.await
		});

		match rx.recv().await.unwrap() {
			Delivery::Request { from, frame, reply } => {
				assert_eq!(from, a);
				assert_eq!(&frame[..], b"ping");
				reply.send(Bytes::from_static(b"pong")).unwrap();
			}
			Delivery::Message { .. } => panic!("expected a request"),
		}

		assert_eq!(&call.await.unwrap().unwrap()[..], b"pong");
	}

	#[tokio::test]
	async fn request_to_missing_actor_fails() {
		let cluster = Cluster::new();
		let a = joined(&cluster, "a");
		let b = joined(&cluster, "b");

		let result = cluster
			.request(&a, &b, "nothing", Bytes::new())
			.await;
		assert!(matches!(result, Err(Error::Unreachable { .. })));
	}

	#[tokio::test]
	async fn deregister_fires_monitor() {
		let cluster = Cluster::new();
		let a = joined(&cluster, "a");
		let b = joined(&cluster, "b");

		let (tx, mut rx) = unbounded_channel();
		cluster.register_actor(&b, "worker", tx).unwrap();

		let (down_tx, mut down_rx) = unbounded_channel();
		let _guard = cluster.monitor(&a, &b, "worker", down_tx);
		assert!(down_rx.try_recv().is_err());

		cluster.deregister_actor(&b, "worker");
		assert_eq!(down_rx.recv().await.unwrap(), b);
		drop(rx);
	}

	#[tokio::test]
	async fn monitor_on_absent_actor_fires_immediately() {
		let cluster = Cluster::new();
		let a = joined(&cluster, "a");
		let b = joined(&cluster, "b");

		let (down_tx, mut down_rx) = unbounded_channel();
		let _guard = cluster.monitor(&a, &b, "worker", down_tx);
		assert_eq!(down_rx.recv().await.unwrap(), b);
	}

	#[tokio::test]
	async fn severed_pairs_drop_traffic_and_fire_monitors() {
		let cluster = Cluster::new();
		let a = joined(&cluster, "a");
		let b = joined(&cluster, "b");

		let (tx, mut rx) = unbounded_channel();
		cluster.register_actor(&b, "worker", tx).unwrap();

		let (down_tx, mut down_rx) = unbounded_channel();
		let _guard = cluster.monitor(&a, &b, "worker", down_tx);

		let mut a_events = cluster.subscribe(&a).unwrap();
		cluster.disconnect(&a, &b);

		assert_eq!(
			a_events.recv().await.unwrap(),
			MembershipEvent::NodeDown(b.clone())
		);
		assert_eq!(down_rx.recv().await.unwrap(), b);

		cluster.send(&a, &b, "worker", Bytes::from_static(b"lost"));
		assert!(rx.try_recv().is_err());

		cluster.reconnect(&a, &b);
		assert_eq!(
			a_events.recv().await.unwrap(),
			MembershipEvent::NodeUp(b.clone())
		);

		cluster.send(&a, &b, "worker", Bytes::from_static(b"back"));
		assert!(matches!(
			rx.recv().await.unwrap(),
			Delivery::Message { .. }
		));
	}
}
