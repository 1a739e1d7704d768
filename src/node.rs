//! Node lifecycle: joining a cluster and hosting the per-scope actors.

use {
	crate::{
		clock::MonotonicClock,
		cluster::{self, Cluster, NodeId},
		events::{DefaultHandler, Dispatcher, EventHandler},
		groups::{self, Groups, GroupsMachine},
		primitives::Scope,
		process::ProcessHost,
		registry::{self, Registry, RegistryMachine},
		scope::{Caller, Handle, Machine, WorkerLoop, actor_name},
	},
	derive_builder::Builder,
	parking_lot::RwLock,
	std::{collections::HashMap, sync::Arc},
	tokio::sync::mpsc::unbounded_channel,
	tracing::info,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("cluster error: {0}")]
	Cluster(#[from] cluster::Error),

	#[error("scope {0} is already running on this node")]
	ScopeAlreadyRunning(Scope),

	#[error("scope {0} is not running on this node")]
	UnknownScope(Scope),
}

/// Node configuration.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(prefix = "with"), derive(Debug, Clone))]
#[builder_struct_attr(doc(hidden))]
pub struct Config {
	/// Capacity of the membership event channel each scope actor
	/// subscribes to. Events beyond this backlog are dropped with a lag
	/// warning.
	#[builder(default = "128")]
	pub events_backlog: usize,
}

impl Config {
	/// Creates a new config builder with default values.
	pub fn builder() -> ConfigBuilder {
		ConfigBuilder::default()
	}
}

impl Default for Config {
	fn default() -> Self {
		ConfigBuilder::default()
			.build()
			.expect("all config fields have defaults")
	}
}

/// Builder for a [`Node`].
pub struct NodeBuilder {
	cluster: Cluster,
	id: NodeId,
	scopes: Vec<Scope>,
	handler: Arc<dyn EventHandler>,
	config: Config,
}

impl NodeBuilder {
	/// Adds a scope to start when the node boots. The `default` scope is
	/// always started and does not need to be listed.
	#[must_use]
	pub fn with_scope(mut self, scope: impl Into<Scope>) -> Self {
		self.scopes.push(scope.into());
		self
	}

	/// Installs the event handler invoked for registry lifecycle events
	/// and conflict resolution on this node.
	#[must_use]
	pub fn with_handler(mut self, handler: impl EventHandler) -> Self {
		self.handler = Arc::new(handler);
		self
	}

	#[must_use]
	pub fn with_config(mut self, config: Config) -> Self {
		self.config = config;
		self
	}

	/// Joins the cluster and boots the scope actors.
	pub fn build(self) -> Result<Node, Error> {
		self.cluster.join(self.id.clone(), self.config.events_backlog)?;

		let inner = Arc::new(Inner {
			host: ProcessHost::new(self.id.clone()),
			id: self.id,
			cluster: self.cluster,
			clock: Arc::new(MonotonicClock::new()),
			handler: self.handler,
			scopes: RwLock::new(HashMap::new()),
		});

		let node = Node(inner);

		let mut scopes = vec![Scope::default()];
		for scope in self.scopes {
			if !scopes.contains(&scope) {
				scopes.push(scope);
			}
		}
		for scope in scopes {
			node.add_scope(scope)?;
		}

		info!(node = %node.0.id, "node started");
		Ok(node)
	}
}

/// One cluster participant: hosts the per-scope registry and groups
/// actors and exposes the public API facades.
///
/// Notes:
///
/// - This type is cheap to clone; all clones refer to the same node.
///
/// - Dropping the last clone cancels the node's scope actors but does not
///   announce departure; call [`Node::shutdown`] for a graceful exit.
pub struct Node(Arc<Inner>);

impl Clone for Node {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}

impl Node {
	/// Creates a builder for a node named `id` joining `cluster`.
	pub fn builder(cluster: &Cluster, id: impl Into<NodeId>) -> NodeBuilder {
		NodeBuilder {
			cluster: cluster.clone(),
			id: id.into(),
			scopes: Vec::new(),
			handler: Arc::new(DefaultHandler),
			config: Config::default(),
		}
	}

	/// This node's identifier.
	pub fn id(&self) -> &NodeId {
		&self.0.id
	}

	/// The process liveness service of this node.
	pub fn host(&self) -> &ProcessHost {
		self.0.host()
	}

	/// The registry API facade.
	pub fn registry(&self) -> Registry {
		Registry::new(Arc::clone(&self.0))
	}

	/// The process groups API facade.
	pub fn groups(&self) -> Groups {
		Groups::new(Arc::clone(&self.0))
	}

	/// The scopes currently running on this node.
	pub fn scopes(&self) -> Vec<Scope> {
		self.0.scopes.read().keys().cloned().collect()
	}

	/// Starts the actor pair for an additional scope.
	pub fn add_scope(&self, scope: impl Into<Scope>) -> Result<(), Error> {
		let scope = scope.into();
		{
			let scopes = self.0.scopes.read();
			if scopes.contains_key(&scope) {
				return Err(Error::ScopeAlreadyRunning(scope));
			}
		}

		let registry_store = registry::Store::default();
		let groups_store = groups::Store::default();
		let workers =
			self
				.0
				.start_workers(&scope, &registry_store, &groups_store)?;

		self.0.scopes.write().insert(scope, ScopeRuntime {
			registry_store,
			groups_store,
			registry_caller: workers.0.caller(),
			groups_caller: workers.1.caller(),
			workers: Some(workers),
		});
		Ok(())
	}

	/// Stops every scope actor and leaves the cluster.
	pub async fn shutdown(&self) {
		let workers: Vec<_> = {
			let mut scopes = self.0.scopes.write();
			scopes
				.values_mut()
				.filter_map(|runtime| runtime.workers.take())
				.collect()
		};

		for (registry, groups) in workers {
			registry.stop().await;
			groups.stop().await;
		}

		self.0.cluster.leave(&self.0.id);
		info!(node = %self.0.id, "node stopped");
	}
}

/// Scope actor fault injection for tests.
#[cfg(feature = "test-utils")]
impl Node {
	/// Stops the actor pair of one scope, keeping its tables. Peers
	/// observe the actors going down and purge this node's rows.
	pub async fn stop_scope(&self, scope: &Scope) -> Result<(), Error> {
		let workers = {
			let mut scopes = self.0.scopes.write();
			let runtime = scopes
				.get_mut(scope)
				.ok_or_else(|| Error::UnknownScope(scope.clone()))?;
			runtime.workers.take()
		};

		match workers {
			Some((registry, groups)) => {
				registry.stop().await;
				groups.stop().await;
				Ok(())
			}
			None => Ok(()),
		}
	}

	/// Restarts a previously stopped scope actor pair on the surviving
	/// tables, exercising the monitor rebuild path.
	pub fn restart_scope(&self, scope: &Scope) -> Result<(), Error> {
		let (registry_store, groups_store) = {
			let scopes = self.0.scopes.read();
			let runtime = scopes
				.get(scope)
				.ok_or_else(|| Error::UnknownScope(scope.clone()))?;
			if runtime.workers.is_some() {
				return Err(Error::ScopeAlreadyRunning(scope.clone()));
			}
			(runtime.registry_store.clone(), runtime.groups_store.clone())
		};

		let workers =
			self.0.start_workers(scope, &registry_store, &groups_store)?;

		let mut scopes = self.0.scopes.write();
		let runtime = scopes
			.get_mut(scope)
			.ok_or_else(|| Error::UnknownScope(scope.clone()))?;
		runtime.registry_caller = workers.0.caller();
		runtime.groups_caller = workers.1.caller();
		runtime.workers = Some(workers);
		Ok(())
	}
}

impl core::fmt::Debug for Node {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Node").field("id", &self.0.id).finish()
	}
}

/// Inner state of a node, shared by the node handle and the API facades.
pub(crate) struct Inner {
	id: NodeId,
	cluster: Cluster,
	host: ProcessHost,
	clock: Arc<MonotonicClock>,
	handler: Arc<dyn EventHandler>,
	scopes: RwLock<HashMap<Scope, ScopeRuntime>>,
}

struct ScopeRuntime {
	registry_store: registry::Store,
	groups_store: groups::Store,
	/// Call handles outlive worker restarts so facades never observe a
	/// torn-down scope as an unknown one; calls to a stopped actor fail
	/// with `ActorStopped` instead.
	registry_caller: Caller<RegistryMachine>,
	groups_caller: Caller<GroupsMachine>,
	workers: Option<(Handle<RegistryMachine>, Handle<GroupsMachine>)>,
}

impl Inner {
	pub(crate) fn id(&self) -> &NodeId {
		&self.id
	}

	pub(crate) fn cluster(&self) -> &Cluster {
		&self.cluster
	}

	fn host(&self) -> &ProcessHost {
		&self.host
	}

	fn start_workers(
		&self,
		scope: &Scope,
		registry_store: &registry::Store,
		groups_store: &groups::Store,
	) -> Result<(Handle<RegistryMachine>, Handle<GroupsMachine>), Error> {
		let registry = {
			let (downs_tx, downs_rx) = unbounded_channel();
			let (deliveries_tx, deliveries_rx) = unbounded_channel();
			self.cluster.register_actor(
				&self.id,
				&actor_name(RegistryMachine::KIND, scope),
				deliveries_tx,
			)?;

			let machine = RegistryMachine::new(
				scope.clone(),
				registry_store.clone(),
				self.host().clone(),
				Arc::clone(&self.clock),
				Dispatcher::new(scope.clone(), Arc::clone(&self.handler)),
				downs_tx,
			);

			WorkerLoop::spawn(
				scope.clone(),
				self.id.clone(),
				self.cluster.clone(),
				machine,
				deliveries_rx,
				self.cluster.subscribe(&self.id)?,
				downs_rx,
			)
		};

		let groups = {
			let (downs_tx, downs_rx) = unbounded_channel();
			let (deliveries_tx, deliveries_rx) = unbounded_channel();
			self.cluster.register_actor(
				&self.id,
				&actor_name(GroupsMachine::KIND, scope),
				deliveries_tx,
			)?;

			let machine = GroupsMachine::new(
				scope.clone(),
				groups_store.clone(),
				self.host().clone(),
				Arc::clone(&self.clock),
				downs_tx,
			);

			WorkerLoop::spawn(
				scope.clone(),
				self.id.clone(),
				self.cluster.clone(),
				machine,
				deliveries_rx,
				self.cluster.subscribe(&self.id)?,
				downs_rx,
			)
		};

		Ok((registry, groups))
	}

	fn runtime<T>(
		&self,
		scope: &Scope,
		select: impl FnOnce(&ScopeRuntime) -> T,
	) -> T {
		let scopes = self.scopes.read();
		match scopes.get(scope) {
			Some(runtime) => select(runtime),
			None => panic!("invalid_scope: scope {scope} is not running on node {}", self.id),
		}
	}

	pub(crate) fn registry_store(&self, scope: &Scope) -> registry::Store {
		self.runtime(scope, |runtime| runtime.registry_store.clone())
	}

	pub(crate) fn registry_caller(
		&self,
		scope: &Scope,
	) -> Caller<RegistryMachine> {
		self.runtime(scope, |runtime| runtime.registry_caller.clone())
	}

	pub(crate) fn groups_store(&self, scope: &Scope) -> groups::Store {
		self.runtime(scope, |runtime| runtime.groups_store.clone())
	}

	pub(crate) fn groups_caller(&self, scope: &Scope) -> Caller<GroupsMachine> {
		self.runtime(scope, |runtime| runtime.groups_caller.clone())
	}
}
