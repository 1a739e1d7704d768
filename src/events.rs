//! User-visible lifecycle callbacks and their dispatch.
//!
//! The registry invokes user code at three points: after a name is bound,
//! after a name is released, and when two nodes discover conflicting
//! claims for the same name. All three run inline in the scope actor, so
//! the dispatcher isolates the actor from user code: a panicking callback
//! is caught, logged, and substituted with a safe default.

use {
	crate::{
		clock::Timestamp,
		primitives::{Meta, Name, Scope},
		process::Pid,
	},
	std::{
		panic::{AssertUnwindSafe, catch_unwind},
		sync::Arc,
	},
	tracing::{error, warn},
};

/// One side's claim on a contested name, as handed to the conflict
/// resolver.
#[derive(Debug, Clone)]
pub struct Claim {
	pub pid: Pid,
	pub meta: Meta,
	pub time: Timestamp,
}

/// Lifecycle callbacks invoked by the registry.
///
/// All methods have defaults: the lifecycle hooks do nothing and the
/// conflict resolver selects nobody.
///
/// Notes:
///
/// - Callbacks run on the scope actor (except the bulk unregistrations of
///   a node purge, which run on a detached task); they should not block.
///
/// - The resolver runs independently on both conflicting nodes and must
///   elect the same winner on both for the name to survive: decide from
///   the claims themselves (pids, metas, times), never from which node is
///   executing the callback. A locality-dependent verdict makes each node
///   keep its own claim and the rebroadcast ping-pong never converges.
///
/// - With the default resolver both nodes discard their claim and kill
///   its holder, so a conflicted name converges to *no* registration.
///   Deployments that need a decisive winner must override
///   [`EventHandler::resolve_registry_conflict`].
pub trait EventHandler: Send + Sync + 'static {
	/// A name was bound to a process. `previous` carries the claim this
	/// binding replaced, if any.
	fn on_process_registered(
		&self,
		scope: &Scope,
		name: &Name,
		previous: Option<(Pid, Meta)>,
		current: (Pid, Meta),
	) {
		let _ = (scope, name, previous, current);
	}

	/// A name stopped being bound to a process.
	fn on_process_unregistered(
		&self,
		scope: &Scope,
		name: &Name,
		pid: Pid,
		meta: Meta,
	) {
		let _ = (scope, name, pid, meta);
	}

	/// Two distinct processes claim `name`. Return the pid that should
	/// keep the name; returning `None` (or a pid that is neither claim)
	/// discards both claims, each node killing its local claimant.
	fn resolve_registry_conflict(
		&self,
		scope: &Scope,
		name: &Name,
		incoming: &Claim,
		current: &Claim,
	) -> Option<Pid> {
		let _ = (scope, name, incoming, current);
		None
	}
}

/// The no-op handler installed when the application provides none.
pub(crate) struct DefaultHandler;

impl EventHandler for DefaultHandler {}

/// Panic-isolating wrapper around the installed [`EventHandler`].
pub(crate) struct Dispatcher {
	scope: Scope,
	handler: Arc<dyn EventHandler>,
}

impl Clone for Dispatcher {
	fn clone(&self) -> Self {
		Self {
			scope: self.scope.clone(),
			handler: Arc::clone(&self.handler),
		}
	}
}

impl Dispatcher {
	pub(crate) fn new(scope: Scope, handler: Arc<dyn EventHandler>) -> Self {
		Self { scope, handler }
	}

	pub(crate) fn registered(
		&self,
		name: &Name,
		previous: Option<(Pid, Meta)>,
		current: (Pid, Meta),
	) {
		let outcome = catch_unwind(AssertUnwindSafe(|| {
			self
				.handler
				.on_process_registered(&self.scope, name, previous, current);
		}));

		if outcome.is_err() {
			warn!(
				scope = %self.scope,
				name = %name,
				"on_process_registered callback panicked; ignoring"
			);
		}
	}

	pub(crate) fn unregistered(&self, name: &Name, pid: Pid, meta: Meta) {
		let outcome = catch_unwind(AssertUnwindSafe(|| {
			self
				.handler
				.on_process_unregistered(&self.scope, name, pid, meta);
		}));

		if outcome.is_err() {
			warn!(
				scope = %self.scope,
				name = %name,
				"on_process_unregistered callback panicked; ignoring"
			);
		}
	}

	/// Runs the conflict resolver; a panicking resolver selects nobody,
	/// which discards both claims.
	pub(crate) fn resolve(
		&self,
		name: &Name,
		incoming: &Claim,
		current: &Claim,
	) -> Option<Pid> {
		catch_unwind(AssertUnwindSafe(|| {
			self
				.handler
				.resolve_registry_conflict(&self.scope, name, incoming, current)
		}))
		.unwrap_or_else(|_| {
			error!(
				scope = %self.scope,
				name = %name,
				incoming = %incoming.pid,
				current = %current.pid,
				"resolve_registry_conflict callback panicked; discarding both claims"
			);
			None
		})
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		std::sync::atomic::{AtomicUsize, Ordering},
	};

	struct Panicking;

	impl EventHandler for Panicking {
		fn on_process_registered(
			&self,
			_scope: &Scope,
			_name: &Name,
			_previous: Option<(Pid, Meta)>,
			_current: (Pid, Meta),
		) {
			panic!("boom");
		}

		fn resolve_registry_conflict(
			&self,
			_scope: &Scope,
			_name: &Name,
			_incoming: &Claim,
			_current: &Claim,
		) -> Option<Pid> {
			panic!("boom");
		}
	}

	struct Counting(AtomicUsize);

	impl EventHandler for Counting {
		fn on_process_unregistered(
			&self,
			_scope: &Scope,
			_name: &Name,
			_pid: Pid,
			_meta: Meta,
		) {
			self.0.fetch_add(1, Ordering::Relaxed);
		}
	}

	fn claims() -> (Claim, Claim) {
		let host = crate::process::ProcessHost::new("a".into());
		let incoming = Claim {
			pid: host.spawn(),
			meta: Meta::null(),
			time: Timestamp::ZERO,
		};
		let current = Claim {
			pid: host.spawn(),
			meta: Meta::null(),
			time: Timestamp::ZERO,
		};
		(incoming, current)
	}

	#[test]
	fn default_resolver_elects_nobody() {
		let dispatcher =
			Dispatcher::new(Scope::default(), Arc::new(DefaultHandler));
		let (incoming, current) = claims();
		assert_eq!(
			dispatcher.resolve(&Name::from("n"), &incoming, &current),
			None
		);
	}

	#[test]
	fn panicking_resolver_discards_both() {
		let dispatcher = Dispatcher::new(Scope::default(), Arc::new(Panicking));
		let (incoming, current) = claims();
		assert_eq!(
			dispatcher.resolve(&Name::from("n"), &incoming, &current),
			None
		);
	}

	#[test]
	fn panicking_lifecycle_hook_is_swallowed() {
		let dispatcher = Dispatcher::new(Scope::default(), Arc::new(Panicking));
		let (incoming, _) = claims();
		// must not propagate the panic
		dispatcher.registered(
			&Name::from("n"),
			None,
			(incoming.pid, Meta::null()),
		);
	}

	#[test]
	fn hooks_reach_the_installed_handler() {
		let handler = Arc::new(Counting(AtomicUsize::new(0)));
		let dispatcher = Dispatcher::new(Scope::default(), handler.clone());
		let (incoming, _) = claims();
		dispatcher.unregistered(&Name::from("n"), incoming.pid, Meta::null());
		assert_eq!(handler.0.load(Ordering::Relaxed), 1);
	}
}
