//! Cluster-wide process registry and process groups.
//!
//! Every node joins a [`Cluster`](cluster::Cluster) and hosts, per scope,
//! a replicated registry (name → process) and a replicated group view
//! (group → set of processes). Replicas converge through discovery
//! snapshots and incremental sync broadcasts; liveness monitors evict dead
//! processes; conflicting registrations are resolved by a pluggable
//! policy. Reads are local and lock-free for callers; writes execute on
//! the owner node of the target process.

pub mod clock;
pub mod cluster;
pub mod events;
pub mod groups;
pub mod node;
pub mod process;
pub mod registry;

mod primitives;
mod scope;

pub use {
	primitives::{GroupName, Meta, Name, Scope, UniqueId},
	scope::CallError,
};

pub mod prelude {
	pub use super::{
		GroupName,
		Meta,
		Name,
		Scope,
		clock::Timestamp,
		cluster::{Cluster, ClusterId, MembershipEvent, NodeId},
		events::{Claim, EventHandler},
		groups::{Groups, Joined},
		node::{Config, Node, NodeBuilder},
		process::{ExitReason, Pid, ProcessHost},
		registry::{Registered, Registry},
	};
}

#[cfg(feature = "test-utils")]
pub mod test_utils;
