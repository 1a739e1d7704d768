//! The per-scope actor framework.
//!
//! Every scope runs two actors on every node: one for the registry state
//! machine and one for the groups state machine. This module provides the
//! parts they share: the wire protocol ([`protocol`]), the state machine
//! trait ([`Machine`]), and the single-writer event loop that owns the
//! actor mailbox ([`WorkerLoop`] / [`Handle`]).

use crate::primitives::Scope;

mod error;
mod machine;
mod protocol;
mod worker;

pub use error::CallError;
pub(crate) use {
	machine::Machine,
	worker::{Caller, Handle, Peers, WorkerLoop, remote_call},
};

/// The cluster-wide actor name of a scope actor: `<kind>_<scope>`, e.g.
/// `registry_default`. The same name resolves to the corresponding actor
/// on every node.
pub(crate) fn actor_name(kind: &str, scope: &Scope) -> String {
	format!("{kind}_{scope}")
}
