use crate::scope::CallError;

/// Outcomes of registry operations that did not succeed.
///
/// The first four are normal protocol outcomes returned as values by the
/// owner node; `Unreachable` means the synchronous call to a scope actor
/// failed before producing any outcome.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("process is not alive on its owner node")]
	NotAlive,

	#[error("name is held by a different process")]
	Taken,

	#[error("nothing is registered under this name")]
	Undefined,

	#[error("a different process holds this name now")]
	RaceCondition,

	#[error("scope actor call failed: {0}")]
	Unreachable(#[from] CallError),

	#[error("scope actor produced a reply that does not match the call")]
	UnexpectedReply,
}
