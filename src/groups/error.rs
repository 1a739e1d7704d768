use crate::scope::CallError;

/// Outcomes of group operations that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("process is not alive on its owner node")]
	NotAlive,

	#[error("process is not a member of this group")]
	NotInGroup,

	#[error("scope actor call failed: {0}")]
	Unreachable(#[from] CallError),

	#[error("scope actor produced a reply that does not match the call")]
	UnexpectedReply,
}
