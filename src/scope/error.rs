use crate::cluster;

/// Failure of a synchronous call to a scope actor.
///
/// These are transport-level failures, distinct from the normal outcome
/// values the state machines reply with: the call never produced a reply
/// at all.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
	#[error("transport failure: {0}")]
	Transport(#[from] cluster::Error),

	#[error("malformed reply frame: {0}")]
	Codec(#[from] rmp_serde::decode::Error),

	#[error("scope actor is not running")]
	ActorStopped,
}
