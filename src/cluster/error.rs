use super::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("node {0} has already joined this cluster")]
	AlreadyJoined(NodeId),

	#[error("node {0} is not a member of this cluster")]
	UnknownNode(NodeId),

	#[error("actor {actor} on node {node} is unreachable")]
	Unreachable { node: NodeId, actor: String },

	#[error("call to {actor} on node {node} was dropped before it replied")]
	CallDropped { node: NodeId, actor: String },
}
