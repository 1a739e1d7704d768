//! Inter-node wire protocol of the scope actors.
//!
//! Every frame carries the protocol version tag; frames with an unknown
//! version or that fail to decode are logged and discarded by the
//! receiving worker. MessagePack is the byte encoding for all frames.

use {
	super::machine::Machine,
	crate::cluster::NodeId,
	bytes::Bytes,
	serde::{Deserialize, Serialize, de::DeserializeOwned},
};

/// Version tag carried by every inter-node frame.
pub const PROTOCOL_VERSION: &str = "3.0";

/// A versioned wire frame wrapping one envelope.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Frame<S, D> {
	pub version: String,
	pub envelope: Envelope<S, D>,
}

/// The scope actor message envelope, generic over the state machine's
/// broadcast (`S`) and snapshot (`D`) payloads.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum Envelope<S, D> {
	/// Broadcast by a starting actor (and on node-up) to make itself known
	/// to the same-named actor on other nodes.
	Discover { from: NodeId },

	/// Point-to-point reply to a `Discover`, carrying the sender's local
	/// data snapshot. Also sent back unprompted when an `AckSync` reveals a
	/// previously unknown peer, so both sides converge even if one
	/// direction's `Discover` was lost.
	AckSync { from: NodeId, data: D },

	/// A state machine broadcast (registration sync, unregistration sync,
	/// group membership sync).
	Sync(S),
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Bytes {
	rmp_serde::to_vec(value)
		.expect("wire types serialize infallibly")
		.into()
}

pub(crate) fn decode<T: DeserializeOwned>(
	bytes: &[u8],
) -> Result<T, rmp_serde::decode::Error> {
	rmp_serde::from_slice(bytes)
}

pub(crate) fn discover<M: Machine>(from: &NodeId) -> Bytes {
	encode(&Frame::<M::Sync, M::Snapshot> {
		version: PROTOCOL_VERSION.to_owned(),
		envelope: Envelope::Discover { from: from.clone() },
	})
}

pub(crate) fn ack_sync<M: Machine>(
	from: &NodeId,
	data: M::Snapshot,
) -> Bytes {
	encode(&Frame::<M::Sync, M::Snapshot> {
		version: PROTOCOL_VERSION.to_owned(),
		envelope: Envelope::AckSync {
			from: from.clone(),
			data,
		},
	})
}

pub(crate) fn sync<M: Machine>(msg: &M::Sync) -> Bytes {
	encode(&Frame::<&M::Sync, M::Snapshot> {
		version: PROTOCOL_VERSION.to_owned(),
		envelope: Envelope::Sync(msg),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	enum TestSync {
		Put(String),
	}

	fn frame(envelope: Envelope<TestSync, Vec<String>>) -> Bytes {
		encode(&Frame {
			version: PROTOCOL_VERSION.to_owned(),
			envelope,
		})
	}

	#[test]
	fn frames_roundtrip() {
		let bytes = frame(Envelope::AckSync {
			from: NodeId::from("a"),
			data: vec!["x".to_owned()],
		});

		let decoded: Frame<TestSync, Vec<String>> = decode(&bytes).unwrap();
		assert_eq!(decoded.version, PROTOCOL_VERSION);
		match decoded.envelope {
			Envelope::AckSync { from, data } => {
				assert_eq!(from, NodeId::from("a"));
				assert_eq!(data, vec!["x".to_owned()]);
			}
			other => panic!("unexpected envelope: {other:?}"),
		}
	}

	#[test]
	fn sync_frames_decode_with_owned_payload() {
		// Sync frames are encoded borrowing the payload; receivers decode
		// the owned form.
		let msg = TestSync::Put("v".to_owned());
		let bytes = encode(&Frame::<&TestSync, Vec<String>> {
			version: PROTOCOL_VERSION.to_owned(),
			envelope: Envelope::Sync(&msg),
		});

		let decoded: Frame<TestSync, Vec<String>> = decode(&bytes).unwrap();
		assert!(matches!(decoded.envelope, Envelope::Sync(TestSync::Put(v)) if v == "v"));
	}

	#[test]
	fn garbage_frames_fail_to_decode() {
		let result: Result<Frame<TestSync, Vec<String>>, _> =
			decode(b"\xffnot-a-frame");
		assert!(result.is_err());
	}
}
