use {
	crate::primitives::Short,
	core::{convert::Infallible, fmt, str::FromStr},
	derive_more::Deref,
	serde::{Deserialize, Deserializer, Serialize, de},
};

/// A 32-byte identifier, typically derived from a Blake3 hash of some
/// preimage. Used to identify clusters and other infrastructure entities.
///
/// Notes:
///  - unique ids can be derived from strings using the `From` trait; a
///    string that is already a 32-byte hex string is decoded directly,
///    anything else is hashed.
///  - when serialized to human readable formats, `UniqueId`s are
///    represented as hex-encoded strings; binary formats carry the raw
///    32-byte array.
#[derive(Clone, Copy, Deref)]
pub struct UniqueId(blake3::Hash);

impl<T: AsRef<str>> From<T> for UniqueId {
	fn from(s: T) -> Self {
		let s = s.as_ref();
		match hex::decode(s) {
			Ok(b) if b.len() == 32 => {
				UniqueId(blake3::Hash::from_slice(&b).expect("slice is 32 bytes"))
			}
			_ => UniqueId(blake3::hash(s.as_bytes())),
		}
	}
}

impl PartialEq for UniqueId {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}
impl Eq for UniqueId {}

impl PartialOrd for UniqueId {
	fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for UniqueId {
	fn cmp(&self, other: &Self) -> core::cmp::Ordering {
		self.0.as_bytes().cmp(other.0.as_bytes())
	}
}

impl core::hash::Hash for UniqueId {
	fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
		self.0.as_bytes().hash(state);
	}
}

impl AsRef<[u8]> for UniqueId {
	fn as_ref(&self) -> &[u8] {
		self.0.as_bytes()
	}
}

impl FromStr for UniqueId {
	type Err = Infallible;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(UniqueId::from(s))
	}
}

impl fmt::Debug for UniqueId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.to_hex())
	}
}

impl fmt::Display for UniqueId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", Short(self.0.as_bytes()))
	}
}

impl Serialize for UniqueId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		if serializer.is_human_readable() {
			serializer.serialize_str(self.0.to_hex().as_str())
		} else {
			self.0.serialize(serializer)
		}
	}
}

impl<'de> Deserialize<'de> for UniqueId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		if deserializer.is_human_readable() {
			let s = String::deserialize(deserializer)?;
			Ok(UniqueId(
				blake3::Hash::from_hex(&s).map_err(de::Error::custom)?,
			))
		} else {
			let bytes = <[u8; 32]>::deserialize(deserializer)?;
			Ok(UniqueId(blake3::Hash::from_bytes(bytes)))
		}
	}
}

impl UniqueId {
	/// Returns the byte representation of the unique id.
	pub fn as_bytes(&self) -> &[u8; 32] {
		self.0.as_bytes()
	}

	/// Creates a unique id from the given bytes.
	pub fn from_bytes(bytes: impl Into<[u8; 32]>) -> Self {
		UniqueId(blake3::Hash::from_bytes(bytes.into()))
	}

	/// Generates a random unique id.
	pub fn random() -> Self {
		UniqueId(blake3::Hash::from_bytes(rand::random()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn derives_from_strings_and_hex() {
		let a = UniqueId::from("some-cluster");
		let b = UniqueId::from("some-cluster");
		let c = UniqueId::from("other-cluster");
		assert_eq!(a, b);
		assert_ne!(a, c);

		let hex = a.0.to_hex();
		assert_eq!(UniqueId::from(hex.as_str()), a);
	}

	#[test]
	fn binary_roundtrip() {
		let id = UniqueId::random();
		let bytes = rmp_serde::to_vec(&id).unwrap();
		let back: UniqueId = rmp_serde::from_slice(&bytes).unwrap();
		assert_eq!(id, back);
	}
}
