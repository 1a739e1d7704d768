use {
	bytes::Bytes,
	core::fmt,
	serde::{Deserialize, Serialize},
};

/// An independent namespace of registrations and groups.
///
/// Every scope carries its own replicated tables and its own pair of scope
/// actors on every node; nothing is shared across scopes. The special scope
/// `"default"` is reserved for convenience APIs and is started on every
/// node automatically.
#[derive(
	Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Scope(String);

impl Scope {
	pub const DEFAULT: &'static str = "default";

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Default for Scope {
	fn default() -> Self {
		Self(Self::DEFAULT.into())
	}
}

impl<T: AsRef<str>> From<T> for Scope {
	fn from(s: T) -> Self {
		Self(s.as_ref().to_owned())
	}
}

impl fmt::Display for Scope {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// An opaque registration key. At most one live process holds a given name
/// within a scope.
#[derive(
	Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Name(String);

impl Name {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl<T: AsRef<str>> From<T> for Name {
	fn from(s: T) -> Self {
		Self(s.as_ref().to_owned())
	}
}

impl fmt::Display for Name {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// An opaque group key. A group holds an unordered set of processes; a
/// process may be a member of many groups.
#[derive(
	Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GroupName(String);

impl GroupName {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl<T: AsRef<str>> From<T> for GroupName {
	fn from(s: T) -> Self {
		Self(s.as_ref().to_owned())
	}
}

impl fmt::Display for GroupName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// An opaque user payload attached to a registration or group membership.
///
/// The registry never interprets the content; it is replicated verbatim and
/// handed back on lookups and in lifecycle callbacks. `Meta::null()` is the
/// empty payload used by the meta-less convenience paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta(Bytes);

impl Meta {
	/// The empty payload.
	pub fn null() -> Self {
		Self::default()
	}

	pub fn is_null(&self) -> bool {
		self.0.is_empty()
	}

	pub fn as_bytes(&self) -> &[u8] {
		&self.0
	}
}

impl From<&str> for Meta {
	fn from(s: &str) -> Self {
		Self(Bytes::copy_from_slice(s.as_bytes()))
	}
}

impl From<String> for Meta {
	fn from(s: String) -> Self {
		Self(Bytes::from(s.into_bytes()))
	}
}

impl From<Vec<u8>> for Meta {
	fn from(b: Vec<u8>) -> Self {
		Self(Bytes::from(b))
	}
}

impl From<&[u8]> for Meta {
	fn from(b: &[u8]) -> Self {
		Self(Bytes::copy_from_slice(b))
	}
}

impl From<Bytes> for Meta {
	fn from(b: Bytes) -> Self {
		Self(b)
	}
}
