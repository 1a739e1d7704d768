use {
	chrono::Utc,
	core::fmt,
	serde::{Deserialize, Serialize},
	std::sync::atomic::{AtomicI64, Ordering},
};

/// A point on a node's monotonic clock, in nanoseconds since the Unix
/// epoch.
///
/// Timestamps are only compared, never interpreted as wall-clock time: they
/// break ties between updates to the same registration and act as freshness
/// counters after conflict resolution. They are totally ordered per owner
/// node and carry no cross-node ordering guarantee.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	PartialOrd,
	Ord,
	Hash,
	Serialize,
	Deserialize,
)]
pub struct Timestamp(i64);

impl Timestamp {
	pub const ZERO: Self = Self(0);

	pub const fn from_nanos(nanos: i64) -> Self {
		Self(nanos)
	}

	pub const fn as_nanos(&self) -> i64 {
		self.0
	}
}

impl fmt::Display for Timestamp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// A strictly monotonic per-node clock.
///
/// Each reading is the wall clock bumped past the previous reading, so two
/// consecutive calls never return the same value even within one
/// nanosecond. One instance is shared by all scope actors of a node.
#[derive(Debug, Default)]
pub struct MonotonicClock {
	last: AtomicI64,
}

impl MonotonicClock {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next timestamp, strictly greater than any previous
	/// reading of this clock.
	pub fn now(&self) -> Timestamp {
		self.after(Timestamp::ZERO)
	}

	/// Returns the next timestamp, strictly greater than both `floor` and
	/// any previous reading of this clock.
	///
	/// Used when re-stamping a locally kept registration after conflict
	/// resolution: the fresh time must sort after the remote claim's time
	/// even if the remote clock runs ahead of ours.
	pub fn after(&self, floor: Timestamp) -> Timestamp {
		let wall = Utc::now()
			.timestamp_nanos_opt()
			.expect("system time within nanosecond timestamp range");

		// fetch_update returns the previous value; the stored value is the
		// closure applied to it, recomputed below for the return.
		let prev = self
			.last
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
				Some(wall.max(last + 1).max(floor.0 + 1))
			})
			.expect("fetch_update closure is infallible");

		Timestamp(wall.max(prev + 1).max(floor.0 + 1))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn strictly_increasing() {
		let clock = MonotonicClock::new();
		let mut prev = clock.now();
		for _ in 0..10_000 {
			let next = clock.now();
			assert!(next > prev);
			prev = next;
		}
	}

	#[test]
	fn after_is_later_than_floor() {
		let clock = MonotonicClock::new();
		let far_future =
			Timestamp::from_nanos(clock.now().as_nanos() + 1_000_000_000_000);
		let stamped = clock.after(far_future);
		assert!(stamped > far_future);

		// and the clock does not run backwards afterwards
		assert!(clock.now() > stamped);
	}
}
