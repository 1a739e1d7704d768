#![allow(unused)]

use {core::time::Duration, roster::prelude::*};

/// Awaits `f` for at most `secs` seconds.
pub async fn timeout_s<F: Future>(secs: u64, f: F) -> anyhow::Result<F::Output> {
	Ok(tokio::time::timeout(Duration::from_secs(secs), f).await?)
}

/// Polls `check` until it holds, panicking after `secs` seconds.
pub async fn eventually(secs: u64, mut check: impl FnMut() -> bool) {
	let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
	while !check() {
		assert!(
			tokio::time::Instant::now() < deadline,
			"condition not reached within {secs}s"
		);
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
}

/// Two nodes `a` and `b` in one cluster, both running scope `s1`.
pub fn two_nodes(cluster: &Cluster) -> anyhow::Result<(Node, Node)> {
	let a = Node::builder(cluster, "a").with_scope("s1").build()?;
	let b = Node::builder(cluster, "b").with_scope("s1").build()?;
	Ok((a, b))
}

pub fn s1() -> Scope {
	Scope::from("s1")
}
