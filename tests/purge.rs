mod utils;

use {
	roster::prelude::*,
	std::sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	utils::*,
};

struct CountUnregistered(Arc<AtomicUsize>);

impl EventHandler for CountUnregistered {
	fn on_process_unregistered(
		&self,
		_scope: &Scope,
		_name: &Name,
		_pid: Pid,
		_meta: Meta,
	) {
		self.0.fetch_add(1, Ordering::Relaxed);
	}
}

#[tokio::test]
async fn a_dead_scope_actor_purges_its_rows_on_peers() -> anyhow::Result<()> {
	let unregistrations = Arc::new(AtomicUsize::new(0));

	let cluster = Cluster::new();
	let a = Node::builder(&cluster, "a")
		.with_scope("s1")
		.with_handler(CountUnregistered(Arc::clone(&unregistrations)))
		.build()?;
	let b = Node::builder(&cluster, "b").with_scope("s1").build()?;

	for i in 0..100 {
		let on_a = a.host().spawn();
		let on_b = b.host().spawn();
		a.registry()
			.register("s1", format!("a-{i}"), on_a, Meta::null())
			.await?;
		b.registry()
			.register("s1", format!("b-{i}"), on_b, Meta::null())
			.await?;
	}

	let a_registry = a.registry();
	let b_registry = b.registry();
	eventually(5, || {
		a_registry.count(&s1()) == 200 && b_registry.count(&s1()) == 200
	})
	.await;

	// kill the scope actor pair on b; its node and processes stay up
	b.stop_scope(&s1()).await?;

	// a drops every row owned by b and fires the unregister callback for
	// each purged one
	eventually(5, || a_registry.count_on(&s1(), b.id()) == 0).await;
	assert_eq!(a_registry.count(&s1()), 100);
	assert_eq!(a_registry.count_on(&s1(), a.id()), 100);
	eventually(5, || unregistrations.load(Ordering::Relaxed) == 100).await;
	Ok(())
}

#[tokio::test]
async fn node_shutdown_purges_its_rows_on_peers() -> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, b) = two_nodes(&cluster)?;

	let on_a = a.host().spawn();
	let on_b = b.host().spawn();
	a.registry().register("s1", "ours", on_a.clone(), Meta::null()).await?;
	b.registry().register("s1", "theirs", on_b.clone(), Meta::null()).await?;
	a.groups().join("s1", "g", on_a.clone(), Meta::null()).await?;
	b.groups().join("s1", "g", on_b, Meta::null()).await?;

	let a_registry = a.registry();
	let a_groups = a.groups();
	eventually(5, || {
		a_registry.count(&s1()) == 2
			&& a_groups.members(&s1(), &GroupName::from("g")).len() == 2
	})
	.await;

	b.shutdown().await;

	eventually(5, || {
		a_registry.count(&s1()) == 1
			&& a_groups.members(&s1(), &GroupName::from("g")).len() == 1
	})
	.await;
	assert_eq!(a_registry.count_on(&s1(), b.id()), 0);
	Ok(())
}
