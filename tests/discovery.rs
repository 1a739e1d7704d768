mod utils;

use {roster::prelude::*, utils::*};

#[tokio::test]
async fn late_joiners_receive_the_full_snapshot() -> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, b) = two_nodes(&cluster)?;

	for i in 0..10 {
		let on_a = a.host().spawn();
		a.registry()
			.register("s1", format!("name-{i}"), on_a.clone(), Meta::null())
			.await?;
		a.groups().join("s1", "workers", on_a, Meta::null()).await?;
	}

	let b_registry = b.registry();
	eventually(5, || b_registry.count(&s1()) == 10).await;

	// a third node joins long after the registrations happened
	let c = Node::builder(&cluster, "c").with_scope("s1").build()?;
	let c_registry = c.registry();
	let c_groups = c.groups();

	eventually(5, || {
		c_registry.count(&s1()) == 10
			&& c_groups.members(&s1(), &GroupName::from("workers")).len() == 10
	})
	.await;
	Ok(())
}

#[tokio::test]
async fn a_restarted_scope_actor_rebuilds_monitors_and_resyncs()
-> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, b) = two_nodes(&cluster)?;

	let survivor = a.host().spawn();
	let casualty = a.host().spawn();
	a.registry()
		.register("s1", "survivor", survivor.clone(), Meta::null())
		.await?;
	a.registry()
		.register("s1", "casualty", casualty.clone(), Meta::null())
		.await?;

	let a_registry = a.registry();
	let b_registry = b.registry();
	eventually(5, || b_registry.count(&s1()) == 2).await;

	// the actor pair dies; the tables and the processes survive
	a.stop_scope(&s1()).await?;
	eventually(5, || b_registry.count_on(&s1(), a.id()) == 0).await;
	assert_eq!(a_registry.count(&s1()), 2);

	// one process dies while no actor is watching
	a.host().kill(&casualty, ExitReason::Killed);

	a.restart_scope(&s1())?;

	// the restarted actor drops the row of the dead process during its
	// monitor rebuild and re-announces the surviving one to its peers
	eventually(5, || {
		a_registry.lookup(&s1(), &Name::from("casualty")).is_none()
			&& a_registry.count(&s1()) == 1
	})
	.await;
	eventually(5, || {
		b_registry.lookup(&s1(), &Name::from("survivor")).is_some()
			&& b_registry.count_on(&s1(), a.id()) == 1
	})
	.await;

	// and the rebuilt monitor is live: a death now evicts everywhere
	a.host().kill(&survivor, ExitReason::Killed);
	eventually(5, || {
		a_registry.count(&s1()) == 0 && b_registry.count(&s1()) == 0
	})
	.await;
	Ok(())
}

#[tokio::test]
async fn a_healed_partition_resynchronizes_disjoint_writes()
-> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, b) = two_nodes(&cluster)?;

	cluster.disconnect(a.id(), b.id());

	// disjoint names registered on both sides of the partition
	let on_a = a.host().spawn();
	let on_b = b.host().spawn();
	a.registry().register("s1", "from-a", on_a, Meta::null()).await?;
	b.registry().register("s1", "from-b", on_b, Meta::null()).await?;

	let a_registry = a.registry();
	let b_registry = b.registry();
	assert_eq!(a_registry.count(&s1()), 1);
	assert_eq!(b_registry.count(&s1()), 1);

	cluster.reconnect(a.id(), b.id());

	eventually(5, || {
		a_registry.count(&s1()) == 2 && b_registry.count(&s1()) == 2
	})
	.await;
	assert!(a_registry.lookup(&s1(), &Name::from("from-b")).is_some());
	assert!(b_registry.lookup(&s1(), &Name::from("from-a")).is_some());
	Ok(())
}
