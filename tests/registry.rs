mod utils;

use {roster::prelude::*, utils::*};

#[tokio::test]
async fn registrations_replicate_to_every_node() -> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, b) = two_nodes(&cluster)?;

	let worker = a.host().spawn();
	let registered = a
		.registry()
		.register("s1", "alpha", worker.clone(), "role:leader")
		.await?;
	assert!(registered.previous.is_none());

	// immediately visible on the registering node
	assert_eq!(
		a.registry().lookup(&s1(), &Name::from("alpha")),
		Some((worker.clone(), Meta::from("role:leader")))
	);

	// and eventually on the other one
	let b_registry = b.registry();
	eventually(5, || {
		b_registry.lookup(&s1(), &Name::from("alpha"))
			== Some((worker.clone(), Meta::from("role:leader")))
	})
	.await;

	Ok(())
}

#[tokio::test]
async fn a_taken_name_rejects_other_processes() -> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, _b) = two_nodes(&cluster)?;

	let first = a.host().spawn();
	let second = a.host().spawn();

	a.registry()
		.register("s1", "alpha", first.clone(), Meta::null())
		.await?;

	let result = a
		.registry()
		.register("s1", "alpha", second, Meta::null())
		.await;
	assert!(matches!(result, Err(roster::registry::Error::Taken)));

	assert_eq!(
		a.registry().lookup(&s1(), &Name::from("alpha")).map(|(pid, _)| pid),
		Some(first)
	);
	Ok(())
}

#[tokio::test]
async fn dead_processes_cannot_register() -> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, _b) = two_nodes(&cluster)?;

	let worker = a.host().spawn();
	a.host().kill(&worker, ExitReason::Killed);

	let result = a
		.registry()
		.register("s1", "alpha", worker, Meta::null())
		.await;
	assert!(matches!(result, Err(roster::registry::Error::NotAlive)));
	Ok(())
}

#[tokio::test]
async fn process_death_evicts_the_name_everywhere() -> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, b) = two_nodes(&cluster)?;

	let worker = a.host().spawn();
	a.registry()
		.register("s1", "alpha", worker.clone(), Meta::null())
		.await?;

	let b_registry = b.registry();
	eventually(5, || {
		b_registry.lookup(&s1(), &Name::from("alpha")).is_some()
	})
	.await;

	a.host().kill(&worker, ExitReason::Killed);

	let a_registry = a.registry();
	eventually(5, || {
		a_registry.lookup(&s1(), &Name::from("alpha")).is_none()
			&& b_registry.lookup(&s1(), &Name::from("alpha")).is_none()
	})
	.await;

	assert_eq!(a_registry.count(&s1()), 0);
	assert_eq!(b_registry.count(&s1()), 0);
	Ok(())
}

#[tokio::test]
async fn remote_registration_is_read_your_writes() -> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, b) = two_nodes(&cluster)?;

	let b_registry = b.registry();
	let a_registry = a.registry();

	// b registers a process that runs on a: the call routes to the owner
	let worker = a.host().spawn();
	b_registry
		.register("s1", "alpha", worker.clone(), "meta")
		.await?;

	// no eventual consistency window on the requester
	assert_eq!(
		b_registry.lookup(&s1(), &Name::from("alpha")),
		Some((worker.clone(), Meta::from("meta")))
	);

	// the owner has it as well
	assert_eq!(
		a_registry.lookup(&s1(), &Name::from("alpha")),
		Some((worker, Meta::from("meta")))
	);
	Ok(())
}

#[tokio::test]
async fn reregistration_refreshes_meta_in_place() -> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, b) = two_nodes(&cluster)?;

	let worker = a.host().spawn();
	let first = a
		.registry()
		.register("s1", "alpha", worker.clone(), "v1")
		.await?;

	let second = a
		.registry()
		.register("s1", "alpha", worker.clone(), "v2")
		.await?;

	assert_eq!(second.previous, Some((worker.clone(), Meta::from("v1"))));
	assert!(second.time > first.time);

	let b_registry = b.registry();
	eventually(5, || {
		b_registry.lookup(&s1(), &Name::from("alpha"))
			== Some((worker.clone(), Meta::from("v2")))
	})
	.await;
	Ok(())
}

#[tokio::test]
async fn unregister_round_trips_to_an_empty_scope() -> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, b) = two_nodes(&cluster)?;

	let worker = a.host().spawn();
	a.registry()
		.register("s1", "alpha", worker.clone(), "payload")
		.await?;

	let meta = a.registry().unregister("s1", "alpha").await?;
	assert_eq!(meta, Meta::from("payload"));
	assert!(a.registry().lookup(&s1(), &Name::from("alpha")).is_none());

	let result = a.registry().unregister("s1", "alpha").await;
	assert!(matches!(result, Err(roster::registry::Error::Undefined)));

	let b_registry = b.registry();
	eventually(5, || {
		b_registry.lookup(&s1(), &Name::from("alpha")).is_none()
	})
	.await;

	// the process itself is untouched and can register again
	assert!(a.host().is_alive(&worker));
	a.registry()
		.register("s1", "alpha", worker, Meta::null())
		.await?;
	Ok(())
}

#[tokio::test]
async fn counts_track_names_per_node() -> anyhow::Result<()> {
	let cluster = Cluster::new();
	let (a, b) = two_nodes(&cluster)?;

	let on_a1 = a.host().spawn();
	let on_a2 = a.host().spawn();
	let on_b = b.host().spawn();

	a.registry().register("s1", "a1", on_a1, Meta::null()).await?;
	a.registry().register("s1", "a2", on_a2, Meta::null()).await?;
	b.registry().register("s1", "b1", on_b, Meta::null()).await?;

	let a_registry = a.registry();
	let b_registry = b.registry();
	eventually(5, || {
		a_registry.count(&s1()) == 3 && b_registry.count(&s1()) == 3
	})
	.await;

	for registry in [&a_registry, &b_registry] {
		assert_eq!(registry.count_on(&s1(), a.id()), 2);
		assert_eq!(registry.count_on(&s1(), b.id()), 1);
	}
	Ok(())
}

#[tokio::test]
async fn the_default_scope_is_always_available() -> anyhow::Result<()> {
	let cluster = Cluster::new();
	let a = Node::builder(&cluster, "a").build()?;

	let worker = a.host().spawn();
	a.registry()
		.register(Scope::default(), "alpha", worker.clone(), Meta::null())
		.await?;

	assert_eq!(
		a.registry().lookup(&Scope::default(), &Name::from("alpha")),
		Some((worker, Meta::null()))
	);
	Ok(())
}

#[tokio::test]
#[should_panic(expected = "invalid_scope")]
async fn unknown_scopes_are_a_programming_error() {
	let cluster = Cluster::new();
	let a = Node::builder(&cluster, "a").build().unwrap();
	a.registry().lookup(&Scope::from("nope"), &Name::from("x"));
}
