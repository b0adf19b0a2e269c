use crate::{add_loader, config, launch, name, ScriptedDefiner, Watchdog};
use crossbeam::channel::unbounded;
use std::sync::{Arc, Barrier};
use std::time::Duration;

/// Two threads each own the loader the other one needs next.
#[test]
fn reversed_ownership() {
	let _watchdog = Watchdog::start();
	let barrier = Arc::new(Barrier::new(2));
	let (repository, definer) = launch(
		config(Duration::from_secs(10)),
		ScriptedDefiner::default()
			.links("com.acme.a.Foo", &["com.acme.b.Bar"])
			.links("com.acme.b.Bar", &["com.acme.a.Baz"])
			.gate("com.acme.a.Foo", barrier.clone())
			.gate("com.acme.b.Bar", barrier),
	);
	let a = add_loader(&repository, "memory:a", &["com.acme.a.Foo", "com.acme.a.Baz"]);
	let b = add_loader(&repository, "memory:b", &["com.acme.b.Bar"]);

	let round = || {
		crossbeam::scope(|scope| {
			let foo = scope.spawn(|_| a.load_class(&name("com.acme.a.Foo")));
			let bar = scope.spawn(|_| b.load_class(&name("com.acme.b.Bar")));
			(foo.join().unwrap().unwrap(), bar.join().unwrap().unwrap())
		})
		.unwrap()
	};

	let (foo, bar) = round();
	assert_eq!(foo.loader(), a.id());
	assert_eq!(bar.loader(), b.id());
	assert!(Arc::ptr_eq(&foo.links()[0], &bar));
	let baz = &bar.links()[0];
	assert_eq!(baz.name().as_str(), "com.acme.a.Baz");
	assert_eq!(baz.loader(), a.id());

	// Foo's request for Bar sat in the other thread's inbox when that thread left.
	let scheduler = repository.scheduler();
	assert!(scheduler.stats().reassigned >= 1);
	assert_eq!(scheduler.stats().interrupted, 0);

	repository.flush();
	let (foo_again, bar_again) = round();
	assert!(Arc::ptr_eq(&foo, &foo_again));
	assert!(Arc::ptr_eq(&bar, &bar_again));

	for class in ["com.acme.a.Foo", "com.acme.b.Bar", "com.acme.a.Baz"] {
		assert_eq!(definer.stats(class).links, 1, "{class}");
	}
	assert!(definer.overlapping().is_empty());
	assert_eq!(scheduler.owner_of(a.id()), None);
	assert_eq!(scheduler.owner_of(b.id()), None);
	assert!(!a.section().is_locked());
	assert!(!b.section().is_locked());
}

/// A thread defining `Y` runs another thread's task for `X` while it waits, and `X` needs `Y`.
#[test]
fn foreign_task_waits_for_the_definition_below_it() {
	let _watchdog = Watchdog::start();
	let barrier = Arc::new(Barrier::new(2));
	let (started, release) = unbounded();
	let (repository, definer) = launch(
		config(Duration::from_secs(10)),
		ScriptedDefiner::default()
			.links("com.acme.a.Y", &["com.acme.b.Z"])
			.links("com.acme.b.W", &["com.acme.a.X"])
			.links("com.acme.a.X", &["com.acme.a.Y"])
			.gate("com.acme.a.Y", barrier.clone())
			.gate("com.acme.b.W", barrier)
			.signal("com.acme.a.X", started)
			.hold("com.acme.b.Z", release),
	);
	let a = add_loader(&repository, "memory:a", &["com.acme.a.X", "com.acme.a.Y"]);
	let b = add_loader(&repository, "memory:b", &["com.acme.b.W", "com.acme.b.Z"]);

	let (y, w) = crossbeam::scope(|scope| {
		let y = scope.spawn(|_| a.load_class(&name("com.acme.a.Y")));
		let w = scope.spawn(|_| b.load_class(&name("com.acme.b.W")));
		(y.join().unwrap().unwrap(), w.join().unwrap().unwrap())
	})
	.unwrap();

	let x = &w.links()[0];
	assert_eq!(x.loader(), a.id());
	assert!(Arc::ptr_eq(&x.links()[0], &y));
	assert_eq!(y.links()[0].loader(), b.id());

	// The first attempt at X backed off instead of failing the load.
	assert_eq!(definer.stats("com.acme.a.X").links, 2);
	assert_eq!(definer.stats("com.acme.a.Y").links, 1);
	assert!(definer.overlapping().is_empty());
}

#[test]
fn threads_share_one_definition() {
	let _watchdog = Watchdog::start();
	let (repository, definer) = launch(
		config(Duration::from_secs(10)),
		ScriptedDefiner::default()
			.links("com.acme.a.Foo", &["com.acme.b.Bar"])
			.delay("com.acme.a.Foo", Duration::from_millis(50))
			.delay("com.acme.b.Bar", Duration::from_millis(50)),
	);
	let a = add_loader(&repository, "memory:a", &["com.acme.a.Foo"]);
	let b = add_loader(&repository, "memory:b", &["com.acme.b.Bar"]);

	let loaded = crossbeam::scope(|scope| {
		let handles: Vec<_> = (0..6)
			.map(|i| {
				let requesting = if i % 2 == 0 { &a } else { &b };
				scope.spawn(move |_| requesting.load_class(&name("com.acme.a.Foo")).unwrap())
			})
			.collect();
		handles
			.into_iter()
			.map(|handle| handle.join().unwrap())
			.collect::<Vec<_>>()
	})
	.unwrap();

	for class in &loaded[1..] {
		assert!(Arc::ptr_eq(&loaded[0], class));
	}
	assert_eq!(definer.stats("com.acme.a.Foo").links, 1);
	assert_eq!(definer.stats("com.acme.b.Bar").links, 1);
	assert_eq!(repository.cache_size(), 2);
}

/// Like the test above, except `X` only needs `Y` through a class being defined on a third thread,
/// whose request for `Y` then lands with the thread defining `Y`.
#[test]
fn foreign_task_waits_through_another_thread() {
	let _watchdog = Watchdog::start();
	let (s_started, wait_s) = unbounded();
	let (q_started, wait_q) = unbounded();
	let (y_started, wait_y) = unbounded();
	let (x_started, wait_x) = unbounded();
	let (release_s, s_held) = unbounded::<()>();
	let (release_q, q_held) = unbounded::<()>();
	let (repository, definer) = launch(
		config(Duration::from_secs(10)),
		ScriptedDefiner::default()
			.links("com.acme.a.Y", &["com.acme.c.S"])
			.links("com.acme.a.X", &["com.acme.b.Q"])
			.links("com.acme.b.Q", &["com.acme.a.Y"])
			.signal("com.acme.c.S", s_started)
			.hold("com.acme.c.S", s_held)
			.signal("com.acme.b.Q", q_started)
			.hold("com.acme.b.Q", q_held)
			.signal("com.acme.a.Y", y_started)
			.signal("com.acme.a.X", x_started),
	);
	let a = add_loader(&repository, "memory:a", &["com.acme.a.X", "com.acme.a.Y"]);
	let b = add_loader(&repository, "memory:b", &["com.acme.b.Q"]);
	let c = add_loader(&repository, "memory:c", &["com.acme.c.S"]);

	let (x, y, q, s) = crossbeam::scope(|scope| {
		let s = scope.spawn(|_| c.load_class(&name("com.acme.c.S")));
		wait_s.recv().unwrap();
		let q = scope.spawn(|_| b.load_class(&name("com.acme.b.Q")));
		wait_q.recv().unwrap();
		let y = scope.spawn(|_| a.load_class(&name("com.acme.a.Y")));
		wait_y.recv().unwrap();

		// The thread defining Y runs X, which then waits for Q.
		let x = scope.spawn(|_| a.load_class(&name("com.acme.a.X")));
		wait_x.recv().unwrap();
		release_q.send(()).unwrap();
		release_s.send(()).unwrap();

		(
			x.join().unwrap().unwrap(),
			y.join().unwrap().unwrap(),
			q.join().unwrap().unwrap(),
			s.join().unwrap().unwrap(),
		)
	})
	.unwrap();

	assert!(Arc::ptr_eq(&x.links()[0], &q));
	assert!(Arc::ptr_eq(&q.links()[0], &y));
	assert!(Arc::ptr_eq(&y.links()[0], &s));
	assert_eq!(x.loader(), a.id());

	// X gave way to Y once, nothing had to time out.
	assert_eq!(definer.stats("com.acme.a.X").links, 2);
	for class in ["com.acme.a.Y", "com.acme.b.Q", "com.acme.c.S"] {
		assert_eq!(definer.stats(class).links, 1, "{class}");
	}
	assert!(definer.overlapping().is_empty());

	let scheduler = repository.scheduler();
	assert_eq!(scheduler.stats().interrupted, 0);
	for loader in [&a, &b, &c] {
		assert_eq!(scheduler.owner_of(loader.id()), None);
		assert!(!loader.section().is_locked());
	}
}
