/*
 * spec.md §8 S3 (migration)
 *
 * `dispatch_ult` checks the MIGRATE bit before ever resuming a
 * suspended unit's context, so migration is realized synchronously at
 * dispatch entry rather than raced against the unit's own code path.
 * Gating the ULT body on an `AtomicBool` that the test thread only
 * flips *after* calling `migrate_to` pins the ordering deterministically:
 * every observation recorded before the gate opens is on E1, every one
 * after is on E2, with no timing-dependent outcome.
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use fibra::{ExecutionStream, Pool, UltAttr, WorkUnit};

#[test]
fn migrated_ult_runs_only_on_its_destination_es_afterward() {
	let e1 = ExecutionStream::create(1);
	let e2 = ExecutionStream::create(1);
	let pool1 = e1.get_main_pools().into_iter().next().unwrap();
	let pool2 = e2.get_main_pools().into_iter().next().unwrap();
	pool1.set_consumer(e1.clone()).unwrap();
	pool2.set_consumer(e2.clone()).unwrap();

	let recorded = Arc::new(Mutex::new(Vec::<u64>::new()));
	let gate = Arc::new(AtomicBool::new(false));

	let r = recorded.clone();
	let g = gate.clone();
	let ult = WorkUnit::new_ult(
		0,
		Box::new(move || {
			r.lock().unwrap().push(ExecutionStream::self_rank().unwrap());
			while !g.load(Ordering::Acquire) {
				fibra::yield_now();
			}
			for _ in 0..3 {
				fibra::yield_now();
				r.lock().unwrap().push(ExecutionStream::self_rank().unwrap());
			}
		}),
		UltAttr::default(),
	)
	.unwrap();

	pool1.push(ult.clone());
	e1.start();
	e2.start();

	while recorded.lock().unwrap().is_empty() {
		std::thread::yield_now();
	}

	assert_eq!(pool1.in_flight_migrations(), 0);
	ult.migrate_to(pool2.clone());
	assert_eq!(pool1.in_flight_migrations(), 1);
	gate.store(true, Ordering::Release);

	ult.join();
	e1.cancel().unwrap();
	e1.join().unwrap();
	e2.cancel().unwrap();
	e2.join().unwrap();

	let log = recorded.lock().unwrap();
	assert_eq!(log[0], e1.rank());
	assert!(log.len() >= 2);
	for rank in &log[1..] {
		assert_eq!(*rank, e2.rank());
	}
	assert_eq!(pool1.in_flight_migrations(), 0);
}
