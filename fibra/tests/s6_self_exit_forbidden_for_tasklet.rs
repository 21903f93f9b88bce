/*
 * spec.md §8 S6 (self-exit forbidden for tasklet)
 */
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fibra::{Error, ExecutionStream, Pool, UnitState, WorkUnit};

#[test]
fn exit_self_from_a_tasklet_returns_inv_es_and_the_tasklet_still_completes() {
	let es = ExecutionStream::create(1);
	let pool = es.get_main_pools().into_iter().next().unwrap();
	pool.set_consumer(es.clone()).unwrap();

	let completed = Arc::new(AtomicBool::new(false));
	let c = completed.clone();
	let tasklet = WorkUnit::new_tasklet(
		0,
		Box::new(move || {
			let err = ExecutionStream::exit_self().unwrap_err();
			assert_eq!(err, Error::InvEs);
			c.store(true, Ordering::SeqCst);
		}),
	);
	pool.push(tasklet.clone());

	es.start();
	tasklet.join();

	assert!(completed.load(Ordering::SeqCst));
	assert_eq!(tasklet.state(), UnitState::Terminated);

	es.cancel().unwrap();
	es.join().unwrap();
}
