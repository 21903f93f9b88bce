/*
 * spec.md §8 S4 (cancel race)
 *
 * Rather than pinning an exact "last unit before cancel" boundary,
 * which would be genuinely racy to assert without a synchronization
 * barrier, this uses a large batch of deliberately slow tasklets so a
 * cancel issued after a short head start leaves a wide, safely
 * provable margin of undrained work.
 */
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fibra::{EsState, ExecutionStream, Pool, WorkUnit};

#[test]
fn cancel_while_running_stops_before_the_pool_drains() {
	const TOTAL: usize = 500;

	let es = ExecutionStream::create(1);
	let pool = es.get_main_pools().into_iter().next().unwrap();
	pool.set_consumer(es.clone()).unwrap();

	let finished = Arc::new(AtomicUsize::new(0));
	for _ in 0..TOTAL {
		let finished = finished.clone();
		pool.push(WorkUnit::new_tasklet(
			0,
			Box::new(move || {
				std::thread::sleep(Duration::from_millis(1));
				finished.fetch_add(1, Ordering::SeqCst);
			}),
		));
	}

	es.start();
	std::thread::sleep(Duration::from_millis(20));
	es.cancel().unwrap();
	es.join().unwrap();

	assert_eq!(es.get_state(), EsState::Terminated);
	assert!(finished.load(Ordering::SeqCst) < TOTAL);
}
