/*
 * spec.md §8 S1 (counter)
 *
 * The narrative describes "primary + 3 secondaries"; this test uses 4
 * plain secondary ESs instead of a primary-plus-three layout, since
 * only a non-primary ES can be `join`ed, and joinability on every ES
 * is exactly what the scenario exercises.
 */
use std::sync::{Arc, Mutex};

use fibra::{EsState, ExecutionStream, UltAttr, UnitState, WorkUnit};

#[test]
fn four_ess_four_ults_each_increment_a_shared_counter() {
	const ES_COUNT: usize = 4;
	const ULTS_PER_ES: usize = 4;

	let counter = Arc::new(Mutex::new(0usize));
	let ess: Vec<_> = (0..ES_COUNT).map(|_| ExecutionStream::create(1)).collect();
	let mut units = Vec::new();

	for es in &ess {
		let pool = es.get_main_pools().into_iter().next().unwrap();
		for _ in 0..ULTS_PER_ES {
			let c = counter.clone();
			let ult = WorkUnit::new_ult(
				0,
				Box::new(move || {
					fibra::yield_now();
					*c.lock().unwrap() += 1;
					fibra::yield_now();
				}),
				UltAttr::default(),
			)
			.unwrap();
			units.push(ult.clone());
			pool.push(ult);
		}
	}

	for es in &ess {
		es.start();
	}
	for es in &ess {
		es.join().unwrap();
	}

	assert_eq!(*counter.lock().unwrap(), ES_COUNT * ULTS_PER_ES);
	for unit in &units {
		assert_eq!(unit.state(), UnitState::Terminated);
	}
	for es in &ess {
		assert_eq!(es.get_state(), EsState::Terminated);
	}
}
