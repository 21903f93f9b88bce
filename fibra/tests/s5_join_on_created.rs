/*
 * spec.md §8 S5 (join on CREATED)
 */
use fibra::{EsState, ExecutionStream};

#[test]
fn joining_a_never_started_es_terminates_it_without_a_kernel_thread() {
	let es = ExecutionStream::create(1);
	assert_eq!(es.get_state(), EsState::Created);
	es.join().unwrap();
	assert_eq!(es.get_state(), EsState::Terminated);
}
