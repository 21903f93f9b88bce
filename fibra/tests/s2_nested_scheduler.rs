/*
 * spec.md §8 S2 (nested scheduler)
 */
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fibra::{
	AccessHint, BasicScheduler, Dispatch, ExecutionStream, FifoPool, Kind, Pool, SchedKind, Scheduler, UltAttr, WorkUnit,
};

#[test]
fn hosted_scheduler_drains_its_tasklets_then_primary_resumes() {
	let outer_pool = FifoPool::new(AccessHint::Shared);
	let outer_sched = BasicScheduler::new(Kind::Fifo, SchedKind::UltHosted, vec![outer_pool.clone() as Arc<dyn Pool>]);
	let primary = ExecutionStream::create_primary(outer_sched).unwrap();
	outer_pool.set_consumer(primary.clone()).unwrap();

	let inner_pool = FifoPool::new(AccessHint::Shared);
	let ran = Arc::new(AtomicUsize::new(0));
	for _ in 0..3 {
		let ran = ran.clone();
		inner_pool.push(WorkUnit::new_tasklet(
			0,
			Box::new(move || {
				ran.fetch_add(1, Ordering::SeqCst);
			}),
		));
	}
	let inner_sched = BasicScheduler::new(Kind::Fifo, SchedKind::TaskletHosted, vec![inner_pool.clone() as Arc<dyn Pool>]);

	let hosting = WorkUnit::new_ult(
		0,
		Box::new({
			let inner_sched = inner_sched.clone();
			move || {
				let es = ExecutionStream::self_().unwrap();
				inner_sched.run(&*es as &dyn Dispatch);
				ExecutionStream::exit_self().unwrap();
			}
		}),
		UltAttr::default(),
	)
	.unwrap();
	hosting.host_scheduler(inner_sched.clone() as Arc<dyn Scheduler>);
	outer_pool.push(hosting);

	primary.start();

	assert_eq!(ran.load(Ordering::SeqCst), 3);
	assert_eq!(primary.sched_stack_len(), 1);
}
