/*
 * Cross-Crate Contracts
 *
 * `task` knows about work units, pools, and schedulers but not about
 * the Execution Stream that drives them (that lives one layer up, in
 * `stream`, which depends on `task` — not the other way around). The
 * two traits here are the seam: `stream::ExecutionStream` implements
 * both, and everything in this crate that needs "the ES" only needs
 * it through these narrow contracts.
 */

use std::sync::Arc;

use crate::sched::Scheduler;
use crate::unit::WorkUnit;

/*
 * trait EsHandle - Identity and lazy-start for a pool's consumer
 *
 * A pool's `consumer` and a work unit's `p_last_xstream` are both
 * held as `Arc<dyn EsHandle>` rather than a concrete ES type.
 */
pub trait EsHandle: Send + Sync {
	fn rank(&self) -> u64;
	fn is_primary(&self) -> bool;

	/* ensure_started - Lazily start this ES if it is still CREATED
	 *
	 * Called by the migration engine when a unit lands in a pool whose
	 * consumer has never been started (spec.md S3/§4.7 step 7).
	 */
	fn ensure_started(&self);
}

impl core::fmt::Debug for dyn EsHandle {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(f, "EsHandle(rank={})", self.rank())
	}
}

/*
 * trait Dispatch - What a Scheduler's `run` needs from its ES
 *
 * Implemented by `stream::ExecutionStream`. A scheduler never
 * context-switches directly; it asks its ES to do it, so the ES can
 * keep its per-thread bookkeeping (current ULT/tasklet, nested
 * scheduler stack, top_sched_mutex) consistent.
 */
pub trait Dispatch: Send + Sync {
	/* run_unit - Dispatch one popped unit (spec.md §4.5) */
	fn run_unit(&self, unit: Arc<WorkUnit>, pool: Arc<dyn crate::pool::Pool>);

	/* should_finish - JOIN observed: drain and stop */
	fn should_finish(&self) -> bool;

	/* should_exit - EXIT|CANCEL observed: stop immediately */
	fn should_exit(&self) -> bool;

	/* check_events - spec.md §4.6, called at the scheduler's cadence */
	fn check_events(&self, sched: &dyn Scheduler);
}
