/*
 * ULT-Side Operations (spec.md §4.2's `yield`)
 *
 * The half of the work-unit contract that only makes sense from
 * *inside* the running ULT, so it lives here rather than on
 * `task::WorkUnit` itself: it needs the per-thread "current ULT"
 * pointer that only this crate knows about.
 */

use crate::locals;

/*
 * yield_now - Suspend the calling ULT, resuming its ES's scheduler
 *
 * A no-op if called outside any ULT (e.g. accidentally from a
 * tasklet or plain kernel-thread code) — tasklets have no suspension
 * point by design (spec.md §5).
 */
pub fn yield_now() {
	if let Some(unit) = locals::current_ult() {
		if let Ok(ctx) = unit.ctx() {
			unsafe {
				ctx.yield_to_link();
			}
		}
	}
}
