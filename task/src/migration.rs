/*
 * Migration Engine (C9)
 *
 * Atomically hands a ULT off from its current pool (and ES) to a
 * different pool, lazily starting the destination ES if it has never
 * run. Spec.md §4.7 is the authority here; this module is a direct
 * transcription of its seven steps.
 */

use std::sync::Arc;

use crate::pool::Pool;
use crate::request::ult as ult_bits;
use crate::unit::{UnitState, WorkUnit};

/*
 * migrate - Realize a pending MIGRATE request on @unit
 *
 * Called by the ES dispatcher (spec.md §4.5 run_unit step 2) once it
 * observes the MIGRATE bit at the unit's next hand-off. The unit never
 * continues running on the source ES after this returns: the
 * dispatcher must return immediately rather than re-push to the
 * source pool.
 */
pub fn migrate(unit: &Arc<WorkUnit>, source_pool: Option<&Arc<dyn Pool>>) {
	/* step 1: a user migration callback would run here, under the
	 * unit's own mutex; this runtime does not yet expose one, so the
	 * extraction in step 2 is the only protected operation. */

	/* step 2: atomically extract the destination pool and clear MIGRATE. */
	let Some(target) = unit.take_migrate_target() else {
		log::warn!(
			"migrate observed MIGRATE bit on unit {} with no stored target; dropping request",
			unit.id
		);
		return;
	};

	/* step 3: read the destination's bound consumer, if any. */
	let destination_es = target.consumer();

	/* steps 4-5: rebind p_pool and push into the destination pool. This
	 * is the one cross-ES mutation of pool contents allowed to race the
	 * destination's own consumer popping concurrently. `Pool::push`
	 * performs the p_pool rebind via `WorkUnit::set_pool`. */
	target.push(unit.clone());

	match destination_es {
		Some(es) => {
			unit.request.honor(ult_bits::ORPHAN);
			/* step 7: lazily start a CREATED destination ES. */
			es.ensure_started();
		}
		None => {
			/* open question (iii), resolved: no bound consumer yet, so
			 * the unit is orphaned until one is bound. */
			unit.request.post(ult_bits::ORPHAN);
		}
	}

	/* step 6: the source pool's in-flight-migrations counter returns to
	 * zero once every concurrently started migration off it completes. */
	if let Some(source) = source_pool {
		source.end_migration();
	}

	log::debug!(
		"migrated unit {} to pool bound to es={:?}",
		unit.id,
		target.consumer().map(|e| e.rank())
	);
}

pub fn unit_is_migratable(unit: &WorkUnit) -> bool {
	/* I7: a migration request may only be satisfied when the ULT is
	 * not currently RUNNING on any ES. */
	unit.is_ult() && unit.state() != UnitState::Running
}
