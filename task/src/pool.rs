/*
 * Pool Contract (C3)
 *
 * A queue of ready work units with a single authorized consumer ES.
 * Any ES (or external agent) may push; only the bound consumer may
 * pop. The queueing discipline itself is pluggable — FifoPool below
 * is the reference implementation, not the contract.
 */

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use spin::Mutex;
use util::{Error, Result};

use crate::handle::EsHandle;
use crate::unit::{UnitKindTag, WorkUnit};

/*
 * enum AccessHint - Expected concurrent-access pattern for a pool
 *
 * A hint, not an invariant: `Shared` pools must still be safe under
 * concurrent push/pop per the contract; the hint only lets an
 * implementation pick a cheaper internal lock when it knows better.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessHint {
	#[default]
	Shared,
	PrivateToConsumer,
}

pub trait Pool: Send + Sync {
	fn push(&self, unit: Arc<WorkUnit>);

	/* pop - Remove a ready unit. Contract: only the bound consumer ES calls this. */
	fn pop(&self) -> Option<Arc<WorkUnit>>;

	fn size(&self) -> usize;

	fn get_type(&self, unit: &WorkUnit) -> UnitKindTag {
		unit.kind()
	}

	/* get_thread / get_task - spec.md §6 typed-handle accessors. A
	 * `WorkUnit` is already the tagged ULT|Tasklet handle Argobots splits
	 * into two opaque types, so these just confirm the tag in place of a
	 * downcast. */
	fn get_thread<'a>(&self, unit: &'a WorkUnit) -> Option<&'a WorkUnit> {
		unit.is_ult().then_some(unit)
	}

	fn get_task<'a>(&self, unit: &'a WorkUnit) -> Option<&'a WorkUnit> {
		(!unit.is_ult()).then_some(unit)
	}

	fn consumer(&self) -> Option<Arc<dyn EsHandle>>;

	/*
	 * set_consumer - (Re)bind the consumer ES
	 *
	 * May only be (re)assigned when no ES is currently popping from
	 * this pool; fails with ConsumerConflict if a different ES already
	 * owns it (spec.md §4.3).
	 */
	fn set_consumer(&self, es: Arc<dyn EsHandle>) -> Result<()>;

	fn access_hint(&self) -> AccessHint {
		AccessHint::Shared
	}

	/* in_flight_migrations - spec.md §4.7 step 6 bookkeeping */
	fn in_flight_migrations(&self) -> usize {
		0
	}

	/* begin_migration / end_migration - track units in flight out of this
	 * pool so `in_flight_migrations` can return to zero once every
	 * concurrently started migration off it completes (spec.md §4.7 step 6).
	 * No-ops by default; FifoPool below is the reference implementation. */
	fn begin_migration(&self) {}
	fn end_migration(&self) {}
}

/*
 * struct FifoPool - Reference FIFO pool implementation
 *
 * Holds a weak self-reference (populated via `Arc::new_cyclic`) so
 * `push` can stamp the unit's `p_pool` back-reference with an
 * `Arc<dyn Pool>` that points at this same pool, without requiring
 * every caller to route pushes through a separate handle type.
 */
pub struct FifoPool {
	queue: Mutex<VecDeque<Arc<WorkUnit>>>,
	consumer: Mutex<Option<Arc<dyn EsHandle>>>,
	popping: Mutex<bool>,
	migrations_in_flight: core::sync::atomic::AtomicUsize,
	hint: AccessHint,
	self_handle: Weak<dyn Pool>,
}

impl FifoPool {
	pub fn new(hint: AccessHint) -> Arc<Self> {
		Arc::new_cyclic(|weak: &Weak<FifoPool>| Self {
			queue: Mutex::new(VecDeque::new()),
			consumer: Mutex::new(None),
			popping: Mutex::new(false),
			migrations_in_flight: core::sync::atomic::AtomicUsize::new(0),
			hint,
			self_handle: weak.clone() as Weak<dyn Pool>,
		})
	}

}

impl Pool for FifoPool {
	fn push(&self, unit: Arc<WorkUnit>) {
		if let Some(me) = self.self_handle.upgrade() {
			unit.set_pool(me);
		}
		self.queue.lock().push_back(unit);
	}

	fn pop(&self) -> Option<Arc<WorkUnit>> {
		let _guard = self.popping.lock();
		self.queue.lock().pop_front()
	}

	fn size(&self) -> usize {
		self.queue.lock().len()
	}

	fn consumer(&self) -> Option<Arc<dyn EsHandle>> {
		self.consumer.lock().clone()
	}

	fn set_consumer(&self, es: Arc<dyn EsHandle>) -> Result<()> {
		let popping = self.popping.lock();
		if *popping {
			return Err(Error::ConsumerConflict);
		}
		let mut slot = self.consumer.lock();
		if let Some(current) = slot.as_ref() {
			if current.rank() != es.rank() {
				return Err(Error::ConsumerConflict);
			}
		}
		*slot = Some(es);

		/* open question (iii): a newly bound consumer adopts every unit
		 * already waiting here, orphaned or not. */
		for unit in self.queue.lock().iter() {
			unit.request.honor(crate::request::ult::ORPHAN);
		}
		Ok(())
	}

	fn access_hint(&self) -> AccessHint {
		self.hint
	}

	fn in_flight_migrations(&self) -> usize {
		self.migrations_in_flight
			.load(core::sync::atomic::Ordering::Acquire)
	}

	fn begin_migration(&self) {
		self.migrations_in_flight
			.fetch_add(1, core::sync::atomic::Ordering::AcqRel);
	}

	fn end_migration(&self) {
		self.migrations_in_flight
			.fetch_sub(1, core::sync::atomic::Ordering::AcqRel);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct DummyEs(u64);
	impl EsHandle for DummyEs {
		fn rank(&self) -> u64 {
			self.0
		}
		fn is_primary(&self) -> bool {
			false
		}
		fn ensure_started(&self) {}
	}

	#[test]
	fn fifo_order() {
		let pool = FifoPool::new(AccessHint::Shared);
		pool.push(WorkUnit::new_tasklet(1, Box::new(|| {})));
		pool.push(WorkUnit::new_tasklet(2, Box::new(|| {})));
		assert_eq!(pool.pop().unwrap().id, 1);
		assert_eq!(pool.pop().unwrap().id, 2);
		assert!(pool.pop().is_none());
	}

	#[test]
	fn get_thread_and_get_task_tag_by_unit_kind() {
		let pool = FifoPool::new(AccessHint::Shared);
		let tasklet = WorkUnit::new_tasklet(1, Box::new(|| {}));
		let ult = WorkUnit::new_ult(2, Box::new(|| {}), crate::unit::UltAttr::default()).unwrap();

		assert!(pool.get_thread(&tasklet).is_none());
		assert!(pool.get_task(&tasklet).is_some());
		assert!(pool.get_thread(&ult).is_some());
		assert!(pool.get_task(&ult).is_none());
	}

	#[test]
	fn consumer_conflict_rejected() {
		let pool = FifoPool::new(AccessHint::Shared);
		pool.set_consumer(Arc::new(DummyEs(1))).unwrap();
		let err = pool.set_consumer(Arc::new(DummyEs(2))).unwrap_err();
		assert_eq!(err, Error::ConsumerConflict);
	}
}
