/*
 * Scheduler (C4)
 *
 * A scheduler owns one or more pools and a `run` entry point. It is
 * realized as a ULT itself (pushed/popped on its ES's scheduler
 * stack) except for the primary ES's very first scheduler, which
 * runs directly on the primary kernel thread before any ULT exists.
 */

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::handle::Dispatch;
use crate::pool::Pool;
use crate::unit::WorkUnit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedState {
	Ready,
	Running,
	Stopped,
	Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedKind {
	UltHosted,
	TaskletHosted,
}

/*
 * enum Kind - Predefined scheduler policies (spec.md §6 `create_basic`)
 *
 * `Fifo` busy-polls its pools in round-robin order; `PriorityHint`
 * additionally consults each popped unit's pool index as a coarse
 * priority band, popping pool 0 to exhaustion before moving to pool 1.
 * Both are provided only as the two predefined kinds named by the
 * external interface — a real deployment is expected to bring its own
 * `Scheduler` for anything more elaborate.
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
	Fifo,
	PriorityHint,
}

fn state_from_u8(v: u8) -> SchedState {
	match v {
		0 => SchedState::Ready,
		1 => SchedState::Running,
		2 => SchedState::Stopped,
		_ => SchedState::Terminated,
	}
}

fn u8_from_state(s: SchedState) -> u8 {
	match s {
		SchedState::Ready => 0,
		SchedState::Running => 1,
		SchedState::Stopped => 2,
		SchedState::Terminated => 3,
	}
}

/*
 * trait Scheduler - The pluggable scheduling policy (spec.md §4.4)
 *
 * `run`'s contract: repeatedly select a unit from the owned pools,
 * hand it to the ES via `Dispatch::run_unit`, and at the
 * implementation's chosen cadence call `Dispatch::check_events`.
 * `run` MUST keep dispatching until its pools are empty once
 * `should_finish` becomes true (spec.md §9 open question (i)), and
 * MUST return promptly once `should_exit` becomes true.
 */
pub trait Scheduler: Send + Sync {
	fn pools(&self) -> &[Arc<dyn Pool>];
	fn state(&self) -> SchedState;
	fn kind(&self) -> SchedKind;
	fn automatic(&self) -> bool {
		true
	}

	/* run - Drive this scheduler's pools until finish/exit is honored */
	fn run(&self, dispatch: &dyn Dispatch);

	/* finish - Soft stop: drain remaining work before returning from `run` */
	fn finish(&self);

	/* exit - Hard stop: return from `run` as soon as possible */
	fn exit(&self);

	/*
	 * free - spec.md §6 external interface. A no-op by default: a
	 * scheduler popped off an ES's stack is already released once its
	 * last `Arc` drops, which is what "automatic" (§3) describes. Named
	 * here only so a `Scheduler` that owns non-`Arc` resources (an external
	 * FD, a pinned allocation) has a defined teardown hook to override.
	 */
	fn free(&self) {}
}

/*
 * struct BasicScheduler - Reference round-robin scheduler
 *
 * Pops each owned pool in turn; `Kind::PriorityHint` instead exhausts
 * a pool before moving to the next one.
 */
pub struct BasicScheduler {
	pools: Vec<Arc<dyn Pool>>,
	kind: SchedKind,
	policy: Kind,
	state: AtomicU8,
	finish_requested: std::sync::atomic::AtomicBool,
	exit_requested: std::sync::atomic::AtomicBool,
}

impl BasicScheduler {
	pub fn new(policy: Kind, kind: SchedKind, pools: Vec<Arc<dyn Pool>>) -> Arc<Self> {
		Arc::new(Self {
			pools,
			kind,
			policy,
			state: AtomicU8::new(u8_from_state(SchedState::Ready)),
			finish_requested: std::sync::atomic::AtomicBool::new(false),
			exit_requested: std::sync::atomic::AtomicBool::new(false),
		})
	}

	fn set_state(&self, s: SchedState) {
		self.state.store(u8_from_state(s), Ordering::Release);
	}

	/* select - Pop the next unit to dispatch, per `self.policy` */
	fn select(&self) -> Option<(Arc<WorkUnit>, Arc<dyn Pool>)> {
		match self.policy {
			Kind::Fifo => {
				for pool in &self.pools {
					if let Some(unit) = pool.pop() {
						return Some((unit, pool.clone()));
					}
				}
				None
			}
			Kind::PriorityHint => {
				for pool in &self.pools {
					if let Some(unit) = pool.pop() {
						return Some((unit, pool.clone()));
					}
					if pool.size() > 0 {
						break;
					}
				}
				None
			}
		}
	}

	fn total_pending(&self) -> usize {
		self.pools.iter().map(|p| p.size()).sum()
	}
}

impl Scheduler for BasicScheduler {
	fn pools(&self) -> &[Arc<dyn Pool>] {
		&self.pools
	}

	fn state(&self) -> SchedState {
		state_from_u8(self.state.load(Ordering::Acquire))
	}

	fn kind(&self) -> SchedKind {
		self.kind
	}

	fn run(&self, dispatch: &dyn Dispatch) {
		self.set_state(SchedState::Running);
		let mut iterations: u64 = 0;

		loop {
			if dispatch.should_exit() || self.exit_requested.load(Ordering::Acquire) {
				break;
			}

			if let Some((unit, pool)) = self.select() {
				dispatch.run_unit(unit, pool);
			} else if dispatch.should_finish() || self.finish_requested.load(Ordering::Acquire) {
				/* drain-on-JOIN: keep looping only while pools hold work. */
				if self.total_pending() == 0 {
					break;
				}
			} else {
				hal::cpu::relax();
			}

			iterations += 1;
			if iterations % 64 == 0 {
				dispatch.check_events(self);
			}
		}

		self.set_state(SchedState::Terminated);
	}

	fn finish(&self) {
		self.finish_requested.store(true, Ordering::Release);
	}

	fn exit(&self) {
		self.exit_requested.store(true, Ordering::Release);
		self.set_state(SchedState::Stopped);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::pool::{AccessHint, FifoPool};
	use std::sync::atomic::AtomicUsize;

	struct CountingDispatch {
		ran: AtomicUsize,
		exit_after: usize,
	}

	impl Dispatch for CountingDispatch {
		fn run_unit(&self, unit: Arc<WorkUnit>, _pool: Arc<dyn Pool>) {
			unit.set_state(crate::unit::UnitState::Terminated);
			self.ran.fetch_add(1, Ordering::AcqRel);
		}
		fn should_finish(&self) -> bool {
			true
		}
		fn should_exit(&self) -> bool {
			self.ran.load(Ordering::Acquire) >= self.exit_after
		}
		fn check_events(&self, _sched: &dyn Scheduler) {}
	}

	#[test]
	fn drains_pool_before_stopping_on_finish() {
		let pool = FifoPool::new(AccessHint::Shared);
		for i in 0..5 {
			pool.push(WorkUnit::new_tasklet(i, Box::new(|| {})));
		}
		let sched = BasicScheduler::new(Kind::Fifo, SchedKind::TaskletHosted, vec![pool.clone()]);
		let dispatch = CountingDispatch {
			ran: AtomicUsize::new(0),
			exit_after: usize::MAX,
		};
		sched.run(&dispatch);
		assert_eq!(dispatch.ran.load(Ordering::Acquire), 5);
		assert_eq!(sched.state(), SchedState::Terminated);
	}
}
