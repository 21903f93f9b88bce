/*
 * Work Unit (C2)
 *
 * A tagged variant over the two kinds of schedulable work: a ULT
 * (stackful, yieldable, migratable) and a tasklet (stackless,
 * run-to-completion). Both carry state, request bits, an owning-ES
 * back-reference, and an owning-pool back-reference; only the ULT
 * variant carries a context and a stack.
 */

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, Weak};

use hal::{Context, Stack};
use util::{Error, Result};

use crate::handle::EsHandle;
use crate::pool::Pool;
use crate::request::{tasklet as tasklet_bits, ult as ult_bits, RequestWord};
use crate::sched::Scheduler;

/*
 * enum UnitState - Lifecycle state shared by ULTs and tasklets
 *
 * `Blocked` is reachable only for ULTs; a tasklet that set BLOCK would
 * have no suspension point to honor it from, so the request bit is
 * simply not defined for tasklets (spec.md §4.8).
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
	Ready,
	Running,
	Blocked,
	Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKindTag {
	Ult,
	Tasklet,
}

/*
 * struct UltAttr - Creation-time attributes for a ULT, built via `new`
 *
 * Mirrors the teacher's own `TaskBuilder` (`task/src/lib.rs`): private
 * fields, a `new` constructor seeded with the runtime default stack
 * size, and chainable `mut self -> Self` setters.
 *
 * @stack_size: Backing stack size in bytes
 * @user_data: Opaque pointer the ULT body can recover via
 *             `WorkUnit::user_data` once dispatched
 * @cleanup: Optional callback run if the ULT is cancelled. Spec.md §5:
 *           "a cancelled ULT runs no user cleanup unless the ULT
 *           pre-registered one through its attribute callback."
 */
pub struct UltAttr {
	stack_size: usize,
	user_data: Option<Box<dyn std::any::Any + Send>>,
	cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl UltAttr {
	pub fn new() -> Self {
		Self {
			stack_size: hal::stack::default_stack_size(),
			user_data: None,
			cleanup: None,
		}
	}

	pub fn stack_size(mut self, stack_size: usize) -> Self {
		self.stack_size = stack_size;
		self
	}

	pub fn user_data(mut self, user_data: Box<dyn std::any::Any + Send>) -> Self {
		self.user_data = Some(user_data);
		self
	}

	pub fn cleanup(mut self, cleanup: Box<dyn FnOnce() + Send>) -> Self {
		self.cleanup = Some(cleanup);
		self
	}
}

impl Default for UltAttr {
	fn default() -> Self {
		Self::new()
	}
}

struct UltBody {
	ctx: Box<Context>,
	#[allow(dead_code)] // kept alive for as long as ctx may run
	stack: Stack,
	func: Mutex<Option<Box<dyn FnOnce() + Send>>>,
	cleanup: Mutex<Option<Box<dyn FnOnce() + Send>>>,
	user_data: Option<Box<dyn std::any::Any + Send>>,
}

struct TaskletBody {
	func: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

enum Body {
	Ult(UltBody),
	Tasklet(TaskletBody),
}

/*
 * struct WorkUnit - Tagged ULT | Tasklet
 *
 * Shared via `Arc`: a unit is referenced simultaneously by the pool
 * that holds it, the ES currently dispatching it, and any joiner
 * waiting on its termination.
 */
pub struct WorkUnit {
	pub id: u64,
	body: Body,
	state: Mutex<UnitState>,
	pub request: RequestWord,
	last_xstream: Mutex<Option<Arc<dyn EsHandle>>>,
	pool: Mutex<Option<Arc<dyn Pool>>>,
	is_sched: Mutex<Option<Arc<dyn Scheduler>>>,
	migrate_target: Mutex<Option<Arc<dyn Pool>>>,
	name: Mutex<Option<String>>,
	join_lock: Mutex<bool>,
	join_cvar: Condvar,
	fault: Mutex<Option<String>>,
}

impl WorkUnit {
	/*
	 * new_ult - Build a ULT work unit from a closure body
	 * @body: Runs once the ULT is first dispatched; the runtime posts
	 *        TERMINATE automatically when it returns (spec.md's context
	 *        primitive has no notion of a work unit, so this is where
	 *        "falling off the end" becomes a request bit).
	 * @attr: Stack size and optional cancellation cleanup
	 *
	 * The context's link is rebound to the dispatching ES's scheduler
	 * context on every dispatch (`change_link`, called by `stream`
	 * before each context switch), so no caller-supplied link is
	 * needed here — a throwaway placeholder is all `prepare` requires.
	 *
	 * Built with `Arc::new_cyclic` so the prepared context's argument
	 * can carry a `Weak<WorkUnit>` back to this unit without a
	 * chicken-and-egg problem: the trampoline needs to find the unit
	 * to take its closure and post TERMINATE, but the unit doesn't
	 * exist yet when the context is prepared.
	 */
	pub fn new_ult(id: u64, body: Box<dyn FnOnce() + Send>, attr: UltAttr) -> Result<Arc<Self>> {
		let stack = Stack::new(attr.stack_size)?;
		let placeholder_link = Context::default();

		Ok(Arc::new_cyclic(|weak: &Weak<WorkUnit>| {
			let ctx = Box::new(Context::default());
			let arg = Weak::into_raw(weak.clone()) as *mut ();
			unsafe {
				ctx.prepare(ult_trampoline, arg, &stack, &placeholder_link);
			}

			Self {
				id,
				body: Body::Ult(UltBody {
					ctx,
					stack,
					func: Mutex::new(Some(body)),
					cleanup: Mutex::new(attr.cleanup),
					user_data: attr.user_data,
				}),
				state: Mutex::new(UnitState::Ready),
				request: RequestWord::new(),
				last_xstream: Mutex::new(None),
				pool: Mutex::new(None),
				is_sched: Mutex::new(None),
				migrate_target: Mutex::new(None),
				name: Mutex::new(None),
				join_lock: Mutex::new(false),
				join_cvar: Condvar::new(),
				fault: Mutex::new(None),
			}
		}))
	}

	/*
	 * new_tasklet - Build a tasklet work unit from a run-to-completion closure
	 */
	pub fn new_tasklet(id: u64, func: Box<dyn FnOnce() + Send>) -> Arc<Self> {
		Arc::new(Self {
			id,
			body: Body::Tasklet(TaskletBody {
				func: Mutex::new(Some(func)),
			}),
			state: Mutex::new(UnitState::Ready),
			request: RequestWord::new(),
			last_xstream: Mutex::new(None),
			pool: Mutex::new(None),
			is_sched: Mutex::new(None),
			migrate_target: Mutex::new(None),
			name: Mutex::new(None),
			join_lock: Mutex::new(false),
			join_cvar: Condvar::new(),
			fault: Mutex::new(None),
		})
	}

	pub fn kind(&self) -> UnitKindTag {
		match self.body {
			Body::Ult(_) => UnitKindTag::Ult,
			Body::Tasklet(_) => UnitKindTag::Tasklet,
		}
	}

	pub fn is_ult(&self) -> bool {
		matches!(self.body, Body::Ult(_))
	}

	pub fn ctx(&self) -> Result<&Context> {
		match &self.body {
			Body::Ult(u) => Ok(&u.ctx),
			Body::Tasklet(_) => Err(Error::InvUnit),
		}
	}

	/* take_cleanup - Remove and return the cancellation callback, if any */
	pub fn take_cleanup(&self) -> Option<Box<dyn FnOnce() + Send>> {
		match &self.body {
			Body::Ult(u) => u.cleanup.lock().unwrap().take(),
			Body::Tasklet(_) => None,
		}
	}

	/* user_data - The opaque pointer given to `UltAttr::user_data` at creation */
	pub fn user_data(&self) -> Option<&(dyn std::any::Any + Send)> {
		match &self.body {
			Body::Ult(u) => u.user_data.as_deref(),
			Body::Tasklet(_) => None,
		}
	}

	/* take_ult_body_fn - Remove and return the ULT's closure body; called once, by `ult_trampoline` */
	fn take_ult_body_fn(&self) -> Option<Box<dyn FnOnce() + Send>> {
		match &self.body {
			Body::Ult(u) => u.func.lock().unwrap().take(),
			Body::Tasklet(_) => None,
		}
	}

	/* take_task_fn - Remove and return the tasklet's run-to-completion closure */
	pub fn take_task_fn(&self) -> Option<Box<dyn FnOnce() + Send>> {
		match &self.body {
			Body::Tasklet(t) => t.func.lock().unwrap().take(),
			Body::Ult(_) => None,
		}
	}

	pub fn state(&self) -> UnitState {
		*self.state.lock().unwrap()
	}

	pub fn set_state(&self, s: UnitState) {
		*self.state.lock().unwrap() = s;
		if s == UnitState::Terminated {
			self.notify_joiners();
		}
	}

	/*
	 * mark_faulted - Terminate this unit with an error flag (spec.md §7:
	 * "a ULT that faults during its terminator is marked TERMINATED
	 * with an error flag; the scheduler loop continues")
	 *
	 * The fault is reported once via `util::diagnostics::oops` and
	 * latched here for any later `fault`/`is_faulted` caller; the unit
	 * itself still ends in the ordinary `Terminated` state, not a
	 * distinct one, so every existing disposition check keeps working.
	 */
	pub fn mark_faulted(&self, msg: impl Into<String>) {
		let msg = msg.into();
		util::diagnostics::oops(&msg);
		*self.fault.lock().unwrap() = Some(msg);
		self.set_state(UnitState::Terminated);
	}

	pub fn fault(&self) -> Option<String> {
		self.fault.lock().unwrap().clone()
	}

	pub fn is_faulted(&self) -> bool {
		self.fault.lock().unwrap().is_some()
	}

	pub fn last_xstream(&self) -> Option<Arc<dyn EsHandle>> {
		self.last_xstream.lock().unwrap().clone()
	}

	pub fn set_last_xstream(&self, es: Arc<dyn EsHandle>) {
		*self.last_xstream.lock().unwrap() = Some(es);
	}

	pub fn pool(&self) -> Option<Arc<dyn Pool>> {
		self.pool.lock().unwrap().clone()
	}

	pub fn set_pool(&self, pool: Arc<dyn Pool>) {
		*self.pool.lock().unwrap() = Some(pool);
	}

	pub fn hosted_scheduler(&self) -> Option<Arc<dyn Scheduler>> {
		self.is_sched.lock().unwrap().clone()
	}

	pub fn host_scheduler(&self, sched: Arc<dyn Scheduler>) {
		*self.is_sched.lock().unwrap() = Some(sched);
	}

	pub fn set_name(&self, name: impl Into<String>) {
		*self.name.lock().unwrap() = Some(name.into());
	}

	pub fn name(&self) -> Option<String> {
		self.name.lock().unwrap().clone()
	}

	/*
	 * migrate_to - Request migration to @target (spec.md §4.2, §4.7)
	 *
	 * Stores the destination pool and sets MIGRATE; the migration
	 * engine realizes the move on this unit's next dispatch. Marks the
	 * source pool's in-flight-migrations counter here, at request time
	 * (spec.md §4.7 step 6 only decrements it — the increment has to
	 * happen wherever a migration actually becomes "in flight", which
	 * is here, not at the dispatch that later realizes it).
	 */
	pub fn migrate_to(&self, target: Arc<dyn Pool>) {
		*self.migrate_target.lock().unwrap() = Some(target);
		if let Some(source) = self.pool() {
			source.begin_migration();
		}
		self.request.post(ult_bits::MIGRATE);
	}

	/* take_migrate_target - Atomically consume the pending migration target */
	pub fn take_migrate_target(&self) -> Option<Arc<dyn Pool>> {
		let mut slot = self.migrate_target.lock().unwrap();
		let target = slot.take();
		self.request.honor(ult_bits::MIGRATE);
		target
	}

	pub fn cancel(&self) {
		let bit = if self.is_ult() { ult_bits::CANCEL } else { tasklet_bits::CANCEL };
		self.request.post(bit);
	}

	/* exit_request - Request self-termination (ULT only) */
	pub fn request_exit(&self) {
		self.request.post(ult_bits::EXIT);
	}

	/*
	 * join - Block the calling (kernel) thread until this unit terminates
	 *
	 * Used by callers outside any ES (e.g. the thread that created a
	 * unit and wants to wait on it directly, distinct from `ES::join`
	 * in spec.md §5 which joins a whole execution stream).
	 */
	pub fn join(&self) {
		let mut terminated = self.join_lock.lock().unwrap();
		while !*terminated {
			terminated = self.join_cvar.wait(terminated).unwrap();
		}
	}

	fn notify_joiners(&self) {
		*self.join_lock.lock().unwrap() = true;
		self.join_cvar.notify_all();
	}
}

unsafe impl Send for WorkUnit {}
unsafe impl Sync for WorkUnit {}

/*
 * ult_trampoline - The `EntryFn` every prepared ULT context actually runs
 *
 * Recovers the owning unit from the `Weak<WorkUnit>` stashed as the
 * context's argument, runs its closure body once, and posts TERMINATE
 * so the dispatcher's post-switch disposition check (spec.md §4.5
 * step 9) terminates the unit instead of re-pushing it forever.
 */
extern "C" fn ult_trampoline(arg: *mut ()) {
	let weak = unsafe { Weak::from_raw(arg as *const WorkUnit) };
	if let Some(unit) = weak.upgrade() {
		if let Some(body) = unit.take_ult_body_fn() {
			/* Caught here, inside the innermost extern "C" frame: a panic
			 * that unwound any further would cross `run_entry`'s extern
			 * boundary and abort the whole process instead of just this
			 * ULT (spec.md §7). */
			if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
				unit.mark_faulted(util::diagnostics::panic_message(&*payload));
			}
		}
		unit.request.post(ult_bits::TERMINATE);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tasklet_starts_ready_and_terminates() {
		let unit = WorkUnit::new_tasklet(1, Box::new(|| {}));
		assert_eq!(unit.state(), UnitState::Ready);
		assert_eq!(unit.kind(), UnitKindTag::Tasklet);
		let f = unit.take_task_fn().unwrap();
		f();
		unit.set_state(UnitState::Terminated);
		unit.join();
		assert_eq!(unit.state(), UnitState::Terminated);
	}

	#[test]
	fn cancel_sets_the_right_bit_for_each_kind() {
		let tasklet = WorkUnit::new_tasklet(2, Box::new(|| {}));
		tasklet.cancel();
		assert!(tasklet.request.any(tasklet_bits::CANCEL));
	}

	#[test]
	fn ult_attr_builder_carries_user_data_through_to_the_unit() {
		let attr = UltAttr::new().stack_size(64 * 1024).user_data(Box::new(7_u32));
		let unit = WorkUnit::new_ult(3, Box::new(|| {}), attr).unwrap();
		assert_eq!(unit.user_data().unwrap().downcast_ref::<u32>(), Some(&7));
	}

	#[test]
	fn mark_faulted_terminates_the_unit_and_latches_the_message() {
		let unit = WorkUnit::new_tasklet(4, Box::new(|| {}));
		unit.mark_faulted("boom");
		assert!(unit.is_faulted());
		assert_eq!(unit.fault().as_deref(), Some("boom"));
		assert_eq!(unit.state(), UnitState::Terminated);
	}
}
