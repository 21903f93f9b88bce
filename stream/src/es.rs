/*
 * Execution Stream (C5)
 *
 * Bound to exactly one kernel thread (a real `std::thread` on the
 * primary's own calling thread, or a freshly spawned one for every
 * secondary ES). Owns a stack of schedulers and drives the outer loop
 * described in spec.md §4.5.
 *
 * Simplification over the source model: every ES's *outermost*
 * scheduler runs directly on its kernel thread's native stack, not a
 * hosted ULT context — spec.md carves this exception only for the
 * primary ES's very first scheduler, but a hosted runtime already
 * owns a real kernel stack on every ES before any ULT machinery
 * exists on it, so the exception generalizes. The "scheduler is
 * itself a ULT" pattern is still exactly how *nested* schedulers work
 * (pushed when a dispatched unit is `is_sched`).
 */

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use spin::Mutex as SpinMutex;
use util::{Error, Result};

use hal::{Context, CpuId};
use task::pool::Pool;
use task::request::{es as es_bits, tasklet as tasklet_bits, ult as ult_bits};
use task::sched::Scheduler;
use task::unit::{UnitKindTag, UnitState, WorkUnit};
use task::{Dispatch, EsHandle, RequestWord};

use crate::locals;
use crate::registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsKind {
	Primary,
	Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EsState {
	Created,
	Ready,
	Running,
	Terminated,
}

fn state_to_u8(s: EsState) -> u8 {
	match s {
		EsState::Created => 0,
		EsState::Ready => 1,
		EsState::Running => 2,
		EsState::Terminated => 3,
	}
}

fn u8_to_state(v: u8) -> EsState {
	match v {
		0 => EsState::Created,
		1 => EsState::Ready,
		2 => EsState::Running,
		_ => EsState::Terminated,
	}
}

/*
 * struct ExecutionStream
 *
 * @scheds: bottom-to-top scheduler stack; index 0 is the main
 *          scheduler (I4: only the top one's `run` is on the call
 *          chain at any instant, since this is the only kernel thread
 *          that ever mutates this field).
 * @top_sched_mutex: held (via `begin_nested_teardown`) across popping
 *          a nested scheduler so that a concurrent migration reading
 *          `scheds` sees a stable top; released by the outer loop,
 *          per SPEC_FULL.md's resolution of open question (ii).
 */
pub struct ExecutionStream {
	rank: AtomicU64,
	kind: EsKind,
	state: AtomicU8,
	scheds: Mutex<Vec<Arc<dyn Scheduler>>>,
	pub(crate) request: RequestWord,
	name: Mutex<Option<String>>,
	top_sched_mutex: SpinMutex<()>,
	cpubind: Mutex<Option<CpuId>>,
	join_handle: Mutex<Option<JoinHandle<()>>>,
	self_ref: std::sync::Weak<ExecutionStream>,
}

impl ExecutionStream {
	fn new(kind: EsKind, rank: u64, main_sched: Arc<dyn Scheduler>) -> Arc<Self> {
		let es = Arc::new_cyclic(|weak| Self {
			rank: AtomicU64::new(rank),
			kind,
			state: AtomicU8::new(state_to_u8(EsState::Created)),
			scheds: Mutex::new(vec![main_sched]),
			request: RequestWord::new(),
			name: Mutex::new(None),
			top_sched_mutex: SpinMutex::new(()),
			cpubind: Mutex::new(None),
			join_handle: Mutex::new(None),
			self_ref: weak.clone(),
		});
		registry::global().register_created(es.clone());
		es
	}

	/* create - New SECONDARY ES with a fresh basic FIFO scheduler over @num_pools pools */
	pub fn create(num_pools: usize) -> Arc<Self> {
		let pools: Vec<Arc<dyn Pool>> = (0..num_pools.max(1))
			.map(|_| task::FifoPool::new(task::AccessHint::Shared) as Arc<dyn Pool>)
			.collect();
		let sched = task::BasicScheduler::new(task::Kind::Fifo, task::SchedKind::UltHosted, pools);
		let rank = registry::global().next_rank();
		Self::new(EsKind::Secondary, rank, sched)
	}

	/* create_with_sched - New SECONDARY ES hosting a caller-supplied main scheduler */
	pub fn create_with_sched(sched: Arc<dyn Scheduler>) -> Arc<Self> {
		let rank = registry::global().next_rank();
		Self::new(EsKind::Secondary, rank, sched)
	}

	/*
	 * create_primary - Internal per spec.md §6: not meant for arbitrary
	 * user code, only for the one-time bootstrap that binds the
	 * initializing thread. `fibra::init` is its sole intended caller;
	 * `Registry::set_primary` enforces I3 regardless.
	 */
	pub fn create_primary(sched: Arc<dyn Scheduler>) -> Result<Arc<Self>> {
		let rank = registry::global().next_rank();
		let es = Self::new(EsKind::Primary, rank, sched);
		registry::global().set_primary(es.clone())?;
		Ok(es)
	}

	pub fn is_primary(&self) -> bool {
		matches!(self.kind, EsKind::Primary)
	}

	pub fn get_num() -> usize {
		registry::global().total_count()
	}

	pub fn rank(&self) -> u64 {
		self.rank.load(Ordering::Acquire)
	}

	pub fn get_rank(&self) -> u64 {
		self.rank()
	}

	pub fn set_rank(&self, rank: u64) {
		self.rank.store(rank, Ordering::Release);
	}

	pub fn set_name(&self, name: impl Into<String>) {
		*self.name.lock().unwrap() = Some(name.into());
	}

	pub fn get_name(&self) -> Option<String> {
		self.name.lock().unwrap().clone()
	}

	pub fn get_state(&self) -> EsState {
		u8_to_state(self.state.load(Ordering::Acquire))
	}

	fn set_state(&self, s: EsState) {
		self.state.store(state_to_u8(s), Ordering::Release);
	}

	pub fn equal(&self, other: &ExecutionStream) -> bool {
		self.rank() == other.rank()
	}

	pub fn cpubind(&self) -> Option<CpuId> {
		*self.cpubind.lock().unwrap()
	}

	pub fn set_cpubind(&self, cpu: CpuId) {
		*self.cpubind.lock().unwrap() = Some(cpu);
	}

	/* set_main_sched - spec.md §6; P6: the previous main scheduler is freed exactly once */
	pub fn set_main_sched(&self, sched: Arc<dyn Scheduler>) -> Result<()> {
		match self.get_state() {
			EsState::Ready | EsState::Created => {
				let previous = std::mem::replace(&mut self.scheds.lock().unwrap()[0], sched);
				previous.free();
				Ok(())
			}
			_ => Err(Error::EsState),
		}
	}

	pub fn get_main_sched(&self) -> Arc<dyn Scheduler> {
		self.scheds.lock().unwrap()[0].clone()
	}

	pub fn get_main_pools(&self) -> Vec<Arc<dyn Pool>> {
		self.get_main_sched().pools().to_vec()
	}

	/* sched_stack_len - Depth of the nested-scheduler stack (spec.md §8 S2) */
	pub fn sched_stack_len(&self) -> usize {
		self.scheds.lock().unwrap().len()
	}

	fn begin_nested_teardown(&self) {
		std::mem::forget(self.top_sched_mutex.lock());
	}

	fn end_nested_teardown(&self) {
		unsafe {
			self.top_sched_mutex.force_unlock();
		}
	}

	/* start - CAS CREATED->READY; run inline (primary) or spawn a kernel thread (secondary) */
	pub fn start(self: &Arc<Self>) {
		if self
			.state
			.compare_exchange(
				state_to_u8(EsState::Created),
				state_to_u8(EsState::Ready),
				Ordering::AcqRel,
				Ordering::Acquire,
			)
			.is_err()
		{
			return;
		}
		registry::global().move_to_active(self.rank());

		match self.kind {
			EsKind::Primary => {
				locals::set_current_es(Some(self.clone()));
				self.run_loop();
			}
			EsKind::Secondary => {
				let es = self.clone();
				let name = format!("es-{}", es.rank());
				let handle = thread::Builder::new()
					.name(name)
					.spawn(move || {
						locals::set_current_es(Some(es.clone()));
						if let Some(cpu) = es.cpubind() {
							hal::cpu::pin_current_thread(cpu);
						}
						es.run_loop();
						locals::set_current_es(None);
					})
					.expect("spawn execution stream kernel thread");
				*self.join_handle.lock().unwrap() = Some(handle);
			}
		}
	}

	/* run_loop - spec.md §4.5 "Loop" */
	fn run_loop(self: &Arc<Self>) {
		loop {
			self.set_state(EsState::Running);
			let Some(top) = self.scheds.lock().unwrap().last().cloned() else {
				break;
			};
			top.run(self.as_ref());
			self.set_state(EsState::Ready);
			self.end_nested_teardown();

			let req = self.request.peek();
			if req & (es_bits::EXIT | es_bits::CANCEL) != 0 {
				break;
			}
			if req & es_bits::JOIN != 0 {
				break;
			}
		}
		self.set_state(EsState::Terminated);
		if matches!(self.kind, EsKind::Secondary) {
			registry::global().move_to_deads(self.rank());
		}
	}

	/* join - spec.md §5 "Join" */
	pub fn join(self: &Arc<Self>) -> Result<()> {
		if self.is_primary() {
			return Err(Error::InvEs);
		}
		if let Some(current) = locals::current_es() {
			if current.rank() == self.rank() {
				return Err(Error::InvEs);
			}
		}
		if self
			.state
			.compare_exchange(
				state_to_u8(EsState::Created),
				state_to_u8(EsState::Terminated),
				Ordering::AcqRel,
				Ordering::Acquire,
			)
			.is_ok()
		{
			registry::global().move_to_deads(self.rank());
			return Ok(());
		}

		self.request.post(es_bits::JOIN);
		while self.get_state() != EsState::Terminated {
			hal::cpu::yield_timeslice();
		}
		if let Some(handle) = self.join_handle.lock().unwrap().take() {
			handle.join().map_err(|_| Error::EsState)?;
		}
		Ok(())
	}

	pub fn cancel(&self) -> Result<()> {
		if self.is_primary() {
			return Err(Error::InvEs);
		}
		self.request.post(es_bits::CANCEL);
		Ok(())
	}

	/*
	 * free - spec.md §6 ("start/join/free", P1). A no-op check rather
	 * than a teardown action: an ES's resources are already released
	 * once its last `Arc` drops, so this only validates the sequencing
	 * `free` assumes (called after `join`, never on the primary) and
	 * gives a caller imitating the named external interface something
	 * to call.
	 */
	pub fn free(&self) -> Result<()> {
		if self.is_primary() {
			return Err(Error::InvEs);
		}
		if self.get_state() != EsState::Terminated {
			return Err(Error::EsState);
		}
		Ok(())
	}

	/*
	 * exit_self - spec.md §5 "Self-exit". Forbidden from a tasklet (S6):
	 * no suspend point exists.
	 *
	 * Called from within a ULT hosted on the very ES being exited, the
	 * OS-level busy-wait below would deadlock: the ES's scheduling loop
	 * shares this same kernel thread, so nothing would ever advance it
	 * to TERMINATED. Yielding once hands control back to that loop,
	 * which observes EXIT on its next `should_exit` check and tears the
	 * ES down without ever resuming this ULT's stack again.
	 */
	pub fn exit_self() -> Result<()> {
		let Some(es) = locals::current_es() else {
			return Err(Error::Uninitialized);
		};
		if locals::current_tasklet().is_some() {
			return Err(Error::InvEs);
		}
		es.request.post(es_bits::EXIT);

		if locals::current_ult().is_some() {
			crate::ult::yield_now();
			return Ok(());
		}

		while es.get_state() != EsState::Terminated {
			hal::cpu::yield_timeslice();
		}
		Ok(())
	}

	pub fn self_() -> Option<Arc<Self>> {
		locals::current_es()
	}

	pub fn self_rank() -> Option<u64> {
		locals::current_es().map(|e| e.rank())
	}

	fn dispatch_tasklet(&self, unit: Arc<WorkUnit>, _pool: Arc<dyn Pool>) {
		if unit.request.any(tasklet_bits::CANCEL) {
			unit.set_state(UnitState::Terminated);
			return;
		}

		let (prev_ult, prev_tasklet) = locals::swap_current_pair(None, Some(unit.clone()));
		unit.set_state(UnitState::Running);
		if let Some(me) = self.self_ref.upgrade() {
			unit.set_last_xstream(me);
		}

		let nested = unit.hosted_scheduler();
		if let Some(sched) = nested.clone() {
			self.scheds.lock().unwrap().push(sched);
		}

		let mut faulted = None;
		if let Some(f) = unit.take_task_fn() {
			if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
				faulted = Some(util::diagnostics::panic_message(&*payload));
			}
		}

		if let Some(sched) = nested {
			self.begin_nested_teardown();
			self.scheds.lock().unwrap().pop();
			sched.exit();
			sched.free();
		}

		match faulted {
			/* never fatal to the ES running it, per spec.md §7 */
			Some(msg) => unit.mark_faulted(msg),
			None => unit.set_state(UnitState::Terminated),
		}
		locals::restore_current_pair(prev_ult, prev_tasklet);
	}

	fn terminate_ult(&self, unit: &Arc<WorkUnit>) {
		if let Some(cleanup) = unit.take_cleanup() {
			cleanup();
		}
		unit.set_state(UnitState::Terminated);
	}

	fn dispatch_ult(&self, unit: Arc<WorkUnit>, pool: Arc<dyn Pool>) {
		if unit.request.any(ult_bits::TERMINATING) {
			self.terminate_ult(&unit);
			return;
		}
		if unit.request.any(ult_bits::MIGRATE) {
			task::migration::migrate(&unit, Some(&pool));
			return;
		}

		let Ok(unit_ctx) = unit.ctx() else {
			log::error!("dispatch_ult called on a non-ULT unit {}", unit.id);
			return;
		};

		let (prev_ult, prev_tasklet) = locals::swap_current_pair(Some(unit.clone()), None);

		/* A fresh, stack-local Context stands in for "wherever this ES's
		 * current scheduler is" (`Context::context_self`'s contract): it
		 * only needs to be valid for as long as `unit` might switch back
		 * into it, which is exactly the lifetime of this stack frame. */
		let scheduler_ctx = Context::context_self();
		unit_ctx.change_link(&scheduler_ctx);

		let nested = unit.hosted_scheduler();
		if let Some(sched) = nested.clone() {
			self.scheds.lock().unwrap().push(sched);
		}

		if let Some(me) = self.self_ref.upgrade() {
			unit.set_last_xstream(me);
		}
		unit.set_state(UnitState::Running);

		unsafe {
			hal::context_switch(&scheduler_ctx as *const Context as *mut Context, unit_ctx as *const Context);
		}

		/* Resumed: `unit` yielded, blocked, or its body returned. */
		if let Some(sched) = nested {
			self.begin_nested_teardown();
			self.scheds.lock().unwrap().pop();
			sched.exit();
			sched.free();
		}

		if unit.request.any(ult_bits::TERMINATING) {
			self.terminate_ult(&unit);
		} else if unit.request.any(ult_bits::BLOCK) {
			unit.request.honor(ult_bits::BLOCK);
			unit.set_state(UnitState::Blocked);
		} else {
			unit.set_state(UnitState::Ready);
			if let Some(home) = unit.pool() {
				home.push(unit.clone());
			} else {
				pool.push(unit.clone());
			}
		}

		locals::restore_current_pair(prev_ult, prev_tasklet);
	}
}

impl EsHandle for ExecutionStream {
	fn rank(&self) -> u64 {
		self.rank()
	}

	fn is_primary(&self) -> bool {
		self.is_primary()
	}

	fn ensure_started(&self) {
		if self.get_state() == EsState::Created {
			if let Some(me) = self.self_ref.upgrade() {
				me.start();
			}
		}
	}
}

impl Dispatch for ExecutionStream {
	fn run_unit(&self, unit: Arc<WorkUnit>, pool: Arc<dyn Pool>) {
		match unit.kind() {
			UnitKindTag::Tasklet => self.dispatch_tasklet(unit, pool),
			UnitKindTag::Ult => self.dispatch_ult(unit, pool),
		}
	}

	fn should_finish(&self) -> bool {
		self.request.any(es_bits::JOIN)
	}

	fn should_exit(&self) -> bool {
		self.request.any(es_bits::EXIT | es_bits::CANCEL)
	}

	fn check_events(&self, sched: &dyn Scheduler) {
		let req = self.request.peek();
		if req & es_bits::JOIN != 0 {
			sched.finish();
		}
		if req & (es_bits::EXIT | es_bits::CANCEL) != 0 {
			sched.exit();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;

	#[test]
	fn join_on_created_terminates_without_starting_a_thread() {
		let es = ExecutionStream::create(1);
		assert_eq!(es.get_state(), EsState::Created);
		es.join().unwrap();
		assert_eq!(es.get_state(), EsState::Terminated);
	}

	#[test]
	fn free_requires_termination_and_forbids_the_primary() {
		let es = ExecutionStream::create(1);
		assert_eq!(es.free().unwrap_err(), Error::EsState);
		es.join().unwrap();
		es.free().unwrap();
	}

	#[test]
	fn set_main_sched_frees_the_previous_one_exactly_once() {
		let es = ExecutionStream::create(1);
		let freed = Arc::new(AtomicUsize::new(0));

		struct CountingSched {
			pools: Vec<Arc<dyn Pool>>,
			freed: Arc<AtomicUsize>,
		}
		impl Scheduler for CountingSched {
			fn pools(&self) -> &[Arc<dyn Pool>] {
				&self.pools
			}
			fn state(&self) -> task::SchedState {
				task::SchedState::Ready
			}
			fn kind(&self) -> task::SchedKind {
				task::SchedKind::UltHosted
			}
			fn run(&self, _dispatch: &dyn task::Dispatch) {}
			fn finish(&self) {}
			fn exit(&self) {}
			fn free(&self) {
				self.freed.fetch_add(1, Ordering::SeqCst);
			}
		}

		let original: Arc<dyn Scheduler> = Arc::new(CountingSched {
			pools: vec![task::FifoPool::new(task::AccessHint::Shared)],
			freed: freed.clone(),
		});
		es.set_main_sched(original).unwrap();

		let replacement = task::BasicScheduler::new(
			task::Kind::Fifo,
			task::SchedKind::UltHosted,
			vec![task::FifoPool::new(task::AccessHint::Shared)],
		);
		es.set_main_sched(replacement).unwrap();

		assert_eq!(freed.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn secondary_es_runs_and_drains_a_tasklet() {
		let counter = Arc::new(AtomicUsize::new(0));
		let pool = task::FifoPool::new(task::AccessHint::Shared);
		let c = counter.clone();
		pool.push(WorkUnit::new_tasklet(1, Box::new(move || {
			c.fetch_add(1, Ordering::SeqCst);
		})));
		let sched = task::BasicScheduler::new(
			task::Kind::Fifo,
			task::SchedKind::TaskletHosted,
			vec![pool.clone() as Arc<dyn Pool>],
		);
		let es = ExecutionStream::create_with_sched(sched.clone());
		pool.set_consumer(es.clone()).unwrap();
		es.start();
		es.join().unwrap();
		assert_eq!(counter.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn secondary_es_runs_a_ult_that_yields_once_then_terminates() {
		let counter = Arc::new(AtomicUsize::new(0));
		let pool = task::FifoPool::new(task::AccessHint::Shared);
		let c = counter.clone();

		let ult = WorkUnit::new_ult(
			1,
			Box::new(move || {
				c.fetch_add(1, Ordering::SeqCst);
				crate::ult::yield_now();
				c.fetch_add(1, Ordering::SeqCst);
			}),
			task::UltAttr::default(),
		)
		.unwrap();
		pool.push(ult);

		let sched = task::BasicScheduler::new(
			task::Kind::Fifo,
			task::SchedKind::UltHosted,
			vec![pool.clone() as Arc<dyn Pool>],
		);
		let es = ExecutionStream::create_with_sched(sched);
		pool.set_consumer(es.clone()).unwrap();
		es.start();
		es.join().unwrap();
		assert_eq!(counter.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn panicking_tasklet_is_marked_faulted_and_does_not_kill_the_es() {
		let pool = task::FifoPool::new(task::AccessHint::Shared);
		let faulting = WorkUnit::new_tasklet(1, Box::new(|| panic!("boom")));
		let faulting_id = faulting.clone();
		pool.push(faulting);
		let counter = Arc::new(AtomicUsize::new(0));
		let c = counter.clone();
		pool.push(WorkUnit::new_tasklet(2, Box::new(move || {
			c.fetch_add(1, Ordering::SeqCst);
		})));

		let sched = task::BasicScheduler::new(
			task::Kind::Fifo,
			task::SchedKind::TaskletHosted,
			vec![pool.clone() as Arc<dyn Pool>],
		);
		let es = ExecutionStream::create_with_sched(sched);
		pool.set_consumer(es.clone()).unwrap();
		es.start();
		es.join().unwrap();

		assert!(faulting_id.is_faulted());
		assert_eq!(faulting_id.state(), UnitState::Terminated);
		assert_eq!(counter.load(Ordering::SeqCst), 1);
	}
}
