/*
 * Per-Kernel-Thread Locals (C6)
 *
 * "Current ES" / "current ULT" / "current tasklet" pointers, set on ES
 * entry and cleared on exit. No work unit may rely on this state
 * surviving a migration to another kernel thread; a tasklet in
 * particular must not read it at all outside its own dispatch window.
 */

use std::cell::RefCell;
use std::sync::Arc;

use task::WorkUnit;

use crate::es::ExecutionStream;

thread_local! {
	static CURRENT_ES: RefCell<Option<Arc<ExecutionStream>>> = const { RefCell::new(None) };
	static CURRENT_ULT: RefCell<Option<Arc<WorkUnit>>> = const { RefCell::new(None) };
	static CURRENT_TASKLET: RefCell<Option<Arc<WorkUnit>>> = const { RefCell::new(None) };
}

pub fn set_current_es(es: Option<Arc<ExecutionStream>>) {
	CURRENT_ES.with(|c| *c.borrow_mut() = es);
}

pub fn current_es() -> Option<Arc<ExecutionStream>> {
	CURRENT_ES.with(|c| c.borrow().clone())
}

pub fn current_ult() -> Option<Arc<WorkUnit>> {
	CURRENT_ULT.with(|c| c.borrow().clone())
}

pub fn current_tasklet() -> Option<Arc<WorkUnit>> {
	CURRENT_TASKLET.with(|c| c.borrow().clone())
}

/*
 * swap_current_pair - Atomically (wrt this thread) replace the current
 * (ULT, tasklet) pair, returning the previous pair so the dispatcher
 * can restore it once the unit it just ran returns control.
 */
pub fn swap_current_pair(
	ult: Option<Arc<WorkUnit>>,
	tasklet: Option<Arc<WorkUnit>>,
) -> (Option<Arc<WorkUnit>>, Option<Arc<WorkUnit>>) {
	let prev_ult = CURRENT_ULT.with(|c| c.replace(ult));
	let prev_tasklet = CURRENT_TASKLET.with(|c| c.replace(tasklet));
	(prev_ult, prev_tasklet)
}

pub fn restore_current_pair(ult: Option<Arc<WorkUnit>>, tasklet: Option<Arc<WorkUnit>>) {
	CURRENT_ULT.with(|c| *c.borrow_mut() = ult);
	CURRENT_TASKLET.with(|c| *c.borrow_mut() = tasklet);
}
