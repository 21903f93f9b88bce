/*
 * Context Primitive (C1)
 *
 * The minimum needed to save/restore a register set, create a new
 * stack-bound context, switch between two contexts, and rebind a
 * context's fallthrough target. Everything above this file (tasklets,
 * ULTs, schedulers, ESs) is built out of these four operations.
 *
 * x86_64 System V only: callee-saved integer registers plus the
 * stack pointer are the entire saved state. There is no privileged
 * state to save (no CR3, no segment selectors, no MSRs) because every
 * context in this runtime executes in the same address space and
 * privilege ring as its ES's kernel thread.
 */

#![allow(clippy::missing_safety_doc)]

use core::arch::naked_asm;
use core::cell::{Cell, UnsafeCell};

use crate::stack::Stack;

pub type EntryFn = extern "C" fn(*mut ());

/* Raw callee-saved register blob; the only thing context_switch touches. */
#[repr(C)]
#[derive(Default)]
struct RawRegs {
	rsp: u64,
}

/*
 * struct Context - A suspended or live execution context
 *
 * @raw: Saved register set (valid whenever this context is not the
 *       one currently running)
 * @link: Context resumed when this context's entry function returns
 *        normally. Rebindable via `change_link` so the same ULT body
 *        can return to a different scheduler on different runs.
 * @entry / @arg: Entry point and argument, consulted once by the
 *        trampoline the first time this context runs.
 *
 * A `Context` must be at a stable address (boxed, or otherwise
 * pinned) before `prepare` is called: the initial stack frame embeds
 * a raw pointer back to `self`.
 *
 * `repr(C)` with `raw` as the first field is load-bearing: the naked
 * `context_switch` below addresses it as offset 0 of `*mut Context`.
 */
#[repr(C)]
pub struct Context {
	raw: UnsafeCell<RawRegs>,
	link: Cell<*const Context>,
	entry: Cell<Option<EntryFn>>,
	arg: Cell<*mut ()>,
}

unsafe impl Send for Context {}
unsafe impl Sync for Context {}

impl Default for Context {
	fn default() -> Self {
		Self {
			raw: UnsafeCell::new(RawRegs::default()),
			link: Cell::new(core::ptr::null()),
			entry: Cell::new(None),
			arg: Cell::new(core::ptr::null_mut()),
		}
	}
}

impl Context {
	/*
	 * context_self - Capture the calling thread's context, implicitly
	 *
	 * There is nothing to do eagerly: the first `context_switch` that
	 * names this `Context` as `old` saves the caller's live register
	 * state into it, regardless of whether it was ever `prepare`d. A
	 * freshly defaulted `Context` is therefore already a valid handle
	 * to "wherever I am called from".
	 */
	pub fn context_self() -> Self {
		Self::default()
	}

	/*
	 * prepare - Turn a boxed, stable-address Context into a runnable one
	 * @self: Must already be at its final heap address (boxed/pinned)
	 * @entry: Function to run when this context is first switched into
	 * @arg: Opaque argument passed to @entry
	 * @stack: Backing memory; must outlive this context
	 * @link: Context to resume when @entry returns
	 *
	 * Lays out an initial stack frame that `context_switch` can "pop"
	 * into, landing in `trampoline`.
	 */
	pub unsafe fn prepare(&self, entry: EntryFn, arg: *mut (), stack: &Stack, link: &Context) {
		self.entry.set(Some(entry));
		self.arg.set(arg);
		self.link.set(link as *const Context);

		unsafe {
			let top = stack.top() as usize;
			/* SysV requires rsp % 16 == 0 at a `call` site; we land via `ret`,
			 * which is equivalent to a call boundary one word short. */
			let aligned = top & !0xF;
			let mut sp = aligned as *mut u64;

			/* Return address `context_switch`'s `ret` will jump to. */
			sp = sp.sub(1);
			*sp = trampoline as usize as u64;

			/* Placeholder callee-saved regs popped by context_switch, in the
			 * order context_switch pops them: r15 r14 r13 r12 rbx rbp.
			 * r12 carries the `Context` self-pointer so the trampoline can
			 * find its owner without thread-local storage. */
			for reg in [0u64, 0, 0, self as *const Context as u64, 0, 0] {
				sp = sp.sub(1);
				*sp = reg;
			}

			(*self.raw.get()).rsp = sp as u64;
		}
	}

	/*
	 * change_link - Rebind this context's fallthrough target
	 *
	 * Safe to call between runs of the owning work unit; never while
	 * it is RUNNING.
	 */
	pub fn change_link(&self, new_link: &Context) {
		self.link.set(new_link as *const Context);
	}

	/*
	 * yield_to_link - Suspend the running context, resuming its link
	 *
	 * Called from inside the context that is currently executing
	 * (there is no other valid caller). Returns once something
	 * switches back to `self`, exactly like `context_switch` returning
	 * to any other suspended context.
	 */
	pub unsafe fn yield_to_link(&self) {
		let link = self.link.get();
		debug_assert!(!link.is_null(), "yield with no link to resume");
		unsafe {
			context_switch(self as *const Context as *mut Context, link);
		}
	}
}

/*
 * trampoline - Landing pad for a freshly prepared context
 *
 * Reached via `ret` from `context_switch`, not via a normal call: r12
 * holds the owning Context's self-pointer, placed there by `prepare`.
 * This stub recovers that pointer into the C calling convention's
 * first argument register and hands off to ordinary Rust code.
 */
#[unsafe(naked)]
unsafe extern "C" fn trampoline() -> ! {
	naked_asm!("mov rdi, r12", "call {run}", "ud2", run = sym run_entry,)
}

extern "C" fn run_entry(ctx: *const Context) -> ! {
	let ctx = unsafe { &*ctx };
	let entry = ctx.entry.get().expect("context run without an entry fn");
	let arg = ctx.arg.get();
	entry(arg);

	/* Entry returned normally: fall through to the linked context. This
	 * context is never resumed again; its Context/Stack are reclaimed by
	 * the owning work unit once the scheduler observes termination. */
	let link = ctx.link.get();
	debug_assert!(!link.is_null(), "context has no link to return to");
	unsafe {
		context_switch(ctx.raw.get() as *mut Context, link);
	}
	unreachable!("returned from context_switch into a dead context");
}

/*
 * context_switch - Save @old, resume @new
 *
 * When some other context later switches back to @old, execution
 * resumes right after this call as if it were an ordinary function
 * return.
 */
#[unsafe(naked)]
pub unsafe extern "C" fn context_switch(old: *mut Context, new: *const Context) {
	naked_asm!(
		"push rbp",
		"push rbx",
		"push r12",
		"push r13",
		"push r14",
		"push r15",
		"mov [rdi], rsp",
		"mov rsp, [rsi]",
		"pop r15",
		"pop r14",
		"pop r13",
		"pop r12",
		"pop rbx",
		"pop rbp",
		"ret",
	)
}
