/*
 * ULT Stack
 *
 * Owns the fixed-size backing memory for a stackful work unit. On
 * unix targets the stack is mmap'd with a guard page below the usable
 * region so a stack overflow faults instead of silently corrupting an
 * adjacent allocation; elsewhere it falls back to a plain heap
 * allocation with no guard page.
 */

use std::sync::atomic::{AtomicUsize, Ordering};

use util::{Error, Result};

pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

static DEFAULT_STACK_SIZE_OVERRIDE: AtomicUsize = AtomicUsize::new(DEFAULT_STACK_SIZE);

/*
 * default_stack_size - The process-wide default a bare `UltAttr::new`
 * picks up (spec.md: "allocate an execution context for the main
 * scheduler (stack size from global default)").
 */
pub fn default_stack_size() -> usize {
	DEFAULT_STACK_SIZE_OVERRIDE.load(Ordering::Relaxed)
}

/* set_default_stack_size - Called once by `fibra::init` from `Config::default_stack_size` */
pub fn set_default_stack_size(size: usize) {
	DEFAULT_STACK_SIZE_OVERRIDE.store(size, Ordering::Relaxed);
}

/*
 * struct Stack - Owned, fixed-size ULT stack
 * @base: Lowest addressable byte of the usable region
 * @len: Usable region length in bytes
 * @guarded: Whether a guard page precedes @base
 */
pub struct Stack {
	base: *mut u8,
	len: usize,
	guarded: bool,
}

unsafe impl Send for Stack {}

impl Stack {
	/*
	 * new - Allocate a stack of at least @size bytes
	 *
	 * Rounds @size up to a whole number of pages.
	 */
	pub fn new(size: usize) -> Result<Self> {
		let page = page_size();
		let len = size.div_ceil(page) * page;

		#[cfg(unix)]
		{
			Self::new_mmap(len, page)
		}
		#[cfg(not(unix))]
		{
			Self::new_heap(len)
		}
	}

	#[cfg(unix)]
	fn new_mmap(len: usize, page: usize) -> Result<Self> {
		unsafe {
			let total = len + page;
			let map = libc::mmap(
				core::ptr::null_mut(),
				total,
				libc::PROT_READ | libc::PROT_WRITE,
				libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
				-1,
				0,
			);
			if map == libc::MAP_FAILED {
				return Err(Error::Mem);
			}
			/* guard page at the low end, below the growth direction */
			if libc::mprotect(map, page, libc::PROT_NONE) != 0 {
				libc::munmap(map, total);
				return Err(Error::Mem);
			}
			let base = (map as *mut u8).add(page);
			Ok(Stack {
				base,
				len,
				guarded: true,
			})
		}
	}

	#[cfg(not(unix))]
	fn new_heap(len: usize) -> Result<Self> {
		let layout = core::alloc::Layout::from_size_align(len, page_size())
			.map_err(|_| Error::Mem)?;
		let base = unsafe { std::alloc::alloc(layout) };
		if base.is_null() {
			return Err(Error::Mem);
		}
		Ok(Stack {
			base,
			len,
			guarded: false,
		})
	}

	/* top - Highest address of the usable region (stack grows down to @base) */
	pub fn top(&self) -> *mut u8 {
		unsafe { self.base.add(self.len) }
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		false
	}

	pub fn is_guarded(&self) -> bool {
		self.guarded
	}
}

impl Drop for Stack {
	fn drop(&mut self) {
		#[cfg(unix)]
		unsafe {
			let page = page_size();
			let map = self.base.sub(page);
			libc::munmap(map as *mut libc::c_void, self.len + page);
		}
		#[cfg(not(unix))]
		unsafe {
			let layout = core::alloc::Layout::from_size_align_unchecked(self.len, page_size());
			std::alloc::dealloc(self.base, layout);
		}
	}
}

fn page_size() -> usize {
	#[cfg(unix)]
	unsafe {
		libc::sysconf(libc::_SC_PAGESIZE) as usize
	}
	#[cfg(not(unix))]
	{
		4096
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn allocates_requested_size_rounded_up() {
		let stack = Stack::new(1).unwrap();
		assert!(stack.len() >= 1);
		assert_eq!(stack.len() % page_size(), 0);
	}

	#[test]
	fn default_stack_size_starts_at_the_compiled_in_constant() {
		assert_eq!(default_stack_size(), DEFAULT_STACK_SIZE);
	}

	#[test]
	fn top_is_above_base() {
		let stack = Stack::new(DEFAULT_STACK_SIZE).unwrap();
		assert!((stack.top() as usize) > (stack.base as usize));
	}
}
