/*
 * Global ES Registry (C7)
 *
 * Process-wide, guarded by one mutex per bucket (spec.md §5: "bucket
 * moves use that mutex"). A single monotonic counter hands out ranks;
 * it never resets and never reuses a value.
 */

use std::sync::Arc;

use spin::{Mutex, Once};
use util::ids::Counter;
use util::{Error, Result};

use crate::es::ExecutionStream;

pub struct Registry {
	rank_gen: Counter,
	created: Mutex<Vec<Arc<ExecutionStream>>>,
	active: Mutex<Vec<Arc<ExecutionStream>>>,
	deads: Mutex<Vec<Arc<ExecutionStream>>>,
	primary: Mutex<Option<Arc<ExecutionStream>>>,
}

static REGISTRY: Once<Registry> = Once::new();

pub fn global() -> &'static Registry {
	REGISTRY.call_once(Registry::new)
}

impl Registry {
	fn new() -> Self {
		Self {
			rank_gen: Counter::new(0),
			created: Mutex::new(Vec::new()),
			active: Mutex::new(Vec::new()),
			deads: Mutex::new(Vec::new()),
			primary: Mutex::new(None),
		}
	}

	pub fn next_rank(&self) -> u64 {
		self.rank_gen.next()
	}

	pub fn register_created(&self, es: Arc<ExecutionStream>) {
		self.created.lock().push(es);
	}

	pub fn move_to_active(&self, rank: u64) {
		let mut created = self.created.lock();
		if let Some(pos) = created.iter().position(|e| e.rank() == rank) {
			let es = created.remove(pos);
			self.active.lock().push(es);
		}
	}

	pub fn move_to_deads(&self, rank: u64) {
		let mut active = self.active.lock();
		let es = if let Some(pos) = active.iter().position(|e| e.rank() == rank) {
			Some(active.remove(pos))
		} else {
			drop(active);
			let mut created = self.created.lock();
			created.iter().position(|e| e.rank() == rank).map(|pos| created.remove(pos))
		};
		if let Some(es) = es {
			self.deads.lock().push(es);
		}
	}

	/* set_primary - I3: at most one PRIMARY ES exists per process */
	pub fn set_primary(&self, es: Arc<ExecutionStream>) -> Result<()> {
		let mut slot = self.primary.lock();
		if slot.is_some() {
			return Err(Error::InvEs);
		}
		*slot = Some(es);
		Ok(())
	}

	pub fn primary(&self) -> Option<Arc<ExecutionStream>> {
		self.primary.lock().clone()
	}

	pub fn total_count(&self) -> usize {
		self.created.lock().len() + self.active.lock().len() + self.deads.lock().len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rank_generator_is_monotonic_and_unique() {
		let reg = Registry::new();
		let a = reg.next_rank();
		let b = reg.next_rank();
		assert!(b > a);
	}
}
