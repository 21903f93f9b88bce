/*
 * Runtime - the process-wide singleton handle (spec.md §9 "Global
 * mutable state": "model them as a singleton runtime handle created
 * at initialization and destroyed at finalization").
 */

use std::sync::Arc;

use stream::ExecutionStream;
use task::{AccessHint, BasicScheduler, FifoPool, Kind, Pool, SchedKind};
use util::Result;

use crate::config::Config;

/*
 * struct Runtime
 *
 * Owns the PRIMARY ES handle. Every secondary ES created via
 * `stream::ExecutionStream::create*` lives in the global registry
 * independently of this handle and is expected to be joined directly
 * by whoever created it — `Runtime` only brackets the process-wide
 * bootstrap/teardown of the PRIMARY.
 */
pub struct Runtime {
	primary: Arc<ExecutionStream>,
	secondaries: Vec<Arc<ExecutionStream>>,
}

impl Runtime {
	pub fn primary(&self) -> Arc<ExecutionStream> {
		self.primary.clone()
	}

	pub fn secondaries(&self) -> &[Arc<ExecutionStream>] {
		&self.secondaries
	}

	/*
	 * run - Enter the PRIMARY ES's scheduling loop on the calling thread
	 *
	 * Blocks until something running on the PRIMARY posts EXIT (via
	 * `ExecutionStream::exit_self`) or JOIN. There is no way to join
	 * the PRIMARY from outside it (spec.md §5): this is the only exit
	 * path from `run`.
	 */
	pub fn run(&self) {
		self.primary.start();
	}

	/*
	 * finalize - Best-effort process-lifetime bracket
	 *
	 * The PRIMARY cannot be forced to terminate externally; callers
	 * that want a clean shutdown arrange for `exit_self` to be called
	 * from within it before dropping the `Runtime`. This only joins
	 * whichever secondary ESs this handle started and logs the
	 * outcome — matching spec.md §6's "persisted state: none".
	 */
	pub fn finalize(self) -> Result<()> {
		for es in &self.secondaries {
			es.join()?;
		}
		log::info!("fibra runtime finalized");
		Ok(())
	}
}

/* init - Bootstrap the PRIMARY ES and any eagerly started secondaries */
pub fn init(config: Config) -> Result<Runtime> {
	util::logging::try_init_env_logger();
	hal::stack::set_default_stack_size(config.default_stack_size);

	let primary_pool: Arc<dyn Pool> = FifoPool::new(AccessHint::Shared);
	let primary_sched = BasicScheduler::new(Kind::Fifo, SchedKind::UltHosted, vec![primary_pool.clone()]);
	let primary = ExecutionStream::create_primary(primary_sched)?;
	primary_pool.set_consumer(primary.clone())?;

	if config.pin_es_to_cpu {
		if let Some(cpu) = hal::cpu::available_cpus().first() {
			primary.set_cpubind(*cpu);
		}
	}

	let mut secondaries = Vec::with_capacity(config.initial_secondary_es);
	let cpus = hal::cpu::available_cpus();
	for i in 0..config.initial_secondary_es {
		let es = ExecutionStream::create(1);
		if config.pin_es_to_cpu {
			if let Some(cpu) = cpus.get(i + 1) {
				es.set_cpubind(*cpu);
			}
		}
		es.start();
		secondaries.push(es);
	}

	log::info!("fibra runtime initialized with {} secondary ES(es)", secondaries.len());
	Ok(Runtime { primary, secondaries })
}
