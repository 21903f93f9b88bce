/*
 * Config (spec.md §6 "Environment")
 *
 * The three knobs the runtime recognizes at initialization. No
 * persisted state exists between runs, so there is nothing beyond a
 * plain struct with a `Default`.
 */

/*
 * struct Config
 * @default_stack_size: Stack size given to a ULT whose `UltAttr` does
 *   not override it.
 * @pin_es_to_cpu: If true, every ES pins its kernel thread to a
 *   distinct CPU (via `core_affinity`) at the time it starts, cycling
 *   through `hal::cpu::available_cpus()` by rank.
 * @initial_secondary_es: Number of secondary ESs `init` creates (and
 *   starts) eagerly, each with a single default FIFO pool.
 */
pub struct Config {
	pub default_stack_size: usize,
	pub pin_es_to_cpu: bool,
	pub initial_secondary_es: usize,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			default_stack_size: hal::stack::DEFAULT_STACK_SIZE,
			pin_es_to_cpu: false,
			initial_secondary_es: 0,
		}
	}
}
