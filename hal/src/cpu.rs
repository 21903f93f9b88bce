/*
 * CPU Control Functions
 *
 * Userspace analogues of the teacher's halt/interrupt primitives:
 * there is no HLT or IF available from ring 3, so "idle" means
 * spinning with a pause hint or yielding the OS timeslice, and
 * "affinity" goes through the OS scheduler instead of the APIC.
 */

/*
 * relax - Hint to the CPU that this is a spin-wait loop
 *
 * Reduces power draw and memory-order speculation pressure on a busy
 * wait without giving up the timeslice.
 */
#[inline(always)]
pub fn relax() {
	core::hint::spin_loop();
}

/*
 * yield_timeslice - Give up the remainder of this OS timeslice
 *
 * Used by idle pool-pop policies that would rather let another kernel
 * thread run than spin.
 */
#[inline(always)]
pub fn yield_timeslice() {
	std::thread::yield_now();
}

/*
 * struct CpuId - An OS-visible logical CPU identifier
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuId(pub usize);

/*
 * pin_current_thread - Bind the calling kernel thread to one CPU
 *
 * Best-effort: platforms without affinity support, or an id outside
 * the available set, leave the thread unpinned rather than failing.
 */
pub fn pin_current_thread(cpu: CpuId) -> bool {
	core_affinity::set_for_current(core_affinity::CoreId { id: cpu.0 })
}

/*
 * available_cpus - Enumerate CPUs the OS will schedule this process on
 */
pub fn available_cpus() -> Vec<CpuId> {
	core_affinity::get_core_ids()
		.unwrap_or_default()
		.into_iter()
		.map(|c| CpuId(c.id))
		.collect()
}
