/*
 * fibra - public facade over the scheduling substrate.
 *
 * Re-exports the external interface of spec.md §6: ES lifecycle
 * (`stream`), scheduler and pool contracts plus the reference FIFO
 * pool and basic scheduler (`task`), and brackets process lifetime
 * through `init`/`Runtime::finalize`.
 */

pub mod config;
pub mod runtime;

pub use config::Config;
pub use runtime::{init, Runtime};

pub use stream::{yield_now, EsKind, EsState, ExecutionStream};
pub use task::{
	AccessHint, BasicScheduler, Dispatch, EsHandle, FifoPool, Kind, Pool, RequestWord, SchedKind, SchedState, Scheduler,
	UltAttr, UnitKindTag, UnitState, WorkUnit,
};
pub use util::{Error, Result};
