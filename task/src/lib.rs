/*
 * task - Work units, pools, schedulers, and the request/migration
 * protocol that glue them together (spec.md components C2-C4, C8-C9).
 *
 * Deliberately ignorant of the Execution Stream: see `handle` for the
 * two trait seams that let this crate talk about "the ES" without
 * depending on the crate that defines it.
 */

pub mod handle;
pub mod migration;
pub mod pool;
pub mod request;
pub mod sched;
pub mod unit;

pub use handle::{Dispatch, EsHandle};
pub use pool::{AccessHint, FifoPool, Pool};
pub use request::RequestWord;
pub use sched::{BasicScheduler, Kind, SchedKind, SchedState, Scheduler};
pub use unit::{UltAttr, UnitKindTag, UnitState, WorkUnit};
