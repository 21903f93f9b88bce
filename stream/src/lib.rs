/*
 * stream - Execution Stream lifecycle and scheduling loop, per-thread
 * locals, and the global ES registry (spec.md components C5-C7).
 */

pub mod es;
pub mod locals;
pub mod registry;
pub mod ult;

pub use es::{EsKind, EsState, ExecutionStream};
pub use ult::yield_now;
