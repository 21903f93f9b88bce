/*
 * Error Taxonomy
 *
 * The kinds of failure every public runtime operation can return.
 * There is no unwinding across a public boundary: callers get one of
 * these variants instead.
 */

use thiserror::Error;

/*
 * enum Error - Runtime error kinds
 *
 * Mirrors the error space of the scheduling substrate: SUCCESS is
 * represented by `Ok`, never by a variant here.
 */
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
	#[error("runtime not initialized")]
	Uninitialized,

	#[error("invalid execution stream (wrong thread, wrong primary, or forbidden self-target)")]
	InvEs,

	#[error("invalid work unit")]
	InvUnit,

	#[error("invalid pool")]
	InvPool,

	#[error("invalid scheduler")]
	InvSched,

	#[error("operation not valid in the execution stream's current state")]
	EsState,

	#[error("memory allocation failed")]
	Mem,

	#[error("pool already bound to a different consumer execution stream")]
	ConsumerConflict,
}

pub type Result<T> = core::result::Result<T, Error>;
