/*
 * Diagnostics
 *
 * Non-fatal error reporting. A partial failure inside the dispatcher
 * is fatal to the work unit involved but never to the execution
 * stream running it; this is the one place that boundary is drawn.
 */

/*
 * oops - Report a non-fatal internal error
 * @msg: Description of what went wrong
 *
 * Logs at error level and returns. Unlike the bare-metal ancestor of
 * this function, a hosted runtime has no CPU to halt: the caller is
 * expected to mark whatever unit or stream hit the error as
 * terminated-with-fault and continue the scheduling loop.
 */
pub fn oops(msg: &str) {
	log::error!("[fibra oops] {msg}");
}

/*
 * panic_message - Render a caught panic payload as a display string
 *
 * `catch_unwind` hands back `Box<dyn Any + Send>`; the payload is a
 * `&str` or `String` for every panic raised through the `panic!`
 * family, which covers everything short of a custom `panic_any`.
 */
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"unit panicked with a non-string payload".to_string()
	}
}
