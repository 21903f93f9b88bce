/*
 * Logging Bootstrap
 *
 * The runtime logs through the `log` facade; it does not own an
 * appender. `try_init_env_logger` is a convenience for examples and
 * tests that want readable output without every caller wiring up
 * env_logger by hand.
 */

/*
 * try_init_env_logger - Install env_logger as the global logger
 *
 * Idempotent: a second call after a logger is already installed is a
 * harmless no-op (the error from `set_logger` is swallowed).
 */
pub fn try_init_env_logger() {
	let _ = env_logger::builder().is_test(false).try_init();
}
