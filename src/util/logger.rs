use log::SetLoggerError;

/// Attempt to init a env_logger for RGC.
/// Does nothing if the "builtin_env_logger" feature is disabled.
///
/// The filter is read from `RUST_LOG` and defaults to `info`. Bindings that install their own
/// `log` implementation should disable the feature instead of calling this.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::try_init_from_env(
                // By default, use info level logging.
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
            )
        } else {
            Ok(())
        }
    }
}
