/// Logs a message at the error level, then exits the process with
/// status 1.
///
/// Only for failures before we start serving; nothing is unwound.
#[macro_export]
macro_rules! fatal {
  (target: $target:expr, $($arg:tt)*) => ({
    log!(target: $target, ::log::Level::Error, $($arg)*);
    ::std::process::exit(1)
  });
  ($($arg:tt)*) => ({
    log!(::log::Level::Error, $($arg)*);
    ::std::process::exit(1)
  });
}
