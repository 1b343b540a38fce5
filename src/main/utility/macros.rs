/// Log a warning, and if a debug build then panic. Used for engine states that indicate a bug but
/// that a release build can recover from.
macro_rules! debug_panic {
    ($($x:tt)+) => {
        log::warn!($($x)+);
        #[cfg(debug_assertions)]
        panic!($($x)+);
    };
}
