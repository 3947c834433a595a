/// Log a warning the first time this call site is reached, and never again.
macro_rules! warn_once {
    ($($arg:tt)+) => {{
        static WARNED: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);
        if !WARNED.swap(true, core::sync::atomic::Ordering::Relaxed) {
            log::warn!($($arg)+);
        }
    }};
}
