//! Thin logging facade over `tracing`.
//!
//! All diagnostic output from the allocator funnels through these macros
//! rather than calling `tracing` directly. That keeps call sites short and
//! gives us one place to adjust target naming or add rate limiting later.
//!
//! Call sites should read as a single diagnostic line: no multi-line
//! messages, no end-of-sentence punctuation.

#[macro_export]
macro_rules! palloc_trace {
    ($($arg:tt)*) => { ::tracing::trace!($($arg)*) };
}

#[macro_export]
macro_rules! palloc_debug {
    ($($arg:tt)*) => { ::tracing::debug!($($arg)*) };
}

#[macro_export]
macro_rules! palloc_info {
    ($($arg:tt)*) => { ::tracing::info!($($arg)*) };
}

#[macro_export]
macro_rules! palloc_warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) };
}

#[macro_export]
macro_rules! palloc_error {
    ($($arg:tt)*) => { ::tracing::error!($($arg)*) };
}
