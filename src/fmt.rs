// Internal logging shim: forwards to `log` when the feature is enabled and
// evaluates to nothing otherwise, so call sites stay free of cfg clutter.

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::trace!($($arg)*);
        #[cfg(not(feature = "log"))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "log")]
        ::log::debug!($($arg)*);
        #[cfg(not(feature = "log"))]
        let _ = ::core::format_args!($($arg)*);
    }};
}

pub(crate) use {debug, trace};
