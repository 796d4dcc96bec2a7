#![allow(unused, reason = "logger")]

macro_rules! debug {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")]
        ::log::debug!($($tt)*);
    };
}

macro_rules! error {
    ($($tt:tt)*) => {
        #[cfg(feature = "log")]
        ::log::error!($($tt)*);
    };
}

pub(crate) use {debug, error};
