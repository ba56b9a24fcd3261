//! Kernel trace points. They compile to nothing unless the `defmt` feature
//! is enabled.

#[cfg(feature = "defmt")]
macro_rules! ktrace {
    ($($arg:tt)*) => {
        defmt::trace!($($arg)*)
    };
}

#[cfg(not(feature = "defmt"))]
macro_rules! ktrace {
    ($($arg:tt)*) => {{}};
}
