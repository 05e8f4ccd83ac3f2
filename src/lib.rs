pub mod exceptions;
pub mod geometry;
#[cfg(feature = "setup_tracing")]
mod logging;
pub mod rtree;
