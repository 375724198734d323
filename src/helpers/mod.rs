pub mod logging;
pub mod profiling;
