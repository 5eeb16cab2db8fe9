//! Tracing setup shared by message board hosts and test harnesses.
mod logging;

pub use logging::{init, LogConfig, LogFormat, LogOutput, LoggerError};
