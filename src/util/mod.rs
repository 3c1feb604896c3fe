//! Process-level helpers shared by the binary and embedding applications

pub mod logging;

pub use logging::{init_default, init_from_env, init_logging, LoggingConfig};
