//! Progress reporting for pipeline runs

mod handler;
mod logging;

pub use handler::{
    ChannelHandler, NoOpHandler, ProgressEvent, ProgressHandler, ProgressKind, RecordingHandler,
};
pub use logging::LoggingHandler;
