//! Progress observers.

pub mod file_mirror;
pub mod sink;

pub use file_mirror::FileMirrorSink;
pub use sink::{ProgressEvent, ProgressSink, TracingSink};
