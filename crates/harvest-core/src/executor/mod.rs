//! Bounded worker pool, handlers and retry policy.

pub mod decision;
pub mod engine;
pub mod handler;
mod in_flight;
pub mod registry;
pub mod reporter;
pub mod retry;

pub use decision::decide;
pub use engine::{Executor, ExecutorBuilder, ShutdownReport};
pub use handler::{handler_fn, FnHandler, Handler};
pub use registry::HandlerRegistry;
pub use reporter::ProgressReporter;
pub use retry::RetryPolicy;
