//! Process invocation
//!
//! Builds and runs one external-process call and reports its outcome as data.

mod cancel;
mod invocation;
mod invoker;
mod resolve;
mod result;

pub use cancel::CancelToken;
pub use invocation::Invocation;
pub use invoker::{run, run_streaming};
pub use resolve::{is_executable, resolve_program};
pub use result::{ExecutionResult, OutputLine, OutputStream};
