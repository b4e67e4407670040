//! Step interpreter and run results.

pub mod cancel;
pub mod interpreter;
pub mod result;

pub use cancel::{CancelSource, CancelToken};
pub use interpreter::{
    build_select, InterpreterOptions, RunRequest, StepInterpreter, DEFAULT_MAX_ITERATIONS,
};
pub use result::{RunResult, RunStatus, StepDetail, StepResult};
