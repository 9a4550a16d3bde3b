//! Rate-limited dispatch of a request batch.

mod dispatcher;
mod pacing;
mod processor;
mod producer;
mod report;
mod request;
mod state;

pub use dispatcher::Dispatcher;
pub use pacing::{Admission, PacingGate, PacingPolicy};
pub use processor::{execute, Processor, RetryPolicy, SimulatedWork};
pub use producer::Producer;
pub use report::{
    progress_line, DispatchReport, Failure, Outcome, Progress, ProgressOutput, Tally,
};
pub use request::Request;
pub use state::{DispatchState, StateCell};
