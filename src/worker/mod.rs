pub mod orchestrator;
pub mod status;

pub use orchestrator::{StopHandle, Worker, WorkerDeps, WorkerReport};
pub use status::{StatusReporter, WorkerPhase, WorkerState};
