pub mod orchestrator;

pub use orchestrator::{EvaluatorRunSummary, Orchestrator, PassRate, RunSettings};
