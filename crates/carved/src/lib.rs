pub mod cli;
pub mod commands;
pub mod dispatcher;
mod error;
pub mod logging;
pub mod orchestrator;
pub mod pipeline;

pub use dispatcher::{JobDispatcher, JobEvent};
pub use error::{ErrorCategory, PipelineError};
pub use orchestrator::{DecompositionReport, Orchestrator};
pub use pipeline::DecompositionPipeline;
