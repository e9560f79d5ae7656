//! The agent core: per-turn tool registry with interception hooks, and the
//! turn orchestrator that drives the LLM ↔ tool loop.

mod error;
mod orchestrator;
mod prompt;
mod redact;
mod summarize;
pub mod tools;

pub use error::AgentError;
pub use orchestrator::{Orchestrator, OrchestratorDeps};
pub use redact::redact_local_paths;
pub use tools::{
    build_registry, CommandRunner, ToolContext, ToolExec, ToolRegistry, UnavailableRunner,
};
