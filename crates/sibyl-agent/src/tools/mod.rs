//! Per-turn tool registry with pre/post interception hooks.
//!
//! A registry is built fresh for every turn: built-ins, user-declared
//! command tools, then whatever plugins add through `TOOL_REGISTRY_BUILD`,
//! minus the disabled set.

pub mod build;
pub mod builtin;
pub mod command;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::FutureExt;
use tracing::{debug, warn};

use sibyl_adapters::{ToolCallRequest, ToolSchema};
use sibyl_core::types::ToolOutput;
use sibyl_hooks::{HookContext, HookKernel, HookPoint};

pub use build::{build_registry, ToolContext};
pub use command::{CommandRunner, UnavailableRunner};

/// One executable tool: schema plus executor.
#[async_trait]
pub trait ToolExec: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the tool's parameters.
    fn parameters(&self) -> serde_json::Value;
    /// Optional usage guideline appended to the system prompt.
    fn guideline(&self) -> Option<&str> {
        None
    }
    /// Acquisition tools (web search, fetching) are suppressed when the turn
    /// already has everything it needs.
    fn is_acquisition(&self) -> bool {
        false
    }
    async fn execute(&self, args: serde_json::Value) -> ToolOutput;
}

/// Name → executor map for one turn. Names are unique per build; a duplicate
/// insert replaces and is logged.
pub struct ToolRegistry {
    tools: BTreeMap<String, Box<dyn ToolExec>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, tool: Box<dyn ToolExec>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "duplicate tool name replaced in registry");
        }
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn retain<F: FnMut(&dyn ToolExec) -> bool>(&mut self, mut keep: F) {
        self.tools.retain(|_, t| keep(t.as_ref()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Schemas injected into the model request, in name order.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters(),
            })
            .collect()
    }

    /// Guideline snippets of the enabled tools, for the system prompt.
    pub fn guidelines(&self) -> Vec<String> {
        self.tools
            .values()
            .filter_map(|t| t.guideline().map(|g| format!("- {}: {g}", t.name())))
            .collect()
    }

    /// Dispatch one model-requested call.
    ///
    /// Contract: resolve by name (unknown → error output), fire
    /// `PRE_TOOL_EXECUTE` (a short-circuit result skips the executor), run
    /// the executor with panics wrapped into error outputs, fire
    /// `POST_TOOL_EXECUTE` with the result and elapsed time.
    pub async fn dispatch(&self, kernel: &Arc<HookKernel>, call: &ToolCallRequest) -> ToolOutput {
        let started = Instant::now();

        let mut pre_ctx = HookContext::new(
            HookPoint::PreToolExecute,
            serde_json::json!({
                "name": call.name,
                "arguments": call.arguments(),
            }),
        );
        kernel.fire(&mut pre_ctx);

        let output = if let Some(short_circuit) = pre_ctx.short_circuit_result {
            debug!(tool = %call.name, "executor skipped by short-circuit hook");
            short_circuit
        } else {
            match self.tools.get(&call.name) {
                None => ToolOutput::error(format!("unknown tool: {}", call.name)),
                Some(tool) => {
                    let args = call.arguments();
                    let run = std::panic::AssertUnwindSafe(tool.execute(args)).catch_unwind();
                    match run.await {
                        Ok(output) => output,
                        Err(_) => {
                            warn!(tool = %call.name, "tool executor panicked");
                            ToolOutput::error(format!("tool '{}' crashed", call.name))
                        }
                    }
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let mut post_ctx = HookContext::new(
            HookPoint::PostToolExecute,
            serde_json::json!({
                "name": call.name,
                "is_error": output.is_error,
                "content_len": output.content.len(),
                "elapsed_ms": elapsed_ms,
            }),
        );
        kernel.fire(&mut post_ctx);

        debug!(tool = %call.name, elapsed_ms, is_error = output.is_error, "tool dispatched");
        output
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl ToolExec for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echo back the input"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            })
        }
        async fn execute(&self, args: serde_json::Value) -> ToolOutput {
            ToolOutput::success(args["text"].as_str().unwrap_or("").to_string())
        }
    }

    struct Panics;

    #[async_trait]
    impl ToolExec for Panics {
        fn name(&self) -> &str {
            "panics"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object" })
        }
        async fn execute(&self, _args: serde_json::Value) -> ToolOutput {
            panic!("executor bug")
        }
    }

    fn call(name: &str, args: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "c1".into(),
            name: name.into(),
            arguments_json: args.to_string(),
        }
    }

    fn frozen_kernel() -> Arc<HookKernel> {
        let kernel = Arc::new(HookKernel::new());
        kernel.freeze();
        kernel
    }

    #[tokio::test]
    async fn dispatch_runs_the_named_executor() {
        let mut registry = ToolRegistry::new();
        registry.insert(Box::new(Echo));
        let out = registry
            .dispatch(&frozen_kernel(), &call("echo", serde_json::json!({"text": "hi"})))
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "hi");
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let registry = ToolRegistry::new();
        let out = registry
            .dispatch(&frozen_kernel(), &call("nope", serde_json::json!({})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[tokio::test]
    async fn panicking_executor_becomes_error_output() {
        let mut registry = ToolRegistry::new();
        registry.insert(Box::new(Panics));
        let out = registry
            .dispatch(&frozen_kernel(), &call("panics", serde_json::json!({})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("crashed"));
    }

    #[tokio::test]
    async fn short_circuit_skips_the_executor() {
        let kernel = Arc::new(HookKernel::new());
        kernel.register(
            HookPoint::PreToolExecute,
            "cache",
            Arc::new(|ctx| {
                ctx.short_circuit_result = Some(ToolOutput::success("from cache"));
                Ok(())
            }),
        );
        kernel.freeze();

        let mut registry = ToolRegistry::new();
        registry.insert(Box::new(Panics)); // would crash if actually run
        let out = registry
            .dispatch(&kernel, &call("panics", serde_json::json!({})))
            .await;
        assert!(!out.is_error);
        assert_eq!(out.content, "from cache");
    }

    #[test]
    fn schemas_are_name_ordered() {
        let mut registry = ToolRegistry::new();
        registry.insert(Box::new(Panics));
        registry.insert(Box::new(Echo));
        let names: Vec<String> = registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["echo", "panics"]);
    }
}
