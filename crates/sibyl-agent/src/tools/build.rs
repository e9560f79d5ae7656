//! Per-turn registry factory.

use std::sync::Arc;

use tracing::debug;

use sibyl_adapters::{EmbeddingAdapter, Fetcher, LlmAdapter, WebSearcher};
use sibyl_core::config::{CustomToolConfig, LimitsConfig};
use sibyl_hooks::{HookContext, HookKernel, HookPoint};
use sibyl_index::VectorIndex;
use sibyl_store::HistoryStore;

use super::builtin::{
    FetchUrlTool, ListSectionsTool, RetrieveChunksTool, SaveFindingTool, SaveMemoryTool,
    SummarizeSectionTool, WebSearchTool,
};
use super::command::{CommandRunner, CommandTool};
use super::ToolRegistry;

/// Shared handles the built-in tools execute against.
pub struct ToolContext {
    pub store: Arc<HistoryStore>,
    pub index: Arc<VectorIndex>,
    pub embedder: Arc<dyn EmbeddingAdapter>,
    pub searcher: Arc<dyn WebSearcher>,
    pub fetcher: Arc<dyn Fetcher>,
    pub kernel: Arc<HookKernel>,
    /// Summarization model for `summarize_section`; optional.
    pub summarizer: Option<(Arc<dyn LlmAdapter>, String)>,
    pub session_id: Option<i64>,
    pub limits: LimitsConfig,
}

/// Build one turn's registry.
///
/// Order: built-ins → user-declared command tools → `TOOL_REGISTRY_BUILD`
/// fanout (plugins add entries through the context's `ext` slot) → runtime
/// disable filter → acquisition-tool suppression for direct-answer turns.
pub fn build_registry(
    ctx: Arc<ToolContext>,
    custom_tools: &[CustomToolConfig],
    runner: Arc<dyn CommandRunner>,
    disabled_tools: &[String],
    suppress_acquisition: bool,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.insert(Box::new(WebSearchTool { ctx: Arc::clone(&ctx) }));
    registry.insert(Box::new(FetchUrlTool { ctx: Arc::clone(&ctx) }));
    registry.insert(Box::new(RetrieveChunksTool { ctx: Arc::clone(&ctx) }));
    registry.insert(Box::new(SaveMemoryTool { ctx: Arc::clone(&ctx) }));
    registry.insert(Box::new(SaveFindingTool { ctx: Arc::clone(&ctx) }));
    registry.insert(Box::new(ListSectionsTool { ctx: Arc::clone(&ctx) }));
    registry.insert(Box::new(SummarizeSectionTool { ctx: Arc::clone(&ctx) }));

    for config in custom_tools {
        registry.insert(Box::new(CommandTool::new(config.clone(), Arc::clone(&runner))));
    }

    // Plugins may add entries; the registry rides in the typed ext slot.
    {
        let mut hook_ctx = HookContext::with_ext(
            HookPoint::ToolRegistryBuild,
            serde_json::json!({ "disabled_tools": disabled_tools }),
            &mut registry,
        );
        ctx.kernel.fire(&mut hook_ctx);
    }

    for name in disabled_tools {
        if registry.remove(name) {
            debug!(tool = %name, "tool disabled by configuration");
        }
    }

    if suppress_acquisition {
        registry.retain(|t| !t.is_acquisition());
        debug!("acquisition tools suppressed for this turn");
    }

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use sibyl_adapters::{HashEmbedder, NullSearcher};
    use sibyl_adapters::{AdapterError, FetchRequest, FetchedPage};
    use sibyl_core::types::ToolOutput;

    struct NoFetch;

    #[async_trait]
    impl Fetcher for NoFetch {
        async fn fetch(&self, _r: &FetchRequest) -> Result<FetchedPage, AdapterError> {
            Err(AdapterError::Http("offline".into()))
        }
    }

    fn tool_context(kernel: Arc<HookKernel>) -> Arc<ToolContext> {
        Arc::new(ToolContext {
            store: Arc::new(HistoryStore::open_in_memory().unwrap()),
            index: Arc::new(VectorIndex::open_in_memory().unwrap()),
            embedder: Arc::new(HashEmbedder::new(32)),
            searcher: Arc::new(NullSearcher),
            fetcher: Arc::new(NoFetch),
            kernel,
            summarizer: None,
            session_id: None,
            limits: LimitsConfig::default(),
        })
    }

    fn frozen() -> Arc<HookKernel> {
        let k = Arc::new(HookKernel::new());
        k.freeze();
        k
    }

    #[test]
    fn builtins_are_present() {
        let kernel = frozen();
        let registry = build_registry(
            tool_context(Arc::clone(&kernel)),
            &[],
            Arc::new(super::super::command::UnavailableRunner),
            &[],
            false,
        );
        for name in [
            "web_search",
            "fetch_url",
            "retrieve_chunks",
            "save_memory",
            "save_finding",
            "list_sections",
            "summarize_section",
        ] {
            assert!(registry.contains(name), "missing builtin {name}");
        }
    }

    #[test]
    fn disabled_tools_are_filtered_from_schemas_and_dispatch() {
        let kernel = frozen();
        let registry = build_registry(
            tool_context(Arc::clone(&kernel)),
            &[],
            Arc::new(super::super::command::UnavailableRunner),
            &["web_search".to_string()],
            false,
        );
        assert!(!registry.contains("web_search"));
        assert!(!registry.schemas().iter().any(|s| s.name == "web_search"));
    }

    #[test]
    fn acquisition_suppression_removes_fetch_style_tools() {
        let kernel = frozen();
        let registry = build_registry(
            tool_context(Arc::clone(&kernel)),
            &[],
            Arc::new(super::super::command::UnavailableRunner),
            &[],
            true,
        );
        assert!(!registry.contains("web_search"));
        assert!(!registry.contains("fetch_url"));
        assert!(registry.contains("retrieve_chunks"));
    }

    #[test]
    fn plugins_can_add_tools_through_the_build_hook() {
        struct PluginTool;

        #[async_trait]
        impl super::super::ToolExec for PluginTool {
            fn name(&self) -> &str {
                "plugin_tool"
            }
            fn description(&self) -> &str {
                "added by a plugin"
            }
            fn parameters(&self) -> serde_json::Value {
                serde_json::json!({ "type": "object" })
            }
            async fn execute(&self, _args: serde_json::Value) -> ToolOutput {
                ToolOutput::success("plugin says hi")
            }
        }

        let kernel = Arc::new(HookKernel::new());
        kernel.register(
            HookPoint::ToolRegistryBuild,
            "extender",
            Arc::new(|ctx| {
                if let Some(registry) = ctx.ext_mut::<ToolRegistry>() {
                    registry.insert(Box::new(PluginTool));
                }
                Ok(())
            }),
        );
        kernel.freeze();

        let registry = build_registry(
            tool_context(Arc::clone(&kernel)),
            &[],
            Arc::new(super::super::command::UnavailableRunner),
            &[],
            false,
        );
        assert!(registry.contains("plugin_tool"));
    }

    #[test]
    fn custom_tools_from_config_are_registered() {
        let kernel = frozen();
        let custom = vec![CustomToolConfig {
            name: "uptime".into(),
            description: "host uptime".into(),
            command: "uptime".into(),
            params: vec![],
            guideline: None,
        }];
        let registry = build_registry(
            tool_context(kernel),
            &custom,
            Arc::new(super::super::command::UnavailableRunner),
            &[],
            false,
        );
        assert!(registry.contains("uptime"));
    }
}
