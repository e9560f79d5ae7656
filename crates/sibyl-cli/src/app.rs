//! Component wiring: one immutable config snapshot in, fully-built
//! orchestrator (and optionally daemon) out.

use std::sync::Arc;

use anyhow::{bail, Context};

use sibyl_adapters::{
    BudgetChunker, EmbeddingAdapter, HashEmbedder, HttpFetcher, LlmAdapter, NullSearcher,
    OpenAiChatAdapter, PlainFileAdapter, RetryingLlm, WebSearcher,
};
use sibyl_agent::{Orchestrator, OrchestratorDeps, UnavailableRunner};
use sibyl_core::events::null_sink;
use sibyl_core::SibylConfig;
use sibyl_daemon::DaemonRouter;
use sibyl_hooks::HookKernel;
use sibyl_index::VectorIndex;
use sibyl_plugins::{Manifest, PluginManager, PluginRegistry};
use sibyl_research::{Ingestor, PreloadPipeline};
use sibyl_sessions::{Compactor, SessionResolver, StickyLocks};
use sibyl_store::HistoryStore;

/// Everything the CLI commands operate on.
pub struct App {
    pub config: SibylConfig,
    pub store: Arc<HistoryStore>,
    pub index: Arc<VectorIndex>,
    pub orchestrator: Arc<Orchestrator>,
    pub plugins: PluginManager,
    pub kernel: Arc<HookKernel>,
}

impl App {
    /// Build the full component graph. Plugin constructors are registered by
    /// the embedder; the stock CLI ships none and runs with an empty set.
    pub fn build(config: SibylConfig, registry: PluginRegistry) -> anyhow::Result<Self> {
        let store = Arc::new(
            HistoryStore::open(&config.database.path).context("opening history store")?,
        );
        let index_path = format!("{}/index.db", config.state_dir);
        let index = Arc::new(VectorIndex::open(&index_path).context("opening vector index")?);

        let kernel = Arc::new(HookKernel::new());
        let mut plugins = PluginManager::new(
            Arc::clone(&kernel),
            registry,
            std::path::PathBuf::from(&config.state_dir).join("plugins"),
        );
        let manifest = match &config.plugin_manifest {
            Some(path) => Manifest::load(path).map_err(anyhow::Error::msg)?,
            None => Manifest::default(),
        };
        // Activation order is deterministic; the kernel freezes afterwards.
        plugins.load_all(&manifest);

        let embedder: Arc<dyn EmbeddingAdapter> = Arc::new(HashEmbedder::default());
        let searcher: Arc<dyn WebSearcher> = Arc::new(NullSearcher);
        let fetcher = Arc::new(HttpFetcher::new(config.limits.fetch_timeout_secs));

        let base_llm: Arc<dyn LlmAdapter> = Arc::new(OpenAiChatAdapter::new(
            config.llm.api_key.clone(),
            config.llm.base_url.clone(),
            config.limits.llm_timeout_secs,
        ));
        let llm: Arc<dyn LlmAdapter> =
            Arc::new(RetryingLlm::new(Arc::clone(&base_llm), &config.limits));
        let summarizer = Some((
            Arc::clone(&base_llm),
            config.summarization_model.clone(),
        ));
        let interface_llm = config
            .interface_model
            .as_ref()
            .map(|model| (Arc::clone(&base_llm), model.clone()));

        let ingestor = Ingestor::new(
            Arc::clone(&index),
            Arc::clone(&embedder),
            Arc::new(BudgetChunker),
            Arc::new(PlainFileAdapter::new()),
            Arc::clone(&fetcher) as Arc<dyn sibyl_adapters::Fetcher>,
            &config.research.local_document_roots,
            config.limits.max_prompt_file_size,
        );
        let preload = PreloadPipeline::new(
            Arc::clone(&index),
            Arc::clone(&store),
            Arc::clone(&embedder),
            Arc::clone(&searcher),
            interface_llm.clone(),
            ingestor,
            config.research.clone(),
        );
        let resolver = SessionResolver::new(
            Arc::clone(&store),
            StickyLocks::new(&config.state_dir).context("creating shell-lock dir")?,
        );
        let compactor = Arc::new(Compactor::new(
            Arc::clone(&store),
            summarizer.clone(),
            config.compaction_strategy,
            config.compaction_threshold,
            config.model_context_window,
        ));

        let orchestrator = Arc::new(
            Orchestrator::new(OrchestratorDeps {
                config: config.clone(),
                store: Arc::clone(&store),
                index: Arc::clone(&index),
                embedder,
                searcher,
                fetcher,
                llm,
                summarizer,
                kernel: Arc::clone(&kernel),
                resolver,
                preload,
                compactor,
                runner: Arc::new(UnavailableRunner),
                sink: null_sink(),
            })
            .map_err(|e| anyhow::anyhow!("{e}"))?,
        );

        Ok(Self {
            config,
            store,
            index,
            orchestrator,
            plugins,
            kernel,
        })
    }

    /// Build the daemon router from the plugin-registered transport.
    pub fn daemon(&self) -> anyhow::Result<Arc<DaemonRouter>> {
        if self.config.daemon.allowed_senders.is_empty() {
            bail!("daemon.allowed_senders is empty — nobody could reach the daemon");
        }
        DaemonRouter::from_hooks(
            &self.kernel,
            self.config.daemon.clone(),
            Arc::clone(&self.orchestrator) as Arc<dyn sibyl_daemon::TurnRunner>,
            Arc::clone(&self.store),
            None,
            None,
            None,
        )
        .map_err(|e| anyhow::anyhow!("{e}"))
    }

    pub fn shutdown(&mut self) {
        self.plugins.shutdown();
    }
}
