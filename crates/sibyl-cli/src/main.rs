mod app;
mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sibyl_core::types::{ShortlistOverride, SourceMode, TurnRequest};
use sibyl_core::{Selector, SibylConfig};
use sibyl_plugins::PluginRegistry;
use sibyl_store::MessageFilter;

use crate::app::App;
use crate::cli::{Cli, Command, DaemonCommand, HistoryCommand, MemoryCommand, SessionCommand};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sibyl=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = SibylConfig::load(cli.config.as_deref())?;
    let mut app = App::build(config, PluginRegistry::new())?;

    let outcome = run_command(&app, cli.command).await;
    app.shutdown();
    outcome
}

async fn run_command(app: &App, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Ask(args) => ask(app, args).await,
        Command::Session { command } => session(app, command),
        Command::History { command } => history(app, command),
        Command::Memory { command } => memory(app, command).await,
        Command::Daemon {
            command: DaemonCommand::Run,
        } => daemon(app).await,
    }
}

async fn ask(app: &App, args: cli::AskArgs) -> anyhow::Result<()> {
    let query = args.query.join(" ");
    if query.trim().is_empty() {
        anyhow::bail!("empty query");
    }

    let mut request = TurnRequest::query(query);
    request.sticky_session_name = args.session;
    request.resume_session_term = args.resume;
    request.continue_ids = args
        .continue_ids
        .map(|s| s.parse::<Selector>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    request.summarize_context = args.summarize_context;
    request.shell_session_id = std::os::unix::process::parent_id().into();
    request.lean = args.lean;
    request.save_history = !args.no_save;
    request.additional_source_context = args.sources;
    if args.research {
        request.research_mode = Some(true);
    }
    request.research_source_mode = args
        .source_mode
        .map(|s| s.parse::<SourceMode>())
        .transpose()
        .map_err(anyhow::Error::msg)?;
    request.shortlist_override = match args.shortlist.as_str() {
        "on" => ShortlistOverride::On,
        "off" => ShortlistOverride::Off,
        "reset" => ShortlistOverride::Reset,
        _ => ShortlistOverride::Auto,
    };
    request.model_override = args.model;
    request.max_turns_override = args.max_turns;

    let result = app.orchestrator.run_turn(request, None).await?;

    if result.halted {
        eprintln!(
            "halted: {}",
            result.halt_reason.as_deref().unwrap_or("unknown")
        );
        for notice in &result.notices {
            eprintln!("  {notice}");
        }
        std::process::exit(1);
    }

    println!("{}", result.final_answer);

    // Post-render hook: delivery plugins run after the user saw the answer.
    let mut ctx = sibyl_hooks::HookContext::new(
        sibyl_hooks::HookPoint::PostTurnRender,
        serde_json::json!({
            "answer_title": result.answer_title,
            "session_id": result.session_id,
        }),
    );
    app.kernel.fire(&mut ctx);
    Ok(())
}

fn session(app: &App, command: SessionCommand) -> anyhow::Result<()> {
    match command {
        SessionCommand::List => {
            for s in app.store.list_sessions()? {
                let mode = if s.profile.research_mode {
                    format!(" [research:{:?}]", s.profile.source_mode)
                } else {
                    String::new()
                };
                println!("{}: {}{} (last used {})", s.id, s.name, mode, s.last_used_at);
            }
        }
        SessionCommand::End => {
            let pid: u32 = std::os::unix::process::parent_id();
            sibyl_sessions::StickyLocks::new(&app.config.state_dir)?.end(pid)?;
            println!("shell session ended");
        }
        SessionCommand::Delete { selector } => {
            let selector: Selector = selector.parse().map_err(anyhow::Error::msg)?;
            // The cascade also removes the sessions' findings from the index.
            let victims: Vec<i64> = {
                let all: Vec<i64> = app.store.list_sessions()?.iter().map(|s| s.id).collect();
                selector.resolve(&all)
            };
            let count = app.store.delete_sessions(&selector)?;
            for id in victims {
                let _ = app.index.delete_findings_by_session(id);
            }
            println!("deleted {count} session(s)");
        }
        SessionCommand::CleanResearch { term } => {
            let Some(session) = app.store.get_session(&term)? else {
                anyhow::bail!("no session matched '{term}'");
            };
            app.store.clean_research(session.id)?;
            app.index.delete_findings_by_session(session.id)?;
            println!("cleared research residue for session {}", session.id);
        }
    }
    Ok(())
}

fn history(app: &App, command: HistoryCommand) -> anyhow::Result<()> {
    match command {
        HistoryCommand::List { limit } => {
            for m in app.store.list_messages(&MessageFilter::default(), limit)? {
                let summary = m.summary.as_deref().unwrap_or_else(|| {
                    m.content.split('\n').next().unwrap_or("")
                });
                println!("{}: [{}] {}", m.id, m.role, truncate(summary, 100));
            }
        }
        HistoryCommand::Show { id } => {
            let m = app.store.get_message(id)?;
            println!("[{}] {} ({})", m.role, m.created_at, m.model.as_deref().unwrap_or("-"));
            println!("{}", m.content);
        }
        HistoryCommand::Delete { selector } => {
            let selector: Selector = selector.parse().map_err(anyhow::Error::msg)?;
            let count = app.store.delete_messages(&selector)?;
            println!("deleted {count} message(s)");
        }
    }
    Ok(())
}

async fn memory(app: &App, command: MemoryCommand) -> anyhow::Result<()> {
    match command {
        MemoryCommand::List => {
            for m in app.store.list_memories()? {
                println!("{}: {} ({})", m.id, m.text, m.created_at);
            }
        }
        MemoryCommand::Add { text } => {
            let text = text.join(" ");
            let embedder = sibyl_adapters::HashEmbedder::default();
            use sibyl_adapters::EmbeddingAdapter;
            let vector = embedder
                .embed(&[text.clone()])
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?
                .pop()
                .unwrap_or_default();
            let (id, updated) = app.store.save_memory(&text, &vector)?;
            if updated {
                println!("updated existing memory {id}");
            } else {
                println!("saved memory {id}");
            }
        }
        MemoryCommand::Delete { id } => {
            app.store.delete_memory(id)?;
            println!("deleted memory {id}");
        }
    }
    Ok(())
}

async fn daemon(app: &App) -> anyhow::Result<()> {
    let router = app.daemon()?;
    println!("daemon running; press Ctrl-C to stop");
    // serve() hands the inbound sender to the registered transport and runs
    // the dispatcher until the transport releases it.
    tokio::select! {
        served = router.serve() => {
            served.map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}
