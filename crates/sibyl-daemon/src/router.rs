//! The daemon router proper: dispatcher, per-sender workers, intent
//! handling, session binding, and outbound delivery.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sibyl_adapters::{ChatMessage, GenerationParams, LlmAdapter};
use sibyl_agent::Orchestrator;
use sibyl_core::config::DaemonConfig;
use sibyl_core::types::{TurnRequest, TurnResult};
use sibyl_hooks::{HookContext, HookKernel, HookPoint};
use sibyl_store::{HistoryStore, TranscriptKind};

use crate::allow::is_sender_allowed;
use crate::chunk::split_chunks;
use crate::error::Result;
use crate::planner::{parse_plan, plan_prompt, Intent};
use crate::policy::check_policy;
use crate::tables::render_tables;
use crate::transport::{
    InboundAttachment, InboundMessage, SidecarServer, Transport, TransportSlot,
    TranscriptionWorker,
};

/// Per-sender queue depth before backpressure on the dispatcher.
const QUEUE_DEPTH: usize = 64;
/// Inbound channel depth between the transport and the dispatcher.
const INBOUND_DEPTH: usize = 256;

/// The daemon's view of the turn orchestrator. Behind a trait so the router
/// is testable without a live model stack.
#[async_trait::async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run(&self, request: TurnRequest) -> TurnResult;
}

#[async_trait::async_trait]
impl TurnRunner for Orchestrator {
    async fn run(&self, request: TurnRequest) -> TurnResult {
        match self.run_turn(request, None).await {
            Ok(result) => result,
            // The daemon has no retry caller to hand a fallback to; a
            // context overflow becomes a halted reply like any other error.
            Err(e) => TurnResult::halted(format!("agent_error: {e}")),
        }
    }
}

pub struct DaemonRouter {
    config: DaemonConfig,
    runner: Arc<dyn TurnRunner>,
    store: Arc<HistoryStore>,
    transport: Arc<dyn Transport>,
    sidecars: Vec<Arc<dyn SidecarServer>>,
    planner: Option<(Arc<dyn LlmAdapter>, String)>,
    audio_worker: Option<Arc<dyn TranscriptionWorker>>,
    image_worker: Option<Arc<dyn TranscriptionWorker>>,
    /// Present when built from a hook kernel; used for post-render firing.
    kernel: Option<Arc<HookKernel>>,
    queues: DashMap<String, mpsc::Sender<InboundMessage>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DaemonRouter {
    /// Collect transport and sidecar registrations from the hook kernel and
    /// enforce the startup contract (exactly one transport).
    pub fn from_hooks(
        kernel: &Arc<HookKernel>,
        config: DaemonConfig,
        runner: Arc<dyn TurnRunner>,
        store: Arc<HistoryStore>,
        planner: Option<(Arc<dyn LlmAdapter>, String)>,
        audio_worker: Option<Arc<dyn TranscriptionWorker>>,
        image_worker: Option<Arc<dyn TranscriptionWorker>>,
    ) -> Result<Arc<Self>> {
        let mut slot = TransportSlot::default();
        {
            let mut ctx = HookContext::with_ext(
                HookPoint::DaemonTransportRegister,
                serde_json::json!({}),
                &mut slot,
            );
            kernel.fire(&mut ctx);
        }
        {
            let mut ctx = HookContext::with_ext(
                HookPoint::DaemonServerRegister,
                serde_json::json!({}),
                &mut slot,
            );
            kernel.fire(&mut ctx);
        }
        let (transport, sidecars) = slot.into_single_transport()?;

        let mut router = Self::new(
            config,
            runner,
            store,
            transport,
            sidecars,
            planner,
            audio_worker,
            image_worker,
        );
        router.kernel = Some(Arc::clone(kernel));
        Ok(Arc::new(router))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: DaemonConfig,
        runner: Arc<dyn TurnRunner>,
        store: Arc<HistoryStore>,
        transport: Arc<dyn Transport>,
        sidecars: Vec<Arc<dyn SidecarServer>>,
        planner: Option<(Arc<dyn LlmAdapter>, String)>,
        audio_worker: Option<Arc<dyn TranscriptionWorker>>,
        image_worker: Option<Arc<dyn TranscriptionWorker>>,
    ) -> Self {
        Self {
            config,
            runner,
            store,
            transport,
            sidecars,
            planner,
            audio_worker,
            image_worker,
            kernel: None,
            queues: DashMap::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Production entry point: create the inbound channel, hand its sender
    /// to the registered transport via [`Transport::start`], and run the
    /// dispatcher until the transport releases the sender. The transport is
    /// stopped once the dispatcher drains.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let (tx, rx) = mpsc::channel::<InboundMessage>(INBOUND_DEPTH);
        self.transport.start(tx).await?;

        Arc::clone(&self).run(rx).await;

        if let Err(e) = self.transport.stop().await {
            warn!(transport = self.transport.name(), error = %e, "transport stop failed");
        }
        Ok(())
    }

    /// Run the dispatcher until the inbound stream closes, then drain every
    /// per-sender queue. Sidecar servers run for the daemon's lifetime.
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundMessage>) {
        for sidecar in &self.sidecars {
            if let Err(e) = sidecar.start().await {
                warn!(server = sidecar.name(), error = %e, "sidecar start failed");
            } else {
                info!(server = sidecar.name(), "sidecar started");
            }
        }

        while let Some(message) = inbound.recv().await {
            // Allowlist: unmatched senders are dropped with no reply at all.
            if !is_sender_allowed(&self.config.allowed_senders, &message.sender) {
                debug!(sender = %message.sender, "sender not allowlisted — dropped");
                continue;
            }
            Self::enqueue(&self, message).await;
        }

        // Close the queues and wait for the workers to drain in order.
        self.queues.clear();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            let _ = worker.await;
        }

        for sidecar in &self.sidecars {
            if let Err(e) = sidecar.stop().await {
                warn!(server = sidecar.name(), error = %e, "sidecar stop failed");
            }
        }
    }

    /// Route onto the sender's FIFO queue, creating queue + worker on first
    /// contact. Within one sender, messages process strictly in order.
    async fn enqueue(this: &Arc<Self>, message: InboundMessage) {
        let sender_key = bare_identity(&message.sender).to_string();

        let tx = match this.queues.get(&sender_key) {
            Some(tx) => tx.clone(),
            None => {
                let (tx, rx) = mpsc::channel::<InboundMessage>(QUEUE_DEPTH);
                this.queues.insert(sender_key.clone(), tx.clone());
                let router = Arc::clone(this);
                let handle = tokio::spawn(async move {
                    router.worker_loop(sender_key, rx).await;
                });
                this.workers.lock().unwrap().push(handle);
                tx
            }
        };

        if tx.send(message).await.is_err() {
            warn!("per-sender queue closed while enqueuing");
        }
    }

    async fn worker_loop(self: Arc<Self>, sender_key: String, mut rx: mpsc::Receiver<InboundMessage>) {
        debug!(sender = %sender_key, "worker started");
        while let Some(message) = rx.recv().await {
            self.process(message).await;
        }
        debug!(sender = %sender_key, "worker drained");
    }

    async fn process(&self, message: InboundMessage) {
        let sender = bare_identity(&message.sender).to_string();

        // Each sender binds to a persistent identity-named session.
        let session_name = format!("remote:{sender}");
        let session_id = self.ensure_session(&sender, &session_name);

        // Media first: transcripts become aliased context the text can use.
        let mut text = message.text.clone();
        if let Some(sid) = session_id {
            text = self.absorb_attachments(sid, &message.attachments, text).await;
            text = self.expand_aliases(sid, &text);
        }
        if text.trim().is_empty() {
            return;
        }

        // Preset expansion is first-token only, and always ahead of policy.
        let text = self.expand_preset(&text);

        if let Err(reason) = check_policy(&text) {
            self.deliver(&message.sender, &format!("Blocked: {reason}")).await;
            return;
        }

        let reply = match self.classify(&text).await {
            Intent::Command(command) => {
                // The gate applies to the final command text too — the
                // planner can synthesize a command the raw message never
                // contained.
                match check_policy(&command) {
                    Ok(()) => self.handle_command(&sender, &command).await,
                    Err(reason) => format!("Blocked: {reason}"),
                }
            }
            Intent::Query(query) | Intent::Chat(query) => {
                self.run_query(&session_name, &query).await
            }
        };

        self.deliver(&message.sender, &reply).await;

        if let Some(kernel) = &self.kernel {
            let mut ctx = HookContext::new(
                HookPoint::PostTurnRender,
                serde_json::json!({ "sender": sender, "chars": reply.len() }),
            );
            kernel.fire(&mut ctx);
        }
    }

    fn ensure_session(&self, sender: &str, session_name: &str) -> Option<i64> {
        if let Ok(Some(id)) = self.store.room_session(sender) {
            return Some(id);
        }
        match self.store.get_session(session_name) {
            Ok(Some(row)) => {
                let _ = self.store.bind_room(sender, row.id);
                Some(row.id)
            }
            Ok(None) => match self
                .store
                .create_session(session_name, &Default::default())
            {
                Ok(id) => {
                    let _ = self.store.bind_room(sender, id);
                    Some(id)
                }
                Err(e) => {
                    warn!(error = %e, "session create failed");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "session lookup failed");
                None
            }
        }
    }

    async fn absorb_attachments(
        &self,
        session_id: i64,
        attachments: &[InboundAttachment],
        mut text: String,
    ) -> String {
        for attachment in attachments {
            let (worker, kind) = match attachment {
                InboundAttachment::Audio(_) => (&self.audio_worker, TranscriptKind::Audio),
                InboundAttachment::Image(_) => (&self.image_worker, TranscriptKind::Image),
            };
            let Some(worker) = worker else {
                continue;
            };
            let payload = match attachment {
                InboundAttachment::Audio(bytes) | InboundAttachment::Image(bytes) => bytes,
            };
            match worker.transcribe(payload).await {
                Ok(transcript) => {
                    match self.store.save_transcript(
                        kind,
                        session_id,
                        &transcript,
                        self.config.transcript_max_per_session,
                    ) {
                        Ok(alias) => {
                            text.push_str(&format!("\n[{alias}] {transcript}"));
                        }
                        Err(e) => warn!(error = %e, "transcript save failed"),
                    }
                }
                Err(e) => warn!(error = %e, "transcription failed"),
            }
        }
        text
    }

    /// Replace `#a1` / `#i2` alias references with their stored transcripts.
    fn expand_aliases(&self, session_id: i64, text: &str) -> String {
        text.split_whitespace()
            .map(|token| {
                let alias = token.trim_end_matches(['.', ',', '?', '!']);
                let kind = match alias.as_bytes() {
                    [b'#', b'a', rest @ ..] if !rest.is_empty() => Some(TranscriptKind::Audio),
                    [b'#', b'i', rest @ ..] if !rest.is_empty() => Some(TranscriptKind::Image),
                    _ => None,
                };
                if let Some(kind) = kind {
                    if let Ok(Some(row)) = self.store.get_transcript(kind, session_id, alias) {
                        return format!("\"{}\"", row.text);
                    }
                }
                token.to_string()
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// First-token preset expansion from the user's preset map.
    fn expand_preset(&self, text: &str) -> String {
        let Some(first) = text.split_whitespace().next() else {
            return text.to_string();
        };
        match self.config.presets.get(first) {
            Some(expansion) => {
                let rest = text[first.len()..].trim_start();
                if rest.is_empty() {
                    expansion.clone()
                } else {
                    format!("{expansion} {rest}")
                }
            }
            None => text.to_string(),
        }
    }

    /// Command-prefix messages are direct commands; otherwise the planner
    /// classifies, falling back to a query on malformed output.
    async fn classify(&self, text: &str) -> Intent {
        if let Some(command) = text.strip_prefix(&self.config.command_prefix) {
            return Intent::Command(command.trim().to_string());
        }

        let Some((llm, model)) = &self.planner else {
            return Intent::Query(text.to_string());
        };
        let reply = llm
            .chat(
                &[ChatMessage::user(plan_prompt(text, &self.config.command_prefix))],
                &[],
                &GenerationParams::for_model(model.clone()),
            )
            .await;
        match reply {
            Ok(msg) => parse_plan(&msg.content, text)
                .unwrap_or_else(|| Intent::Query(text.to_string())),
            Err(e) => {
                warn!(error = %e, "planner failed — treating as query");
                Intent::Query(text.to_string())
            }
        }
    }

    async fn handle_command(&self, sender: &str, command: &str) -> String {
        let mut parts = command.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("help"), _) => "Commands: help, session list, session switch <term>, \
                 session clean. Anything else is answered as a query."
                .to_string(),
            (Some("session"), Some("list")) => match self.store.list_sessions() {
                Ok(sessions) => sessions
                    .iter()
                    .map(|s| format!("{}: {}", s.id, s.name))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("session list failed: {e}"),
            },
            (Some("session"), Some("switch")) => {
                let term: String = parts.collect::<Vec<_>>().join(" ");
                match self.store.find_sessions(&term) {
                    Ok(matches) if matches.len() == 1 => {
                        let id = matches[0].id;
                        let _ = self.store.bind_room(sender, id);
                        format!("switched to session {id} ({})", matches[0].name)
                    }
                    Ok(matches) if matches.is_empty() => format!("no session matched '{term}'"),
                    Ok(matches) => {
                        let names: Vec<String> = matches
                            .iter()
                            .map(|s| format!("{}: {}", s.id, s.name))
                            .collect();
                        format!("'{term}' is ambiguous:\n{}", names.join("\n"))
                    }
                    Err(e) => format!("session lookup failed: {e}"),
                }
            }
            (Some("session"), Some("clean")) => match self.store.room_session(sender) {
                Ok(Some(id)) => match self.store.clean_research(id) {
                    Ok(()) => "research residue cleared for this session".to_string(),
                    Err(e) => format!("clean failed: {e}"),
                },
                _ => "no session bound".to_string(),
            },
            _ => format!("unknown command '{command}' — try 'help'"),
        }
    }

    async fn run_query(&self, session_name: &str, query: &str) -> String {
        let mut request = TurnRequest::query(query);
        request.sticky_session_name = Some(session_name.to_string());

        let result = self.runner.run(request).await;
        if result.halted {
            let reason = result
                .halt_reason
                .unwrap_or_else(|| "unknown error".to_string());
            let mut reply = format!("The turn could not complete: {reason}");
            for notice in &result.notices {
                reply.push_str(&format!("\n{notice}"));
            }
            reply
        } else {
            result.final_answer
        }
    }

    /// Render, chunk, and send in order. On correcting transports the first
    /// chunk starts as a placeholder that is edited into place.
    async fn deliver(&self, recipient: &str, text: &str) {
        let rendered = render_tables(text);
        let chunks = split_chunks(&rendered, self.config.response_chunk_chars);

        let mut iter = chunks.into_iter();
        let Some(first) = iter.next() else {
            return;
        };

        if self.transport.supports_correction() {
            match self.transport.send(recipient, "…").await {
                Ok(message_id) => {
                    if let Err(e) = self.transport.edit(recipient, &message_id, &first).await {
                        warn!(error = %e, "edit failed — sending plainly");
                        let _ = self.transport.send(recipient, &first).await;
                    }
                }
                Err(e) => warn!(error = %e, "send failed"),
            }
        } else if let Err(e) = self.transport.send(recipient, &first).await {
            warn!(error = %e, "send failed");
        }

        for chunk in iter {
            if let Err(e) = self.transport.send(recipient, &chunk).await {
                warn!(error = %e, "send failed");
            }
        }
    }
}

/// Sender identity without the `/resource` suffix; the queue key.
fn bare_identity(sender: &str) -> &str {
    sender.split('/').next().unwrap_or(sender)
}
