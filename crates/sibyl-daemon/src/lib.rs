//! Remote daemon router: exposes the turn orchestrator over a chat-protocol
//! transport with allowlisting, per-sender serialized queues, preset
//! expansion, an intent planner, a policy gate, and outbound chunking.

mod allow;
mod chunk;
mod error;
mod planner;
mod policy;
mod router;
mod tables;
mod transport;

pub use allow::is_sender_allowed;
pub use chunk::split_chunks;
pub use error::{DaemonError, Result};
pub use planner::{parse_plan, plan_prompt, Intent};
pub use policy::check_policy;
pub use router::{DaemonRouter, TurnRunner};
pub use tables::render_tables;
pub use transport::{
    InboundAttachment, InboundMessage, SidecarServer, Transport, TransportSlot,
    TranscriptionWorker,
};
