use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sibyl_core::types::ToolOutput;

/// Every point in the system that can be observed or intercepted.
///
/// The set is fixed; plugins subscribe to these names and nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPoint {
    ToolRegistryBuild,
    SessionResolved,
    PrePreload,
    PostPreload,
    /// The only chain hook: threads the system prompt text through subscribers.
    SystemPromptExtend,
    PreLlmCall,
    PostLlmResponse,
    PreToolExecute,
    PostToolExecute,
    TurnCompleted,
    PostTurnRender,
    FetchUrlOverride,
    DaemonServerRegister,
    DaemonTransportRegister,
    TrayMenuRegister,
}

impl HookPoint {
    pub fn name(&self) -> &'static str {
        match self {
            HookPoint::ToolRegistryBuild => "TOOL_REGISTRY_BUILD",
            HookPoint::SessionResolved => "SESSION_RESOLVED",
            HookPoint::PrePreload => "PRE_PRELOAD",
            HookPoint::PostPreload => "POST_PRELOAD",
            HookPoint::SystemPromptExtend => "SYSTEM_PROMPT_EXTEND",
            HookPoint::PreLlmCall => "PRE_LLM_CALL",
            HookPoint::PostLlmResponse => "POST_LLM_RESPONSE",
            HookPoint::PreToolExecute => "PRE_TOOL_EXECUTE",
            HookPoint::PostToolExecute => "POST_TOOL_EXECUTE",
            HookPoint::TurnCompleted => "TURN_COMPLETED",
            HookPoint::PostTurnRender => "POST_TURN_RENDER",
            HookPoint::FetchUrlOverride => "FETCH_URL_OVERRIDE",
            HookPoint::DaemonServerRegister => "DAEMON_SERVER_REGISTER",
            HookPoint::DaemonTransportRegister => "DAEMON_TRANSPORT_REGISTER",
            HookPoint::TrayMenuRegister => "TRAY_MENU_REGISTER",
        }
    }
}

/// Mutable context handed to every fanout subscriber in order.
///
/// `payload` is untyped JSON so the kernel stays decoupled from domain
/// structs; hook points whose context cannot be JSON (registry builders,
/// transport registration) expose a typed value through `ext`.
pub struct HookContext<'a> {
    pub point: HookPoint,
    pub payload: serde_json::Value,
    /// `PRE_TOOL_EXECUTE` only: when a subscriber sets this, the tool
    /// executor is skipped and this output is used instead.
    pub short_circuit_result: Option<ToolOutput>,
    /// `FETCH_URL_OVERRIDE` only: first subscriber to set a replacement
    /// result wins.
    pub fetch_override: Option<serde_json::Value>,
    /// Typed extension slot; subscribers downcast per hook point.
    pub ext: Option<&'a mut (dyn Any + Send)>,
}

impl<'a> HookContext<'a> {
    pub fn new(point: HookPoint, payload: serde_json::Value) -> Self {
        Self {
            point,
            payload,
            short_circuit_result: None,
            fetch_override: None,
            ext: None,
        }
    }

    pub fn with_ext(point: HookPoint, payload: serde_json::Value, ext: &'a mut (dyn Any + Send)) -> Self {
        Self {
            point,
            payload,
            short_circuit_result: None,
            fetch_override: None,
            ext: Some(ext),
        }
    }

    /// Downcast the extension slot to a concrete type.
    pub fn ext_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.ext.as_mut().and_then(|e| e.downcast_mut::<T>())
    }
}

/// Fanout callback. Returning `Err` logs the failure and continues with the
/// remaining subscribers.
pub type FanoutFn = Arc<dyn Fn(&mut HookContext<'_>) -> Result<(), String> + Send + Sync>;

/// Chain callback for `SYSTEM_PROMPT_EXTEND`: previous text in, new text out.
pub type ChainFn = Arc<dyn Fn(String) -> String + Send + Sync>;

/// One registered subscription with its deterministic ordering key.
#[derive(Clone)]
pub struct Subscription<F> {
    pub point: HookPoint,
    pub plugin: String,
    pub priority: i32,
    /// Monotonic per-kernel counter; final tie-break within one plugin.
    pub registration_index: u64,
    pub callback: F,
}

impl<F> Subscription<F> {
    /// Ordering tuple: priority asc, plugin name asc, registration order asc.
    pub fn order_key(&self) -> (i32, &str, u64) {
        (self.priority, self.plugin.as_str(), self.registration_index)
    }
}

pub const DEFAULT_PRIORITY: i32 = 100;
