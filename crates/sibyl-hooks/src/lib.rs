//! Deterministic hook kernel.
//!
//! Subscriptions are registered during plugin activation, the kernel is
//! frozen, and every later invocation is a lock-light read. Two dispatch
//! modes: fanout (all subscribers, mutable context, failures isolated) and
//! chain (`SYSTEM_PROMPT_EXTEND` only, threading a `String`).

mod kernel;
mod types;

pub use kernel::HookKernel;
pub use types::{HookContext, HookPoint, Subscription};
