use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::types::{ChainFn, FanoutFn, HookContext, HookPoint, Subscription, DEFAULT_PRIORITY};

/// Central registry and dispatcher for all hooks in the system.
///
/// Mutable while plugins activate, frozen afterwards. Registration after the
/// freeze is a programming error: it is logged and ignored, never applied.
/// Share as `Arc<HookKernel>`.
pub struct HookKernel {
    fanout: RwLock<Vec<Subscription<FanoutFn>>>,
    chain: RwLock<Vec<Subscription<ChainFn>>>,
    frozen: AtomicBool,
    next_index: AtomicU64,
}

impl HookKernel {
    pub fn new() -> Self {
        Self {
            fanout: RwLock::new(Vec::new()),
            chain: RwLock::new(Vec::new()),
            frozen: AtomicBool::new(false),
            next_index: AtomicU64::new(0),
        }
    }

    /// Subscribe a fanout callback with the default priority (100).
    pub fn register(&self, point: HookPoint, plugin: &str, callback: FanoutFn) {
        self.register_with_priority(point, plugin, DEFAULT_PRIORITY, callback);
    }

    pub fn register_with_priority(
        &self,
        point: HookPoint,
        plugin: &str,
        priority: i32,
        callback: FanoutFn,
    ) {
        if self.frozen.load(Ordering::SeqCst) {
            error!(
                hook = point.name(),
                plugin, "hook registration after freeze — ignored"
            );
            return;
        }
        let registration_index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let mut subs = self.fanout.write().expect("hook registry poisoned");
        subs.push(Subscription {
            point,
            plugin: plugin.to_string(),
            priority,
            registration_index,
            callback,
        });
        subs.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        debug!(hook = point.name(), plugin, priority, "hook registered");
    }

    /// Subscribe a `SYSTEM_PROMPT_EXTEND` chain extender.
    pub fn register_prompt_extender(&self, plugin: &str, priority: i32, callback: ChainFn) {
        if self.frozen.load(Ordering::SeqCst) {
            error!(
                hook = HookPoint::SystemPromptExtend.name(),
                plugin, "hook registration after freeze — ignored"
            );
            return;
        }
        let registration_index = self.next_index.fetch_add(1, Ordering::SeqCst);
        let mut subs = self.chain.write().expect("hook registry poisoned");
        subs.push(Subscription {
            point: HookPoint::SystemPromptExtend,
            plugin: plugin.to_string(),
            priority,
            registration_index,
            callback,
        });
        subs.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
        debug!(plugin, priority, "prompt extender registered");
    }

    /// Drop every subscription registered under `plugin`.
    ///
    /// Only meaningful before the freeze — the plugin manager calls this to
    /// roll back a plugin whose `activate` failed partway through.
    pub fn remove_plugin(&self, plugin: &str) {
        if self.frozen.load(Ordering::SeqCst) {
            error!(plugin, "hook removal after freeze — ignored");
            return;
        }
        let mut removed = 0;
        {
            let mut subs = self.fanout.write().expect("hook registry poisoned");
            let before = subs.len();
            subs.retain(|s| s.plugin != plugin);
            removed += before - subs.len();
        }
        {
            let mut subs = self.chain.write().expect("hook registry poisoned");
            let before = subs.len();
            subs.retain(|s| s.plugin != plugin);
            removed += before - subs.len();
        }
        if removed > 0 {
            debug!(plugin, removed, "hook subscriptions rolled back");
        }
    }

    /// Freeze the registry. Idempotent.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
        debug!("hook kernel frozen");
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    /// Run every subscriber for `ctx.point` in deterministic order.
    ///
    /// Callback errors and panics are caught, logged with the hook and plugin
    /// names, and never interrupt the remaining subscribers.
    pub fn fire(&self, ctx: &mut HookContext<'_>) {
        let subs = self.fanout.read().expect("hook registry poisoned");
        let point = ctx.point;
        for sub in subs.iter().filter(|s| s.point == point) {
            let t = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| (sub.callback)(ctx)));
            let elapsed_ms = t.elapsed().as_millis() as u64;

            match outcome {
                Ok(Ok(())) => {
                    debug!(
                        hook = ctx.point.name(),
                        plugin = %sub.plugin,
                        duration_ms = elapsed_ms,
                        "hook subscriber completed"
                    );
                }
                Ok(Err(message)) => {
                    warn!(
                        hook = ctx.point.name(),
                        plugin = %sub.plugin,
                        duration_ms = elapsed_ms,
                        %message,
                        "hook subscriber failed"
                    );
                }
                Err(_) => {
                    error!(
                        hook = ctx.point.name(),
                        plugin = %sub.plugin,
                        duration_ms = elapsed_ms,
                        "hook subscriber panicked"
                    );
                }
            }
        }
    }

    /// Thread the system prompt through all chain extenders in order.
    ///
    /// A panicking extender is skipped; the text it received is passed on
    /// unchanged to the next one.
    pub fn extend_prompt(&self, base: String) -> String {
        let subs = self.chain.read().expect("hook registry poisoned");
        let mut text = base;
        for sub in subs.iter() {
            let input = text.clone();
            match catch_unwind(AssertUnwindSafe(|| (sub.callback)(input))) {
                Ok(next) => text = next,
                Err(_) => {
                    error!(
                        hook = HookPoint::SystemPromptExtend.name(),
                        plugin = %sub.plugin,
                        "prompt extender panicked — skipped"
                    );
                }
            }
        }
        text
    }

    /// Number of live subscriptions for one plugin (tests and diagnostics).
    pub fn subscription_count(&self, plugin: &str) -> usize {
        let fanout = self.fanout.read().expect("hook registry poisoned");
        let chain = self.chain.read().expect("hook registry poisoned");
        fanout.iter().filter(|s| s.plugin == plugin).count()
            + chain.iter().filter(|s| s.plugin == plugin).count()
    }
}

impl Default for HookKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use sibyl_core::types::ToolOutput;

    fn recorder(log: Arc<Mutex<Vec<String>>>, tag: &str) -> FanoutFn {
        let tag = tag.to_string();
        Arc::new(move |_ctx| {
            log.lock().unwrap().push(tag.clone());
            Ok(())
        })
    }

    #[test]
    fn fanout_runs_in_priority_plugin_registration_order() {
        let kernel = HookKernel::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        kernel.register_with_priority(
            HookPoint::TurnCompleted,
            "zeta",
            50,
            recorder(log.clone(), "zeta-50"),
        );
        kernel.register(HookPoint::TurnCompleted, "beta", recorder(log.clone(), "beta-100a"));
        kernel.register(HookPoint::TurnCompleted, "alpha", recorder(log.clone(), "alpha-100"));
        kernel.register(HookPoint::TurnCompleted, "beta", recorder(log.clone(), "beta-100b"));
        kernel.freeze();

        let mut ctx = HookContext::new(HookPoint::TurnCompleted, serde_json::json!({}));
        kernel.fire(&mut ctx);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["zeta-50", "alpha-100", "beta-100a", "beta-100b"]
        );
    }

    #[test]
    fn failing_subscriber_does_not_interrupt_the_rest() {
        let kernel = HookKernel::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        kernel.register(
            HookPoint::PostToolExecute,
            "bad",
            Arc::new(|_| Err("boom".to_string())),
        );
        kernel.register(
            HookPoint::PostToolExecute,
            "panics",
            Arc::new(|_| panic!("unhandled")),
        );
        kernel.register(HookPoint::PostToolExecute, "good", recorder(log.clone(), "good"));
        kernel.freeze();

        let mut ctx = HookContext::new(HookPoint::PostToolExecute, serde_json::json!({}));
        kernel.fire(&mut ctx);

        assert_eq!(*log.lock().unwrap(), vec!["good"]);
    }

    #[test]
    fn registration_after_freeze_is_ignored() {
        let kernel = HookKernel::new();
        kernel.freeze();
        kernel.register(HookPoint::TurnCompleted, "late", Arc::new(|_| Ok(())));
        assert_eq!(kernel.subscription_count("late"), 0);
    }

    #[test]
    fn chain_threads_text_in_order() {
        let kernel = HookKernel::new();
        kernel.register_prompt_extender("a", 10, Arc::new(|t| format!("{t} +first")));
        kernel.register_prompt_extender("b", 20, Arc::new(|t| format!("{t} +second")));
        kernel.freeze();

        assert_eq!(kernel.extend_prompt("base".into()), "base +first +second");
    }

    #[test]
    fn panicking_extender_passes_text_through() {
        let kernel = HookKernel::new();
        kernel.register_prompt_extender("a", 10, Arc::new(|_| panic!("boom")));
        kernel.register_prompt_extender("b", 20, Arc::new(|t| format!("{t}!")));
        kernel.freeze();

        assert_eq!(kernel.extend_prompt("base".into()), "base!");
    }

    #[test]
    fn short_circuit_result_is_visible_to_caller() {
        let kernel = HookKernel::new();
        kernel.register(
            HookPoint::PreToolExecute,
            "interceptor",
            Arc::new(|ctx| {
                ctx.short_circuit_result = Some(ToolOutput::success("cached"));
                Ok(())
            }),
        );
        kernel.freeze();

        let mut ctx = HookContext::new(
            HookPoint::PreToolExecute,
            serde_json::json!({"name": "web_search"}),
        );
        kernel.fire(&mut ctx);
        assert_eq!(ctx.short_circuit_result.unwrap().content, "cached");
    }

    #[test]
    fn remove_plugin_rolls_back_all_subscriptions() {
        let kernel = HookKernel::new();
        kernel.register(HookPoint::TurnCompleted, "doomed", Arc::new(|_| Ok(())));
        kernel.register_prompt_extender("doomed", 10, Arc::new(|t| t));
        kernel.register(HookPoint::TurnCompleted, "survivor", Arc::new(|_| Ok(())));

        kernel.remove_plugin("doomed");
        assert_eq!(kernel.subscription_count("doomed"), 0);
        assert_eq!(kernel.subscription_count("survivor"), 1);
    }
}
