use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use sibyl_hooks::HookKernel;

use crate::manifest::{Manifest, ManifestEntry};
use crate::plugin::{Plugin, PluginContext, PluginRecord, PluginStatus};

/// Constructor table keyed by `module::class` — the in-process rendition of
/// the manifest's module locator.
#[derive(Default)]
pub struct PluginRegistry {
    constructors: HashMap<String, Box<dyn Fn() -> Box<dyn Plugin> + Send + Sync>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, locator: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.constructors.insert(locator.into(), Box::new(constructor));
    }

    fn construct(&self, locator: &str) -> Option<Box<dyn Plugin>> {
        self.constructors.get(locator).map(|c| c())
    }
}

/// Owns the hook kernel and every loaded plugin instance.
pub struct PluginManager {
    kernel: Arc<HookKernel>,
    registry: PluginRegistry,
    data_root: PathBuf,
    /// Activation order; deactivation walks this in reverse.
    active: Vec<(String, Box<dyn Plugin>)>,
    records: Vec<PluginRecord>,
}

impl PluginManager {
    pub fn new(kernel: Arc<HookKernel>, registry: PluginRegistry, data_root: PathBuf) -> Self {
        Self {
            kernel,
            registry,
            data_root,
            active: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn kernel(&self) -> &Arc<HookKernel> {
        &self.kernel
    }

    pub fn statuses(&self) -> &[PluginRecord] {
        &self.records
    }

    pub fn status_of(&self, name: &str) -> Option<&PluginStatus> {
        self.records
            .iter()
            .find(|r| r.name == name)
            .map(|r| &r.status)
    }

    /// Load and activate every manifest entry, then freeze the hook kernel.
    ///
    /// Activation order is a topological sort of the enabled dependency graph
    /// with name-ascending tie-breaking — deterministic across runs. A failed
    /// plugin has its partial hook subscriptions rolled back, and its
    /// dependents are skipped; nothing it did leaks into other plugins.
    pub fn load_all(&mut self, manifest: &Manifest) {
        let mut status: BTreeMap<String, PluginStatus> = BTreeMap::new();

        for (name, reason) in &manifest.malformed {
            status.insert(
                name.clone(),
                PluginStatus::FailedLoad {
                    reason: reason.clone(),
                },
            );
        }

        let mut enabled: BTreeMap<String, &ManifestEntry> = BTreeMap::new();
        for entry in &manifest.entries {
            if entry.enabled {
                enabled.insert(entry.name.clone(), entry);
            } else {
                status.insert(entry.name.clone(), PluginStatus::Disabled);
            }
        }

        let order = match topo_sort(&enabled) {
            Ok(order) => order,
            Err(cycle_members) => {
                // Cycle members fail to load; the rest still get an order.
                for name in &cycle_members {
                    status.insert(
                        name.clone(),
                        PluginStatus::FailedLoad {
                            reason: "dependency cycle".to_string(),
                        },
                    );
                    enabled.remove(name);
                }
                topo_sort(&enabled).unwrap_or_default()
            }
        };

        for name in order {
            let entry = enabled[&name];

            // A dependency that did not reach Active skips this plugin.
            if let Some(missing) = entry.dependencies.iter().find(|dep| {
                !matches!(status.get(dep.as_str()), Some(PluginStatus::Active))
            }) {
                info!(plugin = %name, dependency = %missing, "skipped: dependency not active");
                status.insert(
                    name.clone(),
                    PluginStatus::SkippedDependency {
                        missing: missing.clone(),
                    },
                );
                continue;
            }

            // Import failure (no such constructor) is a load failure,
            // distinct from an activation failure.
            let Some(instance) = self.registry.construct(&entry.locator()) else {
                let reason = format!("no constructor registered for '{}'", entry.locator());
                error!(plugin = %name, %reason, "plugin load failed");
                status.insert(name.clone(), PluginStatus::FailedLoad { reason });
                continue;
            };

            match self.activate_one(entry, instance) {
                Ok(instance) => {
                    info!(plugin = %name, "plugin active");
                    status.insert(name.clone(), PluginStatus::Active);
                    self.active.push((name.clone(), instance));
                }
                Err(reason) => {
                    error!(plugin = %name, %reason, "plugin activation failed");
                    // Roll back whatever the plugin registered before failing.
                    self.kernel.remove_plugin(&name);
                    status.insert(name.clone(), PluginStatus::FailedActivate { reason });
                }
            }
        }

        self.kernel.freeze();

        self.records = status
            .into_iter()
            .map(|(name, status)| PluginRecord { name, status })
            .collect();
    }

    fn activate_one(
        &self,
        entry: &ManifestEntry,
        mut instance: Box<dyn Plugin>,
    ) -> Result<Box<dyn Plugin>, String> {
        let data_dir = self.data_root.join(&entry.name);
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| format!("cannot create data dir: {e}"))?;

        let config = match &entry.config_file {
            Some(path) => {
                let resolved = if std::path::Path::new(path).is_absolute() {
                    PathBuf::from(path)
                } else {
                    self.data_root.join(path)
                };
                let text = std::fs::read_to_string(&resolved)
                    .map_err(|e| format!("cannot read config {}: {e}", resolved.display()))?;
                text.parse::<toml::Value>()
                    .map_err(|e| format!("plugin config is not valid TOML: {e}"))?
            }
            None => toml::Value::Table(toml::value::Table::new()),
        };

        let mut ctx = PluginContext {
            plugin_name: entry.name.clone(),
            kernel: &self.kernel,
            data_dir,
            config,
            capabilities: entry.capabilities.clone(),
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| instance.activate(&mut ctx)));
        match outcome {
            Ok(Ok(())) => Ok(instance),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("activate panicked".to_string()),
        }
    }

    /// Deactivate in reverse activation order. Errors are logged and do not
    /// abort the remaining deactivations.
    pub fn shutdown(&mut self) {
        while let Some((name, mut plugin)) = self.active.pop() {
            let outcome = catch_unwind(AssertUnwindSafe(|| plugin.deactivate()));
            match outcome {
                Ok(Ok(())) => info!(plugin = %name, "plugin deactivated"),
                Ok(Err(e)) => warn!(plugin = %name, error = %e, "deactivate failed"),
                Err(_) => error!(plugin = %name, "deactivate panicked"),
            }
        }
    }
}

/// Kahn's algorithm over the enabled entries. Ready nodes are drained in
/// name order, so ties always break ascending. Returns the cycle members on
/// failure.
fn topo_sort(enabled: &BTreeMap<String, &ManifestEntry>) -> Result<Vec<String>, Vec<String>> {
    let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (name, entry) in enabled {
        indegree.entry(name.as_str()).or_insert(0);
        for dep in &entry.dependencies {
            // Edges to plugins outside the enabled set are resolved later as
            // skipped dependencies; they don't constrain the order.
            if enabled.contains_key(dep) {
                *indegree.entry(name.as_str()).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(name.as_str());
            }
        }
    }

    let mut ready: BTreeSet<&str> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&n, _)| n)
        .collect();
    let mut order: Vec<String> = Vec::with_capacity(enabled.len());

    while let Some(&name) = ready.iter().next() {
        ready.remove(name);
        order.push(name.to_string());
        if let Some(children) = dependents.get(name) {
            for &child in children {
                let d = indegree.get_mut(child).expect("child tracked");
                *d -= 1;
                if *d == 0 {
                    ready.insert(child);
                }
            }
        }
    }

    if order.len() == enabled.len() {
        Ok(order)
    } else {
        let in_order: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        Err(enabled
            .keys()
            .filter(|n| !in_order.contains(n.as_str()))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use sibyl_hooks::HookPoint;

    use crate::plugin::PluginError;

    struct RecordingPlugin {
        log: Arc<Mutex<Vec<String>>>,
        name_for_log: String,
        fail: bool,
        subscribe: bool,
    }

    impl Plugin for RecordingPlugin {
        fn activate(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
            if self.subscribe {
                ctx.kernel.register(
                    HookPoint::TurnCompleted,
                    &ctx.plugin_name,
                    Arc::new(|_| Ok(())),
                );
            }
            if self.fail {
                return Err(PluginError::Activate("induced failure".into()));
            }
            self.log.lock().unwrap().push(self.name_for_log.clone());
            Ok(())
        }
    }

    fn registry_with(
        log: &Arc<Mutex<Vec<String>>>,
        specs: &[(&str, bool, bool)],
    ) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        for &(name, fail, subscribe) in specs {
            let log = Arc::clone(log);
            let name = name.to_string();
            registry.register(format!("builtin::{name}"), move || {
                Box::new(RecordingPlugin {
                    log: Arc::clone(&log),
                    name_for_log: name.clone(),
                    fail,
                    subscribe,
                })
            });
        }
        registry
    }

    fn manifest(entries: &[(&str, &[&str])]) -> Manifest {
        let text = entries
            .iter()
            .map(|(name, deps)| {
                let deps = deps
                    .iter()
                    .map(|d| format!("\"{d}\""))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!(
                    "[plugin.{name}]\nenabled = true\nmodule = \"builtin\"\n\
                     class = \"{name}\"\ndependencies = [{deps}]\n"
                )
            })
            .collect::<String>();
        Manifest::parse(&text).unwrap()
    }

    #[test]
    fn activation_order_is_topological_with_name_tiebreak() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(
            &log,
            &[("a", false, false), ("b", false, false), ("c", false, false)],
        );
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PluginManager::new(
            Arc::new(HookKernel::new()),
            registry,
            dir.path().to_path_buf(),
        );

        // c depends on b; a and b are both roots → a first by name.
        manager.load_all(&manifest(&[("c", &["b"]), ("b", &[]), ("a", &[])]));
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        assert!(manager.status_of("c").unwrap().is_active());
    }

    #[test]
    fn cycle_members_fail_to_load_and_rest_proceed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(&log, &[("x", false, false), ("y", false, false), ("z", false, false)]);
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PluginManager::new(
            Arc::new(HookKernel::new()),
            registry,
            dir.path().to_path_buf(),
        );

        manager.load_all(&manifest(&[("x", &["y"]), ("y", &["x"]), ("z", &[])]));
        assert!(matches!(
            manager.status_of("x").unwrap(),
            PluginStatus::FailedLoad { .. }
        ));
        assert!(matches!(
            manager.status_of("y").unwrap(),
            PluginStatus::FailedLoad { .. }
        ));
        assert!(manager.status_of("z").unwrap().is_active());
    }

    #[test]
    fn failed_activation_rolls_back_subscriptions_and_skips_dependents() {
        let log = Arc::new(Mutex::new(Vec::new()));
        // "bad" subscribes a hook, then fails.
        let registry = registry_with(&log, &[("bad", true, true), ("child", false, false)]);
        let kernel = Arc::new(HookKernel::new());
        let dir = tempfile::tempdir().unwrap();
        let mut manager =
            PluginManager::new(Arc::clone(&kernel), registry, dir.path().to_path_buf());

        manager.load_all(&manifest(&[("bad", &[]), ("child", &["bad"])]));

        assert!(matches!(
            manager.status_of("bad").unwrap(),
            PluginStatus::FailedActivate { .. }
        ));
        assert_eq!(
            manager.status_of("child").unwrap(),
            &PluginStatus::SkippedDependency {
                missing: "bad".to_string()
            }
        );
        // The invariant: no subscriber of a failed plugin survives.
        assert_eq!(kernel.subscription_count("bad"), 0);
    }

    #[test]
    fn kernel_is_frozen_after_load() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(&log, &[("p", false, false)]);
        let kernel = Arc::new(HookKernel::new());
        let dir = tempfile::tempdir().unwrap();
        let mut manager =
            PluginManager::new(Arc::clone(&kernel), registry, dir.path().to_path_buf());
        manager.load_all(&manifest(&[("p", &[])]));
        assert!(kernel.is_frozen());
    }

    #[test]
    fn disabled_and_unregistered_plugins_are_reported() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry_with(&log, &[("real", false, false)]);
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PluginManager::new(
            Arc::new(HookKernel::new()),
            registry,
            dir.path().to_path_buf(),
        );

        let m = Manifest::parse(
            r#"
[plugin.real]
enabled = true
module = "builtin"
class = "real"

[plugin.off]
enabled = false
module = "builtin"
class = "off"

[plugin.ghost]
enabled = true
module = "builtin"
class = "Ghost"
"#,
        )
        .unwrap();
        manager.load_all(&m);

        assert!(manager.status_of("real").unwrap().is_active());
        assert_eq!(manager.status_of("off").unwrap(), &PluginStatus::Disabled);
        assert!(matches!(
            manager.status_of("ghost").unwrap(),
            PluginStatus::FailedActivate { .. } | PluginStatus::FailedLoad { .. }
        ));
    }

    #[test]
    fn shutdown_deactivates_in_reverse_order() {
        struct OrderedDrop {
            order: Arc<Mutex<Vec<&'static str>>>,
            tag: &'static str,
        }
        impl Plugin for OrderedDrop {
            fn activate(&mut self, _ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
                Ok(())
            }
            fn deactivate(&mut self) -> Result<(), PluginError> {
                self.order.lock().unwrap().push(self.tag);
                Ok(())
            }
        }

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        for tag in ["first", "second"] {
            let order = Arc::clone(&order);
            registry.register(format!("builtin::{tag}"), move || {
                Box::new(OrderedDrop {
                    order: Arc::clone(&order),
                    tag,
                })
            });
        }
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PluginManager::new(
            Arc::new(HookKernel::new()),
            registry,
            dir.path().to_path_buf(),
        );
        // "second" depends on "first" → activates after it.
        manager.load_all(&manifest(&[("first", &[]), ("second", &["first"])]));
        manager.shutdown();

        assert_eq!(*order.lock().unwrap(), vec!["second", "first"]);
    }

    #[test]
    fn static_count_sanity() {
        // Guard against accidental drift in activation bookkeeping.
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        struct Counting;
        impl Plugin for Counting {
            fn activate(&mut self, _ctx: &mut PluginContext<'_>) -> Result<(), PluginError> {
                COUNTER.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
        let mut registry = PluginRegistry::new();
        registry.register("builtin::n", || Box::new(Counting));
        let dir = tempfile::tempdir().unwrap();
        let mut manager = PluginManager::new(
            Arc::new(HookKernel::new()),
            registry,
            dir.path().to_path_buf(),
        );
        manager.load_all(&manifest(&[("n", &[])]));
        assert_eq!(COUNTER.load(Ordering::SeqCst), 1);
    }
}
