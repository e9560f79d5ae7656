use std::path::PathBuf;

use thiserror::Error;

use sibyl_hooks::HookKernel;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("activation failed: {0}")]
    Activate(String),

    #[error("deactivation failed: {0}")]
    Deactivate(String),

    #[error("config error: {0}")]
    Config(String),
}

/// Runtime state of one manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginStatus {
    /// Instantiated, not yet activated.
    Loaded,
    Active,
    FailedLoad { reason: String },
    FailedActivate { reason: String },
    /// A declared dependency did not reach `Active`.
    SkippedDependency { missing: String },
    Disabled,
}

impl PluginStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, PluginStatus::Active)
    }
}

/// One plugin's name and where it ended up.
#[derive(Debug, Clone)]
pub struct PluginRecord {
    pub name: String,
    pub status: PluginStatus,
}

/// Everything a plugin may touch during activation.
///
/// The hook kernel is still mutable at this point; it freezes once every
/// plugin has been processed.
pub struct PluginContext<'a> {
    pub plugin_name: String,
    pub kernel: &'a HookKernel,
    /// Plugin-exclusive scratch directory, created before activation.
    pub data_dir: PathBuf,
    /// Contents of the manifest's `config_file`, when one was declared.
    pub config: toml::Value,
    pub capabilities: Vec<String>,
}

/// In-process plugin interface. Implementations register hook subscriptions
/// during `activate` and release external resources in `deactivate`.
pub trait Plugin: Send {
    fn activate(&mut self, ctx: &mut PluginContext<'_>) -> Result<(), PluginError>;

    fn deactivate(&mut self) -> Result<(), PluginError> {
        Ok(())
    }
}
