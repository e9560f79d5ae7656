//! User-declared command tools: a shell template with `{param}` slots.
//!
//! Actual subprocess execution lives outside the core behind `CommandRunner`.

use std::sync::Arc;

use async_trait::async_trait;

use sibyl_core::config::CustomToolConfig;
use sibyl_core::types::ToolOutput;

/// Executes a fully-interpolated command line and returns its output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str) -> Result<String, String>;
}

/// Runner used when no shell executor was wired in; every call errors.
pub struct UnavailableRunner;

#[async_trait]
impl CommandRunner for UnavailableRunner {
    async fn run(&self, _command: &str) -> Result<String, String> {
        Err("command execution is not available in this deployment".to_string())
    }
}

pub struct CommandTool {
    config: CustomToolConfig,
    runner: Arc<dyn CommandRunner>,
}

impl CommandTool {
    pub fn new(config: CustomToolConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    /// Substitute `{param}` placeholders. Every declared param is required;
    /// single quotes are escaped so an argument cannot break out of the
    /// template's quoting.
    fn interpolate(&self, args: &serde_json::Value) -> Result<String, String> {
        let mut command = self.config.command.clone();
        for param in &self.config.params {
            let value = args
                .get(param)
                .and_then(|v| v.as_str())
                .ok_or_else(|| format!("missing required parameter '{param}'"))?;
            let escaped = value.replace('\'', r"'\''");
            command = command.replace(&format!("{{{param}}}"), &escaped);
        }
        Ok(command)
    }
}

#[async_trait]
impl super::ToolExec for CommandTool {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn description(&self) -> &str {
        &self.config.description
    }

    fn parameters(&self) -> serde_json::Value {
        let props: serde_json::Map<String, serde_json::Value> = self
            .config
            .params
            .iter()
            .map(|p| (p.clone(), serde_json::json!({ "type": "string" })))
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": props,
            "required": self.config.params,
        })
    }

    fn guideline(&self) -> Option<&str> {
        self.config.guideline.as_deref()
    }

    async fn execute(&self, args: serde_json::Value) -> ToolOutput {
        let command = match self.interpolate(&args) {
            Ok(c) => c,
            Err(e) => return ToolOutput::error(e),
        };
        match self.runner.run(&command).await {
            Ok(output) => ToolOutput::success(output),
            Err(e) => ToolOutput::error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolExec;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<String>>);

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, command: &str) -> Result<String, String> {
            self.0.lock().unwrap().push(command.to_string());
            Ok("ran".to_string())
        }
    }

    fn config() -> CustomToolConfig {
        CustomToolConfig {
            name: "grep_logs".into(),
            description: "search the logs".into(),
            command: "grep '{pattern}' /var/log/app.log".into(),
            params: vec!["pattern".into()],
            guideline: None,
        }
    }

    #[tokio::test]
    async fn interpolates_parameters() {
        let runner = Arc::new(Recorder(Mutex::new(Vec::new())));
        let tool = CommandTool::new(config(), runner.clone());
        let out = tool
            .execute(serde_json::json!({ "pattern": "ERROR" }))
            .await;
        assert!(!out.is_error);
        assert_eq!(
            runner.0.lock().unwrap()[0],
            "grep 'ERROR' /var/log/app.log"
        );
    }

    #[tokio::test]
    async fn missing_parameter_is_an_error() {
        let tool = CommandTool::new(config(), Arc::new(UnavailableRunner));
        let out = tool.execute(serde_json::json!({})).await;
        assert!(out.is_error);
        assert!(out.content.contains("pattern"));
    }

    #[tokio::test]
    async fn single_quotes_cannot_break_the_template() {
        let runner = Arc::new(Recorder(Mutex::new(Vec::new())));
        let tool = CommandTool::new(config(), runner.clone());
        tool.execute(serde_json::json!({ "pattern": "x' ; rm -rf '" }))
            .await;
        let command = runner.0.lock().unwrap()[0].clone();
        assert!(command.contains(r"'\''"));
    }

    #[test]
    fn schema_marks_all_params_required() {
        let tool = CommandTool::new(config(), Arc::new(UnavailableRunner));
        let schema = tool.parameters();
        assert_eq!(schema["required"][0], "pattern");
    }
}
