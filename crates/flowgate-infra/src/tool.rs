//! External command tools for `transform`.
//!
//! Each `[[tools]]` entry in `config.toml` becomes a `CommandTool` registered
//! in the action registry under its name. The command runs on the host with
//! `{input}` / `{output}` substituted into its arguments.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use flowgate_core::workflow::registry::{Action, ActionError, ActionRegistry};
use flowgate_types::config::ToolConfig;
use flowgate_types::workflow::ActionParams;

const INPUT_TOKEN: &str = "{input}";
const OUTPUT_TOKEN: &str = "{output}";

/// Runs a host command that derives an artifact from the current resource.
#[derive(Debug, Clone)]
pub struct CommandTool {
    name: String,
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandTool {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            name: config.name.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn expand_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_TOKEN, &input)
                    .replace(OUTPUT_TOKEN, &output)
            })
            .collect()
    }

    async fn run(&self, resource: &Path, params: &ActionParams) -> Result<Option<PathBuf>, ActionError> {
        let output = params
            .get_str("output")
            .map(PathBuf::from)
            .ok_or(ActionError::MissingParameter {
                action: "transform",
                param: "output",
            })?;

        let args = self.expand_args(resource, &output);
        let start = Instant::now();

        let child = tokio::process::Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                ActionError::Failed(format!(
                    "failed to spawn '{}' for tool '{}': {e}",
                    self.command, self.name
                ))
            })?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                ActionError::Failed(format!(
                    "tool '{}' timed out after {}s",
                    self.name,
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| ActionError::Failed(format!("tool '{}' failed: {e}", self.name)))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            return Err(ActionError::Failed(format!(
                "tool '{}' exited with {}: {}",
                self.name,
                result.status,
                stderr.trim()
            )));
        }

        tracing::debug!(
            tool = self.name.as_str(),
            resource = %resource.display(),
            output = %output.display(),
            duration_ms = start.elapsed().as_millis() as u64,
            "tool finished"
        );
        Ok(Some(output))
    }
}

impl Action for CommandTool {
    async fn invoke(
        &self,
        resource: &Path,
        params: &ActionParams,
    ) -> Result<Option<PathBuf>, ActionError> {
        self.run(resource, params).await
    }
}

/// Register every configured tool. Returns how many were registered.
pub fn register_tools(registry: &ActionRegistry, tools: &[ToolConfig]) -> usize {
    for config in tools {
        let tool = CommandTool::new(config);
        if registry.register(tool.name().to_string(), tool) {
            tracing::warn!(tool = config.name.as_str(), "tool registered twice, last one wins");
        } else {
            tracing::info!(
                tool = config.name.as_str(),
                command = config.command.as_str(),
                "tool registered"
            );
        }
    }
    tools.len()
}
