//! Shell step runner - runs each step through `sh -c`

use crate::runner::{StepContext, StepError, StepRunner, StepStatus};
use async_trait::async_trait;
use serde_yaml::Value;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// One parsed shell step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellStep {
    pub name: Option<String>,
    pub run: String,
    pub env: Vec<(String, String)>,
}

impl ShellStep {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.run)
    }
}

/// Runner that executes steps as shell commands
#[derive(Debug, Clone)]
pub struct ShellStepRunner {
    /// Shell executable
    shell: String,

    /// Working directory of every step
    workdir: Option<PathBuf>,
}

impl Default for ShellStepRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellStepRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            workdir: None,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }

    /// Parse a step sequence.
    ///
    /// Accepts a single command string, or a list whose items are command
    /// strings or `{ run, name?, env? }` mappings. Null means no steps.
    pub fn parse_steps(steps: &Value) -> Result<Vec<ShellStep>, StepError> {
        match steps {
            Value::Null => Ok(Vec::new()),
            Value::String(run) => Ok(vec![ShellStep {
                name: None,
                run: run.clone(),
                env: Vec::new(),
            }]),
            Value::Sequence(items) => items.iter().map(parse_step).collect(),
            other => Err(StepError::InvalidStep(format!(
                "steps must be a command or a list, got {:?}",
                other
            ))),
        }
    }

    async fn run_step(&self, step: &ShellStep, ctx: &StepContext) -> Result<StepStatus, StepError> {
        let mut command = Command::new(&self.shell);
        command.arg("-c").arg(&step.run).kill_on_drop(true);

        if let Some(dir) = &self.workdir {
            command.current_dir(dir);
        }

        command.env("JOBFLOW_JOB", &ctx.job_id);
        command.env("JOBFLOW_EVENT", &ctx.trigger.event);
        command.env("JOBFLOW_BRANCH", &ctx.trigger.branch);
        for (axis, value) in ctx.coordinate.iter() {
            command.env(format!("MATRIX_{}", env_name(axis)), value);
        }
        for (key, value) in ctx.env.iter().chain(&step.env) {
            command.env(key, value);
        }

        debug!("[{}] $ {}", ctx.instance, step.run);
        let output = command
            .output()
            .await
            .map_err(|e| StepError::Spawn(format!("{}: {}", self.shell, e)))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            debug!("[{}] {}", ctx.instance, line);
        }

        if output.status.success() {
            return Ok(StepStatus::Success);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let exit_code = output.status.code().unwrap_or(-1);
        warn!(
            "[{}] step '{}' exited with code {}: {}",
            ctx.instance,
            step.label(),
            exit_code,
            stderr.trim()
        );
        Ok(StepStatus::Failure(format!(
            "step '{}' exited with code {}",
            step.label(),
            exit_code
        )))
    }
}

#[async_trait]
impl StepRunner for ShellStepRunner {
    async fn run(&self, steps: &Value, ctx: &StepContext) -> Result<StepStatus, StepError> {
        let steps = Self::parse_steps(steps)?;
        info!("[{}] running {} step(s)", ctx.instance, steps.len());

        for step in &steps {
            let status = self.run_step(step, ctx).await?;
            if !status.is_success() {
                return Ok(status);
            }
        }

        Ok(StepStatus::Success)
    }
}

fn parse_step(item: &Value) -> Result<ShellStep, StepError> {
    match item {
        Value::String(run) => Ok(ShellStep {
            name: None,
            run: run.clone(),
            env: Vec::new(),
        }),
        Value::Mapping(map) => {
            let run = map
                .get("run")
                .and_then(Value::as_str)
                .ok_or_else(|| StepError::InvalidStep("step mapping needs a 'run' string".into()))?
                .to_string();
            let name = map.get("name").and_then(Value::as_str).map(str::to_string);

            let mut env = Vec::new();
            if let Some(vars) = map.get("env") {
                let vars = vars
                    .as_mapping()
                    .ok_or_else(|| StepError::InvalidStep("step 'env' must be a mapping".into()))?;
                for (k, v) in vars {
                    let key = k
                        .as_str()
                        .ok_or_else(|| StepError::InvalidStep("env keys must be strings".into()))?;
                    let value = match v {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => {
                            return Err(StepError::InvalidStep(format!(
                                "env value for '{}' must be a scalar",
                                key
                            )))
                        }
                    };
                    env.push((key.to_string(), value));
                }
            }

            Ok(ShellStep { name, run, env })
        }
        other => Err(StepError::InvalidStep(format!(
            "unsupported step {:?}",
            other
        ))),
    }
}

/// `python-version` -> `PYTHON_VERSION`
fn env_name(axis: &str) -> String {
    axis.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}
