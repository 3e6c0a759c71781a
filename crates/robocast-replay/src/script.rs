use std::path::Path;

use anyhow::Context;
use robocast_core::RawChannelEvent;
use robocast_core::controls::Command;
use serde::Deserialize;

/// A recorded channel session to feed through the compositor.
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub room: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    Event { event: RawChannelEvent },
    Swap,
    Wait { ms: u64 },
    Command { command: String },
}

impl Step {
    pub fn command(&self) -> anyhow::Result<Option<Command>> {
        match self {
            Step::Command { command } => Ok(Some(command.parse()?)),
            _ => Ok(None),
        }
    }
}

impl Script {
    pub fn parse(json: &str) -> anyhow::Result<Self> {
        let script: Script = serde_json::from_str(json).context("invalid replay script")?;
        for (i, step) in script.steps.iter().enumerate() {
            step.command().with_context(|| format!("step {i}"))?;
        }
        Ok(script)
    }

    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&json)
    }
}
