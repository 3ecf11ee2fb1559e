//! Command-driven fix plugin configured from `[[fixes]]` tables.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use super::strategy::{EditResult, FixContext, FixPlugin};
use crate::domain::{Result, StrategyKind, WorkItem};

fn default_needs_approval_exit_code() -> i32 {
    3
}

/// Argv templates for one issue category.
///
/// Templates may use `{file}`, `{line}` and `{id}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixCommandConfig {
    pub category: String,
    pub primary: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alternative: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimal: Option<Vec<String>>,
    /// Exit code meaning "this needs a human decision".
    #[serde(default = "default_needs_approval_exit_code")]
    pub needs_approval_exit_code: i32,
}

impl FixCommandConfig {
    pub fn new(category: impl Into<String>, primary: Vec<String>) -> Self {
        Self {
            category: category.into(),
            primary,
            alternative: None,
            minimal: None,
            needs_approval_exit_code: default_needs_approval_exit_code(),
        }
    }

    pub fn template(&self, kind: StrategyKind) -> Option<&[String]> {
        match kind {
            StrategyKind::Primary => Some(&self.primary),
            StrategyKind::Alternative => self.alternative.as_deref(),
            StrategyKind::Minimal => self.minimal.as_deref(),
        }
    }
}

/// Runs the configured command for the selected strategy.
///
/// Exit 0 is success, `needs_approval_exit_code` routes to approval and any
/// other status is a failed attempt carrying the command output.
#[derive(Debug, Clone)]
pub struct CommandFix {
    config: FixCommandConfig,
}

impl CommandFix {
    pub fn new(config: FixCommandConfig) -> Self {
        Self { config }
    }
}

fn render(template: &[String], item: &WorkItem) -> Vec<String> {
    let file = item.location.file.to_string_lossy();
    let line = item
        .location
        .line
        .map(|l| l.to_string())
        .unwrap_or_default();
    template
        .iter()
        .map(|arg| {
            arg.replace("{file}", &file)
                .replace("{line}", &line)
                .replace("{id}", item.id.as_str())
        })
        .collect()
}

#[async_trait]
impl FixPlugin for CommandFix {
    fn name(&self) -> &str {
        &self.config.category
    }

    async fn edit(
        &self,
        item: &WorkItem,
        kind: StrategyKind,
        ctx: &FixContext,
    ) -> Result<EditResult> {
        let Some(template) = self.config.template(kind) else {
            return Ok(EditResult::failed(format!(
                "no {kind} command configured for category {}",
                self.config.category
            )));
        };
        let argv = render(template, item);
        let Some((exe, args)) = argv.split_first() else {
            return Ok(EditResult::failed(format!("empty {kind} command")));
        };

        debug!(item = %item.id, strategy = %kind, command = ?argv, "running fix command");
        let output = Command::new(exe)
            .args(args)
            .current_dir(&ctx.workspace)
            .env("REMEDY_ITEM_ID", item.id.as_str())
            .env("REMEDY_STRATEGY", kind.name())
            .env("REMEDY_APPROVED", if ctx.approved { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        let code = output.status.code().unwrap_or(-1);
        let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(stderr.trim());
        }

        Ok(if code == 0 {
            EditResult::Changed {
                note: (!text.is_empty()).then_some(text),
            }
        } else if code == self.config.needs_approval_exit_code {
            EditResult::needs_approval(if text.is_empty() {
                format!("{exe} requested approval")
            } else {
                text
            })
        } else {
            EditResult::failed(format!("{exe} exited with code {code}: {text}"))
        })
    }
}
