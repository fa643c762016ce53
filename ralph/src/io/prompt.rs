//! Prompt assembly for each agent invocation.
//!
//! A custom instructions file, when configured, is sent verbatim and replaces
//! the built-in instructions entirely. Otherwise the mode's template is
//! rendered with strict undefined handling, so a missing substitution is an
//! error rather than a hole in the prompt.

use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use minijinja::{Environment, UndefinedBehavior, context};
use tracing::{debug, warn};

use crate::core::completion::{COMPLETION_SIGNAL, contains_signal};
use crate::core::mode::RunMode;
use crate::run_config::RunConfiguration;

const BEADS_TEMPLATE: &str = include_str!("prompts/beads.md");
const PLAN_TEMPLATE: &str = include_str!("prompts/plan.md");
const PRD_TEMPLATE: &str = include_str!("prompts/prd.md");

/// Separator placed between prompt paragraphs.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Per-iteration inputs to the prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationContext {
    pub iteration: u32,
    pub max_iterations: u32,
}

/// Assembled prompt bytes, sent to the agent unmodified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptText(Vec<u8>);

impl PromptText {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_template("beads.md", BEADS_TEMPLATE)
            .expect("beads template should be valid");
        env.add_template("plan.md", PLAN_TEMPLATE)
            .expect("plan template should be valid");
        env.add_template("prd.md", PRD_TEMPLATE)
            .expect("prd template should be valid");
        Self { env }
    }

    fn render_mode(&self, config: &RunConfiguration) -> Result<String> {
        let ledger_path = display_path(&config.ledger_path);
        let rendered = match config.mode {
            RunMode::BeadsAuto | RunMode::BeadsParent => {
                let parent_id = match config.mode {
                    RunMode::BeadsParent => Some(
                        config
                            .issue
                            .as_deref()
                            .ok_or_else(|| anyhow!("beads-parent mode requires an issue id"))?,
                    ),
                    _ => None,
                };
                self.env.get_template("beads.md")?.render(context! {
                    signal => COMPLETION_SIGNAL,
                    parent_id => parent_id,
                })?
            }
            RunMode::Plan => {
                let plan_path = config
                    .plan_path
                    .as_deref()
                    .ok_or_else(|| anyhow!("plan mode requires a plan file"))?;
                self.env.get_template("plan.md")?.render(context! {
                    signal => COMPLETION_SIGNAL,
                    plan_path => display_path(plan_path),
                    ledger_path => ledger_path,
                })?
            }
            RunMode::Prd => {
                let prd_path = config
                    .prd_path
                    .as_deref()
                    .ok_or_else(|| anyhow!("prd mode requires a requirements file"))?;
                self.env.get_template("prd.md")?.render(context! {
                    signal => COMPLETION_SIGNAL,
                    prd_path => display_path(prd_path),
                    ledger_path => ledger_path,
                })?
            }
        };
        Ok(rendered)
    }
}

fn display_path(path: &Path) -> String {
    path.display().to_string()
}

/// Builds the prompt for each iteration. Output depends only on its inputs.
pub struct PromptBuilder {
    engine: PromptEngine,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            engine: PromptEngine::new(),
        }
    }

    /// Assemble the prompt for one iteration.
    pub fn build(&self, config: &RunConfiguration, iteration: &IterationContext) -> Result<PromptText> {
        if let Some(custom) = &config.custom_instructions {
            if !contains_signal(&custom.content) {
                warn!(
                    path = %custom.path.display(),
                    "custom instructions never mention the completion signal"
                );
            }
            return Ok(PromptText(custom.content.clone()));
        }

        let instructions = self
            .engine
            .render_mode(config)
            .with_context(|| format!("render {} prompt", config.mode))?;
        ensure_substituted(&instructions)?;

        let paragraphs = [
            instructions.trim().to_string(),
            format!(
                "This is session {} of at most {}.",
                iteration.iteration, iteration.max_iterations
            ),
        ];
        let text = paragraphs.join(PARAGRAPH_SEPARATOR) + "\n";
        debug!(mode = %config.mode, bytes = text.len(), "built prompt");
        Ok(PromptText(text.into_bytes()))
    }
}

/// Rendered templates must name the signal and carry no leftover template syntax.
fn ensure_substituted(rendered: &str) -> Result<()> {
    if !rendered.contains(COMPLETION_SIGNAL) {
        bail!("rendered prompt is missing the completion signal");
    }
    for marker in ["{{", "}}", "{%", "%}"] {
        if rendered.contains(marker) {
            bail!("rendered prompt contains unsubstituted template syntax {marker:?}");
        }
    }
    Ok(())
}
