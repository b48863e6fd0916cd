//! Prompt loading and rendering
//!
//! Loads prompt templates from override files in the config directory or
//! falls back to the embedded defaults, then renders them with Handlebars.

use std::path::Path;

use eyre::{Context, Result};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use crate::config::TemplateVariables;

use super::embedded;

/// Context for rendering the planning prompt
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlanningContext {
    /// Formatted conversation history
    pub history: String,
    /// Formatted tool list
    pub tools: String,
    /// User-provided hints
    pub user_hints: String,
    /// Formatted accumulated tool results
    pub tool_results: String,
}

/// Context for rendering the synthesis prompt
#[derive(Debug, Clone, Default, Serialize)]
pub struct SynthesisContext {
    pub identity: String,
    pub user_profile: String,
    pub history: String,
    pub tool_results: String,
}

/// The loaded prompt templates for one daemon instance
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub planning: String,
    pub synthesis: String,
    /// Identity, already rendered with the settings variables
    pub identity: String,
    /// User profile, already rendered with the settings variables
    pub user: String,
}

impl PromptSet {
    /// Load templates, preferring override files in `config_dir`
    ///
    /// Override files are `planning.md`, `synthesis.md`, `identity.md`, and
    /// `user.md`. Identity and user are rendered immediately with the
    /// settings variables; planning and synthesis keep their per-request
    /// slots.
    pub fn load(config_dir: Option<&Path>, vars: &TemplateVariables) -> Result<Self> {
        let planning = load_template(config_dir, "planning.md", embedded::PLANNING);
        let synthesis = load_template(config_dir, "synthesis.md", embedded::SYNTHESIS);
        let identity_raw = load_template(config_dir, "identity.md", embedded::IDENTITY);
        let user_raw = load_template(config_dir, "user.md", embedded::USER_PROFILE);

        let identity = render(&identity_raw, vars).context("failed to render identity template")?;
        let user = render(&user_raw, vars).context("failed to render user template")?;

        Ok(Self {
            planning,
            synthesis,
            identity,
            user,
        })
    }

    /// Build a prompt set directly from template strings (tests)
    pub fn from_templates(planning: &str, synthesis: &str, identity: &str, user: &str) -> Self {
        Self {
            planning: planning.to_string(),
            synthesis: synthesis.to_string(),
            identity: identity.to_string(),
            user: user.to_string(),
        }
    }

    /// Render the planning prompt for one iteration
    pub fn render_planning(&self, ctx: &PlanningContext) -> Result<String> {
        render(&self.planning, ctx).context("failed to render planning template")
    }

    /// Render the synthesis prompt
    pub fn render_synthesis(&self, ctx: &SynthesisContext) -> Result<String> {
        render(&self.synthesis, ctx).context("failed to render synthesis template")
    }
}

fn load_template(config_dir: Option<&Path>, filename: &str, fallback: &str) -> String {
    if let Some(dir) = config_dir {
        let path = dir.join(filename);
        if let Ok(content) = std::fs::read_to_string(&path) {
            debug!(?path, "load_template: using override");
            return content;
        }
    }
    fallback.to_string()
}

fn render<T: Serialize>(template: &str, data: &T) -> Result<String, handlebars::RenderError> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars.render_template(template, data)
}
