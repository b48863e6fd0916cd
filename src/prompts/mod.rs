//! Prompt templates
//!
//! Embedded defaults plus optional per-file overrides from the config
//! directory, rendered with Handlebars.

pub mod embedded;
mod loader;

pub use loader::{PlanningContext, PromptSet, SynthesisContext};
