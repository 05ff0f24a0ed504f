//! Prompt Loader
//!
//! Loads prompt templates from the checkout's override directory or falls back
//! to embedded defaults.

use std::path::{Path, PathBuf};

use eyre::{Result, eyre};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use super::embedded;

/// Override directory, relative to the checkout
pub const OVERRIDE_DIR: &str = ".resolvd/prompts";

/// Loads and renders prompt templates
pub struct PromptLoader {
    /// Handlebars template engine
    hbs: Handlebars<'static>,
    /// User override directory (`<checkout>/.resolvd/prompts/`)
    user_dir: Option<PathBuf>,
}

impl PromptLoader {
    /// Create a loader that honours overrides in `checkout`
    pub fn new(checkout: impl AsRef<Path>) -> Self {
        let user_dir = checkout.as_ref().join(OVERRIDE_DIR);
        let exists = user_dir.is_dir();
        debug!(?user_dir, %exists, "PromptLoader::new: called");

        Self {
            hbs: Self::engine(),
            user_dir: if exists { Some(user_dir) } else { None },
        }
    }

    /// Create a loader that only uses embedded prompts
    pub fn embedded_only() -> Self {
        debug!("PromptLoader::embedded_only: called");
        Self {
            hbs: Self::engine(),
            user_dir: None,
        }
    }

    fn engine() -> Handlebars<'static> {
        let mut hbs = Handlebars::new();
        // Prompts carry source code; HTML escaping would corrupt it
        hbs.register_escape_fn(handlebars::no_escape);
        hbs
    }

    /// Load a template by name
    ///
    /// Checks in order:
    /// 1. User override: `.resolvd/prompts/{name}.pmt`
    /// 2. Embedded fallback
    pub fn load_template(&self, name: &str) -> Result<String> {
        debug!(%name, "PromptLoader::load_template: called");
        if let Some(ref user_dir) = self.user_dir {
            let path = user_dir.join(format!("{}.pmt", name));
            if path.exists() {
                debug!(?path, "PromptLoader::load_template: found in user override");
                return std::fs::read_to_string(&path)
                    .map_err(|e| eyre!("Failed to read user prompt {}: {}", path.display(), e));
            }
            debug!(?path, "PromptLoader::load_template: not found in user override");
        }

        if let Some(content) = embedded::get_embedded(name) {
            debug!(%name, "PromptLoader::load_template: found in embedded");
            return Ok(content.to_string());
        }

        debug!(%name, "PromptLoader::load_template: not found anywhere");
        Err(eyre!("Prompt template not found: {}", name))
    }

    /// Render a template with the given context
    pub fn render<T: Serialize>(&self, template_name: &str, context: &T) -> Result<String> {
        debug!(%template_name, "PromptLoader::render: called");
        let template = self.load_template(template_name)?;
        self.hbs
            .render_template(&template, context)
            .map_err(|e| eyre!("Failed to render template {}: {}", template_name, e))
    }
}
