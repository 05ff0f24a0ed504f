//! Prompt Template System
//!
//! Loads and renders `.pmt` (prompt template) files used by the oracle and
//! handed to editing agents.
//!
//! Template loading chain:
//! 1. `<checkout>/.resolvd/prompts/{name}.pmt` (override)
//! 2. Embedded fallback compiled from `rd/prompts/`
//!
//! Templates use Handlebars syntax for variable substitution.

pub mod embedded;
mod loader;

pub use loader::{OVERRIDE_DIR, PromptLoader};
