//! CLI command implementations.

pub mod check;
pub mod parse;
pub mod run;

use std::path::Path;

use anyhow::{Context, Result};
use efs_core::model::Model;
use tracing::info;

/// Read a JSON model snapshot.
pub fn load_model(path: &Path) -> Result<Model> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let model: Model = serde_json::from_str(&content)
        .with_context(|| format!("parsing {}", path.display()))?;
    info!(path = %path.display(), elements = model.element_count(), "model loaded");
    Ok(model)
}

/// Print every message of the model, one line per message.
pub fn print_messages(model: &Model) {
    for (id, message) in model.all_messages() {
        println!("{}: {message}", model.qualified_name(id));
    }
}
