//! `efs check`: compile a model and report diagnostics.

use std::path::Path;

use anyhow::{bail, Result};
use efs_compiler::{CompileRequest, Compiler};
use efs_core::log::Level;

use super::{load_model, print_messages};

pub fn run(path: &Path) -> Result<()> {
    let mut model = load_model(path)?;
    let mut compiler = Compiler::new();
    compiler.compile(&mut model, CompileRequest::forced());
    print_messages(&model);

    let errors = model.error_count();
    let warnings = model
        .all_messages()
        .iter()
        .filter(|(_, m)| m.level == Level::Warning)
        .count();
    println!(
        "{} element(s), {} slot(s): {errors} error(s), {warnings} warning(s)",
        model.element_count(),
        compiler.slots().len()
    );
    if errors > 0 {
        bail!("{} has {errors} error(s)", path.display());
    }
    Ok(())
}
