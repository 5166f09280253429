//! `efs run`: evaluate a model for a number of cycles.

use std::path::Path;

use anyhow::{bail, Context, Result};
use efs_runtime::{EngineConfig, Session};

use super::{load_model, print_messages};

pub fn run(path: &Path, config: EngineConfig, json: bool) -> Result<()> {
    let model = load_model(path)?;
    let mut session = Session::with_config(model, config);
    session.compile_synchronous(true, true);
    if session.model().error_count() > 0 {
        print_messages(session.model());
        bail!("{} does not compile", path.display());
    }

    let reports = session.run_configured();
    let snapshot = session.snapshot();
    if json {
        let out = serde_json::to_string_pretty(&snapshot).context("serializing snapshot")?;
        println!("{out}");
    } else {
        for report in &reports {
            println!(
                "cycle {}: {} rule(s) run, {} fired, {} failed, {} range violation(s), {} invalid assignment(s)",
                report.cycle,
                report.rules_run,
                report.fired,
                report.failures,
                report.range_violations,
                report.invalid_assignments
            );
        }
        for (name, value) in &snapshot {
            println!("{name} = {}", value.display(session.model()));
        }
        print_messages(session.model());
    }
    Ok(())
}
