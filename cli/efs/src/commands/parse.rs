//! `efs parse`: print the normalised form of a text.

use anyhow::{Context, Result};
use efs_lang::{parse_expression, parse_statement};

pub fn run(text: &str, statement: bool) -> Result<()> {
    let normalised = if statement {
        parse_statement(text).map(|s| s.to_string())
    } else {
        parse_expression(text).map(|e| e.to_string())
    }
    .with_context(|| format!("parsing '{text}'"))?;
    println!("{normalised}");
    Ok(())
}
