//! Inspect command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use blewatch_core::ReplaySession;

use crate::cli::{InspectArgs, OutputFormat};
use crate::format::{FormatOptions, SessionSummary, format_session_csv, format_session_text};
use crate::util::write_output;

pub fn cmd_inspect(args: InspectArgs, output: Option<&PathBuf>, opts: &FormatOptions) -> Result<()> {
    let session = ReplaySession::load(&args.file)
        .with_context(|| format!("Failed to load session {}", args.file.display()))?;
    let summary = SessionSummary::from_session(&session);

    let content = match args.format {
        OutputFormat::Text => format_session_text(&summary, opts),
        OutputFormat::Json => opts.as_json(&summary)?,
        OutputFormat::Csv => format_session_csv(&summary),
    };
    write_output(output, &content)
}
