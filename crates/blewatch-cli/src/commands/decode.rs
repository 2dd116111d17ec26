//! Decode command implementation.

use std::path::PathBuf;

use anyhow::{Result, bail};
use blewatch_core::decoder::{REALTIME_FRAME_LEN, parse_realtime_frame};
use blewatch_types::hex;

use crate::cli::{DecodeArgs, OutputFormat};
use crate::format::{FormatOptions, format_frame_csv, format_frame_text};
use crate::util::write_output;

/// Join the hex words given on the command line into canonical byte pairs.
///
/// Accepts `0A FF`, `0AFF`, `0a:ff` and `0a-ff` alike.
fn normalize_hex(words: &[String]) -> Result<String> {
    let digits: String = words
        .iter()
        .flat_map(|w| w.chars())
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();
    if digits.len() % 2 != 0 {
        bail!("Odd number of hex digits ({})", digits.len());
    }
    let pairs: Vec<&str> = (0..digits.len())
        .step_by(2)
        .filter_map(|i| digits.get(i..i + 2))
        .collect();
    if pairs.len() * 2 != digits.len() {
        bail!("Hex input must be ASCII");
    }
    Ok(pairs.join(" "))
}

pub fn cmd_decode(args: DecodeArgs, output: Option<&PathBuf>, opts: &FormatOptions) -> Result<()> {
    let bytes = hex::decode(&normalize_hex(&args.hex)?)?;
    let Some(frame) = parse_realtime_frame(&bytes) else {
        bail!(
            "Frame too short: {} bytes (need {})",
            bytes.len(),
            REALTIME_FRAME_LEN
        );
    };

    let content = match args.format {
        OutputFormat::Text => format_frame_text(&frame, &bytes, opts),
        OutputFormat::Json => opts.as_json(&frame)?,
        OutputFormat::Csv => format_frame_csv(&frame),
    };
    write_output(output, &content)
}
