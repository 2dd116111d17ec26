//! Command-line argument definitions.

use std::path::PathBuf;

use blewatch_core::{FilterField, QueryConfig, SortKey, SortOrder};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "blewatch")]
#[command(author, version, about = "Replay and inspect recorded BLE advertisement sessions", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "BLEWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// Disable colored output (also honors NO_COLOR)
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Compact JSON output
    #[arg(long, global = true)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Replay a session file through the device store and print the result
    Replay(ReplayArgs),

    /// Summarize a session file without replaying it
    Inspect(InspectArgs),

    /// Decode a realtime sensor frame given as hex
    Decode(DecodeArgs),
}

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Session file to replay
    pub file: PathBuf,

    /// Playback speed multiplier (overrides config)
    #[arg(short, long)]
    pub rate: Option<f64>,

    /// Restart from the first packet after the last one
    #[arg(long = "loop")]
    pub loop_playback: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    pub duration: Option<f64>,

    /// Print each device update as it is applied
    #[arg(long)]
    pub follow: bool,

    /// Record the replayed packets to a new session file
    #[arg(long, value_name = "PATH")]
    pub record: Option<PathBuf>,

    #[command(flatten)]
    pub query: QueryArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

/// Filter and sort flags. Each one overrides the `[query]` config section.
#[derive(Args, Debug, Default)]
pub struct QueryArgs {
    /// Hide devices below this RSSI (dBm)
    #[arg(long, allow_negative_numbers = true)]
    pub min_rssi: Option<i16>,

    /// Case-insensitive substring to match
    #[arg(long)]
    pub filter: Option<String>,

    /// Field the filter text is matched against (name, id)
    #[arg(long)]
    pub filter_field: Option<FilterField>,

    /// Sort key (rssi, lastSeen, rate, total, delta, name)
    #[arg(long)]
    pub sort: Option<SortKey>,

    /// Sort order (asc, desc)
    #[arg(long)]
    pub order: Option<SortOrder>,
}

impl QueryArgs {
    /// Layer the flags that were given over `base`.
    pub fn apply(&self, mut base: QueryConfig) -> QueryConfig {
        if let Some(min_rssi) = self.min_rssi {
            base.min_rssi = min_rssi;
        }
        if let Some(filter) = &self.filter {
            base.filter_text = filter.clone();
        }
        if let Some(field) = self.filter_field {
            base.filter_field = field;
        }
        if let Some(key) = self.sort {
            base.sort_key = key;
        }
        if let Some(order) = self.order {
            base.sort_order = order;
        }
        base
    }
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Session file to inspect
    pub file: PathBuf,

    /// Output format (csv lists one row per device)
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(Args, Debug)]
pub struct DecodeArgs {
    /// Frame bytes as hex; spaces, colons and dashes are ignored
    #[arg(required = true, num_args = 1..)]
    pub hex: Vec<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_replay_query_flags() {
        let cli = Cli::try_parse_from([
            "blewatch",
            "replay",
            "session.json",
            "--min-rssi",
            "-70",
            "--sort",
            "lastSeen",
            "--order",
            "asc",
            "--rate",
            "4",
        ])
        .unwrap();

        let Commands::Replay(args) = cli.command else {
            panic!("expected replay");
        };
        assert_eq!(args.rate, Some(4.0));
        let query = args.query.apply(QueryConfig::default());
        assert_eq!(query.min_rssi, -70);
        assert_eq!(query.sort_key, SortKey::LastSeen);
        assert_eq!(query.sort_order, SortOrder::Asc);
    }

    #[test]
    fn test_unset_flags_keep_base() {
        let base = QueryConfig::new()
            .min_rssi(-60)
            .filter(FilterField::Id, "aa:")
            .sort(SortKey::Total, SortOrder::Asc);
        let merged = QueryArgs::default().apply(base.clone());
        assert_eq!(merged, base);
    }

    #[test]
    fn test_rejects_unknown_sort_key() {
        let result = Cli::try_parse_from(["blewatch", "replay", "s.json", "--sort", "loudness"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_joins_hex_words() {
        let cli = Cli::try_parse_from(["blewatch", "decode", "0A", "FF", "--format", "json"]).unwrap();
        let Commands::Decode(args) = cli.command else {
            panic!("expected decode");
        };
        assert_eq!(args.hex, vec!["0A", "FF"]);
        assert_eq!(args.format, OutputFormat::Json);
    }
}
