use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::RunConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "xlsx-kwfilter", version)]
#[command(
    about = "Filter xlsx rows by keyword and append the matches to a results sheet",
    long_about = None
)]
pub struct Cli {
    /// Source workbook, or a directory of .xlsx files
    #[arg(short, long)]
    pub input: PathBuf,

    /// Sheet to read from each input (default: first sheet)
    #[arg(long)]
    pub input_sheet: Option<String>,

    /// Read every sheet of each input; sources become file:sheet:row
    #[arg(long, conflicts_with = "input_sheet")]
    pub all_sheets: bool,

    /// Destination workbook, created if absent
    #[arg(short, long)]
    pub output: PathBuf,

    /// Comma-separated keywords
    #[arg(short, long)]
    pub keywords: Option<String>,

    /// File with one keyword per line
    #[arg(long)]
    pub keywords_file: Option<PathBuf>,

    /// Comma-separated column names to search (default: all columns)
    #[arg(short, long)]
    pub columns: Option<String>,

    /// Target sheet in the output workbook
    #[arg(long, default_value = RunConfig::DEFAULT_SHEET)]
    pub sheet: String,

    /// Count matches without writing the output
    #[arg(long)]
    pub dry_run: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Default log filter for the `-v` count; `RUST_LOG` still wins.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_flags_and_verbosity() {
        let cli = Cli::try_parse_from([
            "xlsx-kwfilter",
            "-i",
            "in.xlsx",
            "-o",
            "out.xlsx",
            "-k",
            "fail,error",
            "-c",
            "Message",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.input, PathBuf::from("in.xlsx"));
        assert_eq!(cli.keywords.as_deref(), Some("fail,error"));
        assert_eq!(cli.sheet, "results");
        assert!(!cli.dry_run);
        assert_eq!(cli.log_level(), "debug");
    }

    #[test]
    fn output_is_required() {
        let err = Cli::try_parse_from(["xlsx-kwfilter", "-i", "in.xlsx", "-k", "x"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn all_sheets_excludes_input_sheet() {
        let err = Cli::try_parse_from([
            "xlsx-kwfilter",
            "-i",
            "in.xlsx",
            "-o",
            "out.xlsx",
            "--input-sheet",
            "Data",
            "--all-sheets",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
