//! Immutable run configuration.

use std::path::PathBuf;

use crate::cli::Cli;
use crate::error::{Error, Result};

const MAX_SHEET_NAME: usize = 31;
const FORBIDDEN_SHEET_CHARS: &[char] = &['[', ']', ':', '*', '?', '/', '\\'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub input: PathBuf,
    /// `None` reads the first sheet of each input.
    pub input_sheet: Option<String>,
    /// Read every sheet of each input instead of one.
    pub all_sheets: bool,
    pub output: PathBuf,
    pub keywords: Option<String>,
    pub keywords_file: Option<PathBuf>,
    /// `None` searches every column.
    pub columns: Option<Vec<String>>,
    pub sheet: String,
    pub dry_run: bool,
}

impl RunConfig {
    pub const DEFAULT_SHEET: &'static str = "results";

    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            input_sheet: None,
            all_sheets: false,
            output: output.into(),
            keywords: None,
            keywords_file: None,
            columns: None,
            sheet: Self::DEFAULT_SHEET.to_owned(),
            dry_run: false,
        }
    }

    pub fn with_keywords(mut self, keywords: &str) -> Self {
        self.keywords = Some(keywords.to_owned());
        self
    }

    pub fn with_columns(mut self, columns: &str) -> Self {
        self.columns = split_list(columns);
        self
    }

    pub fn with_sheet(mut self, sheet: &str) -> Self {
        self.sheet = sheet.to_owned();
        self
    }

    pub fn with_all_sheets(mut self, all_sheets: bool) -> Self {
        self.all_sheets = all_sheets;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Checks what can be checked without touching any file.
    pub fn validate(&self) -> Result<()> {
        if self.keywords.is_none() && self.keywords_file.is_none() {
            return Err(Error::Config(
                "no keywords given: pass --keywords and/or --keywords-file".into(),
            ));
        }
        if self.all_sheets && self.input_sheet.is_some() {
            return Err(Error::Config(
                "--input-sheet and --all-sheets cannot be combined".into(),
            ));
        }
        validate_sheet_name(&self.sheet)
    }
}

impl TryFrom<&Cli> for RunConfig {
    type Error = Error;

    fn try_from(cli: &Cli) -> Result<Self> {
        let config = Self {
            input: cli.input.clone(),
            input_sheet: cli.input_sheet.clone(),
            all_sheets: cli.all_sheets,
            output: cli.output.clone(),
            keywords: cli.keywords.clone(),
            keywords_file: cli.keywords_file.clone(),
            columns: cli.columns.as_deref().and_then(split_list),
            sheet: cli.sheet.clone(),
            dry_run: cli.dry_run,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Worksheet names as Excel accepts them.
pub fn validate_sheet_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    let problem = if len == 0 {
        Some("must not be empty".to_owned())
    } else if len > MAX_SHEET_NAME {
        Some(format!("is longer than {MAX_SHEET_NAME} characters"))
    } else if let Some(c) = name.chars().find(|c| FORBIDDEN_SHEET_CHARS.contains(c)) {
        Some(format!("contains `{c}`"))
    } else if name.starts_with('\'') || name.ends_with('\'') {
        Some("must not start or end with an apostrophe".to_owned())
    } else {
        None
    };
    match problem {
        Some(p) => Err(Error::Config(format!("invalid sheet name `{name}`: {p}"))),
        None => Ok(()),
    }
}

/// Comma list to trimmed, non-empty entries; `None` if nothing is left.
fn split_list(s: &str) -> Option<Vec<String>> {
    let items: Vec<String> = s
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    (!items.is_empty()).then_some(items)
}
