//! Run controller: load -> match -> aggregate -> finalize.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use log::{debug, info, warn};

use crate::aggregator::{Aggregator, TRACKING_COLUMNS};
use crate::config::RunConfig;
use crate::error::{Error, Result, RunError, Stage};
use crate::keywords::KeywordSet;
use crate::matcher::{MatchResult, RowMatcher};
use crate::store::SheetStore;
use crate::table::Table;

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Loading,
    Matching,
    Aggregating,
    Finalizing,
    Done,
    Failed,
}

impl RunState {
    /// Successor on success; `None` once terminal.
    pub fn next(self) -> Option<RunState> {
        match self {
            RunState::Idle => Some(RunState::Loading),
            RunState::Loading => Some(RunState::Matching),
            RunState::Matching => Some(RunState::Aggregating),
            RunState::Aggregating => Some(RunState::Finalizing),
            RunState::Finalizing => Some(RunState::Done),
            RunState::Done | RunState::Failed => None,
        }
    }

    pub fn stage(self) -> Option<Stage> {
        match self {
            RunState::Loading => Some(Stage::Loading),
            RunState::Matching => Some(Stage::Matching),
            RunState::Aggregating => Some(Stage::Aggregating),
            RunState::Finalizing => Some(Stage::Finalizing),
            RunState::Idle | RunState::Done | RunState::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed)
    }
}

/// Totals reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub files: usize,
    pub rows_scanned: usize,
    pub matches: usize,
    pub written: usize,
    pub dry_run: bool,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned {} row(s) in {} file(s): {} match(es), {} written",
            self.rows_scanned, self.files, self.matches, self.written
        )?;
        if self.dry_run {
            write!(f, " (dry run)")?;
        }
        Ok(())
    }
}

/// One loaded input sheet with its resolved matcher.
struct Input {
    /// `file` or `file:sheet`; prefixes the row number in the source column.
    label: String,
    table: Table,
    matcher: RowMatcher,
}

struct Loaded {
    files: usize,
    inputs: Vec<Input>,
    keywords: KeywordSet,
}

struct Matched {
    label: String,
    columns: Vec<String>,
    hits: Vec<MatchResult>,
}

/// Drives one run. Consumed by [`Runner::run`], so a run cannot be repeated.
pub struct Runner<'a, S: SheetStore> {
    config: &'a RunConfig,
    store: &'a S,
    state: RunState,
}

impl<'a, S: SheetStore> Runner<'a, S> {
    pub fn new(config: &'a RunConfig, store: &'a S) -> Self {
        Self {
            config,
            store,
            state: RunState::Idle,
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.state.next() {
            debug!("{:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn fail(&mut self, source: Error) -> RunError {
        let stage = self.state.stage().unwrap_or(Stage::Loading);
        debug!("{:?} -> {:?}", self.state, RunState::Failed);
        self.state = RunState::Failed;
        RunError { stage, source }
    }

    /// Runs every stage once.
    pub fn run(mut self) -> std::result::Result<Summary, RunError> {
        self.advance();
        let Loaded {
            files,
            inputs,
            keywords,
        } = self.load().map_err(|e| self.fail(e))?;

        self.advance();
        let rows_scanned = inputs.iter().map(|i| i.table.rows().len()).sum();
        let matched = self.match_inputs(&inputs, &keywords);
        let matches = matched.iter().map(|m| m.hits.len()).sum();

        self.advance();
        let aggregator = self.aggregate(&matched).map_err(|e| self.fail(e))?;

        self.advance();
        let done = aggregator
            .finalize(self.config.dry_run)
            .map_err(|e| self.fail(e))?;
        self.advance();

        let summary = Summary {
            files,
            rows_scanned,
            matches,
            written: done.written,
            dry_run: self.config.dry_run,
        };
        info!("{summary}");
        Ok(summary)
    }

    fn load(&self) -> Result<Loaded> {
        let paths = resolve_inputs(&self.config.input, &self.config.output)?;
        let mut inputs = Vec::with_capacity(paths.len());
        for path in &paths {
            if self.config.all_sheets {
                inputs.extend(self.load_all_sheets(path)?);
            } else {
                inputs.push(self.load_input(path)?);
            }
        }
        let keywords = KeywordSet::load(
            self.config.keywords.as_deref(),
            self.config.keywords_file.as_deref(),
        )?;
        info!("{} keyword(s) loaded", keywords.len());
        Ok(Loaded {
            files: paths.len(),
            inputs,
            keywords,
        })
    }

    fn load_input(&self, path: &Path) -> Result<Input> {
        let grid = self
            .store
            .read_sheet(path, self.config.input_sheet.as_deref())
            .map_err(|e| Error::io(path, e))?;
        let grid = match (grid, self.config.input_sheet.as_deref()) {
            (Some(grid), _) => grid,
            (None, Some(name)) => {
                return Err(Error::Config(format!(
                    "sheet `{name}` not found in {}",
                    path.display()
                )));
            }
            (None, None) => return Err(Error::io(path, anyhow!("workbook has no sheets"))),
        };

        let table = Table::from_input_grid(grid)?;
        let matcher = RowMatcher::new(&table, self.config.columns.as_deref())
            .map_err(|e| match e {
                Error::Config(msg) => Error::Config(format!("{}: {msg}", path.display())),
                other => other,
            })?;
        self.prepare(path, file_label(path), table, matcher)
    }

    /// Every sheet of `path` that has a header. Sheets lacking a requested
    /// column are skipped; it is an error only when no sheet has them.
    fn load_all_sheets(&self, path: &Path) -> Result<Vec<Input>> {
        let file = file_label(path);
        let names = self
            .store
            .sheet_names(path)
            .map_err(|e| Error::io(path, e))?;
        if names.is_empty() {
            return Err(Error::io(path, anyhow!("workbook has no sheets")));
        }

        let mut inputs = Vec::new();
        let mut unmatched = Vec::new();
        for name in names {
            let Some(grid) = self
                .store
                .read_sheet(path, Some(name.as_str()))
                .map_err(|e| Error::io(path, e))?
            else {
                continue;
            };
            let table = Table::from_input_grid(grid)?;
            if table.header_row().is_none() {
                debug!("{file}:{name}: empty sheet skipped");
                continue;
            }
            let matcher = match RowMatcher::new(&table, self.config.columns.as_deref()) {
                Ok(m) => m,
                Err(Error::Config(msg)) => {
                    warn!("{file}:{name}: skipped, {msg}");
                    unmatched.push(name);
                    continue;
                }
                Err(other) => return Err(other),
            };
            inputs.push(self.prepare(path, format!("{file}:{name}"), table, matcher)?);
        }

        if inputs.is_empty() && !unmatched.is_empty() {
            return Err(Error::Config(format!(
                "{}: no sheet has the requested column(s); checked {}",
                path.display(),
                unmatched.join(", ")
            )));
        }
        Ok(inputs)
    }

    fn prepare(&self, path: &Path, label: String, table: Table, matcher: RowMatcher) -> Result<Input> {
        if let Some(clash) = TRACKING_COLUMNS
            .iter()
            .find(|c| table.position(c).is_some())
        {
            return Err(Error::Schema(format!(
                "{} already has a `{clash}` column, which is reserved for match tracking",
                path.display()
            )));
        }
        info!(
            "{label}: {} row(s), {} column(s)",
            table.rows().len(),
            table.columns().len()
        );
        Ok(Input {
            label,
            table,
            matcher,
        })
    }

    fn match_inputs(&self, inputs: &[Input], keywords: &KeywordSet) -> Vec<Matched> {
        inputs
            .iter()
            .map(|input| {
                let hits = input.matcher.scan(&input.table, keywords);
                info!("{}: {} match(es)", input.label, hits.len());
                Matched {
                    label: input.label.clone(),
                    columns: input.table.columns().to_vec(),
                    hits,
                }
            })
            .collect()
    }

    fn aggregate(&self, matched: &[Matched]) -> Result<Aggregator<'a, S>> {
        let mut aggregator = Aggregator::open(self.store, &self.config.output, &self.config.sheet)?;
        for m in matched {
            for hit in &m.hits {
                aggregator.push(&m.columns, &m.label, hit);
            }
        }
        Ok(aggregator)
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Input files in processing order. A directory yields its `*.xlsx` files
/// sorted by name, without Excel lock files and without the output itself.
pub fn resolve_inputs(input: &Path, output: &Path) -> Result<Vec<PathBuf>> {
    if !input.is_dir() {
        return Ok(vec![input.to_path_buf()]);
    }

    let output = fs::canonicalize(output).ok();
    let mut files = Vec::new();
    for entry in fs::read_dir(input).map_err(|e| Error::io(input, e))? {
        let path = entry.map_err(|e| Error::io(input, e))?.path();
        let is_xlsx = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"));
        if !is_xlsx || !path.is_file() {
            continue;
        }
        let name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        if name.as_deref().is_some_and(|n| n.starts_with("~$")) {
            warn!("skipping lock file {}", path.display());
            continue;
        }
        if output.is_some() && fs::canonicalize(&path).ok() == output {
            debug!("skipping output workbook {}", path.display());
            continue;
        }
        files.push(path);
    }
    files.sort();

    if files.is_empty() {
        return Err(Error::Config(format!(
            "no .xlsx files found in {}",
            input.display()
        )));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::table::CellValue;
    use crate::xlsx::{GridRow, SheetGrid};

    fn text_row(number: u32, cells: &[&str]) -> GridRow {
        GridRow {
            number,
            cells: cells.iter().map(|s| CellValue::from_text(s)).collect(),
        }
    }

    fn failing_input() -> SheetGrid {
        SheetGrid {
            sheet: "Sheet1".into(),
            rows: vec![
                text_row(1, &["Message", "Details"]),
                text_row(2, &["fail: disk", "none"]),
                text_row(3, &["all good", "fail later"]),
                text_row(4, &["FAIL: network", ""]),
            ],
        }
    }

    #[test]
    fn state_machine_has_no_skips() {
        let mut s = RunState::Idle;
        let mut seen = vec![s];
        while let Some(n) = s.next() {
            seen.push(n);
            s = n;
        }
        assert_eq!(
            seen,
            [
                RunState::Idle,
                RunState::Loading,
                RunState::Matching,
                RunState::Aggregating,
                RunState::Finalizing,
                RunState::Done
            ]
        );
        assert!(RunState::Failed.is_terminal());
        assert_eq!(RunState::Failed.next(), None);
    }

    #[test]
    fn restricted_column_run_appends_two_rows() {
        let store = MemoryStore::default().with_sheet("in.xlsx", failing_input());
        let config = RunConfig::new("in.xlsx", "out.xlsx")
            .with_keywords("fail")
            .with_columns("Message");

        let summary = Runner::new(&config, &store).run().unwrap();
        assert_eq!(
            summary,
            Summary {
                files: 1,
                rows_scanned: 3,
                matches: 2,
                written: 2,
                dry_run: false
            }
        );

        let out = store.sheet("out.xlsx", "results").unwrap();
        assert_eq!(
            out.rows[0],
            text_row(1, &["Message", "Details", "matched_keyword", "matched_column", "source"])
        );
        assert_eq!(
            out.rows[1],
            text_row(2, &["fail: disk", "none", "fail", "Message", "in.xlsx:2"])
        );
        assert_eq!(
            out.rows[2],
            text_row(3, &["FAIL: network", "", "fail", "Message", "in.xlsx:4"])
        );
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let store = MemoryStore::default().with_sheet("in.xlsx", failing_input());
        let config = RunConfig::new("in.xlsx", "out.xlsx")
            .with_keywords("fail")
            .with_dry_run(true);

        let summary = Runner::new(&config, &store).run().unwrap();
        assert_eq!(summary.matches, 3);
        assert_eq!(summary.written, 0);
        assert!(summary.to_string().ends_with("(dry run)"));
        assert_eq!(*store.writes.borrow(), 0);
    }

    #[test]
    fn unknown_column_fails_while_loading() {
        let store = MemoryStore::default().with_sheet("in.xlsx", failing_input());
        let config = RunConfig::new("in.xlsx", "out.xlsx")
            .with_keywords("fail")
            .with_columns("Foo");

        let err = Runner::new(&config, &store).run().unwrap_err();
        assert_eq!(err.stage, Stage::Loading);
        assert!(matches!(err.source, Error::Config(_)));
        assert_eq!(*store.writes.borrow(), 0);
    }

    #[test]
    fn blank_keywords_fail_while_loading() {
        let store = MemoryStore::default().with_sheet("in.xlsx", failing_input());
        let config = RunConfig::new("in.xlsx", "out.xlsx").with_keywords(" , ");

        let err = Runner::new(&config, &store).run().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn tracking_column_in_input_is_schema_error() {
        let grid = SheetGrid {
            sheet: "Sheet1".into(),
            rows: vec![text_row(1, &["Message", "matched_column"]), text_row(2, &["fail", "x"])],
        };
        let store = MemoryStore::default().with_sheet("in.xlsx", grid);
        let config = RunConfig::new("in.xlsx", "out.xlsx").with_keywords("fail");

        let err = Runner::new(&config, &store).run().unwrap_err();
        assert!(matches!(err.source, Error::Schema(_)));
    }

    #[test]
    fn ambiguous_output_fails_while_aggregating() {
        let existing = SheetGrid {
            sheet: "results".into(),
            rows: vec![text_row(1, &["A", "A"])],
        };
        let store = MemoryStore::default()
            .with_sheet("in.xlsx", failing_input())
            .with_sheet("out.xlsx", existing.clone());
        let config = RunConfig::new("in.xlsx", "out.xlsx").with_keywords("fail");

        let err = Runner::new(&config, &store).run().unwrap_err();
        assert_eq!(err.stage, Stage::Aggregating);
        assert_eq!(err.exit_code(), 4);
        assert_eq!(store.sheet("out.xlsx", "results"), Some(existing));
    }

    #[test]
    fn failed_write_is_io_error_while_finalizing() {
        let existing = SheetGrid {
            sheet: "results".into(),
            rows: vec![text_row(1, &["Message"]), text_row(2, &["old"])],
        };
        let store = MemoryStore::default()
            .with_sheet("in.xlsx", failing_input())
            .with_sheet("out.xlsx", existing.clone())
            .read_only();
        let config = RunConfig::new("in.xlsx", "out.xlsx").with_keywords("fail");

        let err = Runner::new(&config, &store).run().unwrap_err();
        assert_eq!(err.stage, Stage::Finalizing);
        assert!(matches!(err.source, Error::Io { .. }));
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().starts_with("IOError during finalizing"), "{err}");
        assert_eq!(*store.writes.borrow(), 0);
        assert_eq!(store.sheet("out.xlsx", "results"), Some(existing));
    }

    fn two_sheet_input() -> MemoryStore {
        MemoryStore::default()
            .with_sheet("in.xlsx", failing_input())
            .with_sheet(
                "in.xlsx",
                SheetGrid {
                    sheet: "Empty".into(),
                    rows: Vec::new(),
                },
            )
            .with_sheet(
                "in.xlsx",
                SheetGrid {
                    sheet: "Ops".into(),
                    rows: vec![
                        text_row(1, &["Remarks", "Message"]),
                        text_row(2, &["ok", "pump fail"]),
                    ],
                },
            )
    }

    #[test]
    fn all_sheets_label_sources_with_sheet_name() {
        let store = two_sheet_input();
        let config = RunConfig::new("in.xlsx", "out.xlsx")
            .with_keywords("fail")
            .with_all_sheets(true);

        let summary = Runner::new(&config, &store).run().unwrap();
        assert_eq!(summary.files, 1);
        assert_eq!(summary.rows_scanned, 4);
        assert_eq!(summary.matches, 4);

        let out = store.sheet("out.xlsx", "results").unwrap();
        assert_eq!(
            out.rows[0],
            text_row(
                1,
                &["Message", "Details", "matched_keyword", "matched_column", "source", "Remarks"]
            )
        );
        assert_eq!(
            out.rows[2],
            text_row(3, &["all good", "fail later", "fail", "Details", "in.xlsx:Sheet1:3"])
        );
        assert_eq!(
            out.rows[4],
            text_row(5, &["pump fail", "", "fail", "Message", "in.xlsx:Ops:2", "ok"])
        );
    }

    #[test]
    fn all_sheets_skip_sheets_without_filter_columns() {
        let store = two_sheet_input();
        let config = RunConfig::new("in.xlsx", "out.xlsx")
            .with_keywords("fail")
            .with_columns("Remarks")
            .with_all_sheets(true);
        let summary = Runner::new(&config, &store).run().unwrap();
        assert_eq!(summary.rows_scanned, 1);
        assert_eq!(summary.matches, 0);

        let config = RunConfig::new("in.xlsx", "out.xlsx")
            .with_keywords("fail")
            .with_columns("Foo")
            .with_all_sheets(true);
        let err = Runner::new(&config, &store).run().unwrap_err();
        assert_eq!(err.stage, Stage::Loading);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_input_sheet_is_config_error() {
        let store = MemoryStore::default().with_sheet("in.xlsx", failing_input());
        let mut config = RunConfig::new("in.xlsx", "out.xlsx").with_keywords("fail");
        config.input_sheet = Some("Data".into());

        let err = Runner::new(&config, &store).run().unwrap_err();
        assert!(matches!(err.source, Error::Config(_)));
    }

    #[test]
    fn directory_inputs_sorted_without_lock_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["b.xlsx", "a.xlsx", "~$a.xlsx", "notes.txt", "out.xlsx"] {
            fs::write(dir.path().join(name), b"")?;
        }
        let out = dir.path().join("out.xlsx");

        let files = resolve_inputs(dir.path(), &out)?;
        let names: Vec<_> = files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.xlsx", "b.xlsx"]);

        let empty = tempfile::tempdir()?;
        let err = resolve_inputs(empty.path(), &out).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        Ok(())
    }
}
