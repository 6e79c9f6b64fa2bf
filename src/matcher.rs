//! Keyword matching over table rows.

use crate::error::{Error, Result};
use crate::keywords::{Keyword, KeywordSet, normalize};
use crate::table::{Row, Table};

/// A row that contained at least one keyword.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub row: Row,
    /// Distinct matches in keyword-set order, original spelling.
    pub keywords: Vec<String>,
    /// Searched columns holding at least one match, in header order.
    pub columns: Vec<String>,
    /// 0-based position among the table's data rows.
    pub index: usize,
}

impl MatchResult {
    pub fn keywords_display(&self) -> String {
        self.keywords.join(", ")
    }

    pub fn columns_display(&self) -> String {
        self.columns.join(", ")
    }
}

/// Matcher bound to one table's columns.
#[derive(Debug, Clone)]
pub struct RowMatcher {
    /// Searched column indices, ascending.
    targets: Vec<usize>,
    names: Vec<String>,
}

impl RowMatcher {
    /// Resolves the column filter against the header. Unknown names fail here,
    /// once, instead of being skipped per row.
    pub fn new(table: &Table, columns: Option<&[String]>) -> Result<Self> {
        let targets = match columns {
            Some(names) if !names.is_empty() => {
                let missing: Vec<&str> = names
                    .iter()
                    .filter(|n| table.position(n).is_none())
                    .map(String::as_str)
                    .collect();
                if !missing.is_empty() {
                    return Err(Error::Config(format!(
                        "unknown column(s) {}; available: {}",
                        quote_list(&missing),
                        quote_list(&table.columns().iter().map(String::as_str).collect::<Vec<_>>())
                    )));
                }
                let mut targets: Vec<usize> = names.iter().filter_map(|n| table.position(n)).collect();
                targets.sort_unstable();
                targets.dedup();
                targets
            }
            _ => (0..table.columns().len()).collect(),
        };
        let names = targets
            .iter()
            .map(|&i| table.columns()[i].clone())
            .collect();
        Ok(Self { targets, names })
    }

    pub fn targets(&self) -> &[usize] {
        &self.targets
    }

    /// Normalized non-blank target cells, tagged with their position in `targets`.
    fn searched_cells(&self, row: &Row) -> Vec<(usize, String)> {
        self.targets
            .iter()
            .enumerate()
            .map(|(t, &i)| (t, normalize(&row.cell(i).to_string())))
            .filter(|(_, s)| !s.is_empty())
            .collect()
    }

    /// Keywords found in the row's target cells, with the columns they were
    /// found in. `None` when nothing matches.
    pub fn match_row(&self, index: usize, row: &Row, keywords: &KeywordSet) -> Option<MatchResult> {
        let cells = self.searched_cells(row);
        let mut hits: Vec<&Keyword> = Vec::new();
        let mut hit_cols = vec![false; self.targets.len()];
        for kw in keywords {
            let mut found = false;
            for (t, cell) in &cells {
                if cell.contains(kw.normalized()) {
                    hit_cols[*t] = true;
                    found = true;
                }
            }
            if found {
                hits.push(kw);
            }
        }
        if hits.is_empty() {
            return None;
        }
        Some(MatchResult {
            row: row.clone(),
            keywords: hits.into_iter().map(|k| k.original().to_owned()).collect(),
            columns: self
                .names
                .iter()
                .zip(hit_cols)
                .filter_map(|(name, hit)| hit.then(|| name.clone()))
                .collect(),
            index,
        })
    }

    /// All matching rows of `table`, in source order.
    pub fn scan(&self, table: &Table, keywords: &KeywordSet) -> Vec<MatchResult> {
        table
            .rows()
            .iter()
            .enumerate()
            .filter_map(|(i, row)| self.match_row(i, row, keywords))
            .collect()
    }
}

fn quote_list(names: &[&str]) -> String {
    names
        .iter()
        .map(|n| format!("`{n}`"))
        .collect::<Vec<_>>()
        .join(", ")
}
